// External crates
use anyhow::{Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, params};
use sortie_records::PlayerData;
use std::path::Path;
use std::sync::Mutex;

/// Storage seam for accepted records. The production backend is an external
/// concern; SQLite here is the development default.
pub trait RecordStore: Send + Sync {
    fn insert_player_data(&self, record: &PlayerData) -> Result<()>;
    fn player_data_count(&self) -> Result<i64>;
}

/// Single-writer SQLite store. The connection sits behind a mutex; the
/// service's write volume is one row per completed mission, so contention
/// is not a concern.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS player_data (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                player      TEXT NOT NULL,
                mission     TEXT NOT NULL,
                kind        TEXT,
                success     INTEGER NOT NULL,
                started_at  TEXT NOT NULL,
                ended_at    TEXT NOT NULL,
                stats       TEXT NOT NULL,
                received_at TEXT NOT NULL
            )",
            (),
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("record store mutex poisoned"))
    }
}

impl RecordStore for SqliteStore {
    fn insert_player_data(&self, record: &PlayerData) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO player_data
                (player, mission, kind, success, started_at, ended_at, stats, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.player,
                record.mission,
                record.kind,
                record.success as i64,
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
                serde_json::to_string(&record.stats)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn player_data_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM player_data", (), |row| row.get(0))?;
        Ok(count)
    }
}
