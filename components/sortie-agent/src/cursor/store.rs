// Local crates
use crate::metrics::metrics::{CURSOR_BYTE_OFFSET, CURSOR_LINE_NUMBER};

// External crates
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read position inside one log file. The owning map key carries the path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub byte_offset: u64,
    pub line_number: u64,
}

/// On-disk shape of the cursor file: last safe position per log file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CursorDocument {
    files: HashMap<PathBuf, LogPosition>,
}

/// A commit that could not be persisted. This is the one fatal error class
/// in the pipeline: continuing after it would make the resume point
/// ambiguous on restart.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("failed to write cursor file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode cursor state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persisted resume cursors, one per tailed file.
///
/// Every commit rewrites the whole document through a temp file + rename so
/// a crash mid-write can never leave a half-written cursor behind. Commits
/// that would move a cursor backwards are ignored: the sync worker and the
/// parser loop both commit, and their positions may arrive out of order.
#[derive(Debug)]
pub struct CursorStore {
    path: PathBuf,
    state: CursorDocument,
}

impl CursorStore {
    /// Open the cursor file, starting fresh if it does not exist yet. An
    /// unreadable document is logged and discarded rather than trusted:
    /// re-parsing from the start is safe, resuming from garbage is not.
    pub fn load(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let state = match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(
                        cursor_file = %path.display(),
                        error = %e,
                        "Cursor file is corrupt; discarding and re-parsing from the start"
                    );
                    CursorDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CursorDocument::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    /// Last committed position for `file`, if any.
    pub fn position(&self, file: &Path) -> Option<LogPosition> {
        self.state.files.get(file).copied()
    }

    /// Persist `position` for `file`. Stale positions (at or below the
    /// current commit) are ignored so the cursor only moves forward.
    pub fn commit(&mut self, file: &Path, position: LogPosition) -> Result<(), CursorError> {
        if let Some(current) = self.state.files.get(file)
            && position.byte_offset <= current.byte_offset
        {
            debug!(
                file = %file.display(),
                committed = current.byte_offset,
                offered = position.byte_offset,
                "Ignoring stale cursor commit"
            );
            return Ok(());
        }

        self.state.files.insert(file.to_path_buf(), position);
        self.persist()?;

        CURSOR_BYTE_OFFSET.set(position.byte_offset as i64);
        CURSOR_LINE_NUMBER.set(position.line_number as i64);
        Ok(())
    }

    /// Forget the cursor for `file` (truncation or rotation detected) and
    /// persist the removal, so a crash right after still re-parses from 0.
    pub fn reset(&mut self, file: &Path) -> Result<(), CursorError> {
        if self.state.files.remove(file).is_some() {
            self.persist()?;
        }
        CURSOR_BYTE_OFFSET.set(0);
        CURSOR_LINE_NUMBER.set(0);
        Ok(())
    }

    fn persist(&self) -> Result<(), CursorError> {
        let encoded = serde_json::to_vec_pretty(&self.state)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, encoded).map_err(|source| CursorError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| CursorError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
