// Local crates
use crate::cursor::store::{CursorStore, LogPosition};
use crate::helpers::load_config::{ParserConfig, WatchConfig};
use crate::metrics::metrics::{LINES_READ_TOTAL, RECORDS_EMITTED_TOTAL};
use crate::parser::parser::{MissionParser, ParseOutcome};
use crate::sync::client::SyncItem;
use crate::tailer::tailer::{TailEvent, Tailer, inode_of};
use crate::watcher::watcher::{WatchEvent, watch_log_file};

// External crates
use anyhow::{Context, Result};
use notify::RecommendedWatcher;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The single reader/parser pipeline for one log file.
///
/// Advances strictly sequentially: read a line, feed the state machine,
/// hand any finished record to the sync queue, and commit the cursor at the
/// safe points described on [`CursorStore`]. The cancellation token is
/// checked between lines only, so shutdown can never split a record.
pub struct Pipeline {
    log_path: PathBuf,
    poll_interval: Duration,
    parser: MissionParser,
    cursor: Arc<Mutex<CursorStore>>,
    sync_tx: mpsc::Sender<SyncItem>,
    /// Shared with the sync worker; counts emitted-but-unacknowledged
    /// records. Idle commits are gated on it reaching zero.
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
    watch_events: ReceiverStream<WatchEvent>,
    // Dropping the watcher stops the event stream, so it lives here.
    _watcher: RecommendedWatcher,
    tailer: Option<Tailer>,
    resume: Option<LogPosition>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("log_path", &self.log_path)
            .field("resume", &self.resume)
            .finish()
    }
}

impl Pipeline {
    pub async fn new(
        watch: &WatchConfig,
        parser: &ParserConfig,
        cursor: Arc<Mutex<CursorStore>>,
        sync_tx: mpsc::Sender<SyncItem>,
        pending: Arc<AtomicUsize>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let log_path = PathBuf::from(&watch.log_file);
        let (watcher, watch_rx) = watch_log_file(&log_path)?;

        let mut resume = cursor.lock().await.position(&log_path);

        // Truncated while we were down: the committed offset points past
        // the end of the file, so the checkpoint is worthless.
        if let Some(position) = resume
            && let Ok(metadata) = std::fs::metadata(&log_path)
            && metadata.len() < position.byte_offset
        {
            warn!(
                file = %log_path.display(),
                committed = position.byte_offset,
                file_len = metadata.len(),
                "Log file is shorter than the committed cursor; re-parsing from the start"
            );
            cursor
                .lock()
                .await
                .reset(&log_path)
                .context("cursor reset failed")?;
            resume = None;
        }

        Ok(Self {
            log_path,
            poll_interval: Duration::from_millis(watch.poll_interval_ms),
            parser: MissionParser::new(parser.error_threshold),
            cursor,
            sync_tx,
            pending,
            cancel,
            watch_events: ReceiverStream::new(watch_rx),
            _watcher: watcher,
            tailer: None,
            resume,
        })
    }

    /// Drive the pipeline until cancellation, a `STOP` outcome, or a fatal
    /// cursor failure.
    pub async fn run(mut self) -> Result<()> {
        info!(file = %self.log_path.display(), "Pipeline started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let event = match self.tailer.as_mut() {
                Some(tailer) => tailer
                    .next_event()
                    .await
                    .context("reading the client log")?,
                None => {
                    if !self.try_open().await? {
                        self.wait_for_activity().await;
                    }
                    continue;
                }
            };

            match event {
                TailEvent::Line { text, position } => {
                    if self.handle_line(&text, &position).await? == Flow::Stop {
                        break;
                    }
                }
                TailEvent::Eof => self.wait_for_activity().await,
                TailEvent::Truncated => self.skip_to_start().await?,
                TailEvent::Rotated => self.reopen_from_start("log file rotated").await?,
            }
        }

        info!(file = %self.log_path.display(), "Pipeline stopped");
        Ok(())
    }

    async fn handle_line(&mut self, text: &str, position: &LogPosition) -> Result<Flow> {
        LINES_READ_TOTAL.inc();
        let step = self.parser.parse_line(text, position);

        if let Some(record) = step.record {
            RECORDS_EMITTED_TOTAL.inc();
            self.pending.fetch_add(1, Ordering::SeqCst);
            let item = SyncItem {
                record,
                position: *position,
            };
            if self.sync_tx.send(item).await.is_err() {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("sync queue closed while a record was pending");
            }
        }

        match step.outcome {
            ParseOutcome::Ok
            | ParseOutcome::Skip
            | ParseOutcome::StartMission
            | ParseOutcome::EndMission => {
                self.maybe_commit_idle(position).await?;
                Ok(Flow::Continue)
            }

            ParseOutcome::Stop => {
                warn!(
                    line_number = position.line_number,
                    "Parser stopped this session; cursor stays at the last checkpoint"
                );
                Ok(Flow::Stop)
            }

            ParseOutcome::FinishLog => {
                self.maybe_commit_idle(position).await?;
                info!(file = %self.log_path.display(), "Client log complete; waiting for rotation");
                self.await_rotation().await?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Commit the position just consumed, but only at a safe point: parser
    /// idle (no half-read mission to replay) and no record awaiting its
    /// acknowledgement from the data service.
    async fn maybe_commit_idle(&mut self, position: &LogPosition) -> Result<()> {
        if self.parser.is_idle() && self.pending.load(Ordering::SeqCst) == 0 {
            self.cursor
                .lock()
                .await
                .commit(&self.log_path, *position)
                .context("cursor commit failed; halting session")?;
        }
        Ok(())
    }

    async fn try_open(&mut self) -> Result<bool> {
        match Tailer::open(&self.log_path, self.resume).await {
            Ok(tailer) => {
                info!(
                    file = %self.log_path.display(),
                    byte_offset = tailer.position().byte_offset,
                    "Tailing client log"
                );
                self.tailer = Some(tailer);
                self.resume = None;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.resume.take().is_some() {
                    // The generation the checkpoint belonged to is gone.
                    warn!(
                        file = %self.log_path.display(),
                        "Committed log file is gone; will parse the next one from the start"
                    );
                    self.reset_cursor().await?;
                }
                Ok(false)
            }
            Err(e) => Err(e).context("opening the client log"),
        }
    }

    async fn wait_for_activity(&mut self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.watch_events.next() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }

    /// Truncation: the file shrank below our offset. Discard buffered
    /// progress (`SKIP`) and re-parse this generation from offset 0.
    async fn skip_to_start(&mut self) -> Result<()> {
        let outcome = self.parser.rewind();
        warn!(
            file = %self.log_path.display(),
            ?outcome,
            "Log file truncated below the committed offset; re-parsing from the start"
        );
        self.reset_cursor().await?;
        self.tailer = Some(
            Tailer::open(&self.log_path, None)
                .await
                .context("reopening the truncated log")?,
        );
        Ok(())
    }

    /// Rotation: the path names a different (or no) file now. Forget this
    /// generation and let `try_open` pick up the new one from offset 0.
    async fn reopen_from_start(&mut self, why: &str) -> Result<()> {
        info!(file = %self.log_path.display(), why, "Reopening from the start");
        self.parser.rewind();
        self.reset_cursor().await?;
        self.tailer = None;
        Ok(())
    }

    /// After `FINISH_LOG`: stop consuming this generation and wait until
    /// rotation (inode change, shrink, or disappearance) before reading
    /// anything again.
    async fn await_rotation(&mut self) -> Result<()> {
        let Some(tailer) = self.tailer.as_ref() else {
            return Ok(());
        };
        let (inode, offset) = (tailer.inode(), tailer.position().byte_offset);

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.wait_for_activity().await;

            match tokio::fs::metadata(&self.log_path).await {
                Ok(metadata) => {
                    if inode_of(&metadata) != inode || metadata.len() < offset {
                        return self.reopen_from_start("rotation after session end").await;
                    }
                }
                Err(_) => {
                    return self.reopen_from_start("log removed after session end").await;
                }
            }
        }
    }

    async fn reset_cursor(&self) -> Result<()> {
        self.cursor
            .lock()
            .await
            .reset(&self.log_path)
            .context("cursor reset failed; halting session")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const MISSION_LOG: &str = "\
2026-03-01T18:04:11.202Z Client [Info]: MissionStart mission=\"Relay Defense\" kind=defense player=Vor
2026-03-01T18:04:15Z Client [Info]: MissionStat x=1
2026-03-01T18:05:15Z Client [Info]: MissionStat x=2
2026-03-01T18:06:02Z Client [Info]: MissionEnd result=success
";

    struct Fixture {
        dir: tempfile::TempDir,
        log_path: PathBuf,
        cursor: Arc<Mutex<CursorStore>>,
        pending: Arc<AtomicUsize>,
        cancel: CancellationToken,
        rx: mpsc::Receiver<SyncItem>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    async fn start_pipeline(content: &str, error_threshold: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("client.log");
        std::fs::write(&log_path, content).unwrap();

        start_pipeline_in(dir, log_path, error_threshold).await
    }

    async fn start_pipeline_in(
        dir: tempfile::TempDir,
        log_path: PathBuf,
        error_threshold: u32,
    ) -> Fixture {
        let watch = WatchConfig {
            log_file: log_path.to_string_lossy().into_owned(),
            cursor_path: dir
                .path()
                .join("cursor.json")
                .to_string_lossy()
                .into_owned(),
            poll_interval_ms: 50,
        };
        let parser = ParserConfig { error_threshold };

        let cursor = Arc::new(Mutex::new(
            CursorStore::load(Path::new(&watch.cursor_path)).unwrap(),
        ));
        let pending = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(8);

        let pipeline = Pipeline::new(
            &watch,
            &parser,
            cursor.clone(),
            tx,
            pending.clone(),
            cancel.clone(),
        )
        .await
        .unwrap();
        let handle = tokio::spawn(pipeline.run());

        Fixture {
            dir,
            log_path,
            cursor,
            pending,
            cancel,
            rx,
            handle,
        }
    }

    async fn recv_record(fixture: &mut Fixture) -> SyncItem {
        tokio::time::timeout(Duration::from_secs(5), fixture.rx.recv())
            .await
            .expect("no record within 5s")
            .expect("sync channel closed")
    }

    /// Stand-in for the sync worker's acknowledgement path.
    async fn ack(fixture: &Fixture, item: &SyncItem) {
        fixture
            .cursor
            .lock()
            .await
            .commit(&fixture.log_path, item.position)
            .unwrap();
        fixture.pending.fetch_sub(1, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn mission_emits_one_record_and_commits_only_after_ack() {
        let mut fixture = start_pipeline(MISSION_LOG, 10).await;

        let item = recv_record(&mut fixture).await;
        assert_eq!(item.record.mission, "Relay Defense");
        assert_eq!(
            item.record.stats.get("x"),
            Some(&vec!["1".to_string(), "2".to_string()])
        );

        // Record emitted but unacknowledged: nothing may be committed.
        assert_eq!(
            fixture.cursor.lock().await.position(&fixture.log_path),
            None
        );

        ack(&fixture, &item).await;
        assert_eq!(
            fixture.cursor.lock().await.position(&fixture.log_path),
            Some(item.position)
        );

        fixture.cancel.cancel();
        fixture.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_mid_mission_keeps_cursor_at_last_checkpoint() {
        let mut log = String::from("2026-03-01T18:00:00Z Net [Debug]: heartbeat ok\n");
        log.push_str(
            "2026-03-01T18:04:11Z Client [Info]: MissionStart mission=Doomed player=Vor\n",
        );
        for _ in 0..5 {
            log.push_str("¤¤ unreadable garbage\n");
        }

        let mut fixture = start_pipeline(&log, 3).await;

        // STOP terminates the run loop on its own, without cancellation.
        fixture.handle.await.unwrap().unwrap();

        // No record was emitted, and the cursor sits on the heartbeat line
        // before the unfinished mission, not inside it.
        assert!(fixture.rx.try_recv().is_err());
        let committed = fixture
            .cursor
            .lock()
            .await
            .position(&fixture.log_path)
            .expect("heartbeat line should have committed");
        assert_eq!(committed.line_number, 1);

        fixture.cancel.cancel();
    }

    #[tokio::test]
    async fn unacknowledged_mission_replays_identically_after_restart() {
        let mut fixture = start_pipeline(MISSION_LOG, 10).await;

        let first = recv_record(&mut fixture).await;
        // Crash before the acknowledgement: no commit happens.
        fixture.cancel.cancel();
        fixture.handle.await.unwrap().unwrap();

        let Fixture { dir, log_path, .. } = fixture;
        let mut restarted = start_pipeline_in(dir, log_path, 10).await;

        let second = recv_record(&mut restarted).await;
        assert_eq!(first.record, second.record);
        assert_eq!(first.position, second.position);

        restarted.cancel.cancel();
        restarted.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn acknowledged_mission_is_not_replayed_after_restart() {
        let mut fixture = start_pipeline(MISSION_LOG, 10).await;

        let item = recv_record(&mut fixture).await;
        ack(&fixture, &item).await;
        fixture.cancel.cancel();
        fixture.handle.await.unwrap().unwrap();

        let Fixture { dir, log_path, .. } = fixture;
        let mut restarted = start_pipeline_in(dir, log_path, 10).await;

        // Nothing new to read: the record must not be emitted again.
        let outcome =
            tokio::time::timeout(Duration::from_millis(300), restarted.rx.recv()).await;
        assert!(outcome.is_err(), "acknowledged record was replayed");

        restarted.cancel.cancel();
        restarted.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lines_appended_after_eof_are_parsed() {
        let mut fixture = start_pipeline("", 10).await;

        // Give the pipeline a moment to reach EOF, then write a mission.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::OpenOptions::new()
            .append(true)
            .open(&fixture.log_path)
            .map(|mut f| {
                use std::io::Write as _;
                write!(f, "{MISSION_LOG}").unwrap();
            })
            .unwrap();

        let item = recv_record(&mut fixture).await;
        assert_eq!(item.record.mission, "Relay Defense");

        fixture.cancel.cancel();
        fixture.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn truncation_resets_cursor_and_reparses() {
        // Strictly longer than MISSION_LOG so the rewrite below is an
        // unambiguous shrink.
        let mut noise = String::new();
        for i in 0..8 {
            noise.push_str(&format!("2026-03-01T18:00:0{i}Z Net [Debug]: heartbeat ok\n"));
        }
        assert!(noise.len() > MISSION_LOG.len());
        let mut fixture = start_pipeline(&noise, 10).await;

        // Wait until the noise lines are committed.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let committed = fixture.cursor.lock().await.position(&fixture.log_path);
            if committed.map(|p| p.line_number) == Some(8) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "noise never committed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // Shrink the file; the tailer must skip to the start and the new
        // mission must come through.
        std::fs::write(&fixture.log_path, MISSION_LOG).unwrap();

        let item = recv_record(&mut fixture).await;
        assert_eq!(item.record.mission, "Relay Defense");

        fixture.cancel.cancel();
        fixture.handle.await.unwrap().unwrap();
    }
}
