//! Sync client - responsibility and behavior
//!
//! Takes completed `PlayerData` records from the parser pipeline and
//! reliably forwards them to the data service's sync endpoint.
//!
//! Key responsibilities:
//! - Own a small bounded handoff channel so the parser never blocks on
//!   network I/O beyond enqueueing a record.
//! - Serialize all network calls per client instance, preserving record
//!   order across and within batches.
//! - Retry transient transport failures with exponential backoff + jitter,
//!   bounded by `sync.max_send_attempts`.
//! - Treat per-record rejections from the service as permanent: log the
//!   full record for manual recovery, never retry.
//! - Commit the record's log position only once the service has answered
//!   for it; an unacknowledged record never advances the cursor.

// Local crates
use crate::cursor::store::{CursorStore, LogPosition};
use crate::helpers::load_config::SyncConfig;
use crate::metrics::metrics::{
    RECORDS_REJECTED_TOTAL, RECORDS_SYNCED_TOTAL, SYNC_RETRIES_TOTAL,
};

// External crates
use rand::Rng;
use sortie_records::{CodecRegistry, RecordEnvelope, RecordStatus, SyncRecord, SyncRequest, SyncResponse};
use sortie_records::PlayerData;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// One record queued for delivery, with the position to commit once the
/// data service has answered for it.
#[derive(Debug, Clone)]
pub struct SyncItem {
    pub record: PlayerData,
    pub position: LogPosition,
}

/// State the worker shares with the rest of the agent.
#[derive(Debug)]
pub struct SyncShared {
    pub cursor: Arc<Mutex<CursorStore>>,
    pub log_file: PathBuf,
    /// Records emitted but not yet answered for. While non-zero, the parser
    /// loop must not commit idle positions past them.
    pub pending: Arc<AtomicUsize>,
    pub codecs: Arc<CodecRegistry>,
    pub client_version: String,
    /// Cancelled by the worker on a fatal cursor write failure.
    pub cancel: CancellationToken,
}

/// Handle to the background sync worker.
#[derive(Debug)]
pub struct SyncClient {
    sender: mpsc::Sender<SyncItem>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl SyncClient {
    /// Spawn the worker and return its handle.
    #[instrument(
        name = "sync_client::spawn",
        target = "sync::client",
        skip_all,
        level = "debug"
    )]
    pub fn spawn(config: SyncConfig, shared: SyncShared) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.send_timeout_ms))
            .build()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(run_worker(config, http, shared, rx, shutdown_rx));

        Ok(Self {
            sender: tx,
            shutdown_tx: Some(shutdown_tx),
            worker_handle: Some(handle),
        })
    }

    /// Producer-side handle for the pipeline. Sending applies backpressure
    /// when the queue is full.
    pub fn handle(&self) -> mpsc::Sender<SyncItem> {
        self.sender.clone()
    }

    /// Signal the worker to drain whatever is queued and stop, waiting at
    /// most `drain_timeout`. Expiry is logged, never escalated: the cursor
    /// was not advanced for anything unsent, so a restart replays it.
    #[instrument(
        name = "sync_client::shutdown",
        target = "sync::client",
        skip_all,
        level = "debug"
    )]
    pub async fn shutdown(mut self, drain_timeout: Duration) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.worker_handle.take() {
            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(_) => debug!("Sync worker drained and stopped"),
                Err(_) => warn!(
                    drain_timeout_ms = drain_timeout.as_millis() as u64,
                    "Sync drain timed out; unsent records will be replayed from the cursor on restart"
                ),
            }
        }
    }
}

/// Background worker loop. Owns the HTTP client; sends are strictly
/// sequential so response ordering equals emission ordering.
async fn run_worker(
    config: SyncConfig,
    http: reqwest::Client,
    shared: SyncShared,
    mut rx: mpsc::Receiver<SyncItem>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                // Drain everything already enqueued, then stop.
                let mut leftover = Vec::new();
                while let Ok(item) = rx.try_recv() {
                    leftover.push(item);
                }
                if !leftover.is_empty() {
                    info!(
                        queued = leftover.len(),
                        "Draining queued records before shutdown"
                    );
                    deliver_batch(&config, &http, &shared, leftover).await;
                }
                return;
            }

            maybe_item = rx.recv() => {
                match maybe_item {
                    Some(item) => deliver_batch(&config, &http, &shared, vec![item]).await,
                    None => return,
                }
            }
        }
    }
}

enum SendFailure {
    /// Worth retrying: connect errors, timeouts, 5xx, 429.
    Transient(String),
    /// Not worth retrying: protocol violations, other 4xx.
    Permanent(String),
}

/// Deliver one ordered batch, retrying transient failures. Every item is
/// settled exactly once before this returns: acknowledged (commit), dropped
/// with its full content logged, or left for replay (no commit).
async fn deliver_batch(
    config: &SyncConfig,
    http: &reqwest::Client,
    shared: &SyncShared,
    batch: Vec<SyncItem>,
) {
    // Encode up front; an encode failure is local and permanent.
    let mut pairs: Vec<(SyncItem, RecordEnvelope)> = Vec::with_capacity(batch.len());
    for item in batch {
        let record = SyncRecord::Player(item.record.clone());
        match RecordEnvelope::seal(&shared.codecs, &record) {
            Ok(envelope) => pairs.push((item, envelope)),
            Err(e) => {
                error!(
                    error = %e,
                    record = %record_json(&item.record),
                    "Failed to encode record; dropped for manual recovery"
                );
                RECORDS_REJECTED_TOTAL.inc();
                shared.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
    if pairs.is_empty() {
        return;
    }

    let request = SyncRequest {
        client_version: shared.client_version.clone(),
        records: pairs.iter().map(|(_, envelope)| envelope.clone()).collect(),
    };

    let mut attempt: u32 = 0;
    loop {
        match send_once(config, http, &request).await {
            Ok(response) => {
                settle_batch(shared, &pairs, &response.statuses).await;
                return;
            }

            Err(SendFailure::Transient(reason)) => {
                attempt += 1;
                if attempt >= config.max_send_attempts {
                    error!(
                        attempts = attempt,
                        reason = %reason,
                        records = %batch_json(&pairs),
                        "Transport retries exhausted; cursor not advanced, records replay on restart"
                    );
                    release_pending(shared, pairs.len());
                    return;
                }

                SYNC_RETRIES_TOTAL.inc();
                let delay = with_jitter(backoff_delay(config, attempt - 1), config.retry_jitter);
                warn!(
                    attempt,
                    reason = %reason,
                    retry_in_ms = delay.as_millis() as u64,
                    "Transient sync failure; backing off"
                );
                sleep(delay).await;
            }

            Err(SendFailure::Permanent(reason)) => {
                error!(
                    reason = %reason,
                    records = %batch_json(&pairs),
                    "Permanent sync failure; cursor not advanced, records logged for manual recovery"
                );
                release_pending(shared, pairs.len());
                return;
            }
        }
    }
}

/// One POST to the sync endpoint.
async fn send_once(
    config: &SyncConfig,
    http: &reqwest::Client,
    request: &SyncRequest,
) -> Result<SyncResponse, SendFailure> {
    let url = format!("{}/v1/sync", config.target_addr.trim_end_matches('/'));

    let response = http
        .post(&url)
        .json(request)
        .send()
        .await
        .map_err(|e| SendFailure::Transient(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        let body: SyncResponse = response
            .json()
            .await
            .map_err(|e| SendFailure::Permanent(format!("invalid response body: {e}")))?;
        if body.statuses.len() != request.records.len() {
            return Err(SendFailure::Permanent(format!(
                "service answered {} statuses for {} records",
                body.statuses.len(),
                request.records.len()
            )));
        }
        Ok(body)
    } else if status.is_server_error() || status.as_u16() == 429 {
        Err(SendFailure::Transient(format!("service returned {status}")))
    } else {
        Err(SendFailure::Permanent(format!("service returned {status}")))
    }
}

/// Apply the service's per-record verdicts. Acceptance and rejection both
/// count as an acknowledgement, so both commit the record's position; a
/// rejection is logged loudly first, nothing about it is silent.
async fn settle_batch(
    shared: &SyncShared,
    pairs: &[(SyncItem, RecordEnvelope)],
    statuses: &[RecordStatus],
) {
    for ((item, _), status) in pairs.iter().zip(statuses) {
        if status.accepted {
            RECORDS_SYNCED_TOTAL.inc();
            debug!(
                mission = %item.record.mission,
                byte_offset = item.position.byte_offset,
                "Record accepted by data service"
            );
        } else {
            RECORDS_REJECTED_TOTAL.inc();
            error!(
                reason = status.reason.as_deref().unwrap_or("unspecified"),
                record = %record_json(&item.record),
                "Record rejected by data service; dropped for manual recovery"
            );
        }

        let commit = {
            let mut cursor = shared.cursor.lock().await;
            cursor.commit(&shared.log_file, item.position)
        };
        if let Err(e) = commit {
            error!(
                error = %e,
                "Cursor commit failed after sync acknowledgement; halting session"
            );
            shared.cancel.cancel();
        }

        shared.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

fn release_pending(shared: &SyncShared, count: usize) {
    shared.pending.fetch_sub(count, Ordering::SeqCst);
}

fn record_json(record: &PlayerData) -> String {
    serde_json::to_string(record).unwrap_or_else(|_| format!("{record:?}"))
}

fn batch_json(pairs: &[(SyncItem, RecordEnvelope)]) -> String {
    let records: Vec<&PlayerData> = pairs.iter().map(|(item, _)| &item.record).collect();
    serde_json::to_string(&records).unwrap_or_else(|_| format!("{} records", pairs.len()))
}

/// Exponential backoff for the given 0-indexed retry, capped by config.
fn backoff_delay(config: &SyncConfig, retry: u32) -> Duration {
    let base = config.initial_retry_delay_ms as f64 * config.backoff_factor.powi(retry as i32);
    Duration::from_millis(base.min(config.max_retry_delay_ms as f64) as u64)
}

/// Randomize a delay into `[1 - jitter, 1 + jitter]` of itself so a fleet of
/// agents does not reconnect in lockstep.
fn with_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor: f64 = rand::rng().random_range(1.0 - jitter..=1.0 + jitter);
    delay.mul_f64(factor.max(0.0))
}
