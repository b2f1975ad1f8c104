// External crates
use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntGauge, TextEncoder, register_int_counter, register_int_gauge,
};

lazy_static! {
    // ======== Pipeline Metrics ========

    /// Lines consumed from the client log
    pub static ref LINES_READ_TOTAL: IntCounter = register_int_counter!(
        "sortie_agent_lines_read_total",
        "Client log lines consumed by the parser"
    ).unwrap();

    /// Lines the classifier could not make sense of
    pub static ref PARSE_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "sortie_agent_parse_errors_total",
        "Client log lines that failed classification"
    ).unwrap();

    /// Completed missions emitted as PlayerData records
    pub static ref RECORDS_EMITTED_TOTAL: IntCounter = register_int_counter!(
        "sortie_agent_records_emitted_total",
        "PlayerData records emitted by the mission parser"
    ).unwrap();

    // ======== Sync Metrics ========

    /// Records accepted by the data service
    pub static ref RECORDS_SYNCED_TOTAL: IntCounter = register_int_counter!(
        "sortie_agent_records_synced_total",
        "PlayerData records accepted by the data service"
    ).unwrap();

    /// Records permanently rejected by the data service
    pub static ref RECORDS_REJECTED_TOTAL: IntCounter = register_int_counter!(
        "sortie_agent_records_rejected_total",
        "PlayerData records permanently rejected by the data service"
    ).unwrap();

    /// Transient transport failures that triggered a retry
    pub static ref SYNC_RETRIES_TOTAL: IntCounter = register_int_counter!(
        "sortie_agent_sync_retries_total",
        "Send attempts retried after a transient transport failure"
    ).unwrap();

    // ======== Cursor Metrics ========

    /// Last committed byte offset in the tailed log
    pub static ref CURSOR_BYTE_OFFSET: IntGauge = register_int_gauge!(
        "sortie_agent_cursor_byte_offset",
        "Last committed byte offset in the tailed log file"
    ).unwrap();

    /// Last committed line number in the tailed log
    pub static ref CURSOR_LINE_NUMBER: IntGauge = register_int_gauge!(
        "sortie_agent_cursor_line_number",
        "Last committed line number in the tailed log file"
    ).unwrap();
}

/// Render every registered metric in Prometheus text format. Used by the
/// interactive `status metrics` command.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        return format!("failed to encode metrics: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
