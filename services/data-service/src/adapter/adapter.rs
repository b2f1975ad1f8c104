// External crates
use sortie_records::{CodecError, CodecRegistry, PlayerData, RecordEnvelope, SyncRecord};

/// Why an individual envelope was rejected. Rejections are always scoped to
/// one record; one bad envelope never fails its batch.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("{0}")]
    Invalid(String),
}

/// Decode one envelope through the registry and semantically validate the
/// result. The registry is keyed on the envelope's declared record type, so
/// unknown types fail here with a per-record error.
pub fn decode_record(
    codecs: &CodecRegistry,
    envelope: &RecordEnvelope,
) -> Result<PlayerData, AdapterError> {
    let SyncRecord::Player(record) = envelope.open(codecs)?;
    validate(&record)?;
    Ok(record)
}

fn validate(record: &PlayerData) -> Result<(), AdapterError> {
    if record.player.trim().is_empty() {
        return Err(AdapterError::Invalid("player must not be empty".into()));
    }
    if record.mission.trim().is_empty() {
        return Err(AdapterError::Invalid("mission must not be empty".into()));
    }
    if record.ended_at < record.started_at {
        return Err(AdapterError::Invalid(
            "mission ends before it starts".into(),
        ));
    }
    Ok(())
}
