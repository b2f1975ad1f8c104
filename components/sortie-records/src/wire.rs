// Local crates
use crate::codec::{CodecError, CodecRegistry, SyncRecord};

// External crates
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// One serialized record plus the tag the receiver uses to pick its codec.
/// The payload is codec output, transported as base64 so the envelope stays
/// plain JSON regardless of the codec's own format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEnvelope {
    pub record_type: String,
    pub payload: String,
}

impl RecordEnvelope {
    /// Seal a record: codec encode, then base64 the payload bytes.
    pub fn seal(registry: &CodecRegistry, record: &SyncRecord) -> Result<Self, CodecError> {
        let (record_type, payload) = registry.encode(record)?;
        Ok(Self {
            record_type: record_type.to_string(),
            payload: BASE64.encode(payload),
        })
    }

    /// Reverse of [`RecordEnvelope::seal`]. A payload that is not valid
    /// base64 is reported as malformed for this envelope's record type.
    pub fn open(&self, registry: &CodecRegistry) -> Result<SyncRecord, CodecError> {
        let payload = BASE64
            .decode(&self.payload)
            .map_err(|_| CodecError::UnknownPayloadEncoding)?;
        registry.decode(&self.record_type, &payload)
    }
}

/// Sync protocol request: one ordered batch of records from one client build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Agent build version, for compatibility diagnostics on the service.
    pub client_version: String,
    pub records: Vec<RecordEnvelope>,
}

/// Per-record acceptance status. `statuses[i]` answers `records[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordStatus {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl RecordStatus {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Sync protocol response, ordered to match the request's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub statuses: Vec<RecordStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlayerData;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn record() -> SyncRecord {
        SyncRecord::Player(PlayerData {
            player: "Ordis".into(),
            mission: "Relay Defense".into(),
            kind: None,
            success: true,
            started_at: Utc.with_ymd_and_hms(2026, 3, 1, 18, 4, 11).unwrap(),
            ended_at: Utc.with_ymd_and_hms(2026, 3, 1, 18, 6, 2).unwrap(),
            stats: BTreeMap::new(),
        })
    }

    #[test]
    fn seal_open_round_trip() {
        let registry = CodecRegistry::standard();
        let original = record();

        let envelope = RecordEnvelope::seal(&registry, &original).unwrap();
        assert_eq!(envelope.record_type, crate::codec::PLAYER_DATA_V1);

        let reopened = envelope.open(&registry).unwrap();
        assert_eq!(reopened, original);
    }

    #[test]
    fn open_rejects_bad_base64() {
        let registry = CodecRegistry::standard();
        let envelope = RecordEnvelope {
            record_type: crate::codec::PLAYER_DATA_V1.to_string(),
            payload: "%%% not base64 %%%".to_string(),
        };
        assert!(matches!(
            envelope.open(&registry),
            Err(CodecError::UnknownPayloadEncoding)
        ));
    }

    #[test]
    fn request_json_shape_is_stable() {
        let registry = CodecRegistry::standard();
        let request = SyncRequest {
            client_version: "0.3.1".to_string(),
            records: vec![RecordEnvelope::seal(&registry, &record()).unwrap()],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["client_version"], "0.3.1");
        assert!(json["records"][0]["record_type"].is_string());
        assert!(json["records"][0]["payload"].is_string());
    }
}
