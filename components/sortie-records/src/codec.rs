// Local crates
use crate::models::PlayerData;

// External crates
use std::collections::HashMap;

/// Record-type tag for [`PlayerData`] payloads. Versioned so the data
/// service can keep older decoders alive across format changes.
pub const PLAYER_DATA_V1: &str = "player_data.v1";

/// A record on its way through the sync pipeline, tagged by runtime type.
///
/// Single-variant today; the enum exists so the codec registry dispatches on
/// an explicit type tag instead of downcasting.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRecord {
    Player(PlayerData),
}

impl SyncRecord {
    /// The record-type tag used to select a codec for this record.
    pub fn record_type(&self) -> &'static str {
        match self {
            SyncRecord::Player(_) => PLAYER_DATA_V1,
        }
    }
}

/// Codec selection or conversion failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown record type: {0}")]
    UnknownType(String),
    #[error("payload is not valid for {record_type}: {source}")]
    Malformed {
        record_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("payload is not valid base64")]
    UnknownPayloadEncoding,
}

/// One wire codec: converts a [`SyncRecord`] to/from its payload bytes.
pub trait RecordCodec: Send + Sync {
    fn record_type(&self) -> &'static str;
    fn encode(&self, record: &SyncRecord) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, payload: &[u8]) -> Result<SyncRecord, CodecError>;
}

/// JSON codec for [`PLAYER_DATA_V1`].
#[derive(Debug, Default)]
struct PlayerDataJsonCodec;

impl RecordCodec for PlayerDataJsonCodec {
    fn record_type(&self) -> &'static str {
        PLAYER_DATA_V1
    }

    fn encode(&self, record: &SyncRecord) -> Result<Vec<u8>, CodecError> {
        let SyncRecord::Player(data) = record;
        serde_json::to_vec(data).map_err(|source| CodecError::Malformed {
            record_type: PLAYER_DATA_V1,
            source,
        })
    }

    fn decode(&self, payload: &[u8]) -> Result<SyncRecord, CodecError> {
        let data: PlayerData =
            serde_json::from_slice(payload).map_err(|source| CodecError::Malformed {
                record_type: PLAYER_DATA_V1,
                source,
            })?;
        Ok(SyncRecord::Player(data))
    }
}

/// Registry mapping record-type tags to codecs.
///
/// Resolution happens once per record: the agent resolves by the record's
/// runtime type tag before transmit, the data service resolves by the tag
/// declared in the envelope. Unknown tags fail that record alone.
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Box<dyn RecordCodec>>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("record_types", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CodecRegistry {
    /// Registry with every codec this build knows about.
    pub fn standard() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };
        registry.register(Box::new(PlayerDataJsonCodec));
        registry
    }

    pub fn register(&mut self, codec: Box<dyn RecordCodec>) {
        self.codecs.insert(codec.record_type(), codec);
    }

    /// Encode a record with the codec matching its runtime type tag.
    pub fn encode(&self, record: &SyncRecord) -> Result<(&'static str, Vec<u8>), CodecError> {
        let record_type = record.record_type();
        let codec = self
            .codecs
            .get(record_type)
            .ok_or_else(|| CodecError::UnknownType(record_type.to_string()))?;
        Ok((record_type, codec.encode(record)?))
    }

    /// Decode a payload with the codec registered for `record_type`.
    pub fn decode(&self, record_type: &str, payload: &[u8]) -> Result<SyncRecord, CodecError> {
        let codec = self
            .codecs
            .get(record_type)
            .ok_or_else(|| CodecError::UnknownType(record_type.to_string()))?;
        codec.decode(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn record() -> SyncRecord {
        SyncRecord::Player(PlayerData {
            player: "Nyx".into(),
            mission: "Spy Run".into(),
            kind: Some("spy".into()),
            success: false,
            started_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
            ended_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 12, 30).unwrap(),
            stats: BTreeMap::from([("alarms".to_string(), vec!["2".to_string()])]),
        })
    }

    #[test]
    fn encode_decode_round_trip() {
        let registry = CodecRegistry::standard();
        let original = record();

        let (record_type, payload) = registry.encode(&original).unwrap();
        assert_eq!(record_type, PLAYER_DATA_V1);

        let decoded = registry.decode(record_type, &payload).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn unknown_record_type_is_rejected() {
        let registry = CodecRegistry::standard();
        let err = registry.decode("squad_data.v9", b"{}").unwrap_err();
        assert!(matches!(err, CodecError::UnknownType(t) if t == "squad_data.v9"));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let registry = CodecRegistry::standard();
        let err = registry.decode(PLAYER_DATA_V1, b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }
}
