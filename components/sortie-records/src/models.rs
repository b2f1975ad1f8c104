// External crates
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One completed mission's player data, as assembled by the agent's parser.
///
/// Immutable once constructed; the parser hands ownership to the sync client
/// and never touches the record again. `stats` keeps every observed value per
/// key in log order, so `x=1` followed by `x=2` becomes `{"x": ["1", "2"]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerData {
    pub player: String,
    pub mission: String,
    /// Mission kind as reported by the client (`defense`, `rescue`, ...).
    pub kind: Option<String>,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Accumulated `key=value` observations, multi-valued per key.
    pub stats: BTreeMap<String, Vec<String>>,
}

impl PlayerData {
    /// Mission wall-clock duration in seconds, clamped at zero for records
    /// whose client clock stepped backwards mid-mission.
    pub fn duration_secs(&self) -> i64 {
        (self.ended_at - self.started_at).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> PlayerData {
        PlayerData {
            player: "Vor".into(),
            mission: "Relay Defense".into(),
            kind: Some("defense".into()),
            success: true,
            started_at: Utc.with_ymd_and_hms(2026, 3, 1, 18, 4, 11).unwrap(),
            ended_at: Utc.with_ymd_and_hms(2026, 3, 1, 18, 6, 2).unwrap(),
            stats: BTreeMap::from([("x".to_string(), vec!["1".to_string(), "2".to_string()])]),
        }
    }

    #[test]
    fn duration_is_positive_for_ordered_timestamps() {
        assert_eq!(record().duration_secs(), 111);
    }

    #[test]
    fn duration_clamps_backwards_clock() {
        let mut r = record();
        std::mem::swap(&mut r.started_at, &mut r.ended_at);
        assert_eq!(r.duration_secs(), 0);
    }
}
