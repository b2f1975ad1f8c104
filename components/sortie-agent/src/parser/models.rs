// Local crates
use crate::parser::classify::Attrs;

// External crates
use chrono::{DateTime, Utc};
use sortie_records::PlayerData;
use std::collections::BTreeMap;

fn attr<'a>(attrs: &'a Attrs, key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// In-memory state for one in-progress mission. Created on `MissionStart`,
/// fed by `MissionStat` lines, consumed on `MissionEnd`. At most one exists
/// per log stream; the parser owns it exclusively.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionAccumulator {
    pub mission: String,
    pub kind: Option<String>,
    pub player: String,
    pub started_at: DateTime<Utc>,
    /// Line the mission opened on, for log context only.
    pub start_line: u64,
    stats: BTreeMap<String, Vec<String>>,
}

impl MissionAccumulator {
    pub fn begin(at: DateTime<Utc>, attrs: &Attrs, start_line: u64) -> Self {
        Self {
            mission: attr(attrs, "mission").unwrap_or("unknown").to_string(),
            kind: attr(attrs, "kind").map(str::to_string),
            player: attr(attrs, "player").unwrap_or("unknown").to_string(),
            started_at: at,
            start_line,
            stats: BTreeMap::new(),
        }
    }

    /// Fold one stat line in. Repeated keys append, so `x=1` then `x=2`
    /// yields `{x: [1, 2]}`.
    pub fn observe(&mut self, attrs: &Attrs) {
        for (key, value) in attrs {
            self.stats
                .entry(key.clone())
                .or_default()
                .push(value.clone());
        }
    }

    /// Close the mission and produce the immutable record. `result=success`
    /// on the end line marks the mission successful; anything else (or a
    /// missing result) counts as failure.
    pub fn finish(self, at: DateTime<Utc>, end_attrs: &Attrs) -> PlayerData {
        PlayerData {
            player: self.player,
            mission: self.mission,
            kind: self.kind,
            success: attr(end_attrs, "result") == Some("success"),
            started_at: self.started_at,
            ended_at: at,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start_attrs() -> Attrs {
        vec![
            ("mission".to_string(), "Relay Defense".to_string()),
            ("kind".to_string(), "defense".to_string()),
            ("player".to_string(), "Vor".to_string()),
        ]
    }

    #[test]
    fn repeated_stat_keys_accumulate_in_order() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 18, 4, 11).unwrap();
        let mut acc = MissionAccumulator::begin(at, &start_attrs(), 1);

        acc.observe(&vec![("x".to_string(), "1".to_string())]);
        acc.observe(&vec![("x".to_string(), "2".to_string())]);

        let record = acc.finish(
            Utc.with_ymd_and_hms(2026, 3, 1, 18, 6, 2).unwrap(),
            &vec![("result".to_string(), "success".to_string())],
        );

        assert_eq!(record.player, "Vor");
        assert_eq!(record.mission, "Relay Defense");
        assert!(record.success);
        assert_eq!(
            record.stats.get("x"),
            Some(&vec!["1".to_string(), "2".to_string()])
        );
    }

    #[test]
    fn missing_result_counts_as_failure() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 18, 4, 11).unwrap();
        let acc = MissionAccumulator::begin(at, &start_attrs(), 1);
        let record = acc.finish(at, &Vec::new());
        assert!(!record.success);
    }

    #[test]
    fn missing_identity_attrs_fall_back_to_unknown() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 18, 4, 11).unwrap();
        let acc = MissionAccumulator::begin(at, &Vec::new(), 1);
        assert_eq!(acc.mission, "unknown");
        assert_eq!(acc.player, "unknown");
        assert_eq!(acc.kind, None);
    }
}
