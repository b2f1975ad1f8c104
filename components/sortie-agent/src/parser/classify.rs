// External crates
use chrono::{DateTime, Utc};
use regex::Regex;

/// Attribute list from one log message, in source order. Duplicate keys are
/// kept; the accumulator's merge policy decides what repeats mean.
pub type Attrs = Vec<(String, String)>;

/// What a single well-formed client log line means to the mission parser.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    MissionStart { at: DateTime<Utc>, attrs: Attrs },
    MissionStat { attrs: Attrs },
    MissionEnd { at: DateTime<Utc>, attrs: Attrs },
    /// The client closed this log file; nothing further will be appended.
    SessionEnd,
    /// Well-formed but irrelevant to mission tracking.
    Other,
}

/// A line the classifier could not turn into a [`LineEvent`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("line does not match the client log grammar: {line:?}")]
    Malformed { line: String },
    #[error("unparsable timestamp {value:?} on a mission boundary line")]
    BadTimestamp { value: String },
}

/// Classifier for the game client's log grammar:
///
/// ```text
/// <RFC3339 timestamp> <channel> [<level>]: <message>
/// ```
///
/// Mission lifecycle messages start with `MissionStart`, `MissionStat`,
/// `MissionEnd` or `SessionEnd`, followed by `key=value` attributes
/// (values may be double-quoted).
#[derive(Debug)]
pub struct LineClassifier {
    line_re: Regex,
    attr_re: Regex,
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LineClassifier {
    pub fn new() -> Self {
        Self {
            line_re: Regex::new(r"^(\S+)\s+(\w+)\s+\[(\w+)\]:\s*(.*)$").unwrap(),
            attr_re: Regex::new(r#"(\w+)=(?:"([^"]*)"|(\S+))"#).unwrap(),
        }
    }

    /// Classify one line. Blank lines are `Other`; anything that breaks the
    /// base grammar is a [`ProcessingError`] for the caller to count.
    pub fn classify(&self, line: &str) -> Result<LineEvent, ProcessingError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(LineEvent::Other);
        }

        let captures = self
            .line_re
            .captures(trimmed)
            .ok_or_else(|| ProcessingError::Malformed {
                line: trimmed.to_string(),
            })?;

        let timestamp_raw = &captures[1];
        let message = &captures[4];

        let (keyword, rest) = match message.split_once(char::is_whitespace) {
            Some((k, r)) => (k, r),
            None => (message, ""),
        };

        match keyword {
            "MissionStart" => Ok(LineEvent::MissionStart {
                at: self.parse_timestamp(timestamp_raw)?,
                attrs: self.parse_attrs(rest),
            }),
            "MissionStat" => Ok(LineEvent::MissionStat {
                attrs: self.parse_attrs(rest),
            }),
            "MissionEnd" => Ok(LineEvent::MissionEnd {
                at: self.parse_timestamp(timestamp_raw)?,
                attrs: self.parse_attrs(rest),
            }),
            "SessionEnd" => Ok(LineEvent::SessionEnd),
            _ => Ok(LineEvent::Other),
        }
    }

    fn parse_timestamp(&self, raw: &str) -> Result<DateTime<Utc>, ProcessingError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| ProcessingError::BadTimestamp {
                value: raw.to_string(),
            })
    }

    fn parse_attrs(&self, raw: &str) -> Attrs {
        self.attr_re
            .captures_iter(raw)
            .map(|cap| {
                let key = cap[1].to_string();
                let value = cap
                    .get(2)
                    .or_else(|| cap.get(3))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                (key, value)
            })
            .collect()
    }
}
