// Local crates
use crate::cursor::store::LogPosition;
use crate::metrics::metrics::PARSE_ERRORS_TOTAL;
use crate::parser::classify::{LineClassifier, LineEvent};
use crate::parser::models::MissionAccumulator;

// External crates
use sortie_records::PlayerData;
use tracing::{debug, error, warn};

/// Parser states. `InMission` means a live accumulator exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    InMission,
}

/// Outcome of one parse step. Exactly one is produced per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Keep reading.
    Ok,
    /// Buffered progress discarded; resume from the last checkpoint.
    Skip,
    /// Halt parsing for this session.
    Stop,
    /// This log file is complete; wait for rotation.
    FinishLog,
    StartMission,
    EndMission,
}

/// One parse step: the outcome plus, on `EndMission`, the finished record.
#[derive(Debug)]
pub struct ParseStep {
    pub outcome: ParseOutcome,
    pub record: Option<PlayerData>,
}

impl ParseStep {
    fn outcome(outcome: ParseOutcome) -> Self {
        Self {
            outcome,
            record: None,
        }
    }
}

/// Incremental mission-lifecycle state machine.
///
/// `parse_line` is a pure function of parser state and line content: feeding
/// the same lines from the same starting state always reproduces the same
/// outcomes and records, which is what makes SKIP/resume re-parsing safe.
#[derive(Debug)]
pub struct MissionParser {
    classifier: LineClassifier,
    state: ParserState,
    accumulator: Option<MissionAccumulator>,
    error_streak: u32,
    error_threshold: u32,
}

impl MissionParser {
    pub fn new(error_threshold: u32) -> Self {
        Self {
            classifier: LineClassifier::new(),
            state: ParserState::Idle,
            accumulator: None,
            error_streak: 0,
            error_threshold,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == ParserState::Idle
    }

    /// Consume one line at `position` and produce exactly one outcome.
    pub fn parse_line(&mut self, line: &str, position: &LogPosition) -> ParseStep {
        let event = match self.classifier.classify(line) {
            Ok(event) => {
                self.error_streak = 0;
                event
            }
            Err(e) => {
                PARSE_ERRORS_TOTAL.inc();
                self.error_streak += 1;
                warn!(
                    error = %e,
                    line_number = position.line_number,
                    "Skipping unparsable client log line"
                );

                if self.error_streak >= self.error_threshold {
                    error!(
                        consecutive_failures = self.error_streak,
                        line_number = position.line_number,
                        "Too many consecutive unparsable lines; stopping this session"
                    );
                    return ParseStep::outcome(ParseOutcome::Stop);
                }
                return ParseStep::outcome(ParseOutcome::Ok);
            }
        };

        match (self.state, event) {
            (ParserState::Idle, LineEvent::MissionStart { at, attrs }) => {
                self.accumulator = Some(MissionAccumulator::begin(
                    at,
                    &attrs,
                    position.line_number,
                ));
                self.state = ParserState::InMission;
                ParseStep::outcome(ParseOutcome::StartMission)
            }

            (ParserState::InMission, LineEvent::MissionStart { at, attrs }) => {
                // The client crashed or quit without writing MissionEnd.
                // Carrying the stale accumulator forward would attribute
                // this mission's stats to the dead one.
                if let Some(orphan) = self.accumulator.take() {
                    warn!(
                        mission = %orphan.mission,
                        started_line = orphan.start_line,
                        "New mission started while previous one was still open; discarding it"
                    );
                }
                self.accumulator = Some(MissionAccumulator::begin(
                    at,
                    &attrs,
                    position.line_number,
                ));
                ParseStep::outcome(ParseOutcome::StartMission)
            }

            (ParserState::InMission, LineEvent::MissionStat { attrs }) => {
                if let Some(acc) = self.accumulator.as_mut() {
                    acc.observe(&attrs);
                }
                ParseStep::outcome(ParseOutcome::Ok)
            }

            (ParserState::Idle, LineEvent::MissionStat { .. }) => {
                // Stats outside a mission carry no aggregation target.
                ParseStep::outcome(ParseOutcome::Ok)
            }

            (ParserState::InMission, LineEvent::MissionEnd { at, attrs }) => {
                self.state = ParserState::Idle;
                match self.accumulator.take() {
                    Some(acc) => ParseStep {
                        outcome: ParseOutcome::EndMission,
                        record: Some(acc.finish(at, &attrs)),
                    },
                    None => ParseStep::outcome(ParseOutcome::Ok),
                }
            }

            (ParserState::Idle, LineEvent::MissionEnd { .. }) => {
                warn!(
                    line_number = position.line_number,
                    "MissionEnd without a matching MissionStart; ignoring (partial log)"
                );
                ParseStep::outcome(ParseOutcome::Ok)
            }

            (_, LineEvent::SessionEnd) => {
                if let Some(orphan) = self.accumulator.take() {
                    warn!(
                        mission = %orphan.mission,
                        started_line = orphan.start_line,
                        "Log closed with a mission still open; discarding it"
                    );
                }
                self.state = ParserState::Idle;
                ParseStep::outcome(ParseOutcome::FinishLog)
            }

            (_, LineEvent::Other) => ParseStep::outcome(ParseOutcome::Ok),
        }
    }

    /// Discard all buffered progress ahead of a checkpoint rewind. Returns
    /// the `Skip` outcome for the caller to act on.
    pub fn rewind(&mut self) -> ParseOutcome {
        if let Some(orphan) = self.accumulator.take() {
            debug!(
                mission = %orphan.mission,
                "Discarding in-progress mission ahead of checkpoint rewind"
            );
        }
        self.state = ParserState::Idle;
        self.error_streak = 0;
        ParseOutcome::Skip
    }
}
