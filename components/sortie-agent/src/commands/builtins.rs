// Local crates
use crate::commands::command::{Command, CommandError, CommandOutcome, CommandRegistry};
use crate::metrics::metrics::{
    self, CURSOR_BYTE_OFFSET, CURSOR_LINE_NUMBER, LINES_READ_TOTAL, PARSE_ERRORS_TOTAL,
    RECORDS_EMITTED_TOTAL, RECORDS_REJECTED_TOTAL, RECORDS_SYNCED_TOTAL,
};

/// `exit`: stop the dispatch loop. The runtime cancels the pipeline and
/// drains the sync queue afterwards, so a queued record is never aborted.
#[derive(Debug)]
struct ExitCommand;

impl Command for ExitCommand {
    fn name(&self) -> &'static str {
        "exit"
    }
    fn max_params(&self) -> usize {
        0
    }
    fn describe(&self) -> &'static str {
        "stop the agent after flushing queued records"
    }
    fn run(&self, _args: &[&str]) -> Result<CommandOutcome, CommandError> {
        Ok(CommandOutcome::Exit)
    }
}

/// `status [metrics]`: pipeline counters, or the full Prometheus dump.
#[derive(Debug)]
struct StatusCommand;

impl Command for StatusCommand {
    fn name(&self) -> &'static str {
        "status"
    }
    fn max_params(&self) -> usize {
        1
    }
    fn describe(&self) -> &'static str {
        "show pipeline counters; 'status metrics' dumps all metrics"
    }
    fn run(&self, args: &[&str]) -> Result<CommandOutcome, CommandError> {
        match args.first() {
            None => {
                println!(
                    "cursor: byte {} / line {}\n\
                     lines read: {} (parse errors: {})\n\
                     records: {} emitted, {} synced, {} rejected",
                    CURSOR_BYTE_OFFSET.get(),
                    CURSOR_LINE_NUMBER.get(),
                    LINES_READ_TOTAL.get(),
                    PARSE_ERRORS_TOTAL.get(),
                    RECORDS_EMITTED_TOTAL.get(),
                    RECORDS_SYNCED_TOTAL.get(),
                    RECORDS_REJECTED_TOTAL.get(),
                );
                Ok(CommandOutcome::Continue)
            }
            Some(&"metrics") => {
                println!("{}", metrics::render());
                Ok(CommandOutcome::Continue)
            }
            Some(other) => Err(CommandError::Failed(format!(
                "unknown status view {other:?}; try 'status' or 'status metrics'"
            ))),
        }
    }
}

/// `version`: the build version also sent as `client_version` on every sync.
#[derive(Debug)]
struct VersionCommand;

impl Command for VersionCommand {
    fn name(&self) -> &'static str {
        "version"
    }
    fn max_params(&self) -> usize {
        0
    }
    fn describe(&self) -> &'static str {
        "show the agent build version"
    }
    fn run(&self, _args: &[&str]) -> Result<CommandOutcome, CommandError> {
        println!("sortie-agent {}", env!("CARGO_PKG_VERSION"));
        Ok(CommandOutcome::Continue)
    }
}

/// Registry with every built-in registered. `exit` is always available.
pub fn standard_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(Box::new(ExitCommand));
    registry.register(Box::new(StatusCommand));
    registry.register(Box::new(VersionCommand));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_is_always_available() {
        let registry = standard_registry();
        assert_eq!(registry.dispatch("exit").unwrap(), CommandOutcome::Exit);
    }

    #[test]
    fn exit_rejects_arguments_without_exiting() {
        let registry = standard_registry();
        let err = registry.dispatch("exit now").unwrap_err();
        assert!(matches!(err, CommandError::TooManyArgs { .. }));
    }

    #[test]
    fn status_accepts_the_metrics_view() {
        let registry = standard_registry();
        assert_eq!(
            registry.dispatch("status metrics").unwrap(),
            CommandOutcome::Continue
        );
    }

    #[test]
    fn status_rejects_unknown_views() {
        let registry = standard_registry();
        assert!(matches!(
            registry.dispatch("status everything").unwrap_err(),
            CommandError::Failed(_)
        ));
    }

    #[test]
    fn version_runs() {
        let registry = standard_registry();
        assert_eq!(
            registry.dispatch("version").unwrap(),
            CommandOutcome::Continue
        );
    }
}
