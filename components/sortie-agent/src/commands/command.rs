// External crates
use std::collections::BTreeMap;

/// What the dispatch loop should do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue,
    /// Terminate the dispatch loop gracefully. The runtime finishes any
    /// in-flight sync before the process exits.
    Exit,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("'{command}' takes at most {max} argument(s), got {given}")]
    TooManyArgs {
        command: String,
        max: usize,
        given: usize,
    },
    #[error("{0}")]
    Failed(String),
}

/// One administrative command on the interactive control surface.
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;
    /// Upper bound on accepted arguments; dispatch enforces it before `run`.
    fn max_params(&self) -> usize;
    fn describe(&self) -> &'static str;
    fn run(&self, args: &[&str]) -> Result<CommandOutcome, CommandError>;
}

/// Name-keyed command registry, built once at startup.
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Box<dyn Command>>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, command: Box<dyn Command>) {
        self.commands.insert(command.name(), command);
    }

    /// Parse one input line and run the named command.
    ///
    /// Arity is validated first: a call with more than `max_params`
    /// arguments is rejected without ever entering the command body.
    pub fn dispatch(&self, input: &str) -> Result<CommandOutcome, CommandError> {
        let mut parts = input.split_whitespace();
        let Some(name) = parts.next() else {
            return Ok(CommandOutcome::Continue);
        };
        let args: Vec<&str> = parts.collect();

        let command = self
            .commands
            .get(name)
            .ok_or_else(|| CommandError::Unknown(name.to_string()))?;

        if args.len() > command.max_params() {
            return Err(CommandError::TooManyArgs {
                command: name.to_string(),
                max: command.max_params(),
                given: args.len(),
            });
        }

        command.run(&args)
    }

    /// One line per command, for the unknown-command listing.
    pub fn describe_all(&self) -> String {
        self.commands
            .values()
            .map(|c| format!("  {:<10} {}", c.name(), c.describe()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
