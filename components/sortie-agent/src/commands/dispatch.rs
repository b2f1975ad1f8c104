// Local crates
use crate::commands::command::{CommandError, CommandOutcome, CommandRegistry};

// External crates
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Interactive control loop over stdin.
///
/// Runs concurrently with the parser pipeline and shares nothing with it
/// but the cancellation token, checked between commands. Returns when the
/// operator issues `exit`, stdin errors out, or the token is cancelled
/// elsewhere (Ctrl-C, fatal pipeline error).
pub async fn run_dispatch_loop(registry: &CommandRegistry, cancel: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("sortie-agent ready; type a command ('exit' to stop)");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            maybe_line = lines.next_line() => {
                match maybe_line {
                    Ok(Some(input)) => {
                        let input = input.trim();
                        if input.is_empty() {
                            continue;
                        }

                        match registry.dispatch(input) {
                            Ok(CommandOutcome::Continue) => {}
                            Ok(CommandOutcome::Exit) => {
                                info!("Exit requested from control surface");
                                cancel.cancel();
                                break;
                            }
                            Err(CommandError::Unknown(name)) => {
                                println!(
                                    "unknown command: {name}\navailable commands:\n{}",
                                    registry.describe_all()
                                );
                            }
                            Err(e) => println!("{e}"),
                        }
                    }

                    // stdin closed (headless run): stay alive until the
                    // pipeline or a signal stops the agent.
                    Ok(None) => {
                        cancel.cancelled().await;
                        break;
                    }

                    Err(e) => {
                        warn!(error = %e, "Control surface read failed; disabling it");
                        cancel.cancelled().await;
                        break;
                    }
                }
            }
        }
    }
}
