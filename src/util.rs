use crate::types::WorkUnit;
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cancel `shutdown` on SIGINT/SIGTERM (Ctrl+C elsewhere).
///
/// The pool polls the token before starting each unit, so in-flight droids
/// finish and the run exits with whatever completed.
pub fn listen_for_shutdown(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let (mut sigint, mut sigterm) =
                match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                    (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("Failed to install signal handlers: {}", e);
                        return;
                    }
                };
            tokio::select! {
                _ = sigint.recv() => warn!("Received SIGINT, stopping droids..."),
                _ = sigterm.recv() => warn!("Received SIGTERM, stopping droids..."),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Received Ctrl+C, stopping droids...");
        }
        shutdown.cancel();
    });
}

/// Decides whether the planned units get dispatched
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, units: &[WorkUnit]) -> bool;
}

/// Asks on the terminal. Only `y`/`yes` proceeds.
///
/// Stdin is read asynchronously so the caller can abandon the prompt when a
/// shutdown signal arrives.
pub struct TerminalPrompt;

#[async_trait]
impl Confirm for TerminalPrompt {
    async fn confirm(&self, units: &[WorkUnit]) -> bool {
        eprint!("{}", prompt_text(units));
        read_answer(&mut BufReader::new(tokio::io::stdin())).await
    }
}

fn prompt_text(units: &[WorkUnit]) -> String {
    let mut text = String::from("\n");
    for unit in units {
        text.push_str(&format!("  - {}\n", unit.description()));
    }
    text.push_str(&format!(
        "\nWill spin up {} droid(s). Would you like to continue? [y/N] ",
        units.len()
    ));
    text
}

async fn read_answer<R: AsyncBufRead + Unpin>(input: &mut R) -> bool {
    let mut answer = String::new();
    match input.read_line(&mut answer).await {
        Ok(_) => is_yes(&answer),
        Err(_) => false,
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
