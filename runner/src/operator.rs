//! Operator controls read from the terminal.

use log::{debug, warn};
use shared::Intent;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// The only runtime inputs the runner reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorEvent {
    Key(Intent),
    Restart,
    Quit,
}

impl OperatorEvent {
    /// `r` restarts, `q` quits, direction names and WASD steer keyboard players
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "" => None,
            "r" | "restart" => Some(OperatorEvent::Restart),
            "q" | "quit" | "exit" => Some(OperatorEvent::Quit),
            other => other
                .parse::<Intent>()
                .ok()
                .filter(|intent| intent.is_directional())
                .map(OperatorEvent::Key),
        }
    }
}

/// Forwards operator commands from `input` until it closes.
///
/// The channel closes with the input, which the scheduler reads as "no more
/// operator".
pub fn spawn_operator_input<R>(input: R) -> mpsc::UnboundedReceiver<OperatorEvent>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(input).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match OperatorEvent::parse(&line) {
                    Some(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    None => warn!("Unknown operator command '{}'", line.trim()),
                },
                Ok(None) => {
                    debug!("Operator input closed");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read operator input: {}", e);
                    break;
                }
            }
        }
    });

    rx
}
