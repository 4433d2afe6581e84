//! Strategy running as a child process, spoken to over its stdin/stdout.

use crate::client::{ClientFault, Observation};
use crate::config::ExecutionLimits;
use crate::error::RunnerError;
use crate::exchange::{LineExchange, Transcript};
use log::{info, warn};
use shared::{Intent, Message};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, ChildStdin, Command};

pub struct ProcessClient {
    command_line: String,
    child: Child,
    exchange: LineExchange<ChildStdin>,
}

impl ProcessClient {
    /// Starts the strategy. The child is killed when the client is dropped.
    pub async fn spawn(
        command: &[String],
        transcript: Option<&Path>,
        limits: ExecutionLimits,
    ) -> Result<Self, RunnerError> {
        let command_line = command.join(" ");
        let (program, args) = command
            .split_first()
            .ok_or_else(|| RunnerError::config("empty strategy command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RunnerError::config(format!("cannot start strategy '{}': {}", command_line, e))
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(RunnerError::config(format!(
                    "strategy '{}' has no piped stdio",
                    command_line
                )))
            }
        };

        let transcript = match transcript {
            Some(path) => match Transcript::open(path).await {
                Ok(transcript) => Some(transcript),
                Err(e) => {
                    warn!(
                        "Cannot open transcript {} for '{}': {}",
                        path.display(),
                        command_line,
                        e
                    );
                    None
                }
            },
            None => None,
        };

        info!("Started strategy '{}' (pid {:?})", command_line, child.id());

        let exchange =
            LineExchange::new(command_line.clone(), stdout, stdin, limits).with_transcript(transcript);

        Ok(Self {
            command_line,
            child,
            exchange,
        })
    }

    pub fn identity(&self) -> &str {
        &self.command_line
    }

    /// OS process id, `None` once the child has been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_faulted(&self) -> bool {
        self.exchange.is_faulted()
    }

    pub async fn notify(&mut self, message: &Message) {
        self.exchange.notify(message).await;
    }

    pub async fn send_observation(&mut self, observation: &Observation) {
        self.exchange.request(&observation.to_message()).await;
    }

    /// Reads the reply; the child is stopped as soon as the slot is benched
    pub async fn get_command(&mut self) -> Result<Intent, ClientFault> {
        let result = self.exchange.receive_command().await;
        if result.is_err() && self.exchange.is_faulted() {
            self.stop();
        }
        result
    }

    fn stop(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => info!("Strategy '{}' exited: {}", self.command_line, status),
            Ok(None) => {
                info!("Stopping benched strategy '{}'", self.command_line);
                if let Err(e) = self.child.start_kill() {
                    warn!("Cannot stop strategy '{}': {}", self.command_line, e);
                }
            }
            Err(e) => warn!("Cannot query strategy '{}': {}", self.command_line, e),
        }
    }
}
