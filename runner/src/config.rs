//! Runner configuration: player slots, timeouts and termination policy.
//!
//! Everything here is fixed when a match starts; the operator can only
//! restart or quit afterwards.

use crate::error::RunnerError;
use shared::{
    CLIENT_WAIT_TIMEOUT, HANDSHAKE_TIMEOUT, HOST_NAME, MAX_CLIENTS, MAX_EXECUTION_TIME,
    MAX_TICK_COUNT, REQUEST_MAX_TIME,
};
use std::path::PathBuf;
use std::time::Duration;

/// How a player slot obtains its commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotSpec {
    Keyboard,
    SimpleBot,
    Tcp { port: u16 },
    Process {
        command: Vec<String>,
        transcript: Option<PathBuf>,
    },
}

impl SlotSpec {
    /// Parses one `--player` value: `keyboard`, `simple_bot`,
    /// `tcpclient <port>`, or a command line to spawn.
    pub fn parse(spec: &str) -> Result<Self, RunnerError> {
        let words: Vec<String> = spec.split_whitespace().map(str::to_string).collect();
        match words.first().map(String::as_str) {
            None => Err(RunnerError::config("empty player definition")),
            Some("keyboard") => Ok(SlotSpec::Keyboard),
            Some("simple_bot") => Ok(SlotSpec::SimpleBot),
            Some("tcpclient") => {
                let port = words
                    .get(1)
                    .ok_or_else(|| RunnerError::config("Port number is required for tcp client."))?;
                let port = port
                    .parse::<u16>()
                    .map_err(|_| RunnerError::config(format!("invalid tcp client port '{}'", port)))?;
                Ok(SlotSpec::Tcp { port })
            }
            Some(_) => Ok(SlotSpec::Process {
                command: words,
                transcript: None,
            }),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, SlotSpec::Tcp { .. })
    }
}

/// Per-request and cumulative response-time limits for external strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub request_timeout: Duration,
    /// Total response time allowed over a match; `None` when not enforced
    pub budget: Option<Duration>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_MAX_TIME,
            budget: Some(MAX_EXECUTION_TIME),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub host: String,
    pub slots: Vec<SlotSpec>,
    pub wait_timeout: Duration,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub check_execution_limit: bool,
    pub execution_budget: Duration,
    /// End the match at `max_tick_count` even if the simulation never reports game over
    pub timeout_enabled: bool,
    pub max_tick_count: u64,
    /// Scheduling period, independent of the simulation's own tick numbering
    pub tick_period: Duration,
    pub replay: Option<PathBuf>,
    pub save_path: Option<PathBuf>,
    pub seed: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            host: HOST_NAME.to_string(),
            slots: Vec::new(),
            wait_timeout: CLIENT_WAIT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            request_timeout: REQUEST_MAX_TIME,
            check_execution_limit: true,
            execution_budget: MAX_EXECUTION_TIME,
            timeout_enabled: true,
            max_tick_count: MAX_TICK_COUNT,
            tick_period: Duration::from_millis(5),
            replay: None,
            save_path: None,
            seed: 0,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.slots.len() > MAX_CLIENTS {
            return Err(RunnerError::config(format!(
                "{} players configured, at most {} supported",
                self.slots.len(),
                MAX_CLIENTS
            )));
        }

        if self.tick_period.is_zero() {
            return Err(RunnerError::config("tick period must be positive"));
        }

        let mut ports: Vec<u16> = self
            .slots
            .iter()
            .filter_map(|slot| match slot {
                SlotSpec::Tcp { port } => Some(*port),
                _ => None,
            })
            .collect();
        ports.sort_unstable();
        if ports.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(RunnerError::config(
                "only one tcp client per port is supported",
            ));
        }

        Ok(())
    }

    /// Slots to play with; a lone keyboard player when nothing is configured
    pub fn effective_slots(&self) -> Vec<SlotSpec> {
        if self.slots.is_empty() {
            vec![SlotSpec::Keyboard]
        } else {
            self.slots.clone()
        }
    }

    /// Attaches a transcript file to the process client in `slot` (1-based)
    pub fn set_transcript(&mut self, slot: usize, path: PathBuf) -> Result<(), RunnerError> {
        match slot.checked_sub(1).and_then(|index| self.slots.get_mut(index)) {
            Some(SlotSpec::Process { transcript, .. }) => {
                *transcript = Some(path);
                Ok(())
            }
            Some(_) => Err(RunnerError::config(format!(
                "player {} is not a process client, cannot log its transcript",
                slot
            ))),
            None => Err(RunnerError::config(format!("no player {} configured", slot))),
        }
    }

    pub fn execution_limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            request_timeout: self.request_timeout,
            budget: self.check_execution_limit.then_some(self.execution_budget),
        }
    }
}

/// Parses the `on`/`off` switches used on the command line
pub fn parse_switch(value: &str) -> Result<bool, String> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected 'on' or 'off', got '{}'", other)),
    }
}

/// Parses a `SLOT=PATH` transcript assignment
pub fn parse_transcript(value: &str) -> Result<(usize, PathBuf), String> {
    let (slot, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=PATH, got '{}'", value))?;
    let slot = slot
        .parse::<usize>()
        .map_err(|_| format!("invalid player number '{}'", slot))?;
    if path.is_empty() {
        return Err("transcript path is empty".to_string());
    }
    Ok((slot, PathBuf::from(path)))
}
