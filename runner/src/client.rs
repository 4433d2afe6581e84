//! The player clients: every command source behind one contract.
//!
//! A [`Client`] produces one [`Intent`] per tick and names the strategy it
//! stands for. Clients backed by an external program or socket bound their
//! own waits and turn every failure into a neutral intent, so a misbehaving
//! strategy can never stop the match.

use crate::process::ProcessClient;
use crate::replay::ReplayClient;
use crate::tcp::TcpClient;
use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Intent, Message, MessageKind};
use std::time::Duration;
use tokio::sync::watch;

/// Observable match state handed to the clients for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub tick: u64,
    pub params: serde_json::Value,
}

impl Observation {
    pub fn new(tick: u64, params: serde_json::Value) -> Self {
        Self { tick, params }
    }

    pub fn to_message(&self) -> Message {
        Message::new(MessageKind::Tick, self.params.clone())
    }
}

/// Per-client failure. Degrades one slot, never the match.
#[derive(Debug, thiserror::Error)]
pub enum ClientFault {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Disconnected,

    #[error("execution limit exceeded: {spent:?} spent of {budget:?}")]
    ExecutionLimit { spent: Duration, budget: Duration },

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("line longer than {limit} bytes")]
    Overflow { limit: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Operator-driven player following the last direction key pressed
#[derive(Debug)]
pub struct InteractiveClient {
    keys: watch::Receiver<Intent>,
}

impl InteractiveClient {
    pub fn new(keys: watch::Receiver<Intent>) -> Self {
        Self { keys }
    }

    /// Latest key seen; repeats the previous one when nothing was pressed
    pub fn produce_intent(&mut self) -> Intent {
        *self.keys.borrow_and_update()
    }
}

const MIN_RUN: u32 = 2;
const MAX_RUN: u32 = 8;

/// In-process bot turning clockwise after runs of seeded random length.
///
/// It never reverses, and the same seed always yields the same commands.
#[derive(Debug)]
pub struct ScriptedClient {
    rng: StdRng,
    heading: usize,
    remaining: u32,
}

impl ScriptedClient {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let remaining = rng.gen_range(MIN_RUN..=MAX_RUN);
        Self {
            rng,
            heading: 0,
            remaining,
        }
    }

    pub fn produce_intent(&mut self) -> Intent {
        if self.remaining == 0 {
            self.heading = (self.heading + 1) % Intent::TURNS.len();
            self.remaining = self.rng.gen_range(MIN_RUN..=MAX_RUN);
        }
        self.remaining -= 1;
        Intent::TURNS[self.heading]
    }
}

/// The closed set of command sources a slot can hold
pub enum Client {
    Interactive(InteractiveClient),
    Scripted(ScriptedClient),
    Process(ProcessClient),
    Network(TcpClient),
    Replay(ReplayClient),
}

impl Client {
    pub fn identity(&self) -> &str {
        match self {
            Client::Interactive(_) => "keyboard",
            Client::Scripted(_) => "simple_bot",
            Client::Process(client) => client.identity(),
            Client::Network(client) => client.identity(),
            Client::Replay(client) => client.identity(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Client::Interactive(_) => "keyboard",
            Client::Scripted(_) => "simple_bot",
            Client::Process(_) => "process",
            Client::Network(_) => "tcp",
            Client::Replay(_) => "replay",
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Client::Network(_))
    }

    /// Whether the client gave up for the rest of the match
    pub fn is_faulted(&self) -> bool {
        match self {
            Client::Process(client) => client.is_faulted(),
            Client::Network(client) => client.is_faulted(),
            _ => false,
        }
    }

    /// Intent for the current tick: send the observation, then wait for the reply
    pub async fn produce_intent(&mut self, observation: &Observation) -> Intent {
        self.send_observation(observation).await;
        self.receive_intent().await
    }

    /// Forwards a lifecycle message (`start_game`, `end_game`) to external strategies
    pub async fn notify(&mut self, message: &Message) {
        match self {
            Client::Process(client) => client.notify(message).await,
            Client::Network(client) => client.notify(message).await,
            _ => {}
        }
    }

    pub(crate) async fn send_observation(&mut self, observation: &Observation) {
        match self {
            Client::Process(client) => client.send_observation(observation).await,
            Client::Network(client) => client.send_observation(observation).await,
            _ => {}
        }
    }

    pub(crate) async fn receive_intent(&mut self) -> Intent {
        let result = match self {
            Client::Interactive(client) => Ok(client.produce_intent()),
            Client::Scripted(client) => Ok(client.produce_intent()),
            Client::Replay(client) => Ok(client.produce_intent()),
            Client::Process(client) => client.get_command().await,
            Client::Network(client) => client.get_command().await,
        };

        result.unwrap_or_else(|fault| {
            warn!(
                "{} client '{}' failed: {}; using neutral command",
                self.kind(),
                self.identity(),
                fault
            );
            Intent::Neutral
        })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("kind", &self.kind())
            .field("identity", &self.identity())
            .finish()
    }
}
