//! Turns the configured slots into the roster of a match.

use crate::broker::ConnectionBroker;
use crate::client::{Client, InteractiveClient, ScriptedClient};
use crate::config::{ExecutionLimits, RunnerConfig, SlotSpec};
use crate::error::RunnerError;
use crate::process::ProcessClient;
use crate::replay::ReplayEngine;
use crate::simulation::Roster;
use crate::tcp::TcpClient;
use log::{error, info, warn};
use shared::Intent;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

enum Source {
    Live {
        slots: Vec<SlotSpec>,
        broker: ConnectionBroker,
        limits: ExecutionLimits,
        seed: u64,
    },
    Replay(ReplayEngine),
}

/// Network slots still waiting for their client; dropping it abandons the
/// waits and releases their ports
#[derive(Default)]
struct Waiting(BTreeMap<u32, JoinHandle<Option<TcpClient>>>);

impl Drop for Waiting {
    fn drop(&mut self) {
        for handle in self.0.values() {
            handle.abort();
        }
    }
}

/// Everything needed to (re)build the players of a match
pub struct Lineup {
    source: Source,
    keys: watch::Sender<Intent>,
}

impl Lineup {
    pub fn live(config: &RunnerConfig) -> Self {
        let (keys, _) = watch::channel(Intent::Neutral);
        Self {
            source: Source::Live {
                slots: config.effective_slots(),
                broker: ConnectionBroker::from_config(config),
                limits: config.execution_limits(),
                seed: config.seed,
            },
            keys,
        }
    }

    /// Every slot replaced by the recorded players of `engine`
    pub fn replay(engine: ReplayEngine) -> Self {
        let (keys, _) = watch::channel(Intent::Neutral);
        Self {
            source: Source::Replay(engine),
            keys,
        }
    }

    /// Feeds a direction key to the interactive players
    pub fn press(&self, intent: Intent) {
        self.keys.send_replace(intent);
    }

    /// Builds the roster of a new match.
    ///
    /// With a `previous` roster (restart) connected network clients are carried
    /// over instead of waited for again, with their per-match accounting
    /// cleared; every other client is created fresh. On error every port
    /// still waiting is released.
    pub async fn assemble(&mut self, previous: Option<Roster>) -> Result<Roster, RunnerError> {
        let (slots, broker, limits, seed) = match &self.source {
            Source::Replay(engine) => return Ok(engine.roster()),
            Source::Live {
                slots,
                broker,
                limits,
                seed,
            } => (slots, broker, *limits, *seed),
        };

        let restarting = previous.is_some();
        let mut carried = previous
            .map(Roster::into_network_clients)
            .unwrap_or_default();

        // Every port is bound before anything else so all windows open together
        let mut waiting = Waiting::default();
        if !restarting {
            for (ordinal, spec) in (1u32..).zip(slots.iter()) {
                if let SlotSpec::Tcp { port } = spec {
                    let pending = broker.open(*port).await?;
                    waiting.0.insert(ordinal, tokio::spawn(pending.resolve()));
                }
            }
        }

        let mut roster = Roster::new();
        for (ordinal, spec) in (1u32..).zip(slots.iter()) {
            let client = match spec {
                SlotSpec::Keyboard => Some(Client::Interactive(InteractiveClient::new(
                    self.keys.subscribe(),
                ))),
                SlotSpec::SimpleBot => Some(Client::Scripted(ScriptedClient::new(
                    seed.wrapping_add(u64::from(ordinal)),
                ))),
                SlotSpec::Process {
                    command,
                    transcript,
                } => Some(Client::Process(
                    ProcessClient::spawn(command, transcript.as_deref(), limits).await?,
                )),
                SlotSpec::Tcp { port } => {
                    let client = match waiting.0.remove(&ordinal) {
                        Some(handle) => handle.await.unwrap_or_else(|e| {
                            error!("Waiting for client on port {} failed: {}", port, e);
                            None
                        }),
                        None => carried.remove(&ordinal).map(|mut client| {
                            client.reset_match();
                            client
                        }),
                    };
                    if client.is_none() {
                        warn!("Player {} (port {}) left unfilled", ordinal, port);
                    }
                    client.map(Client::Network)
                }
            };

            if let Some(client) = client {
                info!(
                    "Player {}: {} '{}'",
                    ordinal,
                    client.kind(),
                    client.identity()
                );
                roster.push(ordinal, client);
            }
        }

        Ok(roster)
    }
}
