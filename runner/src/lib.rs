//! # Local Runner Library
//!
//! This library orchestrates local matches of the territory game: it connects
//! up to six player agents to a match, drives the match at a fixed cadence and
//! decides when it ends. The match rules themselves live behind the
//! [`simulation::Simulation`] trait.
//!
//! ## Core Responsibilities
//!
//! ### Player Clients
//! Every command source implements the same contract: produce one intent per
//! tick and name the strategy it stands for. Supported sources:
//! - the operator at the keyboard (`keyboard`)
//! - a seeded in-process bot (`simple_bot`)
//! - an external program talking JSON lines over stdin/stdout
//! - a remote strategy connected over TCP (`tcpclient <port>`)
//! - a player of a recorded match (`--replay`)
//!
//! External strategies never stall the match: every read is bounded, and a
//! strategy that times out, disconnects or exhausts its execution budget is
//! benched with neutral intents for the rest of the match.
//!
//! ### Connection Brokering
//! Each configured TCP port accepts exactly one client within the waiting
//! window, which then identifies itself with a `{"solution_id": ...}` line.
//! All ports are bound before any waiting starts.
//!
//! ### Tick Scheduling
//! The scheduler advances the simulation once per period, stops it when the
//! simulation reports game over or the tick limit is reached, then finalizes,
//! ends and saves the match exactly once. The operator can restart or quit
//! between ticks.
//!
//! ### Replay
//! A recorded log (plain or gzipped JSON) is loaded once and shared: replay
//! clients read the recorded commands and the replay decorator feeds the
//! recorded bonuses back into any simulation.
//!
//! ## Module Organization
//!
//! - `client`, `process`, `tcp`, `exchange`: the command sources and their line protocol
//! - `broker`: bounded accept and handshake per port
//! - `lineup`: builds the roster of a match from the configured slots
//! - `scheduler`: the match state machine and its `MatchFactory` seam
//! - `simulation`: the simulation trait and the roster handed to it
//! - `replay`: recorded log loading and the replay decorator
//! - `arena`: a small reference simulation that records its matches
//! - `operator`: terminal controls
//! - `config`, `error`: runner settings and fatal errors
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use runner::arena::{ArenaFactory, ArenaSettings};
//! use runner::config::{RunnerConfig, SlotSpec};
//! use runner::lineup::Lineup;
//! use runner::scheduler::{TerminationPolicy, TickScheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunnerConfig {
//!         slots: vec![SlotSpec::SimpleBot, SlotSpec::parse("tcpclient 8000")?],
//!         ..RunnerConfig::default()
//!     };
//!     config.validate()?;
//!
//!     let mut scheduler = TickScheduler::new(
//!         ArenaFactory::new(ArenaSettings::from_config(&config)),
//!         Lineup::live(&config),
//!         TerminationPolicy::from_config(&config),
//!         config.tick_period,
//!     );
//!
//!     // Waits for the tcp client, then plays until the match is over
//!     scheduler.run_to_end().await?;
//!     Ok(())
//! }
//! ```

pub mod arena;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod lineup;
pub mod operator;
pub mod process;
pub mod replay;
pub mod scheduler;
pub mod simulation;
pub mod tcp;
