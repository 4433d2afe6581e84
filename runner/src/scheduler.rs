//! Tick scheduler: drives one match at a fixed cadence.
//!
//! ```text
//! Idle --start--> Running --step*--> Stopped
//!                    ^                  |
//!                    +-----restart------+
//! ```
//!
//! The scheduler owns the simulation and awaits every `advance_tick` before
//! the next scheduling tick fires, so ticks never overlap. Operator control is
//! only looked at between ticks.

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::lineup::Lineup;
use crate::operator::OperatorEvent;
use crate::simulation::{Roster, Simulation};
use log::{debug, info};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Idle,
    Running,
    Stopped,
}

/// When a running match stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    pub timeout_enabled: bool,
    pub max_tick_count: u64,
}

impl TerminationPolicy {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            timeout_enabled: config.timeout_enabled,
            max_tick_count: config.max_tick_count,
        }
    }

    /// `current_tick` is the tick the simulation would play next
    pub fn should_stop(&self, ended: bool, current_tick: u64) -> bool {
        ended || (self.timeout_enabled && current_tick >= self.max_tick_count)
    }
}

/// Builds the simulation for every (re)started match
pub trait MatchFactory {
    type Sim: Simulation;

    fn new_match(&mut self, roster: &Roster) -> Self::Sim;

    /// Drops state derived from the previous match
    fn clear_caches(&mut self) {}
}

pub struct TickScheduler<F: MatchFactory> {
    factory: F,
    lineup: Lineup,
    policy: TerminationPolicy,
    period: Duration,
    phase: MatchPhase,
    game: Option<F::Sim>,
    roster: Option<Roster>,
}

impl<F: MatchFactory> TickScheduler<F> {
    pub fn new(factory: F, lineup: Lineup, policy: TerminationPolicy, period: Duration) -> Self {
        Self {
            factory,
            lineup,
            policy,
            period,
            phase: MatchPhase::Idle,
            game: None,
            roster: None,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Tick the running simulation plays next; 0 before the first start
    pub fn current_tick(&self) -> u64 {
        self.game.as_ref().map_or(0, Simulation::current_tick)
    }

    pub fn game(&self) -> Option<&F::Sim> {
        self.game.as_ref()
    }

    pub fn roster(&self) -> Option<&Roster> {
        self.roster.as_ref()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn lineup(&self) -> &Lineup {
        &self.lineup
    }

    /// Builds the roster and a fresh simulation, then starts the match.
    ///
    /// Network clients of a previous roster are carried over.
    pub async fn start(&mut self) -> Result<(), RunnerError> {
        let previous = self.roster.take();
        let mut roster = self.lineup.assemble(previous).await?;
        let mut game = self.factory.new_match(&roster);

        info!("Starting match with {} players", roster.len());
        game.start_match(&mut roster).await;

        self.game = Some(game);
        self.roster = Some(roster);
        self.phase = MatchPhase::Running;
        Ok(())
    }

    /// Plays one tick and applies the termination policy.
    ///
    /// Stopping plays one final tick, ends the match and saves it exactly once.
    pub async fn step(&mut self) -> MatchPhase {
        if self.phase != MatchPhase::Running {
            return self.phase;
        }
        let (Some(game), Some(roster)) = (self.game.as_mut(), self.roster.as_mut()) else {
            return self.phase;
        };

        let ended = game.advance_tick(roster).await;
        if self.policy.should_stop(ended, game.current_tick()) {
            debug!(
                "Stopping at tick {} (ended: {})",
                game.current_tick(),
                ended
            );
            game.advance_tick(roster).await;
            game.end_match(roster).await;
            game.save();
            self.phase = MatchPhase::Stopped;
            info!("Match finished after tick {}", game.current_tick().saturating_sub(1));
        }

        self.phase
    }

    pub async fn restart(&mut self) -> Result<(), RunnerError> {
        info!("Restarting match");
        self.phase = MatchPhase::Idle;
        self.game = None;
        self.factory.clear_caches();
        self.start().await
    }

    /// Drives the match to its end without an operator
    pub async fn run_to_end(&mut self) -> Result<(), RunnerError> {
        if self.phase == MatchPhase::Idle {
            self.start().await?;
        }

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while self.phase == MatchPhase::Running {
            ticker.tick().await;
            self.step().await;
        }
        Ok(())
    }

    /// Main loop: ticks while running and reacts to operator events.
    ///
    /// Returns on `Quit`, or once the match is over and `control` has closed.
    pub async fn run(
        &mut self,
        mut control: mpsc::UnboundedReceiver<OperatorEvent>,
    ) -> Result<(), RunnerError> {
        if self.phase == MatchPhase::Idle {
            self.start().await?;
        }

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut control_open = true;

        loop {
            if !control_open && self.phase != MatchPhase::Running {
                break;
            }

            tokio::select! {
                event = control.recv(), if control_open => {
                    match event {
                        Some(OperatorEvent::Key(intent)) => self.lineup.press(intent),
                        Some(OperatorEvent::Restart) => {
                            self.restart().await?;
                            ticker.reset();
                        }
                        Some(OperatorEvent::Quit) => {
                            info!("Quit requested");
                            break;
                        }
                        None => {
                            debug!("Operator control closed");
                            control_open = false;
                        }
                    }
                },

                _ = ticker.tick(), if self.phase == MatchPhase::Running => {
                    self.step().await;
                },
            }
        }

        Ok(())
    }
}
