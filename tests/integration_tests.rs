//! Integration tests for the runner components working together
//!
//! These tests run real sockets, real child processes and the reference arena.

use assert_approx_eq::assert_approx_eq;
use runner::arena::{Arena, ArenaFactory, ArenaSettings};
use runner::broker::ConnectionBroker;
use runner::client::{Client, ScriptedClient};
use runner::config::{ExecutionLimits, RunnerConfig, SlotSpec};
use runner::lineup::Lineup;
use runner::replay::RecordedLog;
use runner::scheduler::{MatchFactory, MatchPhase, TerminationPolicy, TickScheduler};
use runner::simulation::{Roster, Simulation};
use shared::{decode_line, Bonus, Intent, Message, MessageKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};

/// Counts the lifecycle calls reaching the wrapped simulation
#[derive(Debug, Default, Clone, PartialEq)]
struct Calls {
    started: usize,
    advanced: usize,
    ended: usize,
    saved: usize,
    advanced_after_end: usize,
}

struct Recorder<S> {
    inner: S,
    calls: Arc<Mutex<Calls>>,
}

impl<S: Simulation> Simulation for Recorder<S> {
    async fn start_match(&mut self, roster: &mut Roster) {
        self.calls.lock().unwrap().started += 1;
        self.inner.start_match(roster).await;
    }

    async fn advance_tick(&mut self, roster: &mut Roster) -> bool {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.advanced += 1;
            if calls.ended > 0 {
                calls.advanced_after_end += 1;
            }
        }
        self.inner.advance_tick(roster).await
    }

    async fn end_match(&mut self, roster: &mut Roster) {
        self.calls.lock().unwrap().ended += 1;
        self.inner.end_match(roster).await;
    }

    fn save(&mut self) {
        self.calls.lock().unwrap().saved += 1;
        self.inner.save();
    }

    fn current_tick(&self) -> u64 {
        self.inner.current_tick()
    }

    fn replace_bonuses(&mut self, bonuses: Vec<Bonus>) {
        self.inner.replace_bonuses(bonuses);
    }
}

#[derive(Default)]
struct RecorderFactory {
    settings: ArenaSettings,
    calls: Arc<Mutex<Calls>>,
    cleared: usize,
}

impl MatchFactory for RecorderFactory {
    type Sim = Recorder<Arena>;

    fn new_match(&mut self, _roster: &Roster) -> Recorder<Arena> {
        *self.calls.lock().unwrap() = Calls::default();
        Recorder {
            inner: Arena::new(self.settings.clone()),
            calls: Arc::clone(&self.calls),
        }
    }

    fn clear_caches(&mut self) {
        self.cleared += 1;
    }
}

fn policy(max_tick_count: u64) -> TerminationPolicy {
    TerminationPolicy {
        timeout_enabled: true,
        max_tick_count,
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap()
}

/// CONNECTION BROKER TESTS
mod broker_tests {
    use super::*;

    /// The waiting window closes at its deadline, not earlier and not much later
    #[tokio::test]
    async fn window_expires_at_deadline() {
        let broker = ConnectionBroker::new(
            "127.0.0.1",
            Duration::from_millis(300),
            Duration::from_millis(100),
            ExecutionLimits::default(),
        );
        let started = Instant::now();
        let pending = broker.open(0).await.unwrap();
        let deadline = pending.deadline();

        assert!(pending.resolve().await.is_none());
        assert_approx_eq!(started.elapsed().as_secs_f64(), 0.3, 0.15);
        assert!(Instant::now() >= deadline);
    }

    /// Connections after the window are refused
    #[tokio::test]
    async fn late_client_is_refused() {
        let broker = ConnectionBroker::new(
            "127.0.0.1",
            Duration::from_millis(50),
            Duration::from_millis(50),
            ExecutionLimits::default(),
        );
        let pending = broker.open(0).await.unwrap();
        let addr = pending.local_addr();

        assert!(pending.resolve().await.is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    /// Two network slots with a shared window resolve clients arriving at
    /// 40% and 80% of it, and both then play a full match
    #[tokio::test]
    async fn staggered_clients_fill_both_slots() {
        let ports = [free_port(), free_port()];
        let config = RunnerConfig {
            slots: ports.iter().map(|&port| SlotSpec::Tcp { port }).collect(),
            wait_timeout: Duration::from_millis(1500),
            handshake_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(500),
            tick_period: Duration::from_millis(1),
            ..RunnerConfig::default()
        };
        config.validate().unwrap();

        let remotes: Vec<_> = [("alpha", ports[0], 600), ("beta", ports[1], 1200)]
            .into_iter()
            .map(|(id, port, delay)| {
                tokio::spawn(async move {
                    sleep(Duration::from_millis(delay)).await;
                    strategy::network::play_tcp(&format!("127.0.0.1:{}", port), id).await
                })
            })
            .collect();

        let started = Instant::now();
        let mut scheduler = TickScheduler::new(
            ArenaFactory::new(ArenaSettings::default()),
            Lineup::live(&config),
            policy(5),
            config.tick_period,
        );
        scheduler.start().await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(1500));
        let identities = scheduler.roster().unwrap().identities();
        assert_eq!(identities.get(&1).map(String::as_str), Some("alpha"));
        assert_eq!(identities.get(&2).map(String::as_str), Some("beta"));

        scheduler.run_to_end().await.unwrap();
        assert_eq!(scheduler.phase(), MatchPhase::Stopped);

        for remote in remotes {
            assert_eq!(remote.await.unwrap().unwrap(), 5);
        }
    }
}

/// CLIENT ADAPTER TESTS
mod client_tests {
    use super::*;

    /// A strategy exiting mid-match is benched; the match still runs to its
    /// limit and ends and saves once
    #[tokio::test]
    async fn process_exit_does_not_stop_match() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = dir.path().join("player1.log");
        let save_path = dir.path().join("visio.gz");

        let script = r#"read start; for i in 1 2 3; do read tick; echo '{"command": "up"}'; done"#;
        let config = RunnerConfig {
            slots: vec![
                SlotSpec::Process {
                    command: vec!["sh".into(), "-c".into(), script.into()],
                    transcript: Some(transcript.clone()),
                },
                SlotSpec::SimpleBot,
            ],
            request_timeout: Duration::from_millis(500),
            ..RunnerConfig::default()
        };

        let factory = RecorderFactory {
            settings: ArenaSettings {
                save_path: Some(save_path.clone()),
                ..ArenaSettings::default()
            },
            ..RecorderFactory::default()
        };
        let calls = Arc::clone(&factory.calls);
        let mut scheduler =
            TickScheduler::new(factory, Lineup::live(&config), policy(10), Duration::from_millis(1));

        scheduler.run_to_end().await.unwrap();

        assert_eq!(scheduler.current_tick(), 11);
        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.advanced, 10);
        assert_eq!(calls.ended, 1);
        assert_eq!(calls.saved, 1);
        assert_eq!(calls.advanced_after_end, 0);

        let roster = scheduler.roster().unwrap();
        assert!(roster.get(1).unwrap().is_faulted());
        assert!(!roster.get(2).unwrap().is_faulted());

        // Three replies, then nothing
        let exchanged = std::fs::read_to_string(&transcript).unwrap();
        assert_eq!(exchanged.lines().filter(|l| l.starts_with('<')).count(), 3);
        assert!(exchanged.lines().next().unwrap().contains("start_game"));

        // The benched player kept its heading from tick 4 on
        let log = RecordedLog::load(&save_path).unwrap();
        assert_eq!(log.last_tick(), 10);
        for tick in 1..=10 {
            assert_eq!(log.intent_at(tick, 1), Intent::Up);
        }
    }
}

/// TICK SCHEDULER TESTS
mod scheduler_tests {
    use super::*;

    fn bots() -> RunnerConfig {
        RunnerConfig {
            slots: vec![SlotSpec::SimpleBot, SlotSpec::SimpleBot],
            ..RunnerConfig::default()
        }
    }

    /// Timeout enforcement stops the match at the tick limit
    #[tokio::test]
    async fn max_tick_count_ends_match() {
        let factory = RecorderFactory::default();
        let calls = Arc::clone(&factory.calls);
        let mut scheduler =
            TickScheduler::new(factory, Lineup::live(&bots()), policy(50), Duration::from_millis(1));

        scheduler.run_to_end().await.unwrap();

        assert_eq!(scheduler.phase(), MatchPhase::Stopped);
        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            Calls {
                started: 1,
                advanced: 50,
                ended: 1,
                saved: 1,
                advanced_after_end: 0,
            }
        );
        assert!(scheduler.game().is_some());
    }

    /// Restart rebuilds everything and starts over at the first tick
    #[tokio::test]
    async fn restart_resets_to_first_tick() {
        let mut scheduler = TickScheduler::new(
            RecorderFactory::default(),
            Lineup::live(&bots()),
            policy(1000),
            Duration::from_millis(1),
        );
        scheduler.start().await.unwrap();
        for _ in 0..20 {
            scheduler.step().await;
        }
        assert_eq!(scheduler.current_tick(), 21);

        scheduler.restart().await.unwrap();

        assert_eq!(scheduler.phase(), MatchPhase::Running);
        assert_eq!(scheduler.current_tick(), 1);
        assert_eq!(scheduler.factory().cleared, 1);
        assert_eq!(scheduler.roster().unwrap().len(), 2);
    }

    /// A connected network strategy is carried over on restart without a new
    /// waiting window, while the process and in-process players are rebuilt
    #[tokio::test]
    async fn restart_keeps_connected_network_client() {
        let port = free_port();
        let config = RunnerConfig {
            slots: vec![
                SlotSpec::Tcp { port },
                SlotSpec::Process {
                    command: vec![
                        "sh".into(),
                        "-c".into(),
                        r#"while read line; do echo '{"command": "up"}'; done"#.into(),
                    ],
                    transcript: None,
                },
                SlotSpec::SimpleBot,
            ],
            wait_timeout: Duration::from_millis(2000),
            handshake_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(500),
            ..RunnerConfig::default()
        };

        let remote = tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            write_half
                .write_all(b"{\"solution_id\": \"keeper\"}\n")
                .await
                .unwrap();

            let mut lines = BufReader::new(read_half).lines();
            let mut ticks = 0u64;
            while let Ok(Some(line)) = lines.next_line().await {
                let message: Message = decode_line(&line).unwrap();
                if message.kind == MessageKind::Tick {
                    write_half
                        .write_all(b"{\"command\": \"right\"}\n")
                        .await
                        .unwrap();
                    ticks += 1;
                }
            }
            ticks
        });

        let mut scheduler = TickScheduler::new(
            ArenaFactory::new(ArenaSettings::default()),
            Lineup::live(&config),
            policy(1000),
            Duration::from_millis(1),
        );
        scheduler.start().await.unwrap();
        for _ in 0..3 {
            scheduler.step().await;
        }

        let roster = scheduler.roster().unwrap();
        let Some(Client::Network(remote_client)) = roster.get(1) else {
            panic!("player 1 should be the network client");
        };
        let peer = remote_client.peer();
        assert!(remote_client.execution_time() > Duration::ZERO);
        let Some(Client::Process(process)) = roster.get(2) else {
            panic!("player 2 should be the process client");
        };
        let first_pid = process.id();
        let fresh_bot = format!("{:?}", ScriptedClient::new(config.seed.wrapping_add(3)));
        let Some(Client::Scripted(bot)) = roster.get(3) else {
            panic!("player 3 should be the scripted client");
        };
        assert_ne!(format!("{:?}", bot), fresh_bot);

        let restarted = Instant::now();
        scheduler.restart().await.unwrap();
        assert!(restarted.elapsed() < Duration::from_millis(1000));

        // Same connection, budget spent from zero
        let roster = scheduler.roster().unwrap();
        let Some(Client::Network(remote_client)) = roster.get(1) else {
            panic!("player 1 should still be the network client");
        };
        assert_eq!(remote_client.peer(), peer);
        assert_eq!(remote_client.identity(), "keeper");
        assert_eq!(remote_client.execution_time(), Duration::ZERO);
        assert!(!remote_client.is_faulted());

        // No listener was bound again
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

        let Some(Client::Process(process)) = roster.get(2) else {
            panic!("player 2 should be the process client");
        };
        assert_ne!(process.id(), first_pid);
        let Some(Client::Scripted(bot)) = roster.get(3) else {
            panic!("player 3 should be the scripted client");
        };
        assert_eq!(format!("{:?}", bot), fresh_bot);

        scheduler.step().await;
        assert!(!scheduler.roster().unwrap().get(1).unwrap().is_faulted());

        drop(scheduler);
        assert_eq!(remote.await.unwrap(), 4);
    }

    /// Restarting a finished match is allowed
    #[tokio::test]
    async fn restart_after_stop() {
        let mut scheduler = TickScheduler::new(
            RecorderFactory::default(),
            Lineup::live(&bots()),
            policy(3),
            Duration::from_millis(1),
        );
        scheduler.run_to_end().await.unwrap();
        assert_eq!(scheduler.phase(), MatchPhase::Stopped);

        scheduler.restart().await.unwrap();
        assert_eq!(scheduler.phase(), MatchPhase::Running);

        scheduler.run_to_end().await.unwrap();
        assert_eq!(scheduler.phase(), MatchPhase::Stopped);
    }
}
