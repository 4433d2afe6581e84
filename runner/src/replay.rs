//! Deterministic replay of a recorded match.
//!
//! A recorded log ("visio") is a JSON document, optionally gzipped:
//!
//! ```json
//! {
//!   "visio_version": 2,
//!   "config": {"1": "solution-a", "2": "solution-b"},
//!   "visio_info": [
//!     {"type": "start_game", "x_cells_count": 31, "y_cells_count": 31, "speed": 5, "width": 30},
//!     {"type": "tick", "tick_num": 1, "players": {"1": {"direction": "left"}}, "bonuses": []}
//!   ]
//! }
//! ```
//!
//! `visio_info[t]` describes tick `t`. Only the header is trusted blindly after
//! validation; tick records that do not parse are treated as missing data.

use crate::client::Client;
use crate::error::RunnerError;
use crate::scheduler::MatchFactory;
use crate::simulation::{Roster, Simulation};
use flate2::read::GzDecoder;
use log::info;
use serde::Deserialize;
use shared::{Bonus, Intent, VISIO_VERSION};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Command replayed when the log has nothing for a player at a tick
pub const DEFAULT_REPLAY_INTENT: Intent = Intent::Left;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Board parameters from the `start_game` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MatchDescriptor {
    pub x_cells_count: i32,
    pub y_cells_count: i32,
    pub speed: i32,
    pub width: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct TickSnapshot {
    bonuses: Option<Vec<Bonus>>,
    players: BTreeMap<u32, Intent>,
}

#[derive(Deserialize)]
struct RawLog {
    #[serde(default)]
    visio_version: u32,
    #[serde(default)]
    config: BTreeMap<String, String>,
    #[serde(default)]
    visio_info: Vec<serde_json::Value>,
}

/// Immutable recorded match, addressed by tick
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedLog {
    version: u32,
    descriptor: MatchDescriptor,
    players: BTreeMap<u32, String>,
    records: Vec<Option<TickSnapshot>>,
}

impl RecordedLog {
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let bytes = std::fs::read(path)
            .map_err(|e| RunnerError::replay_load(path, format!("cannot read file: {}", e)))?;
        Self::from_slice(&bytes).map_err(|reason| RunnerError::replay_load(path, reason))
    }

    /// Parses plain or gzipped JSON
    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        if bytes.starts_with(&GZIP_MAGIC) {
            let mut json = Vec::new();
            GzDecoder::new(bytes)
                .read_to_end(&mut json)
                .map_err(|e| format!("corrupt gzip stream: {}", e))?;
            Self::from_json(&json)
        } else {
            Self::from_json(bytes)
        }
    }

    fn from_json(json: &[u8]) -> Result<Self, String> {
        let raw: RawLog =
            serde_json::from_slice(json).map_err(|e| format!("malformed log: {}", e))?;

        if raw.visio_version < VISIO_VERSION {
            return Err(format!(
                "unsupported visio_version {} (need {} or later)",
                raw.visio_version, VISIO_VERSION
            ));
        }

        let header = raw
            .visio_info
            .first()
            .ok_or_else(|| "log has no records".to_string())?;
        if header.get("type").and_then(|t| t.as_str()) != Some("start_game") {
            return Err("first record is not start_game".to_string());
        }
        let descriptor = MatchDescriptor::deserialize(header)
            .map_err(|e| format!("malformed start_game record: {}", e))?;

        if raw.config.is_empty() {
            return Err("log names no players".to_string());
        }
        let players = raw
            .config
            .into_iter()
            .map(|(key, solution_id)| {
                key.parse::<u32>()
                    .map(|ordinal| (ordinal, solution_id))
                    .map_err(|_| format!("invalid player key '{}'", key))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let records = std::iter::once(None)
            .chain(raw.visio_info.iter().skip(1).map(parse_tick))
            .collect();

        Ok(Self {
            version: raw.visio_version,
            descriptor,
            players,
            records,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn descriptor(&self) -> MatchDescriptor {
        self.descriptor
    }

    /// Player ordinal to solution id
    pub fn players(&self) -> &BTreeMap<u32, String> {
        &self.players
    }

    /// Highest tick with a recorded snapshot, 0 when there is none
    pub fn last_tick(&self) -> u64 {
        self.records
            .iter()
            .rposition(Option::is_some)
            .unwrap_or(0) as u64
    }

    /// Bonuses on the board at `tick`; empty when the log has none
    pub fn bonuses_at(&self, tick: u64) -> Vec<Bonus> {
        self.snapshot(tick)
            .and_then(|snapshot| snapshot.bonuses.clone())
            .unwrap_or_default()
    }

    /// Recorded command of `player` at `tick`.
    ///
    /// Inside the recording a missing entry yields [`DEFAULT_REPLAY_INTENT`];
    /// past the end the player's last recorded command is repeated.
    pub fn intent_at(&self, tick: u64, player: u32) -> Intent {
        if tick > self.last_tick() {
            return self
                .records
                .iter()
                .rev()
                .flatten()
                .find_map(|snapshot| snapshot.players.get(&player).copied())
                .unwrap_or(DEFAULT_REPLAY_INTENT);
        }

        self.snapshot(tick)
            .and_then(|snapshot| snapshot.players.get(&player).copied())
            .unwrap_or(DEFAULT_REPLAY_INTENT)
    }

    fn snapshot(&self, tick: u64) -> Option<&TickSnapshot> {
        usize::try_from(tick)
            .ok()
            .and_then(|index| self.records.get(index))
            .and_then(Option::as_ref)
    }
}

fn parse_tick(record: &serde_json::Value) -> Option<TickSnapshot> {
    let kind = record.get("type").and_then(|t| t.as_str()).unwrap_or("tick");
    if kind != "tick" {
        return None;
    }

    // An unreadable entry is skipped, the rest of the tick's bonuses are kept
    let bonuses = record
        .get("bonuses")
        .and_then(|bonuses| bonuses.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| Bonus::deserialize(entry).ok())
                .collect()
        });

    let players = record
        .get("players")
        .and_then(|players| players.as_object())
        .map(|players| {
            players
                .iter()
                .filter_map(|(key, entry)| {
                    let ordinal = key.parse::<u32>().ok()?;
                    let intent = entry.get("direction")?.as_str()?.parse::<Intent>().ok()?;
                    Some((ordinal, intent))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(TickSnapshot { bonuses, players })
}

/// Tick currently being replayed, shared by the decorator and all replay clients
#[derive(Debug, Clone, Default)]
pub struct ReplayCursor(Arc<AtomicU64>);

impl ReplayCursor {
    pub fn set(&self, tick: u64) {
        self.0.store(tick, Ordering::Release);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Stands in for a player by reading its recorded commands
#[derive(Debug)]
pub struct ReplayClient {
    player: u32,
    solution_id: String,
    log: Arc<RecordedLog>,
    cursor: ReplayCursor,
}

impl ReplayClient {
    pub fn new(player: u32, log: Arc<RecordedLog>, cursor: ReplayCursor) -> Self {
        let solution_id = log.players().get(&player).cloned().unwrap_or_default();
        Self {
            player,
            solution_id,
            log,
            cursor,
        }
    }

    pub fn identity(&self) -> &str {
        &self.solution_id
    }

    pub fn produce_intent(&mut self) -> Intent {
        self.log.intent_at(self.cursor.get(), self.player)
    }
}

/// Replays one log: provides the players and decorates simulations
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    log: Arc<RecordedLog>,
    cursor: ReplayCursor,
}

impl ReplayEngine {
    pub fn new(log: RecordedLog) -> Self {
        Self {
            log: Arc::new(log),
            cursor: ReplayCursor::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let log = RecordedLog::load(path)?;
        info!(
            "Loaded replay {} (version {}, {} players, {} ticks)",
            path.display(),
            log.version(),
            log.players().len(),
            log.last_tick()
        );
        Ok(Self::new(log))
    }

    pub fn log(&self) -> &RecordedLog {
        &self.log
    }

    pub fn cursor(&self) -> &ReplayCursor {
        &self.cursor
    }

    /// One replay client per recorded player, in ordinal order
    pub fn roster(&self) -> Roster {
        let mut roster = Roster::new();
        for &player in self.log.players().keys() {
            let client = ReplayClient::new(player, Arc::clone(&self.log), self.cursor.clone());
            roster.push(player, Client::Replay(client));
        }
        roster
    }

    pub fn wrap<S: Simulation>(&self, inner: S) -> ReplaySimulation<S> {
        self.cursor.set(inner.current_tick());
        ReplaySimulation {
            inner,
            log: Arc::clone(&self.log),
            cursor: self.cursor.clone(),
        }
    }
}

/// A simulation fed with the recorded bonuses, never saved
pub struct ReplaySimulation<S> {
    inner: S,
    log: Arc<RecordedLog>,
    cursor: ReplayCursor,
}

impl<S> ReplaySimulation<S> {
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Simulation> Simulation for ReplaySimulation<S> {
    async fn start_match(&mut self, roster: &mut Roster) {
        self.cursor.set(self.inner.current_tick());
        self.inner.start_match(roster).await;
    }

    async fn advance_tick(&mut self, roster: &mut Roster) -> bool {
        let tick = self.inner.current_tick();
        self.cursor.set(tick);
        self.inner.replace_bonuses(self.log.bonuses_at(tick));

        let ended = self.inner.advance_tick(roster).await;
        ended || self.inner.current_tick() >= self.log.last_tick()
    }

    async fn end_match(&mut self, roster: &mut Roster) {
        self.inner.end_match(roster).await;
    }

    fn save(&mut self) {}

    fn current_tick(&self) -> u64 {
        self.inner.current_tick()
    }

    fn replace_bonuses(&mut self, bonuses: Vec<Bonus>) {
        self.inner.replace_bonuses(bonuses);
    }
}

/// Builds replayed matches on top of another factory
pub struct ReplayFactory<F> {
    engine: ReplayEngine,
    inner: F,
}

impl<F> ReplayFactory<F> {
    pub fn new(engine: ReplayEngine, inner: F) -> Self {
        Self { engine, inner }
    }
}

impl<F: MatchFactory> MatchFactory for ReplayFactory<F> {
    type Sim = ReplaySimulation<F::Sim>;

    fn new_match(&mut self, roster: &Roster) -> Self::Sim {
        self.engine.wrap(self.inner.new_match(roster))
    }

    fn clear_caches(&mut self) {
        self.inner.clear_caches();
    }
}
