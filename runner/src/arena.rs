//! Reference arena: the smallest simulation that can host a real match.
//!
//! Players move one cell per tick on a bounded grid, may not reverse, and are
//! eliminated when they leave the board. Bonuses appear at random and expire.
//! Every tick is recorded so a saved match can be replayed.

use crate::config::RunnerConfig;
use crate::replay::MatchDescriptor;
use crate::scheduler::MatchFactory;
use crate::simulation::{Roster, Simulation};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use shared::{
    Bonus, BonusKind, Intent, Message, MessageKind, SPEED, VISIO_VERSION, WIDTH, X_CELLS_COUNT,
    Y_CELLS_COUNT,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const BONUS_KINDS: [BonusKind; 3] = [BonusKind::Nitro, BonusKind::Slowdown, BonusKind::Saw];

/// Spawn points as fractions of the board, in slot order
const SPAWN_POINTS: [(f32, f32); 6] = [
    (0.25, 0.25),
    (0.75, 0.75),
    (0.25, 0.75),
    (0.75, 0.25),
    (0.5, 0.25),
    (0.5, 0.75),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ArenaSettings {
    pub x_cells_count: i32,
    pub y_cells_count: i32,
    pub width: i32,
    pub speed: i32,
    pub seed: u64,
    /// Chance per tick that a bonus spawns while below `max_bonuses`
    pub bonus_chance: f64,
    pub max_bonuses: usize,
    pub save_path: Option<PathBuf>,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            x_cells_count: X_CELLS_COUNT,
            y_cells_count: Y_CELLS_COUNT,
            width: WIDTH,
            speed: SPEED,
            seed: 0,
            bonus_chance: 0.05,
            max_bonuses: 3,
            save_path: None,
        }
    }
}

impl ArenaSettings {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            seed: config.seed,
            save_path: config.save_path.clone(),
            ..Self::default()
        }
    }

    /// Board of a recorded match; replays are never saved
    pub fn from_descriptor(descriptor: MatchDescriptor, seed: u64) -> Self {
        Self {
            x_cells_count: descriptor.x_cells_count,
            y_cells_count: descriptor.y_cells_count,
            width: descriptor.width,
            speed: descriptor.speed,
            seed,
            ..Self::default()
        }
    }

    fn contains(&self, cell: (i32, i32)) -> bool {
        (0..self.x_cells_count).contains(&cell.0) && (0..self.y_cells_count).contains(&cell.1)
    }

    /// Pixel coordinates of the center of `cell`
    fn to_pixels(&self, cell: (i32, i32)) -> (i32, i32) {
        (
            cell.0 * self.width + self.width / 2,
            cell.1 * self.width + self.width / 2,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contender {
    pub cell: (i32, i32),
    pub heading: Intent,
    pub alive: bool,
}

pub struct Arena {
    settings: ArenaSettings,
    rng: StdRng,
    tick: u64,
    contenders: BTreeMap<u32, Contender>,
    bonuses: Vec<Bonus>,
    injected: Option<Vec<Bonus>>,
    players: BTreeMap<u32, String>,
    visio: Vec<Value>,
    finished: bool,
}

impl Arena {
    pub fn new(settings: ArenaSettings) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            settings,
            rng,
            tick: 1,
            contenders: BTreeMap::new(),
            bonuses: Vec::new(),
            injected: None,
            players: BTreeMap::new(),
            visio: Vec::new(),
            finished: false,
        }
    }

    pub fn contenders(&self) -> &BTreeMap<u32, Contender> {
        &self.contenders
    }

    pub fn bonuses(&self) -> &[Bonus] {
        &self.bonuses
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The recorded match in the replay log layout
    pub fn visio(&self) -> Value {
        let config: BTreeMap<String, &String> = self
            .players
            .iter()
            .map(|(ordinal, id)| (ordinal.to_string(), id))
            .collect();
        json!({
            "visio_version": VISIO_VERSION,
            "config": config,
            "visio_info": self.visio,
        })
    }

    fn descriptor(&self) -> Value {
        json!({
            "x_cells_count": self.settings.x_cells_count,
            "y_cells_count": self.settings.y_cells_count,
            "speed": self.settings.speed,
            "width": self.settings.width,
        })
    }

    fn spawn_cell(&self, index: usize) -> (i32, i32) {
        let (fx, fy) = SPAWN_POINTS[index % SPAWN_POINTS.len()];
        (
            (self.settings.x_cells_count as f32 * fx) as i32,
            (self.settings.y_cells_count as f32 * fy) as i32,
        )
    }

    /// Bonuses for the tick about to be played: injected ones win over the
    /// arena's own ageing and spawning
    fn refresh_bonuses(&mut self) {
        if let Some(bonuses) = self.injected.take() {
            self.bonuses = bonuses;
            return;
        }

        for bonus in self.bonuses.iter_mut() {
            bonus.active_ticks = bonus.active_ticks.saturating_sub(1);
        }
        self.bonuses.retain(|bonus| bonus.active_ticks > 0);

        if self.bonuses.len() < self.settings.max_bonuses
            && self.rng.gen_bool(self.settings.bonus_chance)
        {
            let cell = (
                self.rng.gen_range(0..self.settings.x_cells_count),
                self.rng.gen_range(0..self.settings.y_cells_count),
            );
            let kind = BONUS_KINDS[self.rng.gen_range(0..BONUS_KINDS.len())];
            let bonus = Bonus::new(kind, self.settings.to_pixels(cell), self.rng.gen_range(10..=50));
            debug!("Bonus {:?} spawned at {:?}", bonus.kind, bonus.position);
            self.bonuses.push(bonus);
        }
    }

    fn observation_params(&self, viewer: u32) -> Value {
        let players: serde_json::Map<String, Value> = self
            .contenders
            .iter()
            .map(|(&ordinal, contender)| {
                let key = if ordinal == viewer {
                    "i".to_string()
                } else {
                    ordinal.to_string()
                };
                let state = json!({
                    "position": self.settings.to_pixels(contender.cell),
                    "direction": contender.heading,
                    "alive": contender.alive,
                });
                (key, state)
            })
            .collect();

        json!({
            "tick_num": self.tick,
            "players": players,
            "bonuses": self.bonuses,
        })
    }

    fn apply_intents(&mut self, intents: &BTreeMap<u32, Intent>) {
        for (ordinal, contender) in self.contenders.iter_mut() {
            if !contender.alive {
                continue;
            }

            let intent = intents.get(ordinal).copied().unwrap_or_default();
            if intent.is_directional() && intent != contender.heading.opposite() {
                contender.heading = intent;
            }

            let (dx, dy) = contender.heading.delta();
            let next = (contender.cell.0 + dx, contender.cell.1 + dy);
            if self.settings.contains(next) {
                contender.cell = next;
            } else {
                contender.alive = false;
                info!("Player {} left the board at tick {}", ordinal, self.tick);
            }
        }
    }

    fn record_tick(&mut self) {
        let players: BTreeMap<String, Value> = self
            .contenders
            .iter()
            .map(|(ordinal, contender)| {
                (
                    ordinal.to_string(),
                    json!({
                        "direction": contender.heading,
                        "position": self.settings.to_pixels(contender.cell),
                        "alive": contender.alive,
                    }),
                )
            })
            .collect();

        self.visio.push(json!({
            "type": "tick",
            "tick_num": self.tick,
            "players": players,
            "bonuses": self.bonuses,
        }));
    }

    fn write_visio(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, &self.visio())?;
        encoder.finish()?.flush()
    }
}

impl Simulation for Arena {
    async fn start_match(&mut self, roster: &mut Roster) {
        self.players = roster.identities();
        self.contenders = roster
            .ordinals()
            .into_iter()
            .enumerate()
            .map(|(index, ordinal)| {
                let contender = Contender {
                    cell: self.spawn_cell(index),
                    heading: Intent::Neutral,
                    alive: true,
                };
                (ordinal, contender)
            })
            .collect();

        let mut start = self.descriptor();
        start["type"] = json!("start_game");
        self.visio = vec![start];

        roster
            .broadcast(&Message::new(MessageKind::StartGame, self.descriptor()))
            .await;
        info!(
            "Arena {}x{} ready for {} players",
            self.settings.x_cells_count,
            self.settings.y_cells_count,
            self.contenders.len()
        );
    }

    async fn advance_tick(&mut self, roster: &mut Roster) -> bool {
        self.refresh_bonuses();

        let tick = self.tick;
        let intents = roster
            .collect_intents(|ordinal| {
                crate::client::Observation::new(tick, self.observation_params(ordinal))
            })
            .await;

        self.apply_intents(&intents);
        self.record_tick();
        self.tick += 1;

        !self.contenders.values().any(|contender| contender.alive)
    }

    async fn end_match(&mut self, roster: &mut Roster) {
        let results: BTreeMap<String, bool> = self
            .contenders
            .iter()
            .map(|(ordinal, contender)| (ordinal.to_string(), contender.alive))
            .collect();
        let params = json!({ "tick_num": self.tick.saturating_sub(1), "alive": results });

        roster
            .broadcast(&Message::new(MessageKind::EndGame, params.clone()))
            .await;
        self.visio.push(json!({ "type": "end_game", "params": params }));
        self.finished = true;
    }

    fn save(&mut self) {
        let Some(path) = self.settings.save_path.as_deref() else {
            return;
        };

        match self.write_visio(path) {
            Ok(()) => info!("Match saved to {}", path.display()),
            Err(e) => error!("Failed to save match to {}: {}", path.display(), e),
        }
    }

    fn current_tick(&self) -> u64 {
        self.tick
    }

    fn replace_bonuses(&mut self, bonuses: Vec<Bonus>) {
        self.injected = Some(bonuses);
    }
}

/// Creates a fresh arena with the same settings for every match
#[derive(Debug, Clone)]
pub struct ArenaFactory {
    settings: ArenaSettings,
}

impl ArenaFactory {
    pub fn new(settings: ArenaSettings) -> Self {
        Self { settings }
    }
}

impl MatchFactory for ArenaFactory {
    type Sim = Arena;

    fn new_match(&mut self, _roster: &Roster) -> Arena {
        Arena::new(self.settings.clone())
    }
}
