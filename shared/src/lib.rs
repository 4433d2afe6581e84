use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const MAX_CLIENTS: usize = 6;
pub const HOST_NAME: &str = "127.0.0.1";
pub const CLIENT_WAIT_TIMEOUT: Duration = Duration::from_secs(20);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_MAX_TIME: Duration = Duration::from_secs(5);
pub const MAX_EXECUTION_TIME: Duration = Duration::from_secs(120);
pub const MAX_TICK_COUNT: u64 = 1500;
pub const VISIO_VERSION: u32 = 2;

pub const X_CELLS_COUNT: i32 = 31;
pub const Y_CELLS_COUNT: i32 = 31;
pub const WIDTH: i32 = 30;
pub const SPEED: i32 = 5;

/// Directional command a player contributes for one tick.
///
/// `Neutral` means "no command": the simulation keeps the current heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Left,
    Right,
    Up,
    Down,
    #[default]
    Neutral,
}

impl Intent {
    /// Clockwise turn order starting from `Left`
    pub const TURNS: [Intent; 4] = [Intent::Left, Intent::Up, Intent::Right, Intent::Down];

    pub fn is_directional(self) -> bool {
        self != Intent::Neutral
    }

    pub fn opposite(self) -> Intent {
        match self {
            Intent::Left => Intent::Right,
            Intent::Right => Intent::Left,
            Intent::Up => Intent::Down,
            Intent::Down => Intent::Up,
            Intent::Neutral => Intent::Neutral,
        }
    }

    /// Cell offset of one step, y grows upwards
    pub fn delta(self) -> (i32, i32) {
        match self {
            Intent::Left => (-1, 0),
            Intent::Right => (1, 0),
            Intent::Up => (0, 1),
            Intent::Down => (0, -1),
            Intent::Neutral => (0, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Left => "left",
            Intent::Right => "right",
            Intent::Up => "up",
            Intent::Down => "down",
            Intent::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownIntent(pub String);

impl fmt::Display for UnknownIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown direction '{}'", self.0)
    }
}

impl std::error::Error for UnknownIntent {}

/// Accepts the wire names as well as WASD keys, which is what operators type.
impl FromStr for Intent {
    type Err = UnknownIntent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "a" => Ok(Intent::Left),
            "right" | "d" => Ok(Intent::Right),
            "up" | "w" => Ok(Intent::Up),
            "down" | "s" => Ok(Intent::Down),
            "neutral" | "" => Ok(Intent::Neutral),
            other => Err(UnknownIntent(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    StartGame,
    Tick,
    EndGame,
}

/// Runner -> strategy message, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Message {
    pub fn new(kind: MessageKind, params: serde_json::Value) -> Self {
        Self { kind, params }
    }
}

/// Strategy -> runner reply for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    #[serde(default)]
    pub command: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl CommandReply {
    pub fn intent(&self) -> Intent {
        self.command.unwrap_or_default()
    }
}

/// First line a TCP strategy sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub solution_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BonusKind {
    #[serde(rename = "n")]
    Nitro,
    #[serde(rename = "s")]
    Slowdown,
    #[serde(rename = "saw")]
    Saw,
}

/// Transient board item with a limited active duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bonus {
    #[serde(rename = "type")]
    pub kind: BonusKind,
    pub position: (i32, i32),
    pub active_ticks: u32,
}

impl Bonus {
    pub fn new(kind: BonusKind, position: (i32, i32), active_ticks: u32) -> Self {
        Self {
            kind,
            position,
            active_ticks,
        }
    }
}

/// Serializes a value as a single newline-terminated JSON line
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}
