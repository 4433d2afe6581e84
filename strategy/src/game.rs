use serde_json::Value;
use shared::{Intent, WIDTH, X_CELLS_COUNT, Y_CELLS_COUNT};

/// Board geometry announced by `start_game`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    pub x_cells_count: i32,
    pub y_cells_count: i32,
    pub width: i32,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            x_cells_count: X_CELLS_COUNT,
            y_cells_count: Y_CELLS_COUNT,
            width: WIDTH,
        }
    }
}

impl Board {
    /// Missing fields fall back to the default board
    pub fn from_params(params: &Value) -> Self {
        let field = |name: &str, fallback: i32| {
            params
                .get(name)
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok())
                .unwrap_or(fallback)
        };
        let default = Self::default();
        Self {
            x_cells_count: field("x_cells_count", default.x_cells_count),
            y_cells_count: field("y_cells_count", default.y_cells_count),
            width: field("width", default.width).max(1),
        }
    }

    /// Cell holding a pixel position
    pub fn cell_of(&self, position: (i32, i32)) -> (i32, i32) {
        (position.0 / self.width, position.1 / self.width)
    }

    pub fn contains(&self, cell: (i32, i32)) -> bool {
        (0..self.x_cells_count).contains(&cell.0) && (0..self.y_cells_count).contains(&cell.1)
    }
}

/// Keeps going straight and turns away from the edges
#[derive(Debug, Clone)]
pub struct Pilot {
    board: Board,
    heading: Intent,
}

impl Pilot {
    pub fn new(board: Board) -> Self {
        Self {
            board,
            heading: Intent::Left,
        }
    }

    pub fn board(&self) -> Board {
        self.board
    }

    /// Picks the command for one `tick` message
    pub fn decide(&mut self, params: &Value) -> Intent {
        let me = &params["players"]["i"];

        if let Some(direction) = me
            .get("direction")
            .and_then(Value::as_str)
            .and_then(|d| d.parse::<Intent>().ok())
            .filter(|d| d.is_directional())
        {
            self.heading = direction;
        }

        let Some(position) = me
            .get("position")
            .and_then(|p| serde_json::from_value::<(i32, i32)>(p.clone()).ok())
        else {
            return self.heading;
        };
        let cell = self.board.cell_of(position);

        let index = Intent::TURNS
            .iter()
            .position(|turn| *turn == self.heading)
            .unwrap_or(0);
        let candidates = [
            Intent::TURNS[index],
            Intent::TURNS[(index + 1) % 4],
            Intent::TURNS[(index + 3) % 4],
        ];

        let choice = candidates
            .into_iter()
            .find(|turn| {
                let (dx, dy) = turn.delta();
                self.board.contains((cell.0 + dx, cell.1 + dy))
            })
            .unwrap_or(self.heading);

        self.heading = choice;
        choice
    }
}
