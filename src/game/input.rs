//! Paddle Input
//!
//! A paddle only ever moves up, down or not at all. Clients report key
//! presses; the simulation keeps the resulting velocity sign until the next
//! input arrives.

use serde::{Serialize, Deserialize};
use crate::core::fixed::Fixed;

/// Direction a paddle is being driven in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddleDirection {
    /// Towards y = 0.
    Up,
    /// Towards the bottom wall.
    Down,
    /// Paddle at rest.
    #[default]
    Stop,
}

impl PaddleDirection {
    /// Velocity sign applied to the paddle speed.
    #[inline]
    pub const fn sign(self) -> Fixed {
        match self {
            PaddleDirection::Up => -1,
            PaddleDirection::Down => 1,
            PaddleDirection::Stop => 0,
        }
    }

    /// Map a key name to a direction.
    ///
    /// Accepts the canonical `up`/`down` as well as the raw browser key
    /// names older clients send (`w`, `s`, `ArrowUp`, `ArrowDown`).
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "up" | "w" | "W" | "ArrowUp" => Some(PaddleDirection::Up),
            "down" | "s" | "S" | "ArrowDown" => Some(PaddleDirection::Down),
            "stop" => Some(PaddleDirection::Stop),
            _ => None,
        }
    }
}
