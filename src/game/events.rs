//! Game Events
//!
//! Events produced by the match state machine and the physics tick. The
//! network layer turns them into client messages and lifecycle logs.

use serde::{Serialize, Deserialize};
use crate::game::state::{Paddle, PerPaddle, SessionKey};

/// Why a countdown is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountdownKind {
    /// Both players just readied up.
    Start,
    /// A point was scored and the ball is about to be re-served.
    Serve,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventData {
    /// A session took (or re-took) a paddle.
    PlayerJoined {
        /// Paddle taken.
        paddle: Paddle,
        /// Session now holding it.
        session_key: SessionKey,
        /// Session already held this paddle.
        rejoined: bool,
    },

    /// A session gave up its paddle.
    PlayerLeft {
        /// Paddle freed.
        paddle: Paddle,
        /// Session that held it.
        session_key: SessionKey,
    },

    /// Ready flags changed.
    ReadyChanged {
        /// Flags after the change.
        ready: PerPaddle<bool>,
    },

    /// A countdown began.
    CountdownStarted {
        /// Start or serve countdown.
        kind: CountdownKind,
    },

    /// Whole seconds left on the running countdown.
    CountdownTick {
        /// Seconds remaining.
        seconds: u32,
    },

    /// Countdown reached zero, ball is live.
    CountdownEnded,

    /// Play stopped because a paddle emptied; the match waits for a
    /// replacement.
    Halted,

    /// A side scored.
    PointScored {
        /// Side that scored.
        scorer: Paddle,
        /// Score after the point.
        score: PerPaddle<u32>,
    },

    /// Match reached a terminal state. `None` means it was terminated
    /// without a winner.
    MatchOver {
        /// Winning paddle.
        winner: Option<Paddle>,
    },
}

/// A game event stamped with the simulation tick it happened on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Physics tick when the event occurred
    pub tick: u32,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u32, data: GameEventData) -> Self {
        Self { tick, data }
    }

    /// Whether clients should receive a fresh snapshot right away.
    pub fn forces_snapshot(&self) -> bool {
        matches!(
            self.data,
            GameEventData::PointScored { .. } | GameEventData::MatchOver { .. }
        )
    }
}
