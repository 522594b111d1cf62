//! Game Logic Module
//!
//! All match simulation code. 100% deterministic and synchronous.
//!
//! ## Module Structure
//!
//! - `input`: Paddle directions and key-name mapping
//! - `state`: Match state machine (join, leave, ready, input)
//! - `tick`: Authoritative physics step
//! - `events`: Events emitted by the state machine and the tick

pub mod input;
pub mod state;
pub mod tick;
pub mod events;

// Re-export key types
pub use input::PaddleDirection;
pub use state::{
    MatchError, MatchId, MatchPhase, MatchSnapshot, MatchState, Paddle, PerPaddle, SessionKey,
};
pub use tick::{tick, MatchConfig, TickFault, TickResult};
pub use events::{CountdownKind, GameEvent, GameEventData};
