//! Tournament Module
//!
//! Round-robin tournaments built on top of the room directory.
//!
//! ## Module Structure
//!
//! - `bracket`: Pure pairing generation and final standing
//! - `scheduler`: Sign-up window, match assignment and result aggregation

pub mod bracket;
pub mod scheduler;

pub use bracket::{final_result, round_robin, FinalResult, Pairing, ResultKind};
pub use scheduler::{
    MatchAssignment, TournamentConfig, TournamentError, TournamentScheduler, TournamentView,
};
