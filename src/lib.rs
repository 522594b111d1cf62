//! # Pong Arena Server
//!
//! Real-time two-player pong engine with matchmaking and a round-robin
//! tournament scheduler.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PONG ARENA SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  └── vec2.rs     - 2D vector with fixed-point                │
//! │                                                              │
//! │  game/           - Match logic (deterministic)               │
//! │  ├── input.rs    - Paddle directions                         │
//! │  ├── state.rs    - Match state machine                       │
//! │  ├── tick.rs     - Authoritative physics step                │
//! │  └── events.rs   - Match events                              │
//! │                                                              │
//! │  network/        - Runtime (non-deterministic)               │
//! │  ├── session.rs  - Per-match owner and loops                 │
//! │  ├── directory.rs- Matchmaking and reclamation               │
//! │  ├── fanout.rs   - Topic broadcast                           │
//! │  ├── results.rs  - Result sink and outcome pump              │
//! │  ├── auth.rs     - Connection identity                       │
//! │  ├── protocol.rs - Message types                             │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  tournament/     - Round-robin tournaments                   │
//! │  ├── bracket.rs  - Pairings and final standing               │
//! │  └── scheduler.rs- Sign-up, assignment, results              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! The `core/` and `game/` modules are deterministic: integer math only,
//! `BTreeMap` for ordered iteration, no clocks and no randomness. Floats
//! appear only when a snapshot is rendered for the wire.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod tournament;

// Re-export commonly used types
pub use core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use core::vec2::FixedVec2;
pub use game::state::{MatchId, MatchState, Paddle, SessionKey};
pub use game::tick::MatchConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
