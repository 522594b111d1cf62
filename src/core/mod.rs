//! Core deterministic primitives.
//!
//! Integer-only numeric types shared by the simulation. Nothing in here
//! touches the clock, the network or a float in gameplay paths.

pub mod fixed;
pub mod vec2;

// Re-export core types
pub use fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use vec2::FixedVec2;
