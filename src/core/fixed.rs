//! Q16.16 Fixed-Point Arithmetic
//!
//! Deterministic fixed-point math for the pong simulation.
//! All gameplay arithmetic is integer-only; floats appear only when a
//! snapshot is rendered for clients.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q16.16 (32-bit signed integer)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │   │  └──── 16 bits ────┘└──── 16 bits ────┘                 │
//! │   └─ Sign bit                                               │
//! │                                                             │
//! │  Range: -32768.0 to +32767.99998 (approx)                   │
//! │  Precision: 1/65536 ≈ 0.000015 units                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The 924 x 556 field fits comfortably in the integer part, and a serve
//! replayed with the same inputs always lands on the same sub-pixel.

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE; // 65536

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1; // 32768

// =============================================================================
// FIELD CONSTANTS (All as integer literals - NO float conversion!)
// =============================================================================

/// Field width: 924.0 = 924 * 65536
pub const FIELD_WIDTH: Fixed = 60555264;

/// Field height: 556.0 = 556 * 65536
pub const FIELD_HEIGHT: Fixed = 36438016;

/// Paddle height: 100.0 = 100 * 65536
pub const PADDLE_HEIGHT: Fixed = 6553600;

/// Horizontal contact band in front of each goal line: 20.0 = 20 * 65536
pub const PADDLE_BAND: Fixed = 1310720;

/// Paddle starting top edge: 240.0 = 240 * 65536
pub const PADDLE_START_Y: Fixed = 15728640;

/// Ball speed per axis per tick at serve: 4.0 = 4 * 65536
pub const BALL_SERVE_SPEED: Fixed = 262144;

/// Ball speed cap per axis per tick: 12.0 = 12 * 65536
pub const BALL_MAX_SPEED: Fixed = 786432;

/// Paddle speed per tick: 6.0 = 6 * 65536
pub const PADDLE_SPEED: Fixed = 393216;

/// Velocity multiplier applied on every paddle hit: floor(1.05 * 65536)
pub const PADDLE_HIT_ACCELERATION: Fixed = 68812;

// =============================================================================
// CORE OPERATIONS (All deterministic, wrapping semantics)
// =============================================================================

/// Convert a compile-time float to fixed-point.
///
/// # Warning
/// Only use at compile-time or initialization. NEVER in tick loop.
///
/// # Example
/// ```
/// use pong_arena::core::fixed::{to_fixed, FIXED_ONE};
/// const MY_VALUE: i32 = to_fixed(2.5);
/// assert_eq!(MY_VALUE, FIXED_ONE * 2 + FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert an integer number of field units to fixed-point.
#[inline]
pub const fn from_int(i: i32) -> Fixed {
    i << FIXED_SCALE
}

/// Convert fixed-point to float for display/rendering.
///
/// # Warning
/// Only use for visual output. NEVER use result in game logic.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Multiply two fixed-point numbers.
///
/// Uses i64 intermediate to prevent overflow, then truncates.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Absolute value of a fixed-point number.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 { x.wrapping_neg() } else { x }
}

/// Minimum of two fixed-point numbers.
#[inline]
pub fn fixed_min(a: Fixed, b: Fixed) -> Fixed {
    if a < b { a } else { b }
}

/// Maximum of two fixed-point numbers.
#[inline]
pub fn fixed_max(a: Fixed, b: Fixed) -> Fixed {
    if a > b { a } else { b }
}

/// Clamp a fixed-point number to a range.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    fixed_max(min, fixed_min(max, value))
}

/// Copy the sign of `sign` onto the magnitude of `magnitude`.
///
/// Zero counts as positive.
#[inline]
pub fn fixed_with_sign(magnitude: Fixed, sign: Fixed) -> Fixed {
    let m = fixed_abs(magnitude);
    if sign < 0 { -m } else { m }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_constants() {
        assert_eq!(FIXED_ONE, 65536);
        assert_eq!(FIXED_HALF, 32768);
        assert_eq!(FIXED_SCALE, 16);
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(1.0), FIXED_ONE);
        assert_eq!(to_fixed(0.5), FIXED_HALF);
        assert_eq!(to_fixed(2.0), FIXED_ONE * 2);
        assert_eq!(to_fixed(-1.0), -FIXED_ONE);
    }

    #[test]
    fn test_fixed_mul() {
        // 2.0 * 3.0 = 6.0
        let result = fixed_mul(to_fixed(2.0), to_fixed(3.0));
        assert_eq!(result, to_fixed(6.0));

        // 0.5 * 0.5 = 0.25
        assert_eq!(fixed_mul(FIXED_HALF, FIXED_HALF), to_fixed(0.25));

        // Negative: -2.0 * 3.0 = -6.0
        assert_eq!(fixed_mul(to_fixed(-2.0), to_fixed(3.0)), to_fixed(-6.0));
    }

    #[test]
    fn test_field_constants() {
        assert_eq!(FIELD_WIDTH, from_int(924));
        assert_eq!(FIELD_HEIGHT, from_int(556));
        assert_eq!(PADDLE_HEIGHT, from_int(100));
        assert_eq!(PADDLE_BAND, from_int(20));
        assert_eq!(PADDLE_START_Y, from_int(240));
        assert_eq!(BALL_SERVE_SPEED, from_int(4));
        assert_eq!(BALL_MAX_SPEED, from_int(12));
        assert_eq!(PADDLE_SPEED, from_int(6));
        assert_eq!(PADDLE_HIT_ACCELERATION, to_fixed(1.05));
        assert!(PADDLE_HIT_ACCELERATION > FIXED_ONE);
    }

    #[test]
    fn test_clamp_and_sign() {
        assert_eq!(fixed_clamp(from_int(-5), 0, from_int(10)), 0);
        assert_eq!(fixed_clamp(from_int(15), 0, from_int(10)), from_int(10));
        assert_eq!(fixed_clamp(from_int(7), 0, from_int(10)), from_int(7));

        assert_eq!(fixed_with_sign(from_int(4), -1), from_int(-4));
        assert_eq!(fixed_with_sign(from_int(-4), 1), from_int(4));
        assert_eq!(fixed_with_sign(from_int(-4), 0), from_int(4));
    }

    #[test]
    fn test_to_float_display() {
        assert_eq!(to_float(FIELD_WIDTH), 924.0);
        assert_eq!(to_float(FIXED_HALF), 0.5);
    }

    #[test]
    fn test_acceleration_grows_speed() {
        let mut v = BALL_SERVE_SPEED;
        for _ in 0..5 {
            let next = fixed_mul(v, PADDLE_HIT_ACCELERATION);
            assert!(next > v, "Each paddle hit must speed the ball up");
            v = next;
        }
    }
}
