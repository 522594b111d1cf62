//! Fixed-Point 2D Vector
//!
//! Ball position and velocity. All operations use fixed-point arithmetic.

use std::fmt;
use std::ops::Add;
use serde::{Serialize, Deserialize};

use super::fixed::{Fixed, FIXED_ONE, FIXED_SCALE};

/// 2D vector with fixed-point components.
///
/// Field coordinates grow right (+X) and down (+Y), matching client canvases.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FixedVec2 {
    /// X component (Q16.16 fixed-point)
    pub x: Fixed,
    /// Y component (Q16.16 fixed-point)
    pub y: Fixed,
}

impl FixedVec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create a new vector from fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer components.
    #[inline]
    pub const fn from_ints(x: i32, y: i32) -> Self {
        Self {
            x: x << FIXED_SCALE,
            y: y << FIXED_SCALE,
        }
    }

    /// Add another vector.
    #[inline]
    pub fn add(self, other: Self) -> Self {
        Self {
            x: self.x.wrapping_add(other.x),
            y: self.y.wrapping_add(other.y),
        }
    }


    /// Whether the point lies inside a `width` x `height` field, allowing
    /// `margin` beyond every edge.
    #[inline]
    pub fn is_near_field(self, width: Fixed, height: Fixed, margin: Fixed) -> bool {
        self.x >= -margin
            && self.x <= width.saturating_add(margin)
            && self.y >= -margin
            && self.y <= height.saturating_add(margin)
    }

    /// Convert to float tuple for rendering.
    #[inline]
    pub fn to_floats(self) -> (f32, f32) {
        (
            self.x as f32 / FIXED_ONE as f32,
            self.y as f32 / FIXED_ONE as f32,
        )
    }
}

impl Add for FixedVec2 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        FixedVec2::add(self, rhs)
    }
}

impl fmt::Debug for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fx, fy) = self.to_floats();
        write!(f, "Vec2({:.3}, {:.3})", fx, fy)
    }
}

impl fmt::Display for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fx, fy) = self.to_floats();
        write!(f, "({:.3}, {:.3})", fx, fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{to_fixed, from_int, FIELD_WIDTH, FIELD_HEIGHT};

    #[test]
    fn test_vec2_add() {
        let a = FixedVec2::new(to_fixed(3.0), to_fixed(4.0));
        let b = FixedVec2::new(to_fixed(1.0), to_fixed(-2.0));
        let result = a + b;
        assert_eq!(result.x, to_fixed(4.0));
        assert_eq!(result.y, to_fixed(2.0));
    }

    #[test]
    fn test_near_field() {
        let (w, h) = (FIELD_WIDTH, FIELD_HEIGHT);
        assert!(FixedVec2::from_ints(462, 278).is_near_field(w, h, 0));
        assert!(FixedVec2::from_ints(-5, 10).is_near_field(w, h, from_int(10)));
        assert!(!FixedVec2::from_ints(-50, 10).is_near_field(w, h, from_int(10)));
        assert!(!FixedVec2::from_ints(100, 700).is_near_field(w, h, from_int(10)));
    }

    #[test]
    fn test_to_floats() {
        let v = FixedVec2::new(FIELD_WIDTH / 2, to_fixed(0.5));
        assert_eq!(v.to_floats(), (462.0, 0.5));
    }
}
