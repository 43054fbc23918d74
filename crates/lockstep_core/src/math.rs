//! Fixed-point math utilities for deterministic simulation.
//!
//! All game simulation uses fixed-point arithmetic to ensure
//! deterministic behavior across platforms. Floating-point
//! operations can produce different results on different CPUs.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
pub type Fixed = I32F32;

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Build a fixed-point ratio `num / den` without going through floats.
#[must_use]
pub fn ratio(num: i32, den: i32) -> Fixed {
    Fixed::from_num(num) / Fixed::from_num(den)
}

/// Clamp a fixed-point value into `[lo, hi]`.
#[must_use]
pub fn clamp(value: Fixed, lo: Fixed, hi: Fixed) -> Fixed {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

/// A cell coordinate on the map grid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct GridPos {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl GridPos {
    /// Create a grid position.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Origin cell.
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Squared euclidean distance, exact in integers.
    #[must_use]
    pub fn dist_sq(self, other: Self) -> i64 {
        let dx = i64::from(self.x - other.x);
        let dy = i64::from(self.y - other.y);
        dx * dx + dy * dy
    }

    /// Chebyshev distance (8-directional step count).
    #[must_use]
    pub fn chebyshev(self, other: Self) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// Whether a single step from `self` to `other` is diagonal.
    #[must_use]
    pub fn is_diagonal_step(self, other: Self) -> bool {
        (self.x - other.x).abs() + (self.y - other.y).abs() == 2
    }
}

impl std::ops::Add for GridPos {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for GridPos {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Fixed-point 3D vector used for render-facing positions.
///
/// `y` is the vertical axis (terrain height), `x`/`z` map to grid x/y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec3Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Height.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
    /// Z coordinate.
    #[serde(with = "fixed_serde")]
    pub z: Fixed,
}

impl Vec3Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self { x, y, z }
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
        z: Fixed::ZERO,
    };

    /// Linearly interpolate between two vectors.
    #[must_use]
    pub fn lerp(self, other: Self, t: Fixed) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    /// Lossy conversion for renderers.
    #[must_use]
    pub fn to_f32(self) -> [f32; 3] {
        [self.x.to_num(), self.y.to_num(), self.z.to_num()]
    }
}

impl std::ops::Add for Vec3Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

/// `atan(z)` in degrees for `z` in `[0, 1]`.
///
/// Polynomial approximation, exact at 0 and 1, error below 0.3 degrees.
fn atan_unit_degrees(z: Fixed) -> Fixed {
    let k = ratio(15_642, 1000);
    Fixed::from_num(45) * z + k * z * (Fixed::ONE - z)
}

/// Heading in degrees of a relative grid offset, measured from the +y axis
/// towards +x, in `(-180, 180]`.
///
/// Zero offsets map to 0.
#[must_use]
pub fn heading_degrees(rel: GridPos) -> Fixed {
    if rel == GridPos::ZERO {
        return Fixed::ZERO;
    }
    let ax = Fixed::from_num(rel.x.abs());
    let ay = Fixed::from_num(rel.y.abs());
    let base = if ax <= ay {
        atan_unit_degrees(ax / ay)
    } else {
        Fixed::from_num(90) - atan_unit_degrees(ay / ax)
    };
    let half_turn = Fixed::from_num(180);
    match (rel.x >= 0, rel.y >= 0) {
        (true, true) => base,
        (true, false) => half_turn - base,
        (false, false) => -(half_turn - base),
        (false, true) => -base,
    }
}
