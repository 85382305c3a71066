// src/motion/vector.rs - Planar vectors indexed by axis
use serde::{Deserialize, Serialize};
use std::ops::{Add, Index, IndexMut, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::X, Axis::Y];

    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
        }
    }
}

impl std::str::FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            other => Err(format!("unknown axis '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Unit vector in the same direction; the zero vector stays zero.
    pub fn normalized(&self) -> Self {
        let length = self.length();
        if length == 0.0 {
            return Self::ZERO;
        }
        *self * (1.0 / length)
    }

    /// Rescales the vector so that its `axis` component equals `value`.
    /// The component must be non-zero.
    pub fn scaled_to(&self, axis: Axis, value: f64) -> Self {
        *self * (value / self[axis])
    }

    /// Shortest vector by magnitude. The first one wins ties.
    pub fn shortest<I>(candidates: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        candidates.into_iter().fold(None, |best, candidate| match best {
            Some(best) if best.length() <= candidate.length() => Some(best),
            _ => Some(candidate),
        })
    }
}

impl Index<Axis> for Vector2 {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }
}

impl IndexMut<Axis> for Vector2 {
    fn index_mut(&mut self, axis: Axis) -> &mut f64 {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
        }
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vector2 {
    type Output = Vector2;

    fn mul(self, factor: f64) -> Vector2 {
        Vector2::new(self.x * factor, self.y * factor)
    }
}

/// -1, 0 or 1. Zero has no sign.
pub fn sign(value: f64) -> i8 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_indexing() {
        let mut v = Vector2::new(3.0, -4.0);
        assert_eq!(v[Axis::X], 3.0);
        assert_eq!(v[Axis::Y], -4.0);
        v[Axis::Y] = 1.0;
        assert_eq!(v, Vector2::new(3.0, 1.0));
        assert_eq!("Y".parse::<Axis>(), Ok(Axis::Y));
        assert!("z".parse::<Axis>().is_err());
    }

    #[test]
    fn test_normalize_and_scale() {
        let d = Vector2::new(3.0, -4.0).normalized();
        assert!((d.length() - 1.0).abs() < 1e-12);
        assert_eq!(Vector2::ZERO.normalized(), Vector2::ZERO);

        let scaled = d.scaled_to(Axis::X, 6.0);
        assert!((scaled.x - 6.0).abs() < 1e-12);
        assert!((scaled.y + 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_shortest_prefers_first_on_tie() {
        let a = Vector2::new(1.0, 0.0);
        let b = Vector2::new(0.0, 1.0);
        let c = Vector2::new(0.5, 0.0);
        assert_eq!(Vector2::shortest([a, b]), Some(a));
        assert_eq!(Vector2::shortest([a, b, c]), Some(c));
        assert_eq!(Vector2::shortest(Vec::new()), None);
    }

    #[test]
    fn test_sign() {
        assert_eq!(sign(2.0), 1);
        assert_eq!(sign(-0.1), -1);
        assert_eq!(sign(0.0), 0);
        assert_eq!(sign(-0.0), 0);
    }
}
