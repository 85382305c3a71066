// src/motion/planner/moves.rs - Planned moves and move requests
use serde::{Deserialize, Serialize};

use crate::motion::vector::{Axis, Vector2};

/// A requested move. Missing coordinates keep the current position, a
/// missing feed rate keeps the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct TargetPosition {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default, alias = "feed-rate")]
    pub f: Option<f64>,
}

impl TargetPosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn xy(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            f: None,
        }
    }

    pub fn x(mut self, x: f64) -> Self {
        self.x = Some(x);
        self
    }

    pub fn y(mut self, y: f64) -> Self {
        self.y = Some(y);
        self
    }

    pub fn feed(mut self, feed_rate: f64) -> Self {
        self.f = Some(feed_rate);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.f.is_none()
    }
}

/// A straight segment with its planned cruise speed.
///
/// Speeds are signed per axis and always point along `direction`. A stop
/// flag means the axis comes to rest at the end of the move, because the
/// following move reverses or idles that axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    target: Vector2,
    feed_rate: f64,
    delta: Vector2,
    direction: Vector2,
    speed: Vector2,
    x_stop: bool,
    y_stop: bool,
}

impl Move {
    pub(super) fn new(target: Vector2, feed_rate: f64, delta: Vector2) -> Self {
        Self {
            target,
            feed_rate,
            delta,
            direction: delta.normalized(),
            speed: Vector2::ZERO,
            x_stop: false,
            y_stop: false,
        }
    }

    pub fn target(&self) -> Vector2 {
        self.target
    }

    pub fn feed_rate(&self) -> f64 {
        self.feed_rate
    }

    pub fn delta(&self) -> Vector2 {
        self.delta
    }

    pub fn direction(&self) -> Vector2 {
        self.direction
    }

    /// Planned cruise speed.
    pub fn speed(&self) -> Vector2 {
        self.speed
    }

    pub fn stops(&self, axis: Axis) -> bool {
        match axis {
            Axis::X => self.x_stop,
            Axis::Y => self.y_stop,
        }
    }

    /// Speed at the end of the move: the cruise speed with every stopped
    /// axis at zero.
    pub fn exit_speed(&self) -> Vector2 {
        let mut exit = self.speed;
        for axis in Axis::ALL {
            if self.stops(axis) {
                exit[axis] = 0.0;
            }
        }
        exit
    }

    /// Whether the move actually travels along `axis`.
    pub fn moves_along(&self, axis: Axis) -> bool {
        self.delta[axis] != 0.0
    }

    /// Axis with the larger travel; X on a tie.
    pub fn major_axis(&self) -> Axis {
        if self.delta.y.abs() > self.delta.x.abs() {
            Axis::Y
        } else {
            Axis::X
        }
    }

    pub(super) fn set_speed(&mut self, speed: Vector2) {
        self.speed = speed;
    }

    pub(super) fn set_stop(&mut self, axis: Axis) {
        match axis {
            Axis::X => self.x_stop = true,
            Axis::Y => self.y_stop = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_speed_zeroes_stopped_axes() {
        let mut m = Move::new(Vector2::new(3.0, 4.0), 10.0, Vector2::new(3.0, 4.0));
        m.set_speed(Vector2::new(6.0, 8.0));
        assert_eq!(m.exit_speed(), Vector2::new(6.0, 8.0));
        m.set_stop(Axis::Y);
        assert!(m.stops(Axis::Y));
        assert!(!m.stops(Axis::X));
        assert_eq!(m.exit_speed(), Vector2::new(6.0, 0.0));
        assert_eq!(m.major_axis(), Axis::Y);
    }

    #[test]
    fn test_target_deserializes_partial() {
        let target: TargetPosition = toml::from_str("x = 10.0\nf = 20.0").unwrap();
        assert_eq!(target, TargetPosition::new().x(10.0).feed(20.0));
        assert!(TargetPosition::new().is_empty());
    }
}
