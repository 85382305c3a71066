// src/hardware/axis.rs - Per-axis kinematic configuration in mm and step units
use crate::communication::Command;
use crate::config::{AxisSettings, EndStopSettings};

use super::HardwareError;

/// Converts a physical value (mm, mm/s, mm/s²) into step units.
pub fn to_steps(value: f64, steps_per_unit: f64) -> f64 {
    value * steps_per_unit
}

/// Converts a physical position into the nearest whole step.
pub fn to_step_position(value: f64, steps_per_unit: f64) -> i64 {
    to_steps(value, steps_per_unit).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndStopSide {
    Left,
    Right,
}

impl EndStopSide {
    pub fn code(self) -> i64 {
        match self {
            EndStopSide::Left => 0,
            EndStopSide::Right => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

/// An end stop is either a switch wired to the board or a soft limit at a
/// fixed position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EndStop {
    Virtual { position: f64 },
    Physical { polarity: Polarity },
}

impl EndStop {
    pub fn from_settings(settings: &EndStopSettings) -> Result<Self, HardwareError> {
        match settings.polarity.as_str() {
            "virtual" => {
                let position = settings.position.ok_or_else(|| {
                    HardwareError::Configuration("virtual end stop without position".to_string())
                })?;
                Ok(EndStop::Virtual { position })
            }
            "positive" => Ok(EndStop::Physical {
                polarity: Polarity::Positive,
            }),
            "negative" => Ok(EndStop::Physical {
                polarity: Polarity::Negative,
            }),
            other => Err(HardwareError::Configuration(format!(
                "unknown end stop type '{}'",
                other
            ))),
        }
    }

    /// Type code and value as sent to the board. Virtual positions go out in
    /// steps, physical polarities as +1/-1.
    pub fn wire_value(&self, steps_per_unit: f64) -> (i64, i64) {
        match *self {
            EndStop::Virtual { position } => (0, to_step_position(position, steps_per_unit)),
            EndStop::Physical { polarity: Polarity::Positive } => (1, 1),
            EndStop::Physical { polarity: Polarity::Negative } => (1, -1),
        }
    }
}

/// Resolved configuration of one axis. Physical values are in mm based units,
/// the `*_steps` accessors give the board's step units.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisConfig {
    pub motor: u8,
    pub steps_per_unit: f64,
    pub current: f64,
    pub max_speed: f64,
    pub max_acceleration: f64,
    /// Passed through to the board's ramp generator as is.
    pub bow: f64,
    pub home_speed: f64,
    pub home_precision_speed: f64,
    pub home_acceleration: f64,
    pub left_end_stop: Option<EndStop>,
    pub right_end_stop: Option<EndStop>,
}

impl AxisConfig {
    /// Validates the raw settings and fills in homing defaults.
    pub fn resolve(settings: &AxisSettings) -> Result<Self, HardwareError> {
        let positive = [
            ("steps-per-mm", settings.steps_per_mm),
            ("max-speed", settings.max_speed),
            ("max-acceleration", settings.max_acceleration),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(HardwareError::Configuration(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        let left_end_stop = settings
            .end_stops
            .left
            .as_ref()
            .map(EndStop::from_settings)
            .transpose()?;
        let right_end_stop = settings
            .end_stops
            .right
            .as_ref()
            .map(EndStop::from_settings)
            .transpose()?;

        Ok(Self {
            motor: settings.motor,
            steps_per_unit: settings.steps_per_mm,
            current: settings.current,
            max_speed: settings.max_speed,
            max_acceleration: settings.max_acceleration,
            bow: settings.bow_acceleration,
            home_speed: settings.home_speed.unwrap_or(settings.max_speed),
            home_precision_speed: settings
                .home_precision_speed
                .unwrap_or(settings.max_speed / 10.0),
            home_acceleration: settings
                .home_acceleration
                .unwrap_or(settings.max_acceleration),
            left_end_stop,
            right_end_stop,
        })
    }

    pub fn steps(&self, value: f64) -> f64 {
        to_steps(value, self.steps_per_unit)
    }

    pub fn step_position(&self, value: f64) -> i64 {
        to_step_position(value, self.steps_per_unit)
    }

    pub fn max_speed_steps(&self) -> f64 {
        self.steps(self.max_speed)
    }

    pub fn max_acceleration_steps(&self) -> f64 {
        self.steps(self.max_acceleration)
    }

    pub fn bow_steps(&self) -> f64 {
        self.steps(self.bow)
    }

    pub fn end_stops(&self) -> impl Iterator<Item = (EndStopSide, EndStop)> + '_ {
        [
            (EndStopSide::Left, self.left_end_stop),
            (EndStopSide::Right, self.right_end_stop),
        ]
        .into_iter()
        .filter_map(|(side, stop)| stop.map(|stop| (side, stop)))
    }

    /// Homing parameters converted to steps.
    pub fn homing_move(&self) -> HomingMove {
        let acceleration = self.steps(self.home_acceleration);
        HomingMove {
            motor: self.motor,
            speed: self.steps(self.home_speed),
            precision_speed: self.steps(self.home_precision_speed),
            acceleration,
            deceleration: acceleration,
            start_bow: self.bow_steps(),
            end_bow: self.bow_steps(),
        }
    }

    /// Step-domain move template for this axis with the full acceleration.
    pub fn axis_move(&self, target: f64, speed: f64, kind: MoveKind) -> AxisMove {
        let acceleration = self.max_acceleration_steps();
        AxisMove {
            motor: self.motor,
            target: self.step_position(target),
            speed: self.steps(speed).abs(),
            acceleration,
            deceleration: acceleration,
            start_bow: self.bow_steps(),
            end_bow: self.bow_steps(),
            kind,
        }
    }
}

/// Whether the motor passes through the target or comes to rest there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Way,
    Stop,
}

impl MoveKind {
    pub fn code(self) -> i64 {
        match self {
            MoveKind::Way => 0,
            MoveKind::Stop => 1,
        }
    }
}

/// One motor's part of a move command, in step units.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisMove {
    pub motor: u8,
    pub target: i64,
    pub speed: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    pub start_bow: f64,
    pub end_bow: f64,
    pub kind: MoveKind,
}

impl AxisMove {
    /// Scales acceleration and deceleration, used to gear a secondary motor
    /// to the dominant one.
    pub fn geared(mut self, factor: f64) -> Self {
        self.acceleration *= factor;
        self.deceleration *= factor;
        self
    }

    pub(crate) fn append_to(&self, command: &mut Command) {
        command.push(self.motor);
        command.push(self.target);
        command.push(self.speed);
        command.push(self.acceleration);
        command.push(self.deceleration);
        command.push(self.start_bow);
        command.push(self.end_bow);
        command.push(self.kind.code());
    }
}

/// Homing parameters of one motor, in step units.
#[derive(Debug, Clone, PartialEq)]
pub struct HomingMove {
    pub motor: u8,
    pub speed: f64,
    pub precision_speed: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    pub start_bow: f64,
    pub end_bow: f64,
}
