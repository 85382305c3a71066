// src/motion/planner/mod.rs - Look-ahead planning of 2D moves
//
// Moves enter an open slot, get closed into a planning window by the next
// request and leave the window oldest first into a bounded execution queue.
// Every new move gets a forward-pass speed estimate; afterwards the window
// is smoothed backwards so each move can still brake for its successor.
mod moves;

pub use moves::{Move, TargetPosition};

use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::motion::vector::{Axis, Vector2, sign};

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Move to {0:?} has no feed rate and no default is configured")]
    UnderspecifiedMove(TargetPosition),
    #[error("Move to {0:?} has a non-finite coordinate or feed rate")]
    NonFiniteTarget(TargetPosition),
    #[error("Execution queue is closed")]
    ExecutionQueueClosed,
    #[error("Invalid print queue lengths: max-length {max} must exceed min-length {min}")]
    InvalidQueueLength { min: usize, max: usize },
}

/// Kinematic limits of one axis in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub max_speed: f64,
    pub max_acceleration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerLimits {
    pub x: AxisLimits,
    pub y: AxisLimits,
}

impl PlannerLimits {
    pub fn axis(&self, axis: Axis) -> AxisLimits {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// Closed moves kept back for look-ahead.
    pub min_length: usize,
    /// Look-ahead plus execution queue capacity.
    pub max_length: usize,
    pub default_feed_rate: Option<f64>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            min_length: 50,
            max_length: 100,
            default_feed_rate: None,
        }
    }
}

/// Consumer end of the planner. Yields promoted moves in order and ends once
/// the planner finished or was dropped.
#[derive(Debug)]
pub struct ExecutionQueue {
    receiver: mpsc::Receiver<Move>,
}

impl ExecutionQueue {
    pub async fn next_move(&mut self) -> Option<Move> {
        self.receiver.recv().await
    }

    pub fn try_next_move(&mut self) -> Option<Move> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Speed reached after `distance` at constant `acceleration` starting from
/// `start`, signed like `distance`.
fn reachable_speed(start: f64, acceleration: f64, distance: f64) -> f64 {
    (start * start + 2.0 * acceleration * distance.abs())
        .sqrt()
        .copysign(distance)
}

#[derive(Debug)]
pub struct MotionPlanner {
    limits: PlannerLimits,
    settings: PlannerSettings,
    window: VecDeque<Move>,
    open: Option<Move>,
    position: Vector2,
    feed_rate: Option<f64>,
    queue: Option<mpsc::Sender<Move>>,
}

impl MotionPlanner {
    pub fn new(
        limits: PlannerLimits,
        settings: PlannerSettings,
    ) -> Result<(Self, ExecutionQueue), MotionError> {
        if settings.max_length <= settings.min_length {
            return Err(MotionError::InvalidQueueLength {
                min: settings.min_length,
                max: settings.max_length,
            });
        }
        let (sender, receiver) = mpsc::channel(settings.max_length - settings.min_length);
        let planner = Self {
            limits,
            window: VecDeque::with_capacity(settings.min_length + 1),
            settings,
            open: None,
            position: Vector2::ZERO,
            feed_rate: None,
            queue: Some(sender),
        };
        Ok((planner, ExecutionQueue { receiver }))
    }

    /// Starts planning from `position` instead of the origin.
    pub fn starting_at(mut self, position: Vector2) -> Self {
        self.position = position;
        self
    }

    /// Plans a move to `target`.
    ///
    /// Waits while the execution queue is full. The new move stays open until
    /// the next call, since its stop flags depend on the move after it.
    pub async fn add_movement(&mut self, target: TargetPosition) -> Result<(), MotionError> {
        if [target.x, target.y, target.f].into_iter().flatten().any(|v| !v.is_finite()) {
            return Err(MotionError::NonFiniteTarget(target));
        }
        let feed_rate = target
            .f
            .or(self.feed_rate)
            .or(self.settings.default_feed_rate)
            .filter(|f| *f > 0.0)
            .ok_or(MotionError::UnderspecifiedMove(target))?;
        self.feed_rate = Some(feed_rate);

        let destination = Vector2::new(
            target.x.unwrap_or(self.position.x),
            target.y.unwrap_or(self.position.y),
        );
        let delta = destination - self.position;
        if delta == Vector2::ZERO {
            tracing::trace!("Zero-length move, feed rate now {}", feed_rate);
            return Ok(());
        }

        let mut movement = Move::new(destination, feed_rate, delta);
        let speed = self.maximum_achievable_speed(&movement);
        movement.set_speed(speed);
        tracing::debug!(
            "Planned move to ({:.3}, {:.3}) at ({:.3}, {:.3}) mm/s",
            destination.x,
            destination.y,
            speed.x,
            speed.y
        );

        if let Some(previous) = self.open.take() {
            self.window.push_back(previous);
        }
        while self.window.len() > self.settings.min_length {
            self.promote().await?;
        }

        self.position = destination;
        self.recalculate_speeds(speed);
        self.open = Some(movement);
        Ok(())
    }

    /// Forward pass: the fastest speed along the move's direction that the
    /// feed rate, the axis limits and the previous move allow. Marks the
    /// previous move's stop flags on the way.
    fn maximum_achievable_speed(&mut self, movement: &Move) -> Vector2 {
        let direction = movement.direction();
        let delta = movement.delta();
        let previous_speed = self.open.as_ref().map(Move::speed).unwrap_or(Vector2::ZERO);
        let mut candidates = vec![direction * movement.feed_rate()];

        for axis in Axis::ALL {
            if delta[axis] == 0.0 {
                if let Some(previous) = self.open.as_mut() {
                    previous.set_stop(axis);
                }
                continue;
            }
            let limits = self.limits.axis(axis);
            candidates.push(direction.scaled_to(axis, limits.max_speed.copysign(delta[axis])));

            let continues = match &self.open {
                None => true,
                Some(previous) => sign(delta[axis]) == sign(previous.delta()[axis]),
            };
            let reachable = if continues {
                reachable_speed(previous_speed[axis], limits.max_acceleration, delta[axis])
            } else {
                if let Some(previous) = self.open.as_mut() {
                    tracing::trace!("Axis {} reverses, previous move stops", axis.name());
                    previous.set_stop(axis);
                }
                reachable_speed(0.0, limits.max_acceleration, delta[axis])
            };
            candidates.push(direction.scaled_to(axis, reachable));
        }

        Vector2::shortest(candidates).unwrap_or(Vector2::ZERO)
    }

    /// Backward pass over the window, newest first, seeded with the speed of
    /// the move that follows the newest closed one. Only ever lowers speeds,
    /// so running it again without new moves changes nothing.
    fn recalculate_speeds(&mut self, following: Vector2) {
        let limits = self.limits;
        let mut bound = following;
        for movement in self.window.iter_mut().rev() {
            let direction = movement.direction();
            let delta = movement.delta();
            let mut candidates = vec![movement.speed()];
            for axis in Axis::ALL {
                if direction[axis] == 0.0 {
                    continue;
                }
                let start = if !movement.stops(axis) && sign(delta[axis]) == sign(bound[axis]) {
                    bound[axis]
                } else {
                    0.0
                };
                let reachable = reachable_speed(start, limits.axis(axis).max_acceleration, delta[axis]);
                candidates.push(direction.scaled_to(axis, reachable));
            }
            let speed = Vector2::shortest(candidates).unwrap_or(Vector2::ZERO);
            movement.set_speed(speed);
            bound = speed;
        }
    }

    /// Re-runs the backward pass against the open move.
    pub fn replan(&mut self) {
        let following = self.open.as_ref().map(Move::speed).unwrap_or(Vector2::ZERO);
        self.recalculate_speeds(following);
    }

    async fn promote(&mut self) -> Result<(), MotionError> {
        let sender = self.queue.as_ref().ok_or(MotionError::ExecutionQueueClosed)?;
        let permit = sender
            .reserve()
            .await
            .map_err(|_| MotionError::ExecutionQueueClosed)?;
        if let Some(movement) = self.window.pop_front() {
            permit.send(movement);
        }
        tracing::trace!(
            "Promoted move, {} planned, {} queued",
            self.window.len(),
            sender.max_capacity() - sender.capacity()
        );
        Ok(())
    }

    /// Closes the open move, which comes to rest on both axes, and flushes
    /// the whole window into the execution queue. The queue ends after the
    /// last move.
    pub async fn finish(&mut self) -> Result<(), MotionError> {
        if let Some(mut last) = self.open.take() {
            for axis in Axis::ALL {
                last.set_stop(axis);
            }
            self.window.push_back(last);
        }
        self.recalculate_speeds(Vector2::ZERO);
        tracing::debug!("Flushing {} planned moves", self.window.len());
        while !self.window.is_empty() {
            self.promote().await?;
        }
        self.queue = None;
        Ok(())
    }

    pub fn planning_window(&self) -> impl Iterator<Item = &Move> {
        self.window.iter()
    }

    pub fn open_move(&self) -> Option<&Move> {
        self.open.as_ref()
    }

    /// Target of the most recent move.
    pub fn position(&self) -> Vector2 {
        self.position
    }
}
