// src/motion/mod.rs - Motion planning for the two axes
pub mod planner;
pub mod vector;

pub use planner::{
    AxisLimits, ExecutionQueue, MotionError, MotionPlanner, Move, PlannerLimits, PlannerSettings,
    TargetPosition,
};
pub use vector::{Axis, Vector2};
