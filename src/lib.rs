// src/lib.rs - Host side of a two-axis stepper board
pub mod communication;
pub mod config;
pub mod gcode;
pub mod hardware;
pub mod motion;
pub mod printer;

pub use communication::{ChannelError, CommandChannel};
pub use config::{Config, load_config};
pub use hardware::{AxisController, HardwareError};
pub use motion::{Axis, MotionError, MotionPlanner, TargetPosition};
pub use printer::{Printer, PrinterError, PrinterState};
