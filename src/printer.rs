// src/printer.rs - Printer lifecycle and the execution loop
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::communication::serial::open_channel;
use crate::config::{Config, ConfigError, PrinterConfig};
use crate::hardware::{AxisConfig, AxisController, AxisMove, HardwareError, MoveKind};
use crate::motion::{
    Axis, AxisLimits, ExecutionQueue, MotionError, MotionPlanner, Move, PlannerLimits,
    PlannerSettings, TargetPosition, Vector2,
};

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("Printer is not configured: {0}")]
    NotConfigured(String),
    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PrinterState,
    },
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Execution loop aborted: {0}")]
    ExecutionAborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterState {
    Unconfigured,
    Configured,
    Homing,
    Printing,
    Idle,
}

/// Resolved configuration of both axes.
#[derive(Debug, Clone)]
pub struct Axes {
    pub x: AxisConfig,
    pub y: AxisConfig,
}

impl Axes {
    pub fn get(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    pub fn limits(&self) -> PlannerLimits {
        let limits = |axis: &AxisConfig| AxisLimits {
            max_speed: axis.max_speed,
            max_acceleration: axis.max_acceleration,
        };
        PlannerLimits {
            x: limits(&self.x),
            y: limits(&self.y),
        }
    }

    /// Step-domain sub-moves of one planned move. Axes that do not travel
    /// are left out; with both axes travelling, the minor axis ramps in
    /// proportion so both arrive together.
    pub fn axis_moves(&self, movement: &Move) -> Vec<AxisMove> {
        let major = movement.major_axis();
        let direction = movement.direction();
        let mut moves = Vec::with_capacity(2);
        for axis in Axis::ALL {
            if !movement.moves_along(axis) {
                continue;
            }
            let kind = if movement.stops(axis) {
                MoveKind::Stop
            } else {
                MoveKind::Way
            };
            let mut axis_move =
                self.get(axis)
                    .axis_move(movement.target()[axis], movement.speed()[axis], kind);
            if axis != major {
                axis_move = axis_move.geared((direction[axis] / direction[major]).abs());
            }
            moves.push(axis_move);
        }
        moves
    }
}

type ExecutionHandle = JoinHandle<Result<usize, PrinterError>>;

/// Drives one board: configuration, homing and planned printing.
///
/// A print runs between [`Printer::start_print`] and [`Printer::stop_print`].
/// Targets go through the planner; a background task takes promoted moves
/// off the execution queue and sends them to the board in order.
pub struct Printer {
    controller: Arc<Mutex<AxisController>>,
    axes: Option<Axes>,
    settings: PrinterConfig,
    state: PrinterState,
    position: Vector2,
    planner: Option<MotionPlanner>,
    execution: Option<ExecutionHandle>,
}

impl Printer {
    pub fn new(controller: AxisController) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            axes: None,
            settings: PrinterConfig::default(),
            state: PrinterState::Unconfigured,
            position: Vector2::ZERO,
            planner: None,
            execution: None,
        }
    }

    /// Opens the configured serial port, waits for the board and initializes it.
    pub async fn connect(config: &Config) -> Result<Self, PrinterError> {
        tracing::info!("Connecting to board on {} @ {} baud", config.mcu.serial, config.mcu.baud);
        let channel = open_channel(
            &config.mcu.serial,
            config.mcu.baud,
            config.channel.channel_settings()?,
        )
        .await
        .map_err(HardwareError::from)?;
        let controller = AxisController::new(channel, config.channel.flow_control()?);
        controller.initialize().await?;
        Ok(Self::new(controller))
    }

    pub fn state(&self) -> PrinterState {
        self.state
    }

    pub fn position(&self) -> Vector2 {
        self.position
    }

    pub fn axes(&self) -> Option<&Axes> {
        self.axes.as_ref()
    }

    pub fn controller(&self) -> Arc<Mutex<AxisController>> {
        self.controller.clone()
    }

    /// The current or last planner; kept after an aborted print.
    pub fn planner(&self) -> Option<&MotionPlanner> {
        self.planner.as_ref()
    }

    fn require_state(&self, operation: &'static str, allowed: &[PrinterState]) -> Result<(), PrinterError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PrinterError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn configured_axes(&self) -> Result<&Axes, PrinterError> {
        self.axes
            .as_ref()
            .ok_or_else(|| PrinterError::NotConfigured("axes not configured".to_string()))
    }

    pub async fn configure(&mut self, config: &Config) -> Result<(), PrinterError> {
        self.require_state(
            "configure",
            &[PrinterState::Unconfigured, PrinterState::Configured, PrinterState::Idle],
        )?;
        let x = config
            .x_axis
            .as_ref()
            .ok_or_else(|| PrinterError::NotConfigured("missing [x-axis] section".to_string()))?;
        let y = config
            .y_axis
            .as_ref()
            .ok_or_else(|| PrinterError::NotConfigured("missing [y-axis] section".to_string()))?;
        config.printer.homing_timeout()?;

        let controller = self.controller.lock().await;
        let axes = Axes {
            x: controller.configure_axis(x).await?,
            y: controller.configure_axis(y).await?,
        };
        drop(controller);

        self.axes = Some(axes);
        self.settings = config.printer.clone();
        self.state = PrinterState::Configured;
        tracing::info!("Printer configured");
        Ok(())
    }

    /// Homes the given axes one after the other. The position of every homed
    /// axis becomes zero.
    pub async fn home(&mut self, axes: &[Axis]) -> Result<(), PrinterError> {
        if self.state == PrinterState::Unconfigured {
            return Err(PrinterError::NotConfigured("configure before homing".to_string()));
        }
        self.require_state("home", &[PrinterState::Configured, PrinterState::Idle])?;
        let homing: Vec<_> = {
            let configured = self.configured_axes()?;
            axes.iter()
                .map(|axis| (*axis, configured.get(*axis).homing_move()))
                .collect()
        };

        let timeout = self.settings.homing_timeout()?;
        let resume = self.state;
        self.state = PrinterState::Homing;
        let controller = self.controller.lock().await;
        for (axis, homing_move) in homing {
            tracing::info!("Homing {} axis", axis.name());
            if let Err(e) = controller.home(&homing_move, timeout).await {
                tracing::error!("Homing {} axis failed: {}", axis.name(), e);
                self.state = resume;
                return Err(e.into());
            }
            self.position[axis] = 0.0;
        }
        self.state = resume;
        Ok(())
    }

    /// Switches the board to batch mode and starts a fresh planner with its
    /// execution loop.
    pub async fn start_print(&mut self) -> Result<(), PrinterError> {
        self.require_state("start a print", &[PrinterState::Configured, PrinterState::Idle])?;
        let limits = self.configured_axes()?.limits();
        let axes = self.configured_axes()?.clone();
        let settings = PlannerSettings {
            min_length: self.settings.print_queue.min_length,
            max_length: self.settings.print_queue.max_length,
            default_feed_rate: self.settings.default_feed_rate,
        };
        let (planner, queue) = MotionPlanner::new(limits, settings)?;

        self.controller.lock().await.set_batch_mode(true);
        self.execution = Some(tokio::spawn(run_execution_loop(
            self.controller.clone(),
            axes,
            queue,
        )));
        self.planner = Some(planner.starting_at(self.position));
        self.state = PrinterState::Printing;
        tracing::info!("Print started at ({}, {})", self.position.x, self.position.y);
        Ok(())
    }

    pub async fn move_to(&mut self, target: TargetPosition) -> Result<(), PrinterError> {
        self.require_state("move", &[PrinterState::Printing])?;
        let planner = self
            .planner
            .as_mut()
            .ok_or_else(|| PrinterError::ExecutionAborted("no planner".to_string()))?;
        let planned = planner.add_movement(target).await;
        match planned {
            Ok(()) => Ok(()),
            Err(MotionError::ExecutionQueueClosed) => Err(self.abort().await),
            Err(e) => Err(e.into()),
        }
    }

    /// Flushes the planner and waits until the board accepted every move.
    /// Returns the number of moves sent during the print.
    pub async fn stop_print(&mut self) -> Result<usize, PrinterError> {
        self.require_state("stop a print", &[PrinterState::Printing])?;
        let finished = match self.planner.as_mut() {
            Some(planner) => planner.finish().await.map(|()| planner.position()),
            None => Ok(self.position),
        };
        match finished {
            Ok(position) => self.position = position,
            Err(MotionError::ExecutionQueueClosed) => return Err(self.abort().await),
            Err(e) => return Err(e.into()),
        }

        let executed = self.join_execution().await;
        self.end_print().await;
        let executed = executed?;
        tracing::info!("Print finished, {} moves executed", executed);
        Ok(executed)
    }

    /// The execution loop went away early. Collects its error and leaves the
    /// planner in place for inspection.
    async fn abort(&mut self) -> PrinterError {
        let error = match self.join_execution().await {
            Err(e) => e,
            Ok(executed) => PrinterError::ExecutionAborted(format!(
                "execution loop ended after {} moves",
                executed
            )),
        };
        tracing::error!("Print aborted: {}", error);
        self.end_print().await;
        error
    }

    async fn join_execution(&mut self) -> Result<usize, PrinterError> {
        match self.execution.take() {
            Some(handle) => handle
                .await
                .map_err(|e| PrinterError::ExecutionAborted(e.to_string()))?,
            None => Err(PrinterError::ExecutionAborted("execution loop not running".to_string())),
        }
    }

    async fn end_print(&mut self) {
        self.controller.lock().await.set_batch_mode(false);
        self.state = PrinterState::Idle;
    }
}

impl std::fmt::Debug for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Printer")
            .field("state", &self.state)
            .field("position", &self.position)
            .field("axes", &self.axes)
            .finish()
    }
}

/// Sends promoted moves to the board until the planner closes the queue.
/// The first error ends the loop, which in turn closes the queue for the
/// planner.
pub async fn run_execution_loop(
    controller: Arc<Mutex<AxisController>>,
    axes: Axes,
    mut queue: ExecutionQueue,
) -> Result<usize, PrinterError> {
    let mut executed = 0usize;
    while let Some(movement) = queue.next_move().await {
        let moves = axes.axis_moves(&movement);
        let controller = controller.lock().await;
        if let Err(e) = controller.move_to(&moves).await {
            tracing::error!("Move {} to {:?} failed: {}", executed + 1, movement.target(), e);
            return Err(e.into());
        }
        executed += 1;
    }
    tracing::debug!("Execution queue drained after {} moves", executed);
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisSettings, EndStopsSettings};

    fn axis(motor: u8, steps_per_mm: f64) -> AxisConfig {
        AxisConfig::resolve(&AxisSettings {
            motor,
            steps_per_mm,
            current: 1.0,
            max_speed: 50.0,
            max_acceleration: 500.0,
            bow_acceleration: 100.0,
            home_speed: None,
            home_precision_speed: None,
            home_acceleration: None,
            end_stops: EndStopsSettings::default(),
        })
        .unwrap()
    }

    async fn planned(targets: &[TargetPosition]) -> Vec<Move> {
        let axes = Axes {
            x: axis(0, 80.0),
            y: axis(1, 80.0),
        };
        let (mut planner, mut queue) = MotionPlanner::new(
            axes.limits(),
            PlannerSettings {
                min_length: 0,
                max_length: 16,
                default_feed_rate: None,
            },
        )
        .unwrap();
        for target in targets {
            planner.add_movement(*target).await.unwrap();
        }
        planner.finish().await.unwrap();
        let mut moves = Vec::new();
        while let Some(m) = queue.next_move().await {
            moves.push(m);
        }
        moves
    }

    #[tokio::test]
    async fn test_single_axis_move_sends_one_sub_move() {
        let axes = Axes {
            x: axis(0, 80.0),
            y: axis(1, 80.0),
        };
        let moves = planned(&[TargetPosition::new().x(10.0).feed(20.0)]).await;
        let sub = axes.axis_moves(&moves[0]);
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].motor, 0);
        assert_eq!(sub[0].target, 800);
        assert_eq!(sub[0].kind, MoveKind::Stop);
        assert_eq!(sub[0].acceleration, 40_000.0);
    }

    #[tokio::test]
    async fn test_minor_axis_is_geared() {
        let axes = Axes {
            x: axis(0, 80.0),
            y: axis(1, 80.0),
        };
        let moves = planned(&[
            TargetPosition::xy(10.0, 5.0).feed(20.0),
            TargetPosition::xy(20.0, 10.0),
        ])
        .await;
        let sub = axes.axis_moves(&moves[0]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub[0].kind, MoveKind::Way);
        assert_eq!(sub[0].acceleration, 40_000.0);
        assert!((sub[1].acceleration - 20_000.0).abs() < 1e-6);
        assert_eq!(sub[1].target, 400);
        assert!((sub[0].speed / sub[1].speed - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_state_errors_name_the_operation() {
        let err = PrinterError::InvalidState {
            operation: "move",
            state: PrinterState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot move while Idle");
    }
}
