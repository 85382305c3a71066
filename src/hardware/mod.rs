// src/hardware/mod.rs - Axis bookkeeping and board flow control
pub mod axis;
pub mod poll;

pub use axis::{AxisConfig, AxisMove, EndStop, EndStopSide, HomingMove, MoveKind, Polarity};
pub use poll::{PollOutcome, poll_until};

use std::time::Duration;
use thiserror::Error;

use crate::communication::{BufferStatus, ChannelError, Command, CommandChannel, CommandNumber, Reply};
use crate::config::AxisSettings;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Board rejected {command:?}: {reply}")]
    Rejected { command: CommandNumber, reply: Reply },
    #[error("Invalid axis configuration: {0}")]
    Configuration(String),
    #[error("Homing did not finish within {0:?}")]
    HomingTimeout(Duration),
    #[error("Board buffer did not drain within {0:?}")]
    BufferStalled(Duration),
    #[error("Reply without buffer status: {0}")]
    MalformedReply(Reply),
}

/// Buffer watermarks for batch mode.
#[derive(Debug, Clone)]
pub struct FlowControl {
    /// Start the board queue once more than this many commands are buffered.
    pub min_command_buffer: i64,
    /// Block while no more than this many buffer slots are free.
    pub max_command_buffer: i64,
    pub poll_interval: Duration,
    /// `None` waits for the board as long as it takes.
    pub drain_timeout: Option<Duration>,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            min_command_buffer: 10,
            max_command_buffer: 3,
            poll_interval: Duration::from_millis(100),
            drain_timeout: None,
        }
    }
}

/// Issues configuration, homing and move commands for the board's motors.
///
/// In batch mode moves are pipelined into the board's command buffer:
/// `move_to` starts the board queue once enough moves are buffered and holds
/// the caller back while the buffer is nearly full.
#[derive(Debug)]
pub struct AxisController {
    channel: CommandChannel,
    flow: FlowControl,
    batch_mode: bool,
}

impl AxisController {
    pub fn new(channel: CommandChannel, flow: FlowControl) -> Self {
        Self {
            channel,
            flow,
            batch_mode: false,
        }
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn batch_mode(&self) -> bool {
        self.batch_mode
    }

    pub fn set_batch_mode(&mut self, enabled: bool) {
        tracing::debug!("Batch mode {}", if enabled { "on" } else { "off" });
        self.batch_mode = enabled;
    }

    /// Sends a mutating command and insists on an acknowledgement.
    async fn execute(&self, command: Command) -> Result<Reply, HardwareError> {
        let reply = self.channel.send(&command).await?;
        if !reply.is_acknowledgement() {
            return Err(HardwareError::Rejected {
                command: command.number,
                reply,
            });
        }
        Ok(reply)
    }

    pub async fn initialize(&self) -> Result<(), HardwareError> {
        tracing::info!("Initializing board");
        self.execute(Command::new(CommandNumber::Initialize)).await?;
        Ok(())
    }

    /// Resolves the axis settings and pushes end stops, ramp limits and motor
    /// current to the board.
    pub async fn configure_axis(&self, settings: &AxisSettings) -> Result<AxisConfig, HardwareError> {
        let axis = AxisConfig::resolve(settings)?;
        tracing::info!(
            "Configuring motor {}: {} steps/mm, {} mm/s, {} mm/s²",
            axis.motor,
            axis.steps_per_unit,
            axis.max_speed,
            axis.max_acceleration
        );
        for (side, end_stop) in axis.end_stops() {
            self.configure_end_stop(axis.motor, side, &end_stop, axis.steps_per_unit)
                .await?;
        }
        let acceleration = axis.max_acceleration_steps();
        self.set_acceleration_settings(
            axis.motor,
            acceleration,
            acceleration,
            axis.bow_steps(),
            axis.bow_steps(),
        )
        .await?;
        self.set_current(axis.motor, axis.current).await?;
        Ok(axis)
    }

    /// Current is given in ampere and sent in milliampere.
    pub async fn set_current(&self, motor: u8, current: f64) -> Result<(), HardwareError> {
        let command = Command::new(CommandNumber::SetCurrent)
            .arg(motor)
            .arg((current * 1000.0).round() as i64);
        self.execute(command).await?;
        Ok(())
    }

    pub async fn set_acceleration_settings(
        &self,
        motor: u8,
        acceleration: f64,
        deceleration: f64,
        start_bow: f64,
        end_bow: f64,
    ) -> Result<(), HardwareError> {
        let command = Command::new(CommandNumber::SetAcceleration)
            .arg(motor)
            .arg(acceleration.round() as i64)
            .arg(deceleration.round() as i64)
            .arg(start_bow.round() as i64)
            .arg(end_bow.round() as i64);
        self.execute(command).await?;
        Ok(())
    }

    pub async fn configure_end_stop(
        &self,
        motor: u8,
        side: EndStopSide,
        end_stop: &EndStop,
        steps_per_unit: f64,
    ) -> Result<(), HardwareError> {
        let (kind, value) = end_stop.wire_value(steps_per_unit);
        tracing::debug!("Motor {} {:?} end stop: {:?}", motor, side, end_stop);
        let command = Command::new(CommandNumber::ConfigureEndStop)
            .arg(motor)
            .arg(side.code())
            .arg(kind)
            .arg(value);
        self.execute(command).await?;
        Ok(())
    }

    /// Sends one move command with all given motors. Geared motors share the
    /// command and therefore a single board buffer slot.
    pub async fn move_to(&self, moves: &[AxisMove]) -> Result<(), HardwareError> {
        if moves.is_empty() {
            return Ok(());
        }
        let mut command = Command::new(CommandNumber::Move);
        for axis_move in moves {
            axis_move.append_to(&mut command);
        }
        let reply = self.execute(command).await?;
        if !self.batch_mode {
            return Ok(());
        }

        let status = reply
            .buffer_status()
            .ok_or_else(|| HardwareError::MalformedReply(reply.clone()))?;
        tracing::trace!(
            "Board buffer {}/{}, running: {}",
            status.queue_length,
            status.queue_capacity,
            status.queue_running()
        );
        if !status.queue_running() && status.queue_length > self.flow.min_command_buffer {
            tracing::info!("{} moves buffered, starting board queue", status.queue_length);
            self.start_queue().await?;
        }
        if status.queue_running() && status.free() <= self.flow.max_command_buffer {
            self.wait_for_free_buffer().await?;
        }
        Ok(())
    }

    pub async fn start_queue(&self) -> Result<(), HardwareError> {
        self.execute(Command::new(CommandNumber::StartQueue).arg(1i64))
            .await?;
        Ok(())
    }

    pub async fn query_status(&self) -> Result<BufferStatus, HardwareError> {
        let reply = self.execute(Command::new(CommandNumber::QueryStatus)).await?;
        reply
            .buffer_status()
            .ok_or(HardwareError::MalformedReply(reply))
    }

    async fn wait_for_free_buffer(&self) -> Result<(), HardwareError> {
        tracing::debug!("Board buffer full, waiting for free slots");
        let reserve = self.flow.max_command_buffer;
        let controller = self;
        let outcome = poll_until(self.flow.poll_interval, self.flow.drain_timeout, move || async move {
            let status = controller.query_status().await?;
            Ok::<_, HardwareError>((status.free() > reserve).then_some(status))
        })
        .await?;
        match outcome {
            PollOutcome::Recovered(status) => {
                tracing::debug!("Board buffer recovered: {} free", status.free());
                Ok(())
            }
            PollOutcome::TimedOut => Err(HardwareError::BufferStalled(
                self.flow.drain_timeout.unwrap_or_default(),
            )),
        }
    }

    /// Runs the board's homing routine for one motor and waits up to `timeout`
    /// for it to report back.
    pub async fn home(&self, homing: &HomingMove, timeout: Duration) -> Result<(), HardwareError> {
        let command = Command::new(CommandNumber::Home)
            .arg(homing.motor)
            .arg(0i64)
            .arg(homing.speed)
            .arg(homing.precision_speed)
            .arg(homing.acceleration)
            .arg(homing.deceleration)
            .arg(homing.start_bow)
            .arg(homing.end_bow);
        let reply = match self.channel.send_with_timeout(&command, timeout).await {
            Ok(reply) => reply,
            Err(ChannelError::Unresponsive(_)) => return Err(HardwareError::HomingTimeout(timeout)),
            Err(e) => return Err(e.into()),
        };
        if !reply.is_acknowledgement() {
            return Err(HardwareError::Rejected {
                command: CommandNumber::Home,
                reply,
            });
        }
        Ok(())
    }
}
