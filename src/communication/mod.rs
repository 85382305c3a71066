//! Serial link to the motion board: frame codec, request/response channel
//! with heartbeat tracking, and the serial port opener.

pub mod channel;
pub mod frame;
pub mod serial;

use std::time::Duration;
use thiserror::Error;

pub use channel::{ChannelSettings, CommandChannel, Heartbeat};
pub use frame::{Argument, BufferStatus, Command, CommandNumber, FrameDecoder, Reply, ReplyKind};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Board sent no keep-alive within {0:?} of connecting")]
    Handshake(Duration),
    #[error("Board did not reply within {0:?}; channel disconnected")]
    Unresponsive(Duration),
    #[error("Channel is disconnected")]
    Disconnected,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
