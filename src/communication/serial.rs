// src/communication/serial.rs - Opening the board's serial port
use serial2_tokio::SerialPort;

use super::{ChannelError, ChannelSettings, CommandChannel};

pub const DEFAULT_BAUD: u32 = 115_200;

/// Opens `path` and runs the channel handshake over it.
pub async fn open_channel(
    path: &str,
    baud: u32,
    settings: ChannelSettings,
) -> Result<CommandChannel, ChannelError> {
    tracing::info!("Opening board serial port {} at {} baud", path, baud);
    let port = SerialPort::open(path, baud)?;
    let (reader, writer) = tokio::io::split(port);
    CommandChannel::connect(reader, writer, settings).await
}
