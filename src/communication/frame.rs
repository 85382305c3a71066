// src/communication/frame.rs - Wire format of the board protocol
//
// Every exchange is one ASCII frame: `<number>[,<arg>]*;`. The `;` is the only
// terminator; frames may arrive split across reads or several per read.

use std::fmt;

/// Frame terminator on the wire.
pub const FRAME_DELIMITER: u8 = b';';
/// Separator between the command number and its arguments.
pub const ARGUMENT_SEPARATOR: char = ',';

pub const ACKNOWLEDGEMENT: i32 = 0;
pub const INFO_FIRST: i32 = -1;
pub const INFO_LAST: i32 = -4;
pub const WARNING_FIRST: i32 = -5;
pub const WARNING_LAST: i32 = -8;
pub const ERROR: i32 = -9;
pub const KEEP_ALIVE: i32 = -128;

/// Commands understood by the board. The set is closed.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandNumber {
    Acknowledge = 0,
    SetCurrent = 1,
    SetAcceleration = 3,
    Initialize = 9,
    Move = 10,
    StartQueue = 11,
    Home = 20,
    ConfigureEndStop = 21,
    QueryStatus = 31,
}

impl CommandNumber {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// A single numeric command argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Argument {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Int(v) => write!(f, "{}", v),
            Argument::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Int(v)
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int(v as i64)
    }
}

impl From<u8> for Argument {
    fn from(v: u8) -> Self {
        Argument::Int(v as i64)
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Float(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub number: CommandNumber,
    pub arguments: Vec<Argument>,
}

impl Command {
    pub fn new(number: CommandNumber) -> Self {
        Self {
            number,
            arguments: Vec::new(),
        }
    }

    pub fn arg(mut self, argument: impl Into<Argument>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn push(&mut self, argument: impl Into<Argument>) {
        self.arguments.push(argument.into());
    }

    /// Serializes the command into a complete frame, terminator included.
    pub fn encode(&self) -> String {
        let mut frame = self.number.code().to_string();
        for argument in &self.arguments {
            frame.push(ARGUMENT_SEPARATOR);
            frame.push_str(&argument.to_string());
        }
        frame.push(FRAME_DELIMITER as char);
        frame
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self.number, self.number.code())?;
        if !self.arguments.is_empty() {
            let args: Vec<String> = self.arguments.iter().map(|a| a.to_string()).collect();
            write!(f, ": [{}]", args.join(", "))?;
        }
        Ok(())
    }
}

/// Classification of an inbound frame, derived only from its leading number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Acknowledgement,
    Info,
    Warning,
    Error,
    KeepAlive,
    Unknown,
}

impl ReplyKind {
    pub fn classify(number: i32) -> Self {
        match number {
            ACKNOWLEDGEMENT => ReplyKind::Acknowledgement,
            n if (INFO_LAST..=INFO_FIRST).contains(&n) => ReplyKind::Info,
            n if (WARNING_LAST..=WARNING_FIRST).contains(&n) => ReplyKind::Warning,
            ERROR => ReplyKind::Error,
            KEEP_ALIVE => ReplyKind::KeepAlive,
            _ => ReplyKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub number: i32,
    pub kind: ReplyKind,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("non-numeric leading field in frame '{0}'")]
    NotNumeric(String),
}

impl Reply {
    /// Parses a frame without its terminator. Surrounding whitespace (e.g. the
    /// line breaks some firmware emits between frames) is ignored.
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Err(FrameError::Empty);
        }
        let mut parts = frame.split(ARGUMENT_SEPARATOR);
        let head = parts.next().unwrap_or_default().trim();
        let number: i32 = head
            .parse()
            .map_err(|_| FrameError::NotNumeric(frame.to_string()))?;
        let arguments = parts.map(|p| p.trim().to_string()).collect();
        Ok(Self {
            number,
            kind: ReplyKind::classify(number),
            arguments,
        })
    }

    pub fn is_acknowledgement(&self) -> bool {
        self.kind == ReplyKind::Acknowledgement
    }

    pub fn int_argument(&self, index: usize) -> Option<i64> {
        let raw = self.arguments.get(index)?;
        raw.parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|v| v as i64))
    }

    /// Reads the three occupancy numbers every move/status reply and every
    /// heartbeat carries.
    pub fn buffer_status(&self) -> Option<BufferStatus> {
        Some(BufferStatus {
            queue_length: self.int_argument(0)?,
            queue_capacity: self.int_argument(1)?,
            third: self.int_argument(2)?,
        })
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.number)?;
        if !self.arguments.is_empty() {
            write!(f, ": {:?}", self.arguments)?;
        }
        Ok(())
    }
}

/// Occupancy of the board's command buffer. The meaning of the third number
/// depends on the frame: queue-running flag on move/status replies, free RAM
/// on heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStatus {
    pub queue_length: i64,
    pub queue_capacity: i64,
    third: i64,
}

impl BufferStatus {
    pub fn new(queue_length: i64, queue_capacity: i64, third: i64) -> Self {
        Self {
            queue_length,
            queue_capacity,
            third,
        }
    }

    pub fn free(&self) -> i64 {
        self.queue_capacity - self.queue_length
    }

    pub fn queue_running(&self) -> bool {
        self.third > 0
    }

    pub fn free_ram(&self) -> i64 {
        self.third
    }
}

/// Largest run of bytes without a terminator the decoder keeps around.
pub const MAX_PENDING_BYTES: usize = 4096;

/// Incremental frame splitter. Bytes after the last terminator are kept for
/// the next call. A run longer than [`MAX_PENDING_BYTES`] with no terminator
/// in it is line noise and gets discarded.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_PENDING_BYTES && !self.pending.contains(&FRAME_DELIMITER) {
            tracing::warn!(
                "Dropping {} bytes received without a frame terminator",
                self.pending.len()
            );
            self.pending.clear();
        }
    }

    /// Pops the next complete frame (terminator stripped), if any.
    pub fn next_frame(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == FRAME_DELIMITER)?;
        let frame: Vec<u8> = self.pending.drain(..=end).take(end).collect();
        Some(String::from_utf8_lossy(&frame).into_owned())
    }

    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}
