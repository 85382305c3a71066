// Simulated board speaking the wire protocol over an in-memory duplex stream
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use tbone_host::communication::{ChannelSettings, CommandChannel, FrameDecoder};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct BoardState {
    /// Every frame the host sent, terminator stripped.
    pub received: Vec<String>,
    pub queue_length: i64,
    pub queue_capacity: i64,
    pub running: bool,
    /// Buffer entries executed per status query once the queue runs.
    pub drain_per_query: i64,
    /// Command numbers the board never answers.
    pub silent: Vec<i32>,
    /// Command numbers answered with an error frame.
    pub reject: Vec<i32>,
    /// Surround replies with heartbeats and garbage, written in small pieces.
    pub chatter: bool,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            received: Vec::new(),
            queue_length: 0,
            queue_capacity: 20,
            running: false,
            drain_per_query: 5,
            silent: Vec::new(),
            reject: Vec::new(),
            chatter: false,
        }
    }
}

impl BoardState {
    fn heartbeat(&self) -> String {
        format!("-128,{},{},4000;", self.queue_length, self.queue_capacity)
    }

    fn status(&self) -> String {
        format!(
            "0,{},{},{};",
            self.queue_length, self.queue_capacity, self.running as i32
        )
    }

    fn respond(&mut self, frame: &str) -> Vec<String> {
        self.received.push(frame.to_string());
        let Ok(number) = frame.split(',').next().unwrap_or_default().parse::<i32>() else {
            return vec!["-9,unparsable;".to_string()];
        };
        if self.silent.contains(&number) {
            return Vec::new();
        }
        if self.reject.contains(&number) {
            return vec!["-9,rejected;".to_string()];
        }
        let reply = match number {
            10 => {
                self.queue_length += 1;
                self.status()
            }
            11 => {
                self.running = true;
                "0;".to_string()
            }
            31 => {
                if self.running {
                    self.queue_length = (self.queue_length - self.drain_per_query).max(0);
                }
                self.status()
            }
            _ => "0;".to_string(),
        };
        if self.chatter {
            vec![self.heartbeat(), "garbage;".to_string(), reply]
        } else {
            vec![reply]
        }
    }

    /// Frames received with the given command number.
    pub fn frames(&self, number: i32) -> Vec<String> {
        let prefix = format!("{},", number);
        self.received
            .iter()
            .filter(|f| f.as_str() == number.to_string() || f.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

pub struct SimulatedBoard {
    pub state: Arc<Mutex<BoardState>>,
    task: JoinHandle<()>,
}

impl SimulatedBoard {
    pub fn snapshot(&self) -> BoardState {
        self.state.lock().unwrap().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut BoardState)) {
        f(&mut self.state.lock().unwrap());
    }

    /// Drops the board's end of the stream.
    pub fn hang_up(&self) {
        self.task.abort();
    }
}

impl Drop for SimulatedBoard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts a board task and returns the host's stream halves.
pub fn start_board(state: BoardState) -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>, SimulatedBoard) {
    let (host, board) = tokio::io::duplex(4096);
    let state = Arc::new(Mutex::new(state));
    let task = tokio::spawn(run_board(board, state.clone()));
    let (reader, writer) = tokio::io::split(host);
    (reader, writer, SimulatedBoard { state, task })
}

async fn run_board(stream: DuplexStream, state: Arc<Mutex<BoardState>>) {
    let (mut rd, mut wr) = tokio::io::split(stream);
    // Half a frame left over from before the host attached.
    if wr.write_all(b"3,17").await.is_err() {
        return;
    }
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let frame = state.lock().unwrap().heartbeat();
                if wr.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
            }
            read = rd.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                decoder.extend(&buf[..n]);
                while let Some(frame) = decoder.next_frame() {
                    let (replies, chatter) = {
                        let mut state = state.lock().unwrap();
                        (state.respond(&frame), state.chatter)
                    };
                    for reply in replies {
                        if chatter {
                            for piece in reply.as_bytes().chunks(3) {
                                let _ = wr.write_all(piece).await;
                                tokio::task::yield_now().await;
                            }
                        } else {
                            let _ = wr.write_all(reply.as_bytes()).await;
                        }
                    }
                }
            }
        }
    }
}

pub fn fast_settings() -> ChannelSettings {
    ChannelSettings {
        reply_timeout: Duration::from_millis(500),
        startup_timeout: Duration::from_secs(2),
        quiet_period: Duration::from_millis(5),
    }
}

pub async fn connect(state: BoardState) -> (CommandChannel, SimulatedBoard) {
    connect_with(state, fast_settings()).await
}

pub async fn connect_with(state: BoardState, settings: ChannelSettings) -> (CommandChannel, SimulatedBoard) {
    let (reader, writer, board) = start_board(state);
    let channel = CommandChannel::connect(reader, writer, settings)
        .await
        .expect("handshake with simulated board");
    (channel, board)
}

pub const AXIS_CONFIG: &str = r#"
    [channel]
    min-command-buffer = 3
    max-command-buffer = 2
    buffer-poll-interval = 0.01

    [printer]
    homing-timeout = 1.0

    [printer.print-queue]
    min-length = 2
    max-length = 6

    [x-axis]
    motor = 0
    steps-per-mm = 80.0
    current = 1.2
    max-speed = 50.0
    max-acceleration = 500.0
    bow-acceleration = 100.0

    [x-axis.end-stops.left]
    polarity = "negative"

    [x-axis.end-stops.right]
    polarity = "virtual"
    position = 200.0

    [y-axis]
    motor = 1
    steps-per-mm = 100.0
    current = 1.0
    max-speed = 40.0
    max-acceleration = 400.0
    bow-acceleration = 80.0
"#;

pub fn config() -> tbone_host::Config {
    toml::from_str(AXIS_CONFIG).unwrap()
}
