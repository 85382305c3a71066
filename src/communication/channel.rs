// src/communication/channel.rs - Request/response channel to the motion board
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

use super::ChannelError;
use super::frame::{BufferStatus, Command, FrameDecoder, Reply, ReplyKind};

const READ_CHUNK: usize = 256;

/// Timing parameters of a [`CommandChannel`].
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// How long `send` waits for the board's reply.
    pub reply_timeout: Duration,
    /// Upper bound for the whole connect handshake.
    pub startup_timeout: Duration,
    /// Silence on the line that ends the initial drain of stale bytes.
    pub quiet_period: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(5),
            quiet_period: Duration::from_millis(5),
        }
    }
}

/// Last keep-alive seen from the board.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub received_at: Instant,
    pub status: BufferStatus,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State only the caller currently holding the request slot may touch.
struct RequestSlot {
    writer: BoxedWriter,
    replies: mpsc::Receiver<Reply>,
}

/// Framed request/response link to the board.
///
/// A background listener task reads the byte stream, records heartbeats and
/// forwards every other frame to the caller waiting in [`CommandChannel::send`].
/// The protocol carries no request ids, so requests are strictly one at a
/// time: the request slot is held from the write until the reply arrives.
pub struct CommandChannel {
    slot: Mutex<RequestSlot>,
    heartbeat: watch::Receiver<Heartbeat>,
    connected: Arc<AtomicBool>,
    awaiting_reply: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    listener: JoinHandle<()>,
    settings: ChannelSettings,
}

impl CommandChannel {
    /// Performs the startup handshake on the given stream halves and starts
    /// the listener. Fails with [`ChannelError::Handshake`] when no keep-alive
    /// frame shows up within `settings.startup_timeout`.
    pub async fn connect<R, W>(
        mut reader: R,
        writer: W,
        settings: ChannelSettings,
    ) -> Result<Self, ChannelError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut decoder = FrameDecoder::new();
        let status = match timeout(
            settings.startup_timeout,
            handshake(&mut reader, &mut decoder, settings.quiet_period),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(ChannelError::Handshake(settings.startup_timeout)),
        };
        tracing::info!(
            "Board is alive: queue {}/{}, {} bytes free",
            status.queue_length,
            status.queue_capacity,
            status.free_ram()
        );

        let (heartbeat_tx, heartbeat_rx) = watch::channel(Heartbeat {
            received_at: Instant::now(),
            status,
        });
        let (reply_tx, reply_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let connected = Arc::new(AtomicBool::new(true));
        let awaiting_reply = Arc::new(AtomicBool::new(false));

        let listener = Listener {
            reader,
            decoder,
            replies: reply_tx,
            heartbeat: heartbeat_tx,
            awaiting_reply: awaiting_reply.clone(),
            connected: connected.clone(),
            shutdown: shutdown_rx,
        };
        let listener = tokio::spawn(listener.run());

        Ok(Self {
            slot: Mutex::new(RequestSlot {
                writer: Box::new(writer),
                replies: reply_rx,
            }),
            heartbeat: heartbeat_rx,
            connected,
            awaiting_reply,
            shutdown_tx,
            listener,
            settings,
        })
    }

    /// Sends a command and waits for its reply using the default timeout.
    pub async fn send(&self, command: &Command) -> Result<Reply, ChannelError> {
        self.send_with_timeout(command, self.settings.reply_timeout)
            .await
    }

    /// Sends a command and waits up to `wait` for the next non-heartbeat frame.
    /// A timeout disconnects the channel.
    pub async fn send_with_timeout(
        &self,
        command: &Command,
        wait: Duration,
    ) -> Result<Reply, ChannelError> {
        let mut slot = self.slot.lock().await;
        if !self.is_connected() {
            return Err(ChannelError::Disconnected);
        }
        while let Ok(stale) = slot.replies.try_recv() {
            tracing::warn!("Discarding stale reply {}", stale);
        }

        let frame = command.encode();
        tracing::debug!("board <- {}", frame);
        self.awaiting_reply.store(true, Ordering::SeqCst);
        let written = async {
            slot.writer.write_all(frame.as_bytes()).await?;
            slot.writer.flush().await
        }
        .await;
        if let Err(e) = written {
            self.awaiting_reply.store(false, Ordering::SeqCst);
            tracing::error!("Write to board failed: {}", e);
            self.disconnect();
            return Err(ChannelError::Io(e));
        }

        let outcome = timeout(wait, slot.replies.recv()).await;
        self.awaiting_reply.store(false, Ordering::SeqCst);
        match outcome {
            Ok(Some(reply)) => {
                tracing::debug!("board -> {} (for {:?})", reply, command.number);
                Ok(reply)
            }
            Ok(None) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(ChannelError::Disconnected)
            }
            Err(_) => {
                tracing::error!(
                    "No reply to {} within {:?}, disconnecting",
                    command,
                    wait
                );
                self.disconnect();
                Err(ChannelError::Unresponsive(wait))
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stops the listener. A caller blocked in `send` is woken with
    /// [`ChannelError::Disconnected`].
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("Disconnecting from board");
        }
        let _ = self.shutdown_tx.send(());
    }

    pub fn heartbeat(&self) -> Heartbeat {
        *self.heartbeat.borrow()
    }

    pub fn since_last_heartbeat(&self) -> Duration {
        self.heartbeat.borrow().received_at.elapsed()
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        self.listener.abort();
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("connected", &self.is_connected())
            .field("settings", &self.settings)
            .finish()
    }
}

async fn handshake<R>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    quiet_period: Duration,
) -> Result<BufferStatus, ChannelError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];

    // Throw away whatever the board sent before we were listening.
    let mut drained = 0usize;
    while let Ok(read) = timeout(quiet_period, reader.read(&mut buf)).await {
        match read? {
            0 => return Err(ChannelError::Disconnected),
            n => drained += n,
        }
    }
    if drained > 0 {
        tracing::debug!("Drained {} stale bytes", drained);
    }

    // The first terminator only tells us where frames start.
    let mut synchronized = false;
    loop {
        while let Some(frame) = decoder.next_frame() {
            if !synchronized {
                synchronized = true;
                tracing::trace!("Synchronized on partial frame '{}'", frame);
                continue;
            }
            match Reply::parse(&frame) {
                Ok(reply) if reply.kind == ReplyKind::KeepAlive => {
                    return Ok(reply.buffer_status().unwrap_or_default());
                }
                Ok(reply) => tracing::debug!("Ignoring {} during handshake", reply),
                Err(e) => tracing::warn!("Ignoring malformed frame during handshake: {}", e),
            }
        }
        match reader.read(&mut buf).await? {
            0 => return Err(ChannelError::Disconnected),
            n => decoder.extend(&buf[..n]),
        }
    }
}

struct Listener<R> {
    reader: R,
    decoder: FrameDecoder,
    replies: mpsc::Sender<Reply>,
    heartbeat: watch::Sender<Heartbeat>,
    awaiting_reply: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    shutdown: broadcast::Receiver<()>,
}

impl<R> Listener<R>
where
    R: AsyncRead + Unpin,
{
    async fn run(mut self) {
        let mut buf = [0u8; READ_CHUNK];
        // Frames that completed during the handshake read.
        self.dispatch_frames();
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("Board listener shutting down");
                    break;
                }
                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::warn!("Board closed the connection");
                        break;
                    }
                    Ok(n) => {
                        tracing::trace!("Read {} bytes from board", n);
                        self.decoder.extend(&buf[..n]);
                        self.dispatch_frames();
                    }
                    Err(e) => {
                        tracing::error!("Board read error: {}", e);
                        break;
                    }
                }
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn dispatch_frames(&mut self) {
        while let Some(frame) = self.decoder.next_frame() {
            let reply = match Reply::parse(&frame) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!("Dropping frame: {}", e);
                    continue;
                }
            };
            if reply.kind == ReplyKind::KeepAlive {
                self.record_heartbeat(&reply);
            } else if self.awaiting_reply.load(Ordering::SeqCst) {
                if let Err(e) = self.replies.try_send(reply) {
                    tracing::warn!("Dropping surplus reply: {}", e);
                }
            } else {
                tracing::warn!("Unsolicited frame from board: {}", reply);
            }
        }
    }

    fn record_heartbeat(&self, reply: &Reply) {
        let status = reply.buffer_status();
        self.heartbeat.send_modify(|heartbeat| {
            heartbeat.received_at = Instant::now();
            if let Some(status) = status {
                heartbeat.status = status;
            }
        });
        tracing::trace!("Heartbeat {:?}", status);
    }
}
