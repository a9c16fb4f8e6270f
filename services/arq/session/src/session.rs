//! Per-transport ARQ session.
//!
//! A [`Session`] owns one transport and runs a task that interleaves inbound
//! reads, the retry timer, the ACK heartbeat and transmit requests. Outbound
//! frames go through a separate writer task so a blocked write never stops
//! reading.
//! Link state lives behind one mutex shared with the [`Session`] handle so
//! `send` can accept or reject synchronously; the lock is never held across
//! an await point.

use crate::heartbeat::Heartbeat;
use crate::sender::{Delivery, RetryAction, Sender};
use crate::writer::{spawn_writer, FrameWriter, Queued, DEFAULT_WRITE_QUEUE_DEPTH};
use crate::SessionError;
use arq_wire::{ack_frame, Assembler, Inbound, SeqBit, WireError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for an ARQ session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Name used in log lines
    pub label: String,
    /// Interval between retransmissions of an unacknowledged frame
    pub retry_interval: Duration,
    /// Interval between heartbeat ACK frames
    pub ack_interval: Duration,
    /// Size of the transport read buffer
    pub read_buffer_size: usize,
    /// Frames that may wait for the transport before new ones are dropped
    pub write_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: "link".to_string(),
            retry_interval: Duration::from_millis(100),
            ack_interval: Duration::from_millis(100),
            read_buffer_size: 4 * 1024,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
        }
    }
}

impl SessionConfig {
    /// Set the log label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the retransmission interval
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the heartbeat ACK interval
    pub fn with_ack_interval(mut self, interval: Duration) -> Self {
        self.ack_interval = interval;
        self
    }

    /// Set the transport read buffer size
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the outbound frame queue depth
    pub fn with_write_queue_depth(mut self, depth: usize) -> Self {
        self.write_queue_depth = depth.max(1);
        self
    }
}

/// Statistics for a session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Total bytes sent
    pub bytes_out: u64,
    /// DATA frames written, retransmissions included
    pub frames_sent: u64,
    /// DATA frames written again after a retry tick
    pub retransmissions: u64,
    /// Sends confirmed by the peer
    pub deliveries: u64,
    /// ACK frames written
    pub acks_sent: u64,
    /// ACK frames received
    pub acks_received: u64,
    /// Payloads handed to the application
    pub messages_received: u64,
    /// Retransmitted DATA frames dropped by the receiver
    pub duplicates_dropped: u64,
    /// Frames that failed the BCC check
    pub checksum_errors: u64,
    /// Frames whose body was not a valid payload
    pub decode_errors: u64,
    /// Timestamp of last received chunk
    pub last_frame_in: Option<Instant>,
    /// Time from first transmission to confirmation of the last send
    pub last_delivery_time: Option<Duration>,
}

/// Snapshot of the alternating bits of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkBits {
    /// Bit tagging the next or current outbound DATA frame
    pub tx_current: SeqBit,
    /// Bit the receiver expects not to see on the next new frame
    pub rx_expected: SeqBit,
    /// Last ACK bit seen from the peer
    pub peer_ack: Option<SeqBit>,
}

/// Events emitted by sessions
#[derive(Debug)]
pub enum SessionEvent<T> {
    /// A payload was delivered by the peer
    Message(T),
    /// An inbound frame failed integrity checks and was discarded
    Error(WireError),
    /// The session task stopped
    Disconnected {
        /// Transport failure that stopped the task, if any
        error: Option<std::io::Error>,
    },
}

/// Shared link state
#[derive(Debug)]
struct LinkState {
    sender: Sender,
    assembler: Assembler,
    stats: SessionStats,
    closed: bool,
}

type SharedState = Arc<Mutex<LinkState>>;

fn lock(shared: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Requests from the handle to the session task
enum Command {
    /// Write a freshly started DATA frame and arm the retry timer
    Transmit(Bytes),
}

/// Handle to a running ARQ session
pub struct Session<T> {
    shared: SharedState,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    _payload: PhantomData<fn(T) -> T>,
}

impl<T> Session<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Start a session over `stream`
    ///
    /// Must be called from within a tokio runtime. Returns the handle and the
    /// channel on which messages, integrity errors and the final
    /// disconnect are reported, in arrival order.
    pub fn spawn<S>(stream: S, config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent<T>>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(LinkState {
            sender: Sender::new(),
            assembler: Assembler::new(),
            stats: SessionStats::default(),
            closed: false,
        }));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run::<S, T>(
            stream,
            config,
            shared.clone(),
            command_rx,
            shutdown_rx,
            event_tx,
        ));

        let session = Self {
            shared,
            commands: command_tx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            _payload: PhantomData,
        };

        (session, event_rx)
    }

    /// Accept `payload` for transmission
    ///
    /// Returns immediately. Fails with [`SessionError::SendInProgress`] while
    /// a previous send is unconfirmed and with a wire error if the payload
    /// cannot be framed; nothing is transmitted in either case.
    pub fn send(&self, payload: &T) -> Result<Delivery, SessionError> {
        let mut state = lock(&self.shared);
        if state.closed {
            return Err(SessionError::Closed);
        }

        let (frame, delivery) = state.sender.start(payload)?;
        if self.commands.send(Command::Transmit(frame)).is_err() {
            state.sender.abandon();
            return Err(SessionError::Closed);
        }

        Ok(delivery)
    }
}

impl<T> Session<T> {
    /// Whether a send is waiting for its acknowledgement
    pub fn is_sending(&self) -> bool {
        lock(&self.shared).sender.is_sending()
    }

    /// Whether the session task has stopped
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    /// Current alternating bits
    pub fn bits(&self) -> LinkBits {
        let state = lock(&self.shared);
        LinkBits {
            tx_current: state.sender.tx_bit(),
            rx_expected: state.assembler.rx_expected(),
            peer_ack: state.sender.peer_ack(),
        }
    }

    /// Snapshot of the session statistics
    pub fn stats(&self) -> SessionStats {
        lock(&self.shared).stats.clone()
    }

    /// Stop the session task and both timers, waiting for it to finish
    ///
    /// A send still in flight resolves with [`SessionError::Closed`].
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn retry_timer(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Hand a frame to the writer task; false if it was not queued
fn queue_frame(label: &str, writer: &FrameWriter, frame: Bytes) -> bool {
    match writer.queue(frame) {
        Queued::Accepted => true,
        Queued::Full => {
            debug!("[{}] Write queue full, dropping frame", label);
            false
        }
        Queued::Closed => false,
    }
}

/// Feed an inbound chunk through the assembler and dispatch what it yields
///
/// Returns the ACK frames to write for newly accepted payloads.
fn dispatch_inbound<T: DeserializeOwned>(
    label: &str,
    shared: &Mutex<LinkState>,
    chunk: &[u8],
    events: &mpsc::UnboundedSender<SessionEvent<T>>,
) -> Vec<Bytes> {
    let mut acks = Vec::new();
    let mut guard = lock(shared);
    let state = &mut *guard;

    state.stats.bytes_in += chunk.len() as u64;
    state.stats.last_frame_in = Some(Instant::now());
    state.assembler.push(chunk);

    loop {
        match state.assembler.next_frame::<T>() {
            Ok(Some(Inbound::Ack(bit))) => {
                state.sender.on_ack(bit);
                state.stats.acks_received += 1;
            }
            Ok(Some(Inbound::Message(payload))) => {
                let rx_expected = state.assembler.rx_expected();
                debug!("[{}] Delivered DATA frame: seq={}", label, rx_expected);
                state.stats.messages_received += 1;
                acks.push(ack_frame(rx_expected));
                let _ = events.send(SessionEvent::Message(payload));
            }
            Ok(Some(Inbound::Duplicate(_))) => {
                state.stats.duplicates_dropped += 1;
            }
            Ok(None) => break,
            Err(e) => {
                match e {
                    WireError::Checksum { .. } => state.stats.checksum_errors += 1,
                    _ => state.stats.decode_errors += 1,
                }
                warn!("[{}] Discarded inbound frame: {}", label, e);
                let _ = events.send(SessionEvent::Error(e));
            }
        }
    }

    acks
}

async fn run<S, T>(
    stream: S,
    config: SessionConfig,
    shared: SharedState,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<SessionEvent<T>>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
    T: DeserializeOwned,
{
    let label = config.label.as_str();
    info!(
        "[{}] Starting ARQ session: retry_interval={:?} ack_interval={:?}",
        label, config.retry_interval, config.ack_interval
    );

    let (mut reader, write_half) = tokio::io::split(stream);
    let written = shared.clone();
    let (writer, mut writer_task) = spawn_writer(write_half, config.write_queue_depth, move |n| {
        lock(&written).stats.bytes_out += n as u64;
    });

    let mut read_buffer = vec![0u8; config.read_buffer_size.max(1)];
    let mut heartbeat = Heartbeat::new(config.ack_interval);
    let mut retry: Option<Interval> = None;

    let error = loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                debug!("[{}] Shutdown requested", label);
                break None;
            }

            failure = writer_task.failure() => break failure,

            // New DATA frame accepted by Session::send
            command = commands.recv() => {
                match command {
                    Some(Command::Transmit(frame)) => {
                        let len = frame.len();
                        if queue_frame(label, &writer, frame) {
                            lock(&shared).stats.frames_sent += 1;
                        }
                        retry = Some(retry_timer(config.retry_interval));
                        debug!("[{}] Sent DATA frame ({} bytes)", label, len);
                    }
                    None => {
                        debug!("[{}] Session handle dropped", label);
                        break None;
                    }
                }
            }

            // Retry tick for the in-flight frame
            _ = async {
                match retry.as_mut() {
                    Some(timer) => timer.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                let action = lock(&shared).sender.on_retry_tick();
                match action {
                    RetryAction::Idle => retry = None,
                    RetryAction::Delivered { transmissions, elapsed } => {
                        retry = None;
                        {
                            let mut state = lock(&shared);
                            state.stats.deliveries += 1;
                            state.stats.last_delivery_time = Some(elapsed);
                        }
                        debug!(
                            "[{}] DATA frame acknowledged after {} transmission(s) in {:?}",
                            label, transmissions, elapsed
                        );
                    }
                    RetryAction::Retransmit(frame) => {
                        if queue_frame(label, &writer, frame) {
                            let mut state = lock(&shared);
                            state.stats.frames_sent += 1;
                            state.stats.retransmissions += 1;
                            debug!("[{}] Retransmitted DATA frame: seq={}", label, state.sender.tx_bit());
                        }
                    }
                }
            }

            // Heartbeat ACK
            _ = heartbeat.tick() => {
                let ack = ack_frame(lock(&shared).assembler.rx_expected());
                if queue_frame(label, &writer, ack) {
                    lock(&shared).stats.acks_sent += 1;
                }
            }

            // Inbound bytes
            read = reader.read(&mut read_buffer) => {
                match read {
                    Ok(0) => {
                        info!("[{}] Transport closed by peer", label);
                        break None;
                    }
                    Ok(n) => {
                        for ack in dispatch_inbound(label, &shared, &read_buffer[..n], &events) {
                            if queue_frame(label, &writer, ack) {
                                lock(&shared).stats.acks_sent += 1;
                            }
                        }
                    }
                    Err(e) => break Some(e),
                }
            }
        }
    };

    // Stop writing before reporting the disconnect
    drop(writer);
    drop(writer_task);

    if let Some(ref e) = error {
        warn!("[{}] Transport error: {}", label, e);
    }

    let stats = {
        let mut state = lock(&shared);
        state.closed = true;
        state.sender.abandon();
        state.stats.clone()
    };
    info!("[{}] Session ended. Stats: {:?}", label, stats);

    let _ = events.send(SessionEvent::Disconnected { error });
}
