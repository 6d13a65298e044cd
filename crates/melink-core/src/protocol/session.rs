//! Transport session and request correlation
//!
//! A [`Session`] owns one duplex byte stream. A background task drives
//! the read/resync loop and routes every decoded message either to the
//! caller waiting on its correlation key or onto the unsolicited queue
//! consumed by streaming readers. Writes from concurrent logical callers
//! are serialized at the stream, so frames are never torn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::frame::{FrameCodec, Message, MAX_CONTENT_SIZE};
use super::transport::{self, ByteStream};
use super::ProtocolError;

/// Connection lifecycle state.
///
/// A session only exists once its stream is open, so it starts out
/// `Connected`; transport setup happens before construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connected, read loop running
    Connected,
    /// Teardown in progress
    Closing,
}

type PendingMap = Arc<Mutex<HashMap<u16, oneshot::Sender<Message>>>>;
type FrameWriter = FramedWrite<WriteHalf<Box<dyn ByteStream>>, FrameCodec>;

/// Removes a pending entry on drop, so that cancellation (dropping the
/// `send_request` future) can never leak a correlation key
struct PendingGuard {
    key: u16,
    pending: PendingMap,
    armed: bool,
}

impl PendingGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.pending).remove(&self.key);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One connection to a device, with request/response correlation
pub struct Session {
    writer: Arc<tokio::sync::Mutex<FrameWriter>>,
    pending: PendingMap,
    unsolicited_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    state: Arc<Mutex<ConnectionState>>,
    shutdown: CancellationToken,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Open the named endpoint (serial path or `host:port`) and start
    /// the session over it
    pub async fn connect(endpoint: &str, baud_rate: u32) -> Result<Self, ProtocolError> {
        debug!(endpoint, baud_rate, "connecting");
        let stream = transport::open(endpoint, baud_rate).await?;
        Ok(Self::connect_stream(stream))
    }

    /// Start a session over an already-open byte stream
    pub fn connect_stream(stream: Box<dyn ByteStream>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FramedRead::new(read_half, FrameCodec::default());
        let writer = Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
            write_half,
            FrameCodec::default(),
        )));

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (unsolicited_tx, unsolicited_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ConnectionState::Connected));
        let shutdown = CancellationToken::new();

        let read_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            unsolicited_tx,
            Arc::clone(&state),
            shutdown.clone(),
        ));

        Self {
            writer,
            pending,
            unsolicited_rx: tokio::sync::Mutex::new(unsolicited_rx),
            state,
            shutdown,
            read_task: Mutex::new(Some(read_task)),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Whether the read loop is still running
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Send a request and wait for the matching response.
    ///
    /// At most one request per correlation key may be outstanding;
    /// a second call with the same key fails immediately with
    /// [`ProtocolError::InFlight`]. The pending entry is removed exactly
    /// once: by the response, by the deadline, by cancellation (dropping
    /// this future), or by session teardown.
    pub async fn send_request(
        &self,
        request: Message,
        timeout: Duration,
    ) -> Result<Message, ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }

        let key = request.correlation_key();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.contains_key(&key) {
                return Err(ProtocolError::InFlight {
                    class: request.class,
                    command: request.command,
                });
            }
            pending.insert(key, tx);
        }
        let guard = PendingGuard {
            key,
            pending: Arc::clone(&self.pending),
            armed: true,
        };

        trace!(class = request.class, command = request.command, "sending request");
        self.write(request).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                // The dispatcher already removed the entry
                guard.disarm();
                Ok(response)
            }
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                debug!(key, "request timed out");
                Err(ProtocolError::Timeout)
            }
        }
    }

    /// Like [`send_request`], but also abandons the wait when `cancel`
    /// fires. Cancellation removes the pending entry before the caller
    /// observes the error, exactly as a timeout does.
    ///
    /// [`send_request`]: Session::send_request
    pub async fn send_request_with_cancel(
        &self,
        request: Message,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message, ProtocolError> {
        tokio::select! {
            result = self.send_request(request, timeout) => result,
            _ = cancel.cancelled() => Err(ProtocolError::Cancelled),
        }
    }

    /// Fire-and-forget write with no correlation and no reply
    pub async fn post(&self, message: Message) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        self.write(message).await
    }

    /// Receive the next unsolicited message, or `None` once the session
    /// has closed and the queue has drained
    pub async fn recv_unsolicited(&self) -> Option<Message> {
        self.unsolicited_rx.lock().await.recv().await
    }

    async fn write(&self, message: Message) -> Result<(), ProtocolError> {
        let size = message.content_len();
        if size >= MAX_CONTENT_SIZE {
            return Err(ProtocolError::FrameTooLarge { size });
        }
        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(ProtocolError::Io)
    }

    /// Tear the session down: stop the read loop, fail all pending
    /// requests with a connection-closed error, close the unsolicited
    /// queue, and release the stream
    pub async fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Closing;
        }
        self.shutdown.cancel();

        let task = lock(&self.read_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            trace!(error = %e, "stream shutdown failed");
        }
        *lock(&self.state) = ConnectionState::Disconnected;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Stop the read loop; pending waiters observe ConnectionClosed
        self.shutdown.cancel();
        if let Some(task) = lock(&self.read_task).take() {
            task.abort();
        }
    }
}

async fn read_loop(
    mut reader: FramedRead<ReadHalf<Box<dyn ByteStream>>, FrameCodec>,
    pending: PendingMap,
    unsolicited: mpsc::UnboundedSender<Message>,
    state: Arc<Mutex<ConnectionState>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = reader.next() => match frame {
                Some(Ok(message)) => dispatch(message, &pending, &unsolicited),
                Some(Err(e)) => {
                    warn!(error = %e, "read failed, closing session");
                    break;
                }
                None => {
                    debug!("stream ended");
                    break;
                }
            },
        }
    }

    *lock(&state) = ConnectionState::Disconnected;
    // Dropping the senders resolves every pending wait with
    // ConnectionClosed; dropping `unsolicited` closes the queue
    lock(&pending).clear();
}

fn dispatch(message: Message, pending: &PendingMap, unsolicited: &mpsc::UnboundedSender<Message>) {
    let key = message.correlation_key();
    let waiter = lock(pending).remove(&key);
    match waiter {
        Some(tx) => {
            trace!(key, "resolving pending request");
            if let Err(message) = tx.send(message) {
                // The waiter gave up (timeout/cancel) between removal and
                // delivery; a late response is unsolicited traffic
                let _ = unsolicited.send(message);
            }
        }
        None => {
            trace!(key, "unsolicited message");
            let _ = unsolicited.send(message);
        }
    }
}
