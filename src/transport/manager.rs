//! Connection lifecycle management
//!
//! A [`ConnectionManager`] owns at most one session at a time. In the
//! listener role it keeps accepting peers and lets a newer peer replace the
//! current one; in the initiator role it dials once per `connect()` call.
//! Status changes and received content are published as [`SessionEvent`]s;
//! transfer progress goes out on a separate channel so a burst of chunk
//! updates can never push received content out of a lagging subscriber.

use super::stream::{FrameReader, FrameWriter, ProgressUpdate};
use super::{
    BoxedStream, Connected, ConnectionState, Result, ServiceId, Transport, TransportConfig,
    TransportError,
};
use crate::clipboard::ClipboardContent;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Buffered session events per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Buffered progress updates per subscriber
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Which side of the link this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Advertises the service and waits for peers
    Listener,
    /// Dials a chosen peer
    Initiator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Listener => write!(f, "listener"),
            Role::Initiator => write!(f, "initiator"),
        }
    }
}

/// Status notifications for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Listening,
    Connected { peer_name: String },
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Listening => write!(f, "listening"),
            ConnectionStatus::Connected { peer_name } => write!(f, "connected: {}", peer_name),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// What a session reports to its observers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Status(ConnectionStatus),
    DataReceived(ClipboardContent),
}

/// Result of a successful `send()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame written, payload size in bytes
    Sent { bytes: usize },
    /// Image identical to the previous one sent, nothing written
    DuplicateImage,
    /// Content type is never transmitted
    Unsupported,
}

type SessionId = Uuid;

struct SessionHandle {
    id: SessionId,
    peer_name: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct SessionWriter {
    id: SessionId,
    cancel: CancellationToken,
    writer: FrameWriter<WriteHalf<BoxedStream>>,
}

struct Shared {
    role: Role,
    transport: Arc<dyn Transport>,
    config: TransportConfig,
    state: Mutex<ConnectionState>,
    shutdown: Mutex<CancellationToken>,
    session: tokio::sync::Mutex<Option<SessionHandle>>,
    writer: tokio::sync::Mutex<Option<SessionWriter>>,
    last_sent_image_hash: tokio::sync::Mutex<Option<String>>,
    events: broadcast::Sender<SessionEvent>,
    progress: broadcast::Sender<ProgressUpdate>,
}

/// Owns the link to the peer and the session running over it
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager for `role` on top of `transport`
    pub fn new(role: Role, transport: Arc<dyn Transport>, config: TransportConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                role,
                transport,
                config,
                state: Mutex::new(ConnectionState::Idle),
                shutdown: Mutex::new(CancellationToken::new()),
                session: tokio::sync::Mutex::new(None),
                writer: tokio::sync::Mutex::new(None),
                last_sent_image_hash: tokio::sync::Mutex::new(None),
                events,
                progress,
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn service_id(&self) -> ServiceId {
        self.shared.config.service_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to session events. Only events published after this call
    /// are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Subscribe to image transfer progress, both directions. Updates are
    /// best-effort: a slow subscriber skips some.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.shared.progress.subscribe()
    }

    /// Advertise the service and accept peers until `disconnect()`.
    ///
    /// A peer connecting while a session is active replaces it: the old
    /// session is torn down and reported disconnected before the new one
    /// starts. Returns `Ok(())` once disconnected.
    #[instrument(skip(self), fields(service_id = %self.shared.config.service_id))]
    pub async fn start_listening(&self) -> Result<()> {
        if self.shared.role != Role::Listener {
            return Err(TransportError::configuration(
                "start_listening requires the listener role",
            ));
        }
        let shutdown = self.begin(ConnectionState::Listening)?;

        let mut listener = match self.shared.transport.listen(self.shared.config.service_id).await
        {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to start listening: {}", e);
                self.set_state(ConnectionState::Idle);
                return Err(e);
            }
        };

        info!("Listening on {}", listener.local_address());
        self.emit(SessionEvent::Status(ConnectionStatus::Listening));

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Listener stopped");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok(connected) => {
                    info!("Peer connected: {}", connected.peer_name);
                    self.replace_session(connected, &shutdown).await;
                }
                Err(e) => {
                    error!("Accept failed: {}", e);
                    self.stop_sessions().await;
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(SessionEvent::Status(ConnectionStatus::Disconnected));
                    return Err(e);
                }
            }
        }
    }

    /// Dial the peer at `address` and start a session.
    ///
    /// Returns the peer's display name. On failure the manager goes back to
    /// idle and a disconnected status is published.
    #[instrument(skip(self))]
    pub async fn connect(&self, address: &str) -> Result<String> {
        if self.shared.role != Role::Initiator {
            return Err(TransportError::configuration(
                "connect requires the initiator role",
            ));
        }
        let shutdown = self.begin(ConnectionState::Connecting)?;
        self.emit(SessionEvent::Status(ConnectionStatus::Connecting));
        info!("Connecting to {}", address);

        let dialed = tokio::select! {
            _ = shutdown.cancelled() => Err(TransportError::Cancelled),
            dialed = self.shared.transport.dial(address, self.shared.config.service_id) => dialed,
        };

        let connected = match dialed {
            Ok(connected) => connected,
            Err(TransportError::Cancelled) => {
                debug!("Connect to {} cancelled", address);
                return Err(TransportError::Cancelled);
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", address, e);
                self.transition(ConnectionState::Connecting, ConnectionState::Idle);
                self.emit(SessionEvent::Status(ConnectionStatus::Disconnected));
                return Err(match e {
                    TransportError::Connection { .. } | TransportError::Timeout => e,
                    other => TransportError::connection(other.to_string()),
                });
            }
        };

        let peer_name = connected.peer_name.clone();
        self.begin_session(connected, &shutdown).await?;
        Ok(peer_name)
    }

    /// Send content to the peer.
    ///
    /// Empty content is refused with `InvalidContent`; file lists are never
    /// transmitted; an image identical to the last one sent is skipped. A
    /// failed send leaves the connection state alone.
    #[instrument(skip(self, content), fields(kind = %content.kind()))]
    pub async fn send(&self, content: &ClipboardContent) -> Result<SendOutcome> {
        if !content.validate() {
            return Err(TransportError::InvalidContent {
                kind: content.kind().to_string(),
            });
        }
        if let ClipboardContent::FileList { paths } = content {
            info!(
                "File transfer is not supported, not sending {} path(s)",
                paths.len()
            );
            return Ok(SendOutcome::Unsupported);
        }

        let mut slot = self.shared.writer.lock().await;
        let session = slot.as_mut().ok_or(TransportError::NotConnected)?;

        let image_hash = if content.is_image() {
            let hash = content.identity_hash();
            if self.shared.last_sent_image_hash.lock().await.as_deref() == Some(hash.as_str()) {
                debug!("Image unchanged since last send, skipping");
                return Ok(SendOutcome::DuplicateImage);
            }
            info!("Sending image ({:.2} KB)", content.size() as f64 / 1024.0);
            Some(hash)
        } else {
            None
        };

        let progress = self.shared.progress.clone();
        let cancel = session.cancel.clone();
        let bytes = tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            written = session.writer.write_content(content, |update| {
                let _ = progress.send(update);
            }) => written,
        }?;

        if let Some(hash) = image_hash {
            *self.shared.last_sent_image_hash.lock().await = Some(hash);
        }
        debug!("Sent {} ({} bytes)", content.describe(), bytes);
        Ok(SendOutcome::Sent { bytes })
    }

    /// Tear down the session and stop listening or dialing.
    ///
    /// Idempotent: a disconnected status is published only when the state
    /// actually changes.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        if self.state() == ConnectionState::Disconnected {
            debug!("Already disconnected");
            return;
        }

        let previous_token = std::mem::replace(&mut *lock(&self.shared.shutdown), CancellationToken::new());
        previous_token.cancel();
        self.stop_sessions().await;

        let previous = self.set_state(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!("Disconnected");
            self.emit(SessionEvent::Status(ConnectionStatus::Disconnected));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.shared.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *lock(&self.shared.state), state)
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = lock(&self.shared.state);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Claim the manager for a listen or connect run
    fn begin(&self, target: ConnectionState) -> Result<CancellationToken> {
        let mut state = lock(&self.shared.state);
        if !state.can_start() {
            return Err(TransportError::configuration(format!(
                "cannot start {} while {:?}",
                self.shared.role, *state
            )));
        }
        *state = target;
        Ok(lock(&self.shared.shutdown).clone())
    }

    async fn replace_session(&self, connected: Connected, shutdown: &CancellationToken) {
        let previous = self.shared.session.lock().await.take();
        if let Some(previous) = previous {
            info!(
                "Replacing session with {} by {}",
                previous.peer_name, connected.peer_name
            );
            previous.cancel.cancel();
            if let Err(e) = previous.task.await {
                warn!("Previous receive task ended abnormally: {}", e);
            }
            self.emit(SessionEvent::Status(ConnectionStatus::Disconnected));
        }

        if let Err(e) = self.begin_session(connected, shutdown).await {
            debug!("Dropping accepted link: {}", e);
        }
    }

    async fn begin_session(&self, connected: Connected, shutdown: &CancellationToken) -> Result<()> {
        // Holding the slot keeps a session that dies immediately from
        // finishing before it is registered.
        let mut slot = self.shared.session.lock().await;
        if shutdown.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let id = Uuid::new_v4();
        let cancel = shutdown.child_token();
        let (read_half, write_half) = tokio::io::split(connected.stream);
        let config = &self.shared.config;

        *self.shared.writer.lock().await = Some(SessionWriter {
            id,
            cancel: cancel.clone(),
            writer: FrameWriter::new(write_half, config.chunk_size, config.max_frame_size),
        });

        self.set_state(ConnectionState::Connected);
        self.emit(SessionEvent::Status(ConnectionStatus::Connected {
            peer_name: connected.peer_name.clone(),
        }));

        let reader = FrameReader::new(read_half, config.chunk_size, config.max_frame_size);
        let manager = self.clone();
        let task_cancel = cancel.clone();
        let parent = shutdown.clone();
        let task = tokio::spawn(async move {
            manager.receive_loop(id, reader, task_cancel, parent).await
        });

        *slot = Some(SessionHandle {
            id,
            peer_name: connected.peer_name,
            cancel,
            task,
        });
        Ok(())
    }

    async fn receive_loop(
        self,
        id: SessionId,
        mut reader: FrameReader<ReadHalf<BoxedStream>>,
        cancel: CancellationToken,
        shutdown: CancellationToken,
    ) {
        let progress = self.shared.progress.clone();
        let failure = loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break None,
                frame = reader.read_content(|update| {
                    let _ = progress.send(update);
                }) => frame,
            };

            match frame {
                Ok(content) => {
                    debug!("Received {}", content.describe());
                    self.emit(SessionEvent::DataReceived(content));
                }
                Err(e) if !e.is_session_fatal() => {
                    warn!("Discarding frame: {}", e);
                }
                Err(e) => break Some(e),
            }
        };

        drop(reader);
        self.finish_session(id, &cancel, &shutdown, failure).await;
    }

    /// Release a session's resources. Status is published only when the
    /// session ended on its own and was still the current one.
    ///
    /// `shutdown` is the token the session was started under. `disconnect()`
    /// swaps the shared token before cancelling the old one, so only the
    /// session's own parent tells whether the listener is stopping.
    async fn finish_session(
        &self,
        id: SessionId,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
        failure: Option<TransportError>,
    ) {
        cancel.cancel();
        self.close_writer(Some(id)).await;

        let was_current = {
            let mut slot = self.shared.session.lock().await;
            if slot.as_ref().map(|s| s.id) == Some(id) {
                *slot = None;
                true
            } else {
                false
            }
        };

        let Some(failure) = failure else {
            return;
        };
        match failure {
            TransportError::ConnectionClosed => info!("Peer closed the connection"),
            ref e => error!("Session failed: {}", e),
        }
        if !was_current {
            return;
        }

        let keep_listening = self.shared.role == Role::Listener && !shutdown.is_cancelled();
        if keep_listening {
            self.set_state(ConnectionState::Listening);
            self.emit(SessionEvent::Status(ConnectionStatus::Disconnected));
            self.emit(SessionEvent::Status(ConnectionStatus::Listening));
        } else {
            self.set_state(ConnectionState::Disconnected);
            self.emit(SessionEvent::Status(ConnectionStatus::Disconnected));
        }
    }

    /// Close the write half. `None` closes whatever writer is registered.
    async fn close_writer(&self, id: Option<SessionId>) {
        let writer = {
            let mut slot = self.shared.writer.lock().await;
            match (id, slot.as_ref()) {
                (Some(id), Some(current)) if current.id != id => None,
                _ => slot.take(),
            }
        };
        if let Some(mut writer) = writer {
            if let Err(e) = writer.writer.shutdown().await {
                debug!("Error closing stream: {}", e);
            }
        }
    }

    async fn stop_sessions(&self) {
        let session = self.shared.session.lock().await.take();
        if let Some(session) = session {
            debug!("Stopping session with {}", session.peer_name);
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                warn!("Receive task ended abnormally: {}", e);
            }
        }
        self.close_writer(None).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
