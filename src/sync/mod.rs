//! Clipboard synchronization loop
//!
//! Polls the local clipboard, forwards changes to the peer and applies
//! content the peer sends. Each node remembers the identity hash of the
//! last content it observed or applied, which is what keeps a change from
//! bouncing back and forth between the two devices.

pub mod guard;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use guard::{ApplyGuard, EchoSuppressor};

use crate::clipboard::{ClipboardContent, ClipboardProvider};
use crate::transport::{self, ConnectionManager, ConnectionStatus, SendOutcome, SessionEvent};

/// Default clipboard polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Where detected local changes go
#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn submit(&self, content: &ClipboardContent) -> transport::Result<SendOutcome>;
}

#[async_trait]
impl ContentSink for ConnectionManager {
    async fn submit(&self, content: &ClipboardContent) -> transport::Result<SendOutcome> {
        self.send(content).await
    }
}

/// What one poll of the local clipboard did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Sync is switched off
    Disabled,
    /// A remote apply is in progress
    Suppressed,
    /// The clipboard could not be read this tick
    ClipboardUnavailable,
    /// Nothing usable on the clipboard
    Empty,
    /// Same content as last observed
    Unchanged,
    /// New content recorded, no peer to send it to
    Recorded,
    /// New content handed to the peer
    Sent(SendOutcome),
    /// New content recorded but the send failed
    SendFailed,
}

/// What applying remote content did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Empty content, ignored
    Invalid,
    /// Image identical to the last one applied
    DuplicateImage,
    /// Writing to the clipboard failed
    Failed,
}

/// Bidirectional sync between the local clipboard and one peer
pub struct SyncLoop {
    clipboard: Arc<dyn ClipboardProvider>,
    sink: Arc<dyn ContentSink>,
    poll_interval: Duration,
    suppressor: EchoSuppressor,
    last_observed_hash: Mutex<Option<String>>,
    last_applied_image_hash: Mutex<Option<String>>,
    peer_connected: AtomicBool,
    enabled: AtomicBool,
}

impl SyncLoop {
    pub fn new(
        clipboard: Arc<dyn ClipboardProvider>,
        sink: Arc<dyn ContentSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            clipboard,
            sink,
            poll_interval,
            suppressor: EchoSuppressor::new(),
            last_observed_hash: Mutex::new(None),
            last_applied_image_hash: Mutex::new(None),
            peer_connected: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Switch forwarding of local changes on or off. Remote content is
    /// applied either way.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_peer_connected(&self) -> bool {
        self.peer_connected.load(Ordering::SeqCst)
    }

    pub fn suppressor(&self) -> &EchoSuppressor {
        &self.suppressor
    }

    /// Identity hash of the content last observed or applied
    pub async fn last_observed_hash(&self) -> Option<String> {
        self.last_observed_hash.lock().await.clone()
    }

    /// Record what is on the clipboard right now without sending it
    pub async fn prime(&self) {
        match self.clipboard.read_current().await {
            Ok(Some(content)) if content.validate() => {
                *self.last_observed_hash.lock().await = Some(content.identity_hash());
                debug!("Initial clipboard: {}", content.describe());
            }
            Ok(_) => {}
            Err(e) => debug!("Initial clipboard read failed: {}", e),
        }
    }

    /// Check the local clipboard once and forward a change to the peer.
    ///
    /// The observed hash is updated before sending, so content that fails
    /// to send is not retried on the next tick.
    pub async fn poll_once(&self) -> TickOutcome {
        if !self.enabled.load(Ordering::SeqCst) {
            return TickOutcome::Disabled;
        }
        if self.suppressor.is_active() {
            return TickOutcome::Suppressed;
        }

        let content = {
            // Held across the read so an apply cannot land between reading
            // and recording.
            let mut last_observed = self.last_observed_hash.lock().await;
            if self.suppressor.is_active() {
                return TickOutcome::Suppressed;
            }

            let content = match self.clipboard.read_current().await {
                Ok(Some(content)) if content.validate() => content,
                Ok(_) => return TickOutcome::Empty,
                Err(e) => {
                    warn!("Failed to read clipboard: {}", e);
                    return TickOutcome::ClipboardUnavailable;
                }
            };

            let hash = content.identity_hash();
            if last_observed.as_deref() == Some(hash.as_str()) {
                return TickOutcome::Unchanged;
            }
            *last_observed = Some(hash);
            content
        };

        debug!("Local clipboard changed: {}", content.describe());
        if !self.is_peer_connected() {
            return TickOutcome::Recorded;
        }

        match self.sink.submit(&content).await {
            Ok(outcome) => {
                if let SendOutcome::Sent { bytes } = outcome {
                    info!("Sent {} ({} bytes)", content.describe(), bytes);
                }
                TickOutcome::Sent(outcome)
            }
            Err(e) => {
                warn!("Failed to send clipboard content: {}", e);
                TickOutcome::SendFailed
            }
        }
    }

    /// Write content received from the peer to the local clipboard
    pub async fn apply_remote(&self, content: &ClipboardContent) -> ApplyOutcome {
        if !content.validate() {
            warn!("Ignoring empty {} content from peer", content.kind());
            return ApplyOutcome::Invalid;
        }

        let hash = content.identity_hash();
        let _guard = self.suppressor.engage();
        let mut last_observed = self.last_observed_hash.lock().await;
        let mut last_image = self.last_applied_image_hash.lock().await;

        if content.is_image() && last_image.as_deref() == Some(hash.as_str()) {
            debug!("Image already applied, skipping");
            return ApplyOutcome::DuplicateImage;
        }

        match self.clipboard.write(content).await {
            Ok(()) => {
                if content.is_image() {
                    *last_image = Some(hash.clone());
                }
                *last_observed = Some(hash);
                info!("Applied remote {}", content.describe());
                ApplyOutcome::Applied
            }
            Err(e) => {
                warn!("Failed to apply remote clipboard content: {}", e);
                ApplyOutcome::Failed
            }
        }
    }

    /// React to one session event
    pub async fn handle_event(&self, event: SessionEvent) -> Option<ApplyOutcome> {
        match event {
            SessionEvent::Status(status) => {
                let connected = matches!(status, ConnectionStatus::Connected { .. });
                self.peer_connected.store(connected, Ordering::SeqCst);
                debug!("Peer status: {}", status);
                None
            }
            SessionEvent::DataReceived(content) => Some(self.apply_remote(&content).await),
        }
    }

    /// Run until `shutdown` fires or the event channel closes
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<SessionEvent>,
        shutdown: CancellationToken,
    ) {
        info!(
            "Starting clipboard sync on the {} clipboard (polling every {} ms)",
            self.clipboard.name(),
            self.poll_interval.as_millis()
        );
        self.prime().await;

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Sync loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        self.handle_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Sync loop missed {} session events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Session event channel closed");
                        break;
                    }
                },
            }
        }
    }
}
