//! In-process transport
//!
//! A [`MemoryNetwork`] is a registry of listeners keyed by address and
//! service id. Dialing a registered address hands both ends of a
//! `tokio::io::duplex` pipe out, so two managers in one process behave like
//! two devices.

use super::{Connected, Listener, Result, ServiceId, Transport, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Buffer size of each in-memory pipe
const PIPE_BUFFER_SIZE: usize = 64 * 1024;

type Key = (String, ServiceId);

struct Registration {
    name: String,
    incoming: mpsc::Sender<Connected>,
}

/// Shared registry of in-memory endpoints
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    listeners: Arc<Mutex<HashMap<Key, Registration>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint reachable at `address`, presenting itself as `name`
    pub fn endpoint(&self, address: impl Into<String>, name: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            address: address.into(),
            name: name.into(),
        }
    }

    /// Whether someone listens at `address` for `service_id`
    pub fn is_listening(&self, address: &str, service_id: ServiceId) -> bool {
        self.registry()
            .contains_key(&(address.to_string(), service_id))
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Key, Registration>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One device on a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    address: String,
    name: String,
}

impl MemoryTransport {
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, service_id: ServiceId) -> Result<Box<dyn Listener>> {
        let key = (self.address.clone(), service_id);
        let (incoming_tx, incoming_rx) = mpsc::channel(4);

        let mut registry = self.network.registry();
        if registry.contains_key(&key) {
            return Err(TransportError::connection(format!(
                "{} is already listening for {}",
                self.address, service_id
            )));
        }
        registry.insert(
            key.clone(),
            Registration {
                name: self.name.clone(),
                incoming: incoming_tx,
            },
        );
        debug!("Registered in-memory listener at {}", self.address);

        Ok(Box::new(MemoryListener {
            network: self.network.clone(),
            key,
            incoming: incoming_rx,
        }))
    }

    async fn dial(&self, address: &str, service_id: ServiceId) -> Result<Connected> {
        let (incoming, listener_name) = self
            .network
            .registry()
            .get(&(address.to_string(), service_id))
            .map(|r| (r.incoming.clone(), r.name.clone()))
            .ok_or_else(|| {
                TransportError::connection(format!(
                    "no device at {} offers service {}",
                    address, service_id
                ))
            })?;

        let (local, remote) = tokio::io::duplex(PIPE_BUFFER_SIZE);
        incoming
            .send(Connected {
                stream: Box::new(remote),
                peer_name: self.name.clone(),
            })
            .await
            .map_err(|_| TransportError::connection(format!("listener at {} went away", address)))?;

        Ok(Connected {
            stream: Box::new(local),
            peer_name: listener_name,
        })
    }
}

struct MemoryListener {
    network: MemoryNetwork,
    key: Key,
    incoming: mpsc::Receiver<Connected>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> Result<Connected> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| TransportError::connection("listener closed"))
    }

    fn local_address(&self) -> String {
        self.key.0.clone()
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.registry().remove(&self.key);
    }
}
