//! TCP transport
//!
//! Stands in for an RFCOMM socket when both devices share an IP network.
//! TCP has no service lookup of its own, so the dialer opens with the 16
//! service-id bytes and the listener echoes them back once it has checked
//! them. A mismatch on either side drops the link before any frame flows.

use super::{Connected, Listener, Result, ServiceId, Transport, TransportError};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Time a freshly accepted socket has to present its service id
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a transient accept error before accepting again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TCP transport
#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_addr: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport listening on `bind_addr` when asked to listen
    pub fn new(bind_addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    #[instrument(skip(self))]
    async fn listen(&self, service_id: ServiceId) -> Result<Box<dyn Listener>> {
        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            TransportError::connection(format!("cannot bind {}: {}", self.bind_addr, e))
        })?;
        info!("TCP listener bound to {}", listener.local_addr()?);
        Ok(Box::new(TcpServiceListener {
            listener,
            service_id,
        }))
    }

    #[instrument(skip(self))]
    async fn dial(&self, address: &str, service_id: ServiceId) -> Result<Connected> {
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::connection(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        stream.write_all(service_id.as_bytes()).await?;
        let echoed = timeout(HANDSHAKE_TIMEOUT, read_service_id(&mut stream))
            .await
            .map_err(|_| TransportError::Timeout)??;
        if echoed != service_id {
            return Err(TransportError::connection(format!(
                "{} does not offer service {}",
                address, service_id
            )));
        }

        debug!("Service {} confirmed by {}", service_id, address);
        Ok(Connected {
            stream: Box::new(stream),
            peer_name: address.to_string(),
        })
    }
}

struct TcpServiceListener {
    listener: TcpListener,
    service_id: ServiceId,
}

#[async_trait]
impl Listener for TcpServiceListener {
    async fn accept(&mut self) -> Result<Connected> {
        loop {
            let (mut stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) if is_transient_accept_error(&e) => {
                    warn!("Accept failed, still listening: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }

            match timeout(HANDSHAKE_TIMEOUT, read_service_id(&mut stream)).await {
                Ok(Ok(id)) if id == self.service_id => {
                    if let Err(e) = stream.write_all(id.as_bytes()).await {
                        warn!("Handshake with {} failed: {}", addr, e);
                        continue;
                    }
                    return Ok(Connected {
                        stream: Box::new(stream),
                        peer_name: addr.to_string(),
                    });
                }
                Ok(Ok(other)) => warn!("Rejecting {}: asked for service {}", addr, other),
                Ok(Err(e)) => warn!("Handshake with {} failed: {}", addr, e),
                Err(_) => warn!("Handshake with {} timed out", addr),
            }
        }
    }

    fn local_address(&self) -> String {
        self.listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

/// Errors that concern a single incoming connection or a momentary
/// resource shortage, not the listening socket itself
fn is_transient_accept_error(e: &io::Error) -> bool {
    // EMFILE and ENFILE have no stable ErrorKind
    const ENFILE: i32 = 23;
    const EMFILE: i32 = 24;

    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    ) || (cfg!(unix) && matches!(e.raw_os_error(), Some(ENFILE | EMFILE)))
}

async fn read_service_id(stream: &mut TcpStream) -> Result<ServiceId> {
    let mut bytes = [0u8; 16];
    stream.read_exact(&mut bytes).await?;
    Ok(ServiceId::from_bytes(bytes))
}
