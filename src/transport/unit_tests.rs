//! Tests for the transport layer
//!
//! Sessions run over the in-memory network so both roles and raw peers
//! sending hand-made frames can be driven from one process.

use super::*;
use crate::clipboard::ClipboardContent;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const LISTENER_ADDR: &str = "00:11:22:33:44:55";

async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event channel closed")
}

async fn next_status(events: &mut broadcast::Receiver<SessionEvent>) -> ConnectionStatus {
    loop {
        if let SessionEvent::Status(status) = next_event(events).await {
            return status;
        }
    }
}

async fn next_data(events: &mut broadcast::Receiver<SessionEvent>) -> ClipboardContent {
    loop {
        if let SessionEvent::DataReceived(content) = next_event(events).await {
            return content;
        }
    }
}

/// Events already queued, without waiting for more
fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn drain_progress(updates: &mut broadcast::Receiver<ProgressUpdate>) -> Vec<ProgressUpdate> {
    let mut drained = Vec::new();
    loop {
        match updates.try_recv() {
            Ok(update) => drained.push(update),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return drained,
        }
    }
}

fn framed(content: &ClipboardContent) -> Vec<u8> {
    let payload = encode_payload(content).unwrap();
    let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
    frame.extend_from_slice(&payload);
    frame
}

struct RunningListener {
    manager: ConnectionManager,
    events: broadcast::Receiver<SessionEvent>,
    task: JoinHandle<Result<()>>,
}

async fn start_listener(network: &MemoryNetwork) -> RunningListener {
    let manager = ConnectionManager::new(
        Role::Listener,
        Arc::new(network.endpoint(LISTENER_ADDR, "desk")),
        TransportConfig::default(),
    );
    let mut events = manager.subscribe();
    let task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.start_listening().await }
    });
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Listening);
    RunningListener {
        manager,
        events,
        task,
    }
}

fn initiator(network: &MemoryNetwork) -> ConnectionManager {
    ConnectionManager::new(
        Role::Initiator,
        Arc::new(network.endpoint("66:77:88:99:AA:BB", "laptop")),
        TransportConfig::default(),
    )
}

async fn raw_peer(network: &MemoryNetwork, name: &str) -> Connected {
    network
        .endpoint(format!("raw-{}", name), name)
        .dial(LISTENER_ADDR, DEFAULT_SERVICE_ID)
        .await
        .unwrap()
}

#[cfg(test)]
mod session_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_connect_and_exchange_text() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;
        let initiator = initiator(&network);
        let mut initiator_events = initiator.subscribe();

        let peer = initiator.connect(LISTENER_ADDR).await?;
        assert_eq!(peer, "desk");
        assert_eq!(next_status(&mut initiator_events).await, ConnectionStatus::Connecting);
        assert_eq!(
            next_status(&mut initiator_events).await,
            ConnectionStatus::Connected {
                peer_name: "desk".to_string()
            }
        );
        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Connected {
                peer_name: "laptop".to_string()
            }
        );

        let outcome = initiator.send(&ClipboardContent::text("hello")).await?;
        assert!(matches!(outcome, SendOutcome::Sent { .. }));
        assert_eq!(
            next_data(&mut listener.events).await,
            ClipboardContent::text("hello")
        );

        listener.manager.send(&ClipboardContent::text("back")).await?;
        assert_eq!(
            next_data(&mut initiator_events).await,
            ClipboardContent::text("back")
        );

        assert!(initiator.is_connected());
        assert!(listener.manager.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_role_is_a_configuration_error() {
        let network = MemoryNetwork::new();
        let listener = ConnectionManager::new(
            Role::Listener,
            Arc::new(network.endpoint(LISTENER_ADDR, "desk")),
            TransportConfig::default(),
        );
        let initiator = initiator(&network);

        assert!(matches!(
            listener.connect("anything").await,
            Err(TransportError::Configuration { .. })
        ));
        assert!(matches!(
            initiator.start_listening().await,
            Err(TransportError::Configuration { .. })
        ));
        assert_eq!(listener.state(), ConnectionState::Idle);
        assert_eq!(initiator.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_failed_connect_returns_to_idle() {
        let network = MemoryNetwork::new();
        let initiator = initiator(&network);
        let mut events = initiator.subscribe();

        let result = initiator.connect("DE:AD:BE:EF:00:00").await;
        assert!(matches!(result, Err(TransportError::Connection { .. })));
        assert_eq!(initiator.state(), ConnectionState::Idle);
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_rejected() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let _listener = start_listener(&network).await;
        let initiator = initiator(&network);

        initiator.connect(LISTENER_ADDR).await?;
        assert!(matches!(
            initiator.connect(LISTENER_ADDR).await,
            Err(TransportError::Configuration { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_new_peer_replaces_current_session() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;

        let mut first = raw_peer(&network, "first").await;
        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Connected {
                peer_name: "first".to_string()
            }
        );

        let mut second = raw_peer(&network, "second").await;
        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Connected {
                peer_name: "second".to_string()
            }
        );

        // The replaced stream is released
        let mut buf = [0u8; 1];
        assert_eq!(timeout(WAIT, first.stream.read(&mut buf)).await??, 0);

        second
            .stream
            .write_all(&framed(&ClipboardContent::text("from second")))
            .await?;
        assert_eq!(
            next_data(&mut listener.events).await,
            ClipboardContent::text("from second")
        );
        Ok(())
    }
}

#[cfg(test)]
mod receive_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_zero_length_frame_is_dropped() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;
        let mut peer = raw_peer(&network, "raw").await;
        next_status(&mut listener.events).await;

        peer.stream.write_all(&0u32.to_le_bytes()).await?;
        peer.stream
            .write_all(&framed(&ClipboardContent::text("still here")))
            .await?;

        assert_eq!(
            next_data(&mut listener.events).await,
            ClipboardContent::text("still here")
        );
        assert!(listener.manager.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_and_empty_frames_are_dropped() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;
        let mut peer = raw_peer(&network, "raw").await;
        next_status(&mut listener.events).await;

        for payload in [&b"\x00{not json"[..], &b"\x00{\"type\":0,\"text\":\"\"}"[..]] {
            let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
            frame.extend_from_slice(payload);
            peer.stream.write_all(&frame).await?;
        }
        peer.stream
            .write_all(&framed(&ClipboardContent::text("valid")))
            .await?;

        assert_eq!(
            next_data(&mut listener.events).await,
            ClipboardContent::text("valid")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_closed_inside_frame_ends_session() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;
        let mut peer = raw_peer(&network, "raw").await;
        next_status(&mut listener.events).await;

        peer.stream.write_all(&100u32.to_le_bytes()).await?;
        peer.stream.write_all(b"\x00{\"type\"").await?;
        drop(peer);

        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Listening
        );
        assert!(drain(&mut listener.events)
            .iter()
            .all(|e| !matches!(e, SessionEvent::DataReceived(_))));
        assert_eq!(listener.manager.state(), ConnectionState::Listening);

        // Still accepting
        let _again = raw_peer(&network, "again").await;
        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Connected {
                peer_name: "again".to_string()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_session() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;
        let mut peer = raw_peer(&network, "raw").await;
        next_status(&mut listener.events).await;

        peer.stream.write_all(&u32::MAX.to_le_bytes()).await?;
        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Disconnected
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_initiator_sees_link_loss() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let listener = start_listener(&network).await;
        let initiator = initiator(&network);
        initiator.connect(LISTENER_ADDR).await?;
        let mut events = initiator.subscribe();

        listener.manager.disconnect().await;

        assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
        assert_eq!(initiator.state(), ConnectionState::Disconnected);
        assert!(matches!(
            initiator.send(&ClipboardContent::text("late")).await,
            Err(TransportError::NotConnected)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_image_transfer_reports_progress() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;
        let mut inbound_progress = listener.manager.subscribe_progress();
        let initiator = initiator(&network);
        let mut outbound_progress = initiator.subscribe_progress();
        initiator.connect(LISTENER_ADDR).await?;

        let image = ClipboardContent::image(vec![42u8; 200 * 1024]);
        initiator.send(&image).await?;

        let received = next_data(&mut listener.events).await;
        assert_eq!(received.identity_hash(), image.identity_hash());

        let inbound = drain_progress(&mut inbound_progress);
        assert!(inbound.len() > 1);
        assert!(inbound.iter().all(|p| p.direction == Direction::Inbound));
        assert!(inbound.last().unwrap().is_complete());

        let outbound = drain_progress(&mut outbound_progress);
        assert!(outbound.iter().all(|p| p.direction == Direction::Outbound));
        assert!(outbound.last().unwrap().is_complete());
        Ok(())
    }

    #[tokio::test]
    async fn test_progress_burst_keeps_received_content() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;
        let initiator = initiator(&network);
        initiator.connect(LISTENER_ADDR).await?;

        // Far more chunks than any channel buffers, nobody reading events
        let image = ClipboardContent::image(vec![7u8; 20 * 1024 * 1024]);
        initiator.send(&image).await?;
        initiator.send(&ClipboardContent::text("after image")).await?;

        assert_eq!(next_data(&mut listener.events).await, image);
        assert_eq!(
            next_data(&mut listener.events).await,
            ClipboardContent::text("after image")
        );
        Ok(())
    }
}

#[cfg(test)]
mod send_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_session() {
        let network = MemoryNetwork::new();
        let initiator = initiator(&network);
        assert!(matches!(
            initiator.send(&ClipboardContent::text("hi")).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_invalid_and_unsupported_content() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let _listener = start_listener(&network).await;
        let initiator = initiator(&network);
        initiator.connect(LISTENER_ADDR).await?;

        assert!(matches!(
            initiator.send(&ClipboardContent::text("")).await,
            Err(TransportError::InvalidContent { .. })
        ));
        assert!(matches!(
            initiator.send(&ClipboardContent::image(Vec::new())).await,
            Err(TransportError::InvalidContent { .. })
        ));
        assert_eq!(
            initiator
                .send(&ClipboardContent::file_list(["/tmp/a"]))
                .await?,
            SendOutcome::Unsupported
        );
        assert!(initiator.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_image_is_sent_once() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;
        let initiator = initiator(&network);
        initiator.connect(LISTENER_ADDR).await?;

        let first = ClipboardContent::image(vec![1u8; 1024]);
        let second = ClipboardContent::image(vec![2u8; 1024]);

        assert!(matches!(initiator.send(&first).await?, SendOutcome::Sent { .. }));
        assert_eq!(initiator.send(&first).await?, SendOutcome::DuplicateImage);
        assert!(matches!(initiator.send(&second).await?, SendOutcome::Sent { .. }));
        // Only the most recent image is remembered
        assert!(matches!(initiator.send(&first).await?, SendOutcome::Sent { .. }));

        // Text is never deduplicated
        initiator.send(&ClipboardContent::text("x")).await?;
        assert!(matches!(
            initiator.send(&ClipboardContent::text("x")).await?,
            SendOutcome::Sent { .. }
        ));

        let mut received = Vec::new();
        while received.len() < 5 {
            received.push(next_data(&mut listener.events).await);
        }
        assert_eq!(received[0].identity_hash(), first.identity_hash());
        assert_eq!(received[1].identity_hash(), second.identity_hash());
        assert_eq!(received[2].identity_hash(), first.identity_hash());
        Ok(())
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_disconnect_is_idempotent() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let _listener = start_listener(&network).await;
        let initiator = initiator(&network);
        initiator.connect(LISTENER_ADDR).await?;
        let mut events = initiator.subscribe();

        initiator.disconnect().await;
        initiator.disconnect().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let disconnects = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Status(ConnectionStatus::Disconnected)))
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(initiator.state(), ConnectionState::Disconnected);
        Ok(())
    }

    #[tokio::test]
    async fn test_disconnect_stops_listening() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;

        listener.manager.disconnect().await;
        timeout(WAIT, listener.task).await???;

        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Disconnected
        );
        assert!(!network.is_listening(LISTENER_ADDR, DEFAULT_SERVICE_ID));
        Ok(())
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let mut listener = start_listener(&network).await;
        let initiator = initiator(&network);

        initiator.connect(LISTENER_ADDR).await?;
        next_status(&mut listener.events).await;
        initiator.disconnect().await;

        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            next_status(&mut listener.events).await,
            ConnectionStatus::Listening
        );

        initiator.connect(LISTENER_ADDR).await?;
        initiator.send(&ClipboardContent::text("again")).await?;
        assert_eq!(
            next_data(&mut listener.events).await,
            ClipboardContent::text("again")
        );
        Ok(())
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Listening.to_string(), "listening");
        assert_eq!(
            ConnectionStatus::Connected {
                peer_name: "desk".to_string()
            }
            .to_string(),
            "connected: desk"
        );
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(Role::Initiator.to_string(), "initiator");
    }
}
