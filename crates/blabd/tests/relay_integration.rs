//! Integration tests for the relay as a complete system.
//!
//! A real server is bound on an ephemeral loopback port and driven with
//! real WebSocket clients: broadcast, echo policy, ordering, failure
//! isolation and shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use blab_protocol::{server_url, ChatMessage};
use blabd::config::ServerConfig;
use blabd::registry::{ConnectionEvent, RegistryHandle, RemovalReason};
use blabd::server::RelayServer;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for any expected frame or registry change
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Time during which a frame must NOT arrive
const QUIET_PERIOD: Duration = Duration::from_millis(300);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    url: String,
    registry: RegistryHandle,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(ServerConfig::default()).await
    }

    async fn spawn_with(config: ServerConfig) -> Self {
        let config = ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            ..config
        };
        let cancel_token = CancellationToken::new();
        let server = RelayServer::start(config, cancel_token.clone())
            .await
            .expect("start relay");

        let addr = server.local_addr();
        let registry = server.registry().clone();
        let task = tokio::spawn(async move {
            server.run().await.expect("server run");
        });

        TestServer {
            url: server_url(&addr.ip().to_string(), addr.port()),
            registry,
            cancel_token,
            task,
        }
    }

    async fn connect(&self) -> Client {
        let (ws, _) = connect_async(&self.url).await.expect("connect to relay");
        ws
    }

    /// Connects `n` clients and waits until all of them are registered.
    async fn connect_many(&self, n: usize) -> Vec<Client> {
        let mut clients = Vec::with_capacity(n);
        for _ in 0..n {
            clients.push(self.connect().await);
        }
        self.wait_for_members(n).await;
        clients
    }

    async fn wait_for_members(&self, expected: usize) {
        let start = tokio::time::Instant::now();
        while start.elapsed() < RECV_TIMEOUT {
            if self.registry.len().await == expected {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
        assert_eq!(self.registry.len().await, expected, "registry size");
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("server stops")
            .expect("server task");
    }
}

async fn send_text(client: &mut Client, text: &str) {
    client.send(Message::text(text)).await.expect("send");
}

/// Next text frame, skipping control frames.
async fn recv_text(client: &mut Client) -> String {
    loop {
        let frame = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid frame");
        match frame {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Close(_) => panic!("connection closed while waiting for a frame"),
            _ => continue,
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let result = timeout(QUIET_PERIOD, client.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_broadcast_reaches_every_peer() {
    let server = TestServer::spawn().await;
    let mut clients = server.connect_many(3).await;

    send_text(&mut clients[0], "hello").await;

    // With echo on, the sender gets its own message too, exactly once
    for client in &mut clients {
        assert_eq!(recv_text(client).await, "hello");
    }
    for client in &mut clients {
        assert_silent(client).await;
    }
    assert_eq!(server.registry.len().await, 3);

    server.shutdown().await;
}

#[tokio::test]
async fn test_echo_disabled_skips_sender() {
    let server = TestServer::spawn_with(ServerConfig {
        echo_to_sender: false,
        ..Default::default()
    })
    .await;
    let mut clients = server.connect_many(2).await;

    send_text(&mut clients[0], "only for you").await;

    assert_eq!(recv_text(&mut clients[1]).await, "only for you");
    assert_silent(&mut clients[0]).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_binary_frames_relayed_as_binary() {
    let server = TestServer::spawn().await;
    let mut clients = server.connect_many(2).await;

    clients[0]
        .send(Message::binary(vec![0u8, 159, 146, 150]))
        .await
        .unwrap();

    let frame = timeout(RECV_TIMEOUT, clients[1].next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame, Message::binary(vec![0u8, 159, 146, 150]));

    server.shutdown().await;
}

#[tokio::test]
async fn test_chat_message_passes_through_unchanged() {
    let server = TestServer::spawn().await;
    let mut clients = server.connect_many(2).await;

    let message = ChatMessage::new("alice", "hi bob");
    send_text(&mut clients[0], &message.to_json().unwrap()).await;

    let received = recv_text(&mut clients[1]).await;
    assert_eq!(ChatMessage::from_json(&received).unwrap(), message);

    server.shutdown().await;
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_single_sender_order_preserved() {
    let server = TestServer::spawn().await;
    let mut clients = server.connect_many(2).await;

    for i in 0..50 {
        send_text(&mut clients[0], &format!("m{i}")).await;
    }

    for i in 0..50 {
        assert_eq!(recv_text(&mut clients[1]).await, format!("m{i}"));
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_all_peers_observe_same_order() {
    let server = TestServer::spawn().await;
    let mut clients = server.connect_many(3).await;

    // Two senders interleave freely; every peer must agree on the result
    let (first, rest) = clients.split_at_mut(1);
    let sender_a = &mut first[0];
    let sender_b = &mut rest[0];
    for i in 0..20 {
        send_text(sender_a, &format!("a{i}")).await;
        send_text(sender_b, &format!("b{i}")).await;
    }

    let mut orders = Vec::new();
    for client in &mut clients {
        let mut seen = Vec::new();
        for _ in 0..40 {
            seen.push(recv_text(client).await);
        }
        orders.push(seen);
    }

    assert_eq!(orders[0], orders[1]);
    assert_eq!(orders[1], orders[2]);

    // Each sender's own messages stay in send order
    let a_only: Vec<_> = orders[0].iter().filter(|m| m.starts_with('a')).cloned().collect();
    let expected: Vec<_> = (0..20).map(|i| format!("a{i}")).collect();
    assert_eq!(a_only, expected);

    server.shutdown().await;
}

// ============================================================================
// Membership
// ============================================================================

#[tokio::test]
async fn test_disconnected_peer_is_skipped() {
    let server = TestServer::spawn().await;
    let mut clients = server.connect_many(3).await;

    // B goes away without a close handshake
    let b = clients.remove(1);
    drop(b);
    server.wait_for_members(2).await;

    send_text(&mut clients[1], "ping").await;
    assert_eq!(recv_text(&mut clients[0]).await, "ping");
    assert_eq!(recv_text(&mut clients[1]).await, "ping");

    server.shutdown().await;
}

#[tokio::test]
async fn test_close_handshake_unregisters() {
    let server = TestServer::spawn().await;
    let mut clients = server.connect_many(2).await;

    clients[0].close(None).await.unwrap();
    server.wait_for_members(1).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_connection_events() {
    let server = TestServer::spawn().await;
    let mut events = server.registry.subscribe();

    let mut client = server.connect().await;
    let event = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
    let id = match event {
        ConnectionEvent::Registered { id } => id,
        other => panic!("expected Registered, got {other:?}"),
    };

    client.close(None).await.unwrap();
    let event = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        ConnectionEvent::Unregistered {
            id,
            reason: RemovalReason::Disconnected
        }
    );

    server.shutdown().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let server = TestServer::spawn().await;
    let mut clients = server.connect_many(3).await;
    let registry = server.registry.clone();

    server.shutdown().await;

    for client in &mut clients {
        // Close frame, then end of stream (or a reset); never a data frame
        loop {
            match timeout(RECV_TIMEOUT, client.next()).await.unwrap() {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => panic!("unexpected frame after shutdown: {other:?}"),
            }
        }
    }

    assert!(registry.is_empty().await);
}
