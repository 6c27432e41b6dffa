//! WebSocket connection to the relay.
//!
//! This module provides the `ChatClient` which handles:
//! - Opening one WebSocket connection to the relay
//! - Sending each composed line as a JSON `ChatMessage` text frame
//! - A reader task forwarding every received frame, in arrival order
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::fmt;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blab_protocol::ChatMessage;

use crate::error::{ClientError, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One frame received from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A frame that decoded as a chat message
    Chat(ChatMessage),

    /// Anything else, shown as (lossy) text
    Raw(String),
}

impl Incoming {
    /// Interprets a data frame. Control frames yield `None`.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::from_bytes(text.as_str().as_bytes())),
            Message::Binary(data) => Some(Self::from_bytes(&data)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
        }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        match ChatMessage::from_bytes(bytes) {
            Ok(message) => Self::Chat(message),
            Err(_) => Self::Raw(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl fmt::Display for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(message) => fmt::Display::fmt(message, f),
            Self::Raw(text) => f.write_str(text),
        }
    }
}

/// Client side of one relay connection.
///
/// # Example
///
/// ```rust,ignore
/// use blab::client::ChatClient;
/// use tokio_util::sync::CancellationToken;
///
/// let (mut client, mut incoming) =
///     ChatClient::connect("ws://127.0.0.1:8080/ws", "alice", CancellationToken::new()).await?;
/// client.send("hello").await?;
/// while let Some(frame) = incoming.recv().await {
///     println!("{frame}");
/// }
/// ```
pub struct ChatClient {
    username: String,
    sink: SplitSink<Socket, Message>,
    reader: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl ChatClient {
    /// Connects to the relay and starts the reader task.
    ///
    /// Frames arrive on the returned receiver in the order the relay sent
    /// them; the receiver ends when the connection closes.
    pub async fn connect(
        url: &str,
        username: impl Into<String>,
        cancel_token: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Incoming>)> {
        let (socket, _response) = connect_async(url).await.map_err(|e| ClientError::Connect {
            url: url.to_string(),
            source: Box::new(e),
        })?;
        info!(url = %url, "Connected to relay");

        let (sink, stream) = socket.split();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_frames(stream, incoming_tx, cancel_token.clone()));

        let client = Self {
            username: username.into(),
            sink,
            reader,
            cancel_token,
        };
        Ok((client, incoming_rx))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Sends one line of chat under this client's username.
    pub async fn send(&mut self, content: &str) -> Result<()> {
        let message = ChatMessage::new(self.username.as_str(), content);
        self.send_message(&message).await
    }

    /// Sends an already built message as one JSON text frame.
    pub async fn send_message(&mut self, message: &ChatMessage) -> Result<()> {
        message.validate()?;
        let json = message.to_json()?;
        self.sink
            .send(Message::text(json))
            .await
            .map_err(|e| ClientError::Send(Box::new(e)))
    }

    /// Closes the connection and waits for the reader task.
    pub async fn close(mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!(error = %e, "Close frame not sent");
        }
        self.cancel_token.cancel();
        if let Err(e) = self.reader.await {
            warn!(error = %e, "Reader task failed");
        }
    }
}

/// Forwards data frames until the relay closes the connection or we are cancelled.
async fn read_frames(
    mut stream: SplitStream<Socket>,
    incoming_tx: mpsc::UnboundedSender<Incoming>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Reader cancelled");
                break;
            }

            next = stream.next() => {
                match next {
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "Relay closed the connection");
                        break;
                    }
                    Some(Ok(message)) => {
                        let Some(incoming) = Incoming::from_message(message) else {
                            continue;
                        };
                        if incoming_tx.send(incoming).is_err() {
                            debug!("Incoming receiver dropped");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Connection error");
                        break;
                    }
                    None => {
                        info!("Connection closed");
                        break;
                    }
                }
            }
        }
    }
}
