//! Socket seam.
//!
//! A [`Connector`] produces a [`Transport`] per connection. The session's
//! reader task owns the transport exclusively and drops it on close.
//! [`Transport::recv`] must be cancel-safe: the reader polls it inside
//! `select!` alongside the heartbeat deadlines.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, instrument};

use crate::close_code;
use crate::errors::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the reader gets from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// A binary frame; never valid on this protocol.
    Binary(Vec<u8>),
    /// The remote closed the connection, optionally with a code.
    Closed(Option<u16>),
    /// The socket failed.
    Error(String),
}

/// One established connection.
#[async_trait]
pub trait Transport: Send {
    /// Next inbound item. `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Inbound>;

    /// Close the connection with `code`. Errors are swallowed.
    async fn close(&mut self, code: u16);
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SessionError>;
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    #[instrument(skip(self))]
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SessionError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| SessionError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        debug!("websocket connected");
        Ok(Box::new(WsTransport { ws }))
    }
}

struct WsTransport {
    ws: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<Inbound> {
        loop {
            let msg = match self.ws.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Inbound::Error(e.to_string())),
            };
            return Some(match msg {
                Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
                Message::Binary(bytes) => Inbound::Binary(bytes.to_vec()),
                Message::Close(frame) => Inbound::Closed(frame.map(|f| u16::from(f.code))),
                // Answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            });
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: close_code::describe(code).into(),
        };
        if let Err(e) = self.ws.close(Some(frame)).await {
            debug!(error = %e, "websocket close failed");
        }
        let _ = self.ws.flush().await;
    }
}
