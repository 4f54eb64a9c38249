//! In-process transport.
//!
//! [`MemoryConnector`] hands out [`MemoryTransport`]s and sends the matching
//! [`MemoryServer`] handle to whoever holds the receiver returned by
//! [`MemoryConnector::new`]. The handle scripts inbound frames and observes
//! the code the session closed with.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::errors::SessionError;
use crate::transport::{Connector, Inbound, Transport};

/// Connector producing in-memory transports.
pub struct MemoryConnector {
    servers: mpsc::UnboundedSender<MemoryServer>,
    refused: Mutex<HashSet<String>>,
}

impl MemoryConnector {
    /// New connector and the stream of server handles it creates.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            servers,
            refused: Mutex::new(HashSet::new()),
        };
        (connector, rx)
    }

    /// Make every later connect to `url` fail.
    pub fn refuse(&self, url: &str) {
        let _ = self.refused.lock().insert(url.to_string());
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SessionError> {
        if self.refused.lock().contains(url) {
            return Err(SessionError::Connect {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (closes_tx, closes_rx) = mpsc::unbounded_channel();
        let _ = self.servers.send(MemoryServer {
            url: url.to_string(),
            to_client,
            closes: closes_rx,
        });
        Ok(Box::new(MemoryTransport {
            from_server,
            closes: closes_tx,
            closed: false,
        }))
    }
}

/// Server side of an in-memory connection.
pub struct MemoryServer {
    url: String,
    to_client: mpsc::UnboundedSender<Inbound>,
    closes: mpsc::UnboundedReceiver<u16>,
}

impl MemoryServer {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver an inbound item. `false` once the client is gone.
    pub fn send(&self, inbound: Inbound) -> bool {
        self.to_client.send(inbound).is_ok()
    }

    /// Deliver a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Inbound::Text(text.into()))
    }

    /// Code the client closed with; `None` if it went away without closing.
    pub async fn closed(&mut self) -> Option<u16> {
        self.closes.recv().await
    }
}

/// Client side of an in-memory connection.
pub struct MemoryTransport {
    from_server: mpsc::UnboundedReceiver<Inbound>,
    closes: mpsc::UnboundedSender<u16>,
    closed: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn recv(&mut self) -> Option<Inbound> {
        if self.closed {
            return None;
        }
        self.from_server.recv().await
    }

    async fn close(&mut self, code: u16) {
        if !self.closed {
            self.closed = true;
            let _ = self.closes.send(code);
        }
    }
}

// ── Frame builders ──────────────────────────────────────────────────────────

fn metadata(message_id: &str, message_type: &str) -> Value {
    json!({
        "message_id": message_id,
        "message_type": message_type,
        "message_timestamp": "2024-01-01T00:00:00Z",
    })
}

/// A `session_welcome` frame.
pub fn welcome_frame(message_id: &str, session_id: &str, keepalive_secs: u64) -> String {
    json!({
        "metadata": metadata(message_id, "session_welcome"),
        "payload": {"session": {
            "id": session_id,
            "status": "connected",
            "keepalive_timeout_seconds": keepalive_secs,
            "connected_at": "2024-01-01T00:00:00Z",
        }},
    })
    .to_string()
}

/// A `session_keepalive` frame.
pub fn keepalive_frame(message_id: &str) -> String {
    json!({
        "metadata": metadata(message_id, "session_keepalive"),
        "payload": {},
    })
    .to_string()
}

/// A `notification` frame for subscription type `kind`.
pub fn notification_frame(message_id: &str, kind: &str, event: Value) -> String {
    let mut meta = metadata(message_id, "notification");
    meta["subscription_type"] = Value::String(kind.to_string());
    meta["subscription_version"] = Value::String("1".to_string());
    json!({
        "metadata": meta,
        "payload": {
            "subscription": {
                "id": format!("sub-{message_id}"),
                "status": "enabled",
                "type": kind,
                "version": "1",
                "cost": 0,
                "condition": {},
                "transport": {"method": "websocket", "session_id": "memory"},
            },
            "event": event,
        },
    })
    .to_string()
}

/// A `session_reconnect` frame pointing at `reconnect_url`.
pub fn reconnect_frame(message_id: &str, session_id: &str, reconnect_url: &str) -> String {
    json!({
        "metadata": metadata(message_id, "session_reconnect"),
        "payload": {"session": {
            "id": session_id,
            "status": "reconnecting",
            "keepalive_timeout_seconds": null,
            "reconnect_url": reconnect_url,
        }},
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{Message, decode};

    #[tokio::test]
    async fn connector_pairs_transport_with_server() {
        let (connector, mut servers) = MemoryConnector::new();
        let mut transport = connector.connect("memory://a").await.unwrap();
        let mut server = servers.recv().await.unwrap();
        assert_eq!(server.url(), "memory://a");

        assert!(server.send_text("hello"));
        assert_eq!(transport.recv().await, Some(Inbound::Text("hello".into())));

        transport.close(1000).await;
        assert_eq!(server.closed().await, Some(1000));
        assert_eq!(transport.recv().await, None);
    }

    #[tokio::test]
    async fn refused_url_fails() {
        let (connector, _servers) = MemoryConnector::new();
        connector.refuse("memory://down");
        assert!(connector.connect("memory://down").await.is_err());
        assert!(connector.connect("memory://up").await.is_ok());
    }

    #[test]
    fn builders_decode() {
        assert!(matches!(decode(&welcome_frame("1", "s", 10)).unwrap().message, Message::Welcome(_)));
        assert!(matches!(decode(&keepalive_frame("2")).unwrap().message, Message::Keepalive));
        assert!(matches!(
            decode(&notification_frame("3", "channel.follow", json!({}))).unwrap().message,
            Message::Notification(_)
        ));
        assert!(matches!(
            decode(&reconnect_frame("4", "s", "memory://b")).unwrap().message,
            Message::Reconnect(_)
        ));
    }
}
