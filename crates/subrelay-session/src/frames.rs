//! Wire schema of the event stream.
//!
//! Every text frame is `{"metadata": {...}, "payload": {...}}`. The metadata
//! `message_type` selects the payload shape. [`decode`] validates both in one
//! pass so the rest of the session only ever sees typed [`Frame`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame kinds carried in `metadata.message_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// First frame of every connection.
    SessionWelcome,
    /// Idle-connection heartbeat.
    SessionKeepalive,
    /// A subscribed event.
    Notification,
    /// The server asks the client to move to another URL.
    SessionReconnect,
}

/// Frame metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique per message; redeliveries reuse it.
    pub message_id: String,
    /// Payload selector.
    pub message_type: MessageType,
    /// When the server sent the frame.
    pub message_timestamp: DateTime<Utc>,
    /// Present on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    /// Present on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_version: Option<String>,
}

/// `payload.session` of a welcome frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeSession {
    /// Session id used when registering subscriptions.
    pub id: String,
    /// Server-side session status.
    pub status: String,
    /// Keepalive interval; absent on some reconnect welcomes.
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    /// When the server accepted the connection.
    #[serde(default)]
    pub connected_at: Option<DateTime<Utc>>,
}

/// `payload.session` of a reconnect frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSession {
    /// Id of the session being moved.
    #[serde(default)]
    pub id: String,
    /// Where to connect next.
    pub reconnect_url: String,
}

/// Transport a subscription delivers over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTransport {
    /// Delivery method (`websocket`).
    pub method: String,
    /// Owning session, for WebSocket delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// `payload.subscription` of a notification frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Server-assigned subscription id.
    pub id: String,
    /// Subscription status.
    pub status: String,
    /// Subscription type; the publish topic.
    #[serde(rename = "type")]
    pub kind: String,
    /// Subscription version.
    pub version: String,
    /// Cost charged against the subscription budget.
    #[serde(default)]
    pub cost: u64,
    /// Filter the subscription was created with.
    #[serde(default)]
    pub condition: BTreeMap<String, Value>,
    /// Delivery transport.
    pub transport: SubscriptionTransport,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Payload of a notification frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// The subscription that matched.
    pub subscription: SubscriptionInfo,
    /// Event body; shape depends on the subscription type.
    pub event: Value,
}

/// Typed payload of a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `session_welcome`.
    Welcome(WelcomeSession),
    /// `session_keepalive`.
    Keepalive,
    /// `notification`.
    Notification(Notification),
    /// `session_reconnect`.
    Reconnect(ReconnectSession),
}

/// A fully decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame metadata.
    pub metadata: Metadata,
    /// Typed payload.
    pub message: Message,
}

#[derive(Deserialize)]
struct RawFrame {
    metadata: Metadata,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct SessionPayload<T> {
    session: T,
}

/// Decode a text frame. Fails on invalid JSON or any schema violation.
pub fn decode(text: &str) -> Result<Frame, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let message = match raw.metadata.message_type {
        MessageType::SessionWelcome => {
            let p: SessionPayload<WelcomeSession> = serde_json::from_value(raw.payload)?;
            Message::Welcome(p.session)
        }
        MessageType::SessionKeepalive => Message::Keepalive,
        MessageType::Notification => Message::Notification(serde_json::from_value(raw.payload)?),
        MessageType::SessionReconnect => {
            let p: SessionPayload<ReconnectSession> = serde_json::from_value(raw.payload)?;
            Message::Reconnect(p.session)
        }
    };
    Ok(Frame {
        metadata: raw.metadata,
        message,
    })
}
