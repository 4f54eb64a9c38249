//! # subrelay-session
//!
//! One event-stream WebSocket connection, turned from push into pull.
//!
//! - [`Session`]: owns the reader task. Decodes frames once at the boundary,
//!   suppresses duplicate message ids, enforces the keepalive deadlines, and
//!   queues events in a bounded buffer for [`Session::next`].
//! - [`Connector`] / [`Transport`]: the socket seam. [`WsConnector`] speaks
//!   real WebSockets via `tokio-tungstenite`; [`memory`] provides an
//!   in-process pair for tests and embedding.
//! - [`frames`]: the wire schema.
//!
//! A session reports its own death exactly once, as [`SessionEvent::Close`]
//! carrying one of the codes in [`close_code`].

#![deny(unsafe_code)]

pub mod buffer;
pub mod close_code;
pub mod errors;
pub mod frames;
pub mod heartbeat;
pub mod memory;
pub mod seen;
pub mod session;
pub mod transport;

pub use errors::SessionError;
pub use frames::{Notification, ReconnectSession, SubscriptionInfo, WelcomeSession};
pub use session::{Phase, Session, SessionConfig, SessionEvent};
pub use transport::{Connector, Inbound, Transport, WsConnector};
