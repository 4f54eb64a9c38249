//! Control request decoding and dispatch.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use subrelay_core::ErrorKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{ControlMessage, HostBus, Reply};
use crate::errors::RegistryError;
use crate::registry::AccountRegistry;
use crate::subscriptions::SubscriptionRecord;

/// A decoded control request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlRequest {
    /// Current token and its validation metadata.
    TokenSnapshot {
        /// Account name.
        token: String,
    },
    /// Ensure the account holds a subscription.
    ConfigureSubscription {
        /// Account name.
        token: String,
        /// The subscription to hold.
        subscription: SubscriptionRecord,
    },
}

impl ControlRequest {
    /// Decode request contents.
    pub fn decode(contents: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(contents)
    }

    fn action(&self) -> &'static str {
        match self {
            Self::TokenSnapshot { .. } => "tokenSnapshot",
            Self::ConfigureSubscription { .. } => "configureSubscription",
        }
    }
}

fn error_reply(kind: ErrorKind) -> Reply {
    Reply::Value(json!({ "$error": kind.wire_code() }))
}

/// Answers control messages from the host.
pub struct ControlRouter {
    registry: Arc<AccountRegistry>,
}

impl ControlRouter {
    /// Router over `registry`.
    pub fn new(registry: Arc<AccountRegistry>) -> Self {
        Self { registry }
    }

    /// Decode and execute `contents`, producing its reply.
    pub async fn handle(&self, contents: Value) -> Reply {
        let request = match ControlRequest::decode(contents) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "undecodable control request");
                return error_reply(ErrorKind::InvalidRequest);
            }
        };
        let action = request.action();
        match self.execute(request).await {
            Ok(reply) => reply,
            Err(e) => {
                let kind = e.kind();
                warn!(action, error = %e, %kind, "control request failed");
                error_reply(kind)
            }
        }
    }

    async fn execute(&self, request: ControlRequest) -> Result<Reply, RegistryError> {
        match request {
            ControlRequest::TokenSnapshot { token } => {
                let snapshot = self.registry.snapshot(&token).await?;
                Ok(Reply::Value(serde_json::to_value(snapshot)?))
            }
            ControlRequest::ConfigureSubscription {
                token,
                subscription,
            } => {
                self.registry
                    .ensure_subscription(&token, subscription)
                    .await?;
                Ok(Reply::Ack)
            }
        }
    }

    /// Handle one bus message. Messages without a reply channel are dropped.
    pub async fn handle_message(&self, message: ControlMessage) {
        let Some(reply) = message.reply else {
            warn!("control message without reply channel, dropping");
            return;
        };
        let answer = self.handle(message.contents).await;
        if !reply.send(answer) {
            debug!("control reply receiver went away");
        }
    }

    /// Consume control messages until `cancel` fires or the bus closes.
    pub async fn run(self: Arc<Self>, bus: Arc<dyn HostBus>, cancel: CancellationToken) {
        info!("control router started");
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = bus.next_control() => message,
            };
            let Some(message) = message else {
                info!("control bus closed");
                break;
            };
            let router = Arc::clone(&self);
            let _ = tokio::spawn(async move { router.handle_message(message).await });
        }
        info!("control router stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
