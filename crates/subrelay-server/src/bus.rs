//! Host bus: where control requests come from and events go to.
//!
//! [`ChannelBus`] keeps both directions in-process. [`StdioBus`] speaks JSON
//! lines over any reader/writer pair (stdin/stdout in the binary):
//!
//! ```text
//! in:  {"id": 7, "contents": {"action": "tokenSnapshot", "token": "main"}}
//! out: {"type": "reply", "id": 7, "body": {...}}
//! out: {"type": "ack", "id": 8}
//! out: {"type": "publish", "topic": "channel.follow", "payload": {...}}
//! ```
//!
//! An input line without `id` carries no reply channel. A malformed envelope
//! whose `id` is still readable is answered with `invalid-request`.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use subrelay_core::ErrorKind;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

/// Longest accepted input line.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Answer to a control message.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Bare acknowledgement.
    Ack,
    /// A value (snapshot or `{"$error": ...}`).
    Value(Value),
}

/// One-shot reply channel of a control message.
#[derive(Debug)]
pub struct ReplyHandle(oneshot::Sender<Reply>);

impl ReplyHandle {
    /// A handle and the receiver its reply arrives on.
    pub fn new() -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Send the reply. `false` if nobody is listening anymore.
    pub fn send(self, reply: Reply) -> bool {
        self.0.send(reply).is_ok()
    }
}

/// A control request as it arrives from the host.
#[derive(Debug)]
pub struct ControlMessage {
    /// Undecoded request body.
    pub contents: Value,
    /// Reply channel, if the sender expects an answer.
    pub reply: Option<ReplyHandle>,
}

impl ControlMessage {
    /// A message expecting a reply.
    pub fn with_reply(contents: Value) -> (Self, oneshot::Receiver<Reply>) {
        let (handle, rx) = ReplyHandle::new();
        let message = Self {
            contents,
            reply: Some(handle),
        };
        (message, rx)
    }

    /// A fire-and-forget message.
    pub fn without_reply(contents: Value) -> Self {
        Self {
            contents,
            reply: None,
        }
    }
}

/// The host's message bus.
#[async_trait]
pub trait HostBus: Send + Sync {
    /// Next control message. `None` once the bus is closed.
    async fn next_control(&self) -> Option<ControlMessage>;

    /// Publish `payload` under `topic`.
    async fn publish(&self, topic: &str, payload: Value);
}

// ─────────────────────────────────────────────────────────────────────────────
// In-process bus
// ─────────────────────────────────────────────────────────────────────────────

/// An event published on a [`ChannelBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    /// Topic (the subscription type).
    pub topic: String,
    /// Notification payload.
    pub payload: Value,
}

/// Bus over tokio channels.
pub struct ChannelBus {
    control: Mutex<mpsc::Receiver<ControlMessage>>,
    output: mpsc::UnboundedSender<Published>,
}

/// The host side of a [`ChannelBus`].
pub struct ChannelBusHandle {
    /// Send control messages here.
    pub control: mpsc::Sender<ControlMessage>,
    /// Published events arrive here.
    pub output: mpsc::UnboundedReceiver<Published>,
}

impl ChannelBus {
    /// A bus buffering up to `capacity` control messages.
    pub fn new(capacity: usize) -> (Self, ChannelBusHandle) {
        let (control_tx, control_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let bus = Self {
            control: Mutex::new(control_rx),
            output: output_tx,
        };
        let handle = ChannelBusHandle {
            control: control_tx,
            output: output_rx,
        };
        (bus, handle)
    }
}

impl ChannelBusHandle {
    /// Send `contents` and wait for the reply. `None` if it was dropped.
    pub async fn request(&self, contents: Value) -> Option<Reply> {
        let (message, rx) = ControlMessage::with_reply(contents);
        self.control.send(message).await.ok()?;
        rx.await.ok()
    }
}

#[async_trait]
impl HostBus for ChannelBus {
    async fn next_control(&self) -> Option<ControlMessage> {
        self.control.lock().await.recv().await
    }

    async fn publish(&self, topic: &str, payload: Value) {
        let published = Published {
            topic: topic.to_string(),
            payload,
        };
        if self.output.send(published).is_err() {
            debug!(topic, "output receiver dropped, event discarded");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON-lines bus
// ─────────────────────────────────────────────────────────────────────────────

type LineReader = FramedRead<Pin<Box<dyn AsyncRead + Send>>, LinesCodec>;
type LineWriter = FramedWrite<Pin<Box<dyn AsyncWrite + Send>>, LinesCodec>;

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    contents: Value,
}

/// Bus speaking JSON lines.
pub struct StdioBus {
    input: Mutex<LineReader>,
    output: Arc<Mutex<LineWriter>>,
}

impl StdioBus {
    /// Bus over the process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Bus over an arbitrary reader/writer pair.
    pub fn new(
        reader: impl AsyncRead + Send + 'static,
        writer: impl AsyncWrite + Send + 'static,
    ) -> Self {
        let reader: Pin<Box<dyn AsyncRead + Send>> = Box::pin(reader);
        let writer: Pin<Box<dyn AsyncWrite + Send>> = Box::pin(writer);
        Self {
            input: Mutex::new(FramedRead::new(
                reader,
                LinesCodec::new_with_max_length(MAX_LINE_BYTES),
            )),
            output: Arc::new(Mutex::new(FramedWrite::new(writer, LinesCodec::new()))),
        }
    }

    /// Forward the eventual reply for `id` to the output.
    fn spawn_reply_forwarder(&self, id: Value) -> ReplyHandle {
        let (handle, rx) = ReplyHandle::new();
        let output = Arc::clone(&self.output);
        let _ = tokio::spawn(async move {
            let Ok(reply) = rx.await else {
                debug!(%id, "control message dropped without reply");
                return;
            };
            let line = match reply {
                Reply::Ack => json!({"type": "ack", "id": id}),
                Reply::Value(body) => json!({"type": "reply", "id": id, "body": body}),
            };
            write_line(&output, &line).await;
        });
        handle
    }
}

impl StdioBus {
    /// Answer a malformed envelope with `invalid-request` when its `id` can
    /// still be recovered.
    async fn reject_line(&self, line: &str) {
        let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(line) else {
            return;
        };
        let Some(id) = fields.remove("id") else {
            return;
        };
        let reply = json!({
            "type": "reply",
            "id": id,
            "body": {"$error": ErrorKind::InvalidRequest.wire_code()}
        });
        write_line(&self.output, &reply).await;
    }
}

async fn write_line(output: &Mutex<LineWriter>, line: &Value) {
    if let Err(e) = output.lock().await.send(line.to_string()).await {
        warn!(error = %e, "failed to write to host bus");
    }
}

#[async_trait]
impl HostBus for StdioBus {
    async fn next_control(&self) -> Option<ControlMessage> {
        loop {
            let next = self.input.lock().await.next().await;
            let line = match next? {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = MAX_LINE_BYTES, "dropping oversized control line");
                    continue;
                }
                Err(LinesCodecError::Io(e)) => {
                    warn!(error = %e, "host bus input failed");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let envelope: Envelope = match serde_json::from_str(&line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "rejecting unparsable control line");
                    self.reject_line(&line).await;
                    continue;
                }
            };
            let reply = envelope.id.map(|id| self.spawn_reply_forwarder(id));
            return Some(ControlMessage {
                contents: envelope.contents,
                reply,
            });
        }
    }

    async fn publish(&self, topic: &str, payload: Value) {
        let line = json!({"type": "publish", "topic": topic, "payload": payload});
        write_line(&self.output, &line).await;
    }
}
