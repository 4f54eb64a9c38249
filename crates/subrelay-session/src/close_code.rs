//! Close codes a session reports in [`SessionEvent::Close`](crate::SessionEvent::Close).
//!
//! Codes in the 4900 range are private to the relay. A close initiated by the
//! remote end carries whatever code the remote sent.

/// Owner-initiated shutdown.
pub const NORMAL: u16 = 1000;
/// No inbound traffic within twice the keepalive interval.
pub const HEARTBEAT_TIMEOUT: u16 = 4905;
/// Socket error or stream end without a close frame.
pub const TRANSPORT_ERROR: u16 = 4906;
/// Replaced by a newer session after a reconnect hand-off.
pub const SUPERSEDED: u16 = 4907;
/// The consumer fell too far behind and the buffer filled up.
pub const BUFFER_OVERFLOW: u16 = 4908;
/// The first frame was not a welcome.
pub const PROTOCOL_VIOLATION: u16 = 4909;
/// The remote closed without giving a code.
pub const UNSPECIFIED: u16 = 4990;

/// Short label for logs.
pub fn describe(code: u16) -> &'static str {
    match code {
        NORMAL => "normal",
        HEARTBEAT_TIMEOUT => "heartbeat timeout",
        TRANSPORT_ERROR => "transport error",
        SUPERSEDED => "superseded",
        BUFFER_OVERFLOW => "buffer overflow",
        PROTOCOL_VIOLATION => "protocol violation",
        UNSPECIFIED => "unspecified",
        _ => "remote close",
    }
}
