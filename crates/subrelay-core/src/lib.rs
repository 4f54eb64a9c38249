//! # subrelay-core
//!
//! Foundation shared by every subrelay crate:
//!
//! - **Errors**: [`ErrorKind`], the control-bus error taxonomy each crate's
//!   error type classifies into
//! - **Retry**: [`RetryConfig`] and backoff / `Retry-After` math
//! - **HTTP**: [`http::send_with_retry`], the single place 429 responses are
//!   retried under a bounded policy
//! - **Time**: millisecond timestamps used for credential expiry
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod errors;
pub mod http;
pub mod logging;
pub mod retry;
pub mod time;

pub use errors::ErrorKind;
pub use retry::RetryConfig;
pub use time::{calculate_expires_at, now_ms};
