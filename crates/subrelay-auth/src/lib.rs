//! # subrelay-auth
//!
//! Bearer credential lifecycle for one account at a time.
//!
//! - [`CredentialStore`]: keeps an access token valid, refreshing it inside a
//!   5-second expiry skew. Refresh and validation are single-flight: concurrent
//!   callers share one upstream call and one outcome.
//! - [`OAuthClient`]: the two upstream identity calls (form-encoded refresh,
//!   bearer-authenticated validation).
//! - [`SecretStore`]: where credentials live between runs. [`FileSecretStore`]
//!   keeps them in a JSON file with `0o600` permissions.

#![deny(unsafe_code)]

pub mod errors;
pub mod oauth;
pub mod secrets;
pub mod store;
pub mod types;

pub use errors::AuthError;
pub use oauth::{OAuthClient, OAuthConfig};
pub use secrets::{FileSecretStore, SecretStore};
pub use store::{CredentialStore, EXPIRY_SKEW_MS};
pub use types::{Credential, StoredSecret, TokenSnapshot, Validation};
