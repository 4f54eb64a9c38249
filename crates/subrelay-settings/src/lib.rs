//! # subrelay-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.subrelay/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `SUBRELAY_*` overrides (highest priority)
//!
//! The loaded [`RelaySettings`] value is passed
//! explicitly into every component that needs it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
