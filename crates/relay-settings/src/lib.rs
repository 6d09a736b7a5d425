//! # relay-settings
//!
//! Configuration for the relay, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `RELAY_*` overrides (highest priority)
//!
//! The binary applies its command-line flags on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings_from_path, settings_path};
pub use types::{LogFormat, LoggingSettings, RelaySettings, ServerSettings};
