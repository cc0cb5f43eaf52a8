//! # authrelay-settings
//!
//! Configuration for the relay, loaded from three layers (in priority order):
//! 1. **Compiled defaults** - [`AuthRelaySettings::default()`]
//! 2. **Settings file** - `~/.authrelay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** - `AUTHRELAY_*` overrides
//!
//! Loading does not validate; call [`AuthRelaySettings::validate`] after the
//! last override has been applied.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides_from, deep_merge, load_settings_from_path, settings_path};
pub use types::*;
