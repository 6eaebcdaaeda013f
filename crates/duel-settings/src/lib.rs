//! # duel-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`DuelSettings::default()`])
//! 2. **Settings file** (`~/.duel/settings.json` or `--config`, deep-merged over defaults)
//! 3. **Environment variables** (`DUEL_*` overrides, highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
