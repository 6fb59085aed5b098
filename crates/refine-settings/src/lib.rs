//! # refine-settings
//!
//! Layered configuration for the refinement engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RefineSettings::default()`]
//! 2. **Settings file**: `~/.refine/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `REFINE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
