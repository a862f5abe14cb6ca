//! # huddle-settings
//!
//! Configuration for the Huddle relay, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`HuddleSettings::default()`]
//! 2. **Settings file**: `~/.huddle/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PORT`, `FRONTEND_URL`, `HUDDLE_*` (highest
//!    priority)
//!
//! # Usage
//!
//! ```no_run
//! let path = huddle_settings::settings_path();
//! let mut settings = huddle_settings::read_settings_file(&path).unwrap_or_default();
//! huddle_settings::apply_overrides_from(&mut settings, |key| std::env::var(key).ok());
//! settings.validate().unwrap();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides_from, deep_merge, read_settings_file, settings_path};
pub use types::*;
