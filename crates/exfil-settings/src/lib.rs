//! # exfil-settings
//!
//! Configuration with layered sources:
//! 1. **Compiled defaults**: [`ExfilSettings::default()`]
//! 2. **User file**: `~/.exfil/settings.json` (missing keys keep their defaults)
//! 3. **Environment variables**: `EXFIL_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<ExfilSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads from the default path. If loading fails, returns
/// compiled defaults.
pub fn get_settings() -> &'static ExfilSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ExfilSettings) -> std::result::Result<(), ExfilSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_settings_initialize_once() {
        let mut custom = ExfilSettings::default();
        custom.web_server.port = 9999;
        let first = init_settings(custom.clone());
        let second = init_settings(custom);
        assert!(first.is_ok());
        assert!(second.is_err());
        assert_eq!(get_settings().web_server.port, 9999);
    }
}
