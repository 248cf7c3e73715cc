// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;

use crate::types::{Msaa, VsyncMode};

/// Device configuration, fixed for the lifetime of a [`crate::Device`].
///
/// Reads from a `[render]` style TOML table; missing keys keep their
/// defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Queue every command until `flush`/`swapchain_present` instead of
    /// running it inside the issuing call.
    pub defer_api_calls: bool,
    pub vsync: VsyncMode,
    pub msaa: Msaa,
    /// The caller owns the native context; the backend must not create or
    /// present one.
    pub external_context: bool,
}

impl Settings {
    pub fn deferred() -> Self {
        Self {
            defer_api_calls: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_table() {
        let settings: Settings = toml::from_str("defer_api_calls = true\nmsaa = \"x4\"\n")
            .expect("valid settings");
        assert!(settings.defer_api_calls);
        assert_eq!(settings.msaa, Msaa::X4);
        assert_eq!(settings.vsync, VsyncMode::On);
        assert!(!settings.external_context);
    }

    #[test]
    fn empty_table_is_default() {
        let settings: Settings = toml::from_str("").expect("empty settings");
        assert_eq!(settings, Settings::default());
    }
}
