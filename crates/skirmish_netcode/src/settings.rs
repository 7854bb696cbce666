//! # Settings
//!
//! TOML-backed configuration for the server binary and client embedding.
//!
//! Every field has a sensible default and a missing or malformed file
//! falls back to the defaults with a warning, so a bare binary always
//! starts.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::TRANSFORM_EMIT_INTERVAL_MS;

/// Default UDP port the server listens on.
pub const DEFAULT_PORT: u16 = 7777;

/// Default cap on simultaneous clients.
pub const DEFAULT_MAX_CLIENTS: usize = 16;

/// Top-level settings file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetcodeSettings {
    /// Server-side knobs.
    pub server: ServerSettings,
    /// Client-side knobs.
    pub client: ClientSettings,
}

/// Server knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// UDP port to listen on; 0 asks the OS for an ephemeral port.
    pub port: u16,
    /// Maximum simultaneous clients.
    pub max_clients: usize,
    /// Milliseconds between authoritative transform broadcasts.
    pub transform_emit_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            transform_emit_ms: TRANSFORM_EMIT_INTERVAL_MS,
        }
    }
}

impl ServerSettings {
    /// The transform broadcast interval as a [`Duration`].
    #[must_use]
    pub const fn emit_interval(&self) -> Duration {
        Duration::from_millis(self.transform_emit_ms)
    }
}

/// Client knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSettings {
    /// Server address to connect to, as `host:port`.
    pub server_addr: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
        }
    }
}

impl NetcodeSettings {
    /// Loads settings from a TOML file.
    ///
    /// A missing file is normal (defaults, debug log); a present but
    /// malformed file is not (defaults, warning).
    #[must_use]
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!("no settings file at {}: {e} (using defaults)", path.display());
                return Self::default();
            }
        };
        match toml::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(
                    "malformed settings file {}: {e} (using defaults)",
                    path.display()
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let settings = NetcodeSettings::default();
        assert_eq!(settings.server.port, DEFAULT_PORT);
        assert_eq!(settings.server.max_clients, DEFAULT_MAX_CLIENTS);
        assert_eq!(
            settings.server.emit_interval(),
            Duration::from_millis(TRANSFORM_EMIT_INTERVAL_MS)
        );
        assert_eq!(settings.client.server_addr, "127.0.0.1:7777");
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let settings: NetcodeSettings = toml::from_str(
            r#"
            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.max_clients, DEFAULT_MAX_CLIENTS);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<NetcodeSettings, _> = toml::from_str(
            r#"
            [server]
            prot = 9000
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = NetcodeSettings::load("/nonexistent/skirmish.toml");
        assert_eq!(settings.server.port, DEFAULT_PORT);
    }
}
