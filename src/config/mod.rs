//! Binary configuration
//!
//! Settings come from an optional TOML file merged with
//! `POLYPORT_`-prefixed environment variables; every key has a default
//! so the binary runs with no configuration at all.

use std::net::{AddrParseError, IpAddr};

use serde::Deserialize;

/// Top-level settings for the `polyport` binary.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub tls: TlsSettings,
    pub static_files: StaticSettings,
    pub logging: LoggingSettings,
}

/// Bind address, ports and runtime sizing.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: Vec<u16>,
    pub use_available_port: bool,
    /// Tokio worker threads; absent means one per CPU core.
    #[serde(default)]
    pub workers: Option<usize>,
}

/// Certificate material on disk. Both paths absent means a self-signed
/// certificate is generated at startup.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TlsSettings {
    #[serde(default)]
    pub cert_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
}

/// Static file serving.
#[derive(Debug, Deserialize, Clone)]
pub struct StaticSettings {
    /// Directory request pathnames are resolved under.
    pub root: String,
    /// File served when a pathname names a directory.
    pub index: String,
}

/// Log filtering, overridable with `RUST_LOG`.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Settings {
    /// Load settings from the given file path (extension optional,
    /// file optional) merged with `POLYPORT_` environment variables;
    /// nested keys use `__`, as in `POLYPORT_SERVER__HOST`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file or environment contains values
    /// that do not fit the settings types.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("POLYPORT").separator("__"))
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", vec![80_i64, 443])?
            .set_default("server.use_available_port", false)?
            .set_default("static_files.root", ".")?
            .set_default("static_files.index", "index.html")?
            .set_default("logging.filter", "info")?
            .build()?;

        settings.try_deserialize()
    }

    /// The configured bind host as an address.
    ///
    /// # Errors
    ///
    /// Returns the parse failure for a host that is not an IP address.
    pub fn bind_host(&self) -> Result<IpAddr, AddrParseError> {
        self.server.host.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_a_config_file() {
        let settings = Settings::load("polyport-test-missing").unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, vec![80, 443]);
        assert!(!settings.server.use_available_port);
        assert!(settings.server.workers.is_none());
        assert!(settings.tls.cert_file.is_none());
        assert_eq!(settings.static_files.root, ".");
        assert_eq!(settings.static_files.index, "index.html");
        assert_eq!(settings.logging.filter, "info");
    }

    #[test]
    fn test_bind_host_parses() {
        let settings = Settings::load("polyport-test-missing").unwrap();
        assert!(settings.bind_host().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("polyport-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("custom.toml");
        std::fs::write(
            &path,
            "[server]\nhost = \"127.0.0.1\"\nport = [8080]\nuse_available_port = true\n",
        )
        .unwrap();

        let name = path.with_extension("");
        let settings = Settings::load(name.to_str().unwrap()).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, vec![8080]);
        assert!(settings.server.use_available_port);
        // Untouched sections keep their defaults.
        assert_eq!(settings.static_files.index, "index.html");
    }
}
