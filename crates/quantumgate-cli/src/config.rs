//! Configuration loading for the QuantumGate developer CLI.
//!
//! Wraps [`quantumgate_core::Settings`] (the protocol-level settings surface,
//! §6) with the handful of fields that only make sense at the process level:
//! where the node listens, where its signing identity lives on disk, and how
//! verbose its logs are, following the same load/save/validate shape as the
//! embedded settings.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use quantumgate_core::Settings;
use serde::{Deserialize, Serialize};

/// Top-level CLI configuration: process-level fields plus the embedded
/// protocol [`Settings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This node's identity and listener configuration.
    pub node: NodeConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Protocol settings (§6), validated via [`Settings::validate`].
    #[serde(default)]
    pub settings: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self { node: NodeConfig::default(), logging: LoggingConfig::default(), settings: Settings::default() }
    }
}

/// Node-level configuration: where it listens and where its Ed25519
/// identity key is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address to listen on for inbound peers.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Path to the 32-byte Ed25519 signing key file (§6 notes the on-disk
    /// key file format is out of scope here: this CLI just reads/writes raw
    /// key bytes).
    #[serde(default = "default_identity_path")]
    pub identity_file: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { listen_addr: default_listen_addr(), identity_file: default_identity_path() }
    }
}

/// Logging configuration, handed to `tracing_subscriber`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive, e.g. `"info"` or `"quantumgate_net=debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:44900".to_string()
}

fn default_identity_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from("/tmp")).join("quantumgate/identity.key")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as
    /// needed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default config file path (`$XDG_CONFIG_HOME/quantumgate/config.toml`
    /// or equivalent).
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("/tmp")).join("quantumgate/config.toml")
    }

    /// Load from the default path, or write and return a fresh default
    /// config if none exists yet.
    ///
    /// # Errors
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse the listen address.
    ///
    /// # Errors
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.node.listen_addr.parse()?)
    }

    /// Validate both the CLI-level fields and the embedded protocol
    /// settings (§6: "all constraints are validated at startup").
    ///
    /// # Errors
    /// Returns an error describing the first invalid field found.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        self.settings.validate().map_err(|e| anyhow::anyhow!("invalid protocol settings: {e}"))?;

        Ok(())
    }
}
