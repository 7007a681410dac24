//! Settings surface (§6) for the peer session subsystem.
//!
//! A serde-serializable struct loadable from a TOML file or built
//! programmatically, validated once at startup via [`Settings::validate`]
//! rather than scattered throughout the codebase.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `Local.IPConnectionAttempts` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpConnectionAttempts {
    /// Maximum accepted connection attempts per `interval_secs`.
    pub max_per_interval: u32,
    /// Rolling window length, in seconds.
    pub interval_secs: u64,
}

impl Default for IpConnectionAttempts {
    fn default() -> Self {
        Self { max_per_interval: 5, interval_secs: 60 }
    }
}

/// `Local.KeyUpdate` (§4.5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyUpdateSettings {
    /// Minimum randomized interval between key updates, in seconds.
    pub min_interval_secs: u64,
    /// Maximum randomized interval between key updates, in seconds.
    pub max_interval_secs: u64,
    /// Maximum wall-clock duration an update is allowed to take before it's
    /// treated as failed, in seconds.
    pub max_duration_secs: u64,
    /// Force an update once a key pair has processed this many bytes.
    pub require_after_num_processed_bytes: u64,
}

impl Default for KeyUpdateSettings {
    fn default() -> Self {
        Self {
            min_interval_secs: 300,
            max_interval_secs: 3600,
            max_duration_secs: 60,
            require_after_num_processed_bytes: 1 << 34,
        }
    }
}

/// `Local.Concurrency` (§5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Minimum number of thread pools to run, regardless of hardware
    /// concurrency.
    pub min_thread_pools: usize,
    /// Minimum worker threads per pool (plus the pool's one primary
    /// thread).
    pub min_threads_per_pool: usize,
    /// Maximum inner messages a worker processes for one peer before
    /// yielding and re-queueing.
    pub worker_threads_max_burst: u32,
    /// Maximum time a worker sleeps between empty queue polls, in
    /// milliseconds.
    pub worker_threads_max_sleep_ms: u64,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            min_thread_pools: 1,
            min_threads_per_pool: 2,
            worker_threads_max_burst: 64,
            worker_threads_max_sleep_ms: 50,
        }
    }
}

/// `Local.SupportedAlgorithms` (§3, §4.2, §6): ordered preference vectors
/// per category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedAlgorithms {
    /// Transcript hash algorithm names, most preferred first.
    pub hash: Vec<String>,
    /// Primary asymmetric algorithm names, most preferred first.
    pub primary_asymmetric: Vec<String>,
    /// Secondary asymmetric algorithm names, most preferred first.
    pub secondary_asymmetric: Vec<String>,
    /// Symmetric (AEAD) algorithm names, most preferred first.
    pub symmetric: Vec<String>,
    /// Compression algorithm names, most preferred first.
    pub compression: Vec<String>,
}

impl Default for SupportedAlgorithms {
    fn default() -> Self {
        Self {
            hash: vec!["BLAKE3".into()],
            primary_asymmetric: vec!["X25519".into()],
            secondary_asymmetric: vec!["ML-KEM-768".into()],
            symmetric: vec!["XCHACHA20-POLY1305".into()],
            compression: vec!["NONE".into(), "ZSTANDARD".into()],
        }
    }
}

/// `Local.*` top-level settings (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Whether an empty signature (unauthenticated handshake) is accepted.
    pub require_authentication: bool,
    /// Maximum wall-clock seconds the whole handshake is allowed to take.
    pub max_handshake_duration_secs: u64,
    /// Upper bound, in milliseconds, of the randomized inbound-only delay
    /// before the first send.
    pub max_handshake_delay_ms: u64,
    /// Outbound connect timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// How often a lazily-applied reputation improvement nudge accrues, in
    /// seconds.
    pub ip_reputation_improvement_interval_secs: u64,
    /// Per-IP connection attempt rate limit.
    pub ip_connection_attempts: IpConnectionAttempts,
    /// Key-update sub-protocol timing.
    pub key_update: KeyUpdateSettings,
    /// Thread pool / worker sizing.
    pub concurrency: ConcurrencySettings,
    /// Algorithm preference vectors.
    pub supported_algorithms: SupportedAlgorithms,
    /// Optional out-of-band Global Shared Secret (§4.8).
    #[serde(with = "gss_serde")]
    pub global_shared_secret: Option<Vec<u8>>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            require_authentication: true,
            max_handshake_duration_secs: 30,
            max_handshake_delay_ms: 500,
            connect_timeout_secs: 10,
            ip_reputation_improvement_interval_secs: 60,
            ip_connection_attempts: IpConnectionAttempts::default(),
            key_update: KeyUpdateSettings::default(),
            concurrency: ConcurrencySettings::default(),
            supported_algorithms: SupportedAlgorithms::default(),
            global_shared_secret: None,
        }
    }
}

/// `Message.*` settings (§4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSettings {
    /// Accepted clock skew for a frame's timestamp, in seconds.
    pub age_tolerance_secs: u64,
    /// Minimum random-prefix length.
    pub min_random_data_prefix_size: u16,
    /// Maximum random-prefix length.
    pub max_random_data_prefix_size: u16,
    /// Minimum internal random padding size.
    pub min_internal_random_data_size: u16,
    /// Maximum internal random padding size.
    pub max_internal_random_data_size: u16,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            age_tolerance_secs: 600,
            min_random_data_prefix_size: 0,
            max_random_data_prefix_size: 64,
            min_internal_random_data_size: 0,
            max_internal_random_data_size: 64,
        }
    }
}

/// `Noise.*` settings (§4.6, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseSettings {
    /// Whether noise injection is enabled at all.
    pub enabled: bool,
    /// Scheduling interval, in milliseconds.
    pub time_interval_ms: u64,
    /// Minimum noise messages scheduled per interval.
    pub min_messages_per_interval: u32,
    /// Maximum noise messages scheduled per interval.
    pub max_messages_per_interval: u32,
    /// Minimum noise message payload size, in bytes.
    pub min_message_size: u32,
    /// Maximum noise message payload size, in bytes.
    pub max_message_size: u32,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            time_interval_ms: 1000,
            min_messages_per_interval: 0,
            max_messages_per_interval: 2,
            min_message_size: 16,
            max_message_size: 1024,
        }
    }
}

/// `Relay.*` settings (§4.14, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Connection-attempt rate limit applied to relay requests.
    pub ip_connection_attempts: IpConnectionAttempts,
    /// CIDR leading-bits used when excluding networks from relay path
    /// selection, IPv4.
    pub ipv4_excluded_networks_cidr_leading_bits: u8,
    /// CIDR leading-bits used when excluding networks from relay path
    /// selection, IPv6.
    pub ipv6_excluded_networks_cidr_leading_bits: u8,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            ip_connection_attempts: IpConnectionAttempts::default(),
            ipv4_excluded_networks_cidr_leading_bits: 24,
            ipv6_excluded_networks_cidr_leading_bits: 128,
        }
    }
}

/// The complete settings surface (§6). Built programmatically or loaded
/// from a TOML file; `validate()` must run at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Local policy and protocol settings.
    pub local: LocalSettings,
    /// Transport frame settings.
    pub message: MessageSettings,
    /// Noise / traffic-shaping settings.
    pub noise: NoiseSettings,
    /// Relay plane settings.
    pub relay: RelaySettings,
}

/// Everything that can be wrong with a loaded or constructed [`Settings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// A min/max pair was inverted.
    #[error("{field}: min ({min}) exceeds max ({max})")]
    InvertedRange {
        /// Which field pair failed.
        field: &'static str,
        /// The minimum value supplied.
        min: u64,
        /// The maximum value supplied.
        max: u64,
    },
    /// A preference vector that must be non-empty was empty.
    #[error("{0}: preference vector must not be empty")]
    EmptyPreferenceVector(&'static str),
    /// A concurrency setting was zero where at least one is required.
    #[error("{0}: must be at least 1")]
    MustBePositive(&'static str),
}

impl Settings {
    /// Validate every constraint named in §6 ("All constraints are
    /// validated at startup").
    pub fn validate(&self) -> Result<(), SettingsError> {
        let ku = &self.local.key_update;
        if ku.min_interval_secs > ku.max_interval_secs {
            return Err(SettingsError::InvertedRange {
                field: "local.key_update.{min,max}_interval_secs",
                min: ku.min_interval_secs,
                max: ku.max_interval_secs,
            });
        }

        let msg = &self.message;
        if u64::from(msg.min_random_data_prefix_size) > u64::from(msg.max_random_data_prefix_size) {
            return Err(SettingsError::InvertedRange {
                field: "message.{min,max}_random_data_prefix_size",
                min: u64::from(msg.min_random_data_prefix_size),
                max: u64::from(msg.max_random_data_prefix_size),
            });
        }
        if u64::from(msg.min_internal_random_data_size) > u64::from(msg.max_internal_random_data_size) {
            return Err(SettingsError::InvertedRange {
                field: "message.{min,max}_internal_random_data_size",
                min: u64::from(msg.min_internal_random_data_size),
                max: u64::from(msg.max_internal_random_data_size),
            });
        }

        let noise = &self.noise;
        if u64::from(noise.min_messages_per_interval) > u64::from(noise.max_messages_per_interval) {
            return Err(SettingsError::InvertedRange {
                field: "noise.{min,max}_messages_per_interval",
                min: u64::from(noise.min_messages_per_interval),
                max: u64::from(noise.max_messages_per_interval),
            });
        }
        if u64::from(noise.min_message_size) > u64::from(noise.max_message_size) {
            return Err(SettingsError::InvertedRange {
                field: "noise.{min,max}_message_size",
                min: u64::from(noise.min_message_size),
                max: u64::from(noise.max_message_size),
            });
        }

        let algos = &self.local.supported_algorithms;
        if algos.hash.is_empty() {
            return Err(SettingsError::EmptyPreferenceVector("local.supported_algorithms.hash"));
        }
        if algos.primary_asymmetric.is_empty() {
            return Err(SettingsError::EmptyPreferenceVector(
                "local.supported_algorithms.primary_asymmetric",
            ));
        }
        if algos.secondary_asymmetric.is_empty() {
            return Err(SettingsError::EmptyPreferenceVector(
                "local.supported_algorithms.secondary_asymmetric",
            ));
        }
        if algos.symmetric.is_empty() {
            return Err(SettingsError::EmptyPreferenceVector("local.supported_algorithms.symmetric"));
        }

        let conc = &self.local.concurrency;
        if conc.min_thread_pools == 0 {
            return Err(SettingsError::MustBePositive("local.concurrency.min_thread_pools"));
        }
        if conc.min_threads_per_pool == 0 {
            return Err(SettingsError::MustBePositive("local.concurrency.min_threads_per_pool"));
        }
        if conc.worker_threads_max_burst == 0 {
            return Err(SettingsError::MustBePositive("local.concurrency.worker_threads_max_burst"));
        }

        Ok(())
    }

    /// `Local.MaxHandshakeDuration` as a [`Duration`].
    #[must_use]
    pub fn max_handshake_duration(&self) -> Duration {
        Duration::from_secs(self.local.max_handshake_duration_secs)
    }

    /// `Message.AgeTolerance` as a [`Duration`].
    #[must_use]
    pub fn age_tolerance(&self) -> Duration {
        Duration::from_secs(self.message.age_tolerance_secs)
    }
}

mod gss_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_ref().map(hex::encode).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let hex_str: Option<String> = Option::deserialize(deserializer)?;
        hex_str
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn inverted_key_update_range_is_rejected() {
        let mut settings = Settings::default();
        settings.local.key_update.min_interval_secs = 100;
        settings.local.key_update.max_interval_secs = 10;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_preference_vector_is_rejected() {
        let mut settings = Settings::default();
        settings.local.supported_algorithms.hash.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_thread_pools_is_rejected() {
        let mut settings = Settings::default();
        settings.local.concurrency.min_thread_pools = 0;
        assert!(settings.validate().is_err());
    }
}
