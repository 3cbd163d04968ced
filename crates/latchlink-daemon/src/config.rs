// ============================================
// File: crates/latchlink-daemon/src/config.rs
// ============================================
//! # Daemon Configuration
//!
//! ## Creation Reason
//! Provides configuration management for the latchlink daemon, loaded
//! from a TOML file with an environment override for the API key.
//!
//! ## Main Functionality
//! - `DaemonConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Per-section validation
//! - Defaults matching the lock's timing behavior
//!
//! ## Configuration Sections
//! - `lock`: Which lock to talk to (serial, address, device id)
//! - `transport`: Direct radio or network proxy
//! - `cloud`: Identity service endpoint and API key
//! - `lifecycle`: Keep-alive, grace window, backoff, timeouts
//! - `storage`: Where the credential and user map live
//! - `logging`: Log level
//!
//! ## Example Configuration
//! ```toml
//! [lock]
//! name = "Front door"
//! serial = "10530206-030484"
//! device_id = 12345
//!
//! [transport]
//! mode = "proxy"
//! proxy_addr = "192.168.1.40:7600"
//!
//! [cloud]
//! api_key = "tk_xxx"
//!
//! [lifecycle]
//! keepalive_secs = 45
//! grace_secs = 15
//! backoff_secs = [2, 5, 10, 30, 60]
//! poll_secs = 600
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `LATCHLINK_API_KEY` wins over `cloud.api_key`
//! - `keepalive_secs` must stay below the lock's idle-disconnect timeout
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use latchlink_common::types::{DeviceAddress, DeviceId, SerialNumber};
use latchlink_transport::ScanFilter;

use crate::error::{DaemonError, Result};

/// Environment variable overriding `cloud.api_key`.
pub const API_KEY_ENV: &str = "LATCHLINK_API_KEY";

// ============================================
// DaemonConfig
// ============================================

/// Main daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Lock selection.
    #[serde(default)]
    pub lock: LockConfig,

    /// Radio transport.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Cloud identity service.
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Connection lifecycle timing.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Persisted state.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DaemonError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| DaemonError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error if the string does not parse or validate.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DaemonError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        self.lock.validate()?;
        self.transport.validate()?;
        self.cloud.validate()?;
        self.lifecycle.validate()?;
        self.storage.validate()?;
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Scan filter selecting the configured lock.
    ///
    /// # Errors
    /// `ConfigInvalid` if neither serial nor address is set.
    pub fn scan_filter(&self) -> Result<ScanFilter> {
        let timeout = self.transport.scan_timeout();
        let mut filter = match self.lock.serial_number()? {
            Some(serial) => ScanFilter::for_serial(&serial, timeout),
            None => ScanFilter::new(timeout),
        };
        if let Some(address) = self.lock.device_address() {
            filter = filter.with_address(address);
        }
        if filter.service_uuid.is_none() && filter.address.is_none() {
            return Err(DaemonError::config_invalid(
                "lock",
                "set serial or address to select a lock",
            ));
        }
        Ok(filter)
    }
}

// ============================================
// LockConfig
// ============================================

/// Lock selection section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Display name.
    #[serde(default = "default_lock_name")]
    pub name: String,

    /// Serial printed on the lock (`XXXXXXXX-XXXXXX`).
    #[serde(default)]
    pub serial: Option<String>,

    /// Radio address, if known.
    #[serde(default)]
    pub address: Option<String>,

    /// Cloud device id.
    #[serde(default)]
    pub device_id: Option<u64>,
}

fn default_lock_name() -> String {
    "Lock".to_string()
}

impl LockConfig {
    fn validate(&self) -> Result<()> {
        self.serial_number()?;
        if matches!(&self.address, Some(a) if a.trim().is_empty()) {
            return Err(DaemonError::config_invalid("lock.address", "cannot be empty"));
        }
        Ok(())
    }

    /// Parsed serial number.
    ///
    /// # Errors
    /// `ConfigInvalid` if the serial is malformed.
    pub fn serial_number(&self) -> Result<Option<SerialNumber>> {
        self.serial
            .as_deref()
            .map(|s| {
                s.parse::<SerialNumber>()
                    .map_err(|e| DaemonError::config_invalid("lock.serial", e.to_string()))
            })
            .transpose()
    }

    /// Configured address.
    #[must_use]
    pub fn device_address(&self) -> Option<DeviceAddress> {
        self.address.as_deref().map(DeviceAddress::new)
    }

    /// Configured device id.
    ///
    /// # Errors
    /// `ConfigInvalid` if unset.
    pub fn require_device_id(&self) -> Result<DeviceId> {
        self.device_id
            .map(DeviceId)
            .ok_or_else(|| DaemonError::config_invalid("lock.device_id", "required"))
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: default_lock_name(),
            serial: None,
            address: None,
            device_id: None,
        }
    }
}

// ============================================
// TransportConfig
// ============================================

/// Whether this build can drive a local Bluetooth adapter (`ble` feature).
pub const LOCAL_RADIO: bool = cfg!(feature = "ble");

/// How the lock is reached.
///
/// Defaults to `Direct` when the build has a local radio, else `Proxy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Radio attached to this host.
    Direct,
    /// Radio behind a network proxy.
    Proxy,
}

impl Default for TransportMode {
    fn default() -> Self {
        if LOCAL_RADIO {
            Self::Direct
        } else {
            Self::Proxy
        }
    }
}

/// Transport section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Direct or proxy.
    #[serde(default)]
    pub mode: TransportMode,

    /// Proxy `host:port` (proxy mode).
    #[serde(default)]
    pub proxy_addr: Option<String>,

    /// Scan duration in seconds.
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,

    /// Proxy connect and answer timeout in seconds.
    #[serde(default = "default_proxy_timeout")]
    pub proxy_timeout_secs: u64,
}

fn default_scan_timeout() -> u64 {
    10
}

fn default_proxy_timeout() -> u64 {
    10
}

impl TransportConfig {
    fn validate(&self) -> Result<()> {
        match self.mode {
            TransportMode::Direct if !LOCAL_RADIO => {
                return Err(DaemonError::config_invalid(
                    "transport.mode",
                    "direct needs a build with the `ble` feature; use proxy mode",
                ));
            }
            TransportMode::Proxy if self.proxy_addr.is_none() => {
                return Err(DaemonError::config_invalid(
                    "transport.proxy_addr",
                    "required in proxy mode",
                ));
            }
            _ => {}
        }
        if self.scan_timeout_secs == 0 {
            return Err(DaemonError::config_invalid(
                "transport.scan_timeout_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Scan duration.
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            proxy_addr: None,
            scan_timeout_secs: default_scan_timeout(),
            proxy_timeout_secs: default_proxy_timeout(),
        }
    }
}

// ============================================
// CloudConfig
// ============================================

/// Cloud identity service section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Personal API key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Renew this many days before the certificate expires.
    #[serde(default = "default_renewal_margin")]
    pub renewal_margin_days: u64,
}

fn default_base_url() -> String {
    "https://api.tedee.com/api/v37".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_renewal_margin() -> u64 {
    5
}

impl CloudConfig {
    fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(DaemonError::config_invalid("cloud.base_url", "cannot be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(DaemonError::config_invalid(
                "cloud.request_timeout_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// API key, preferring the environment.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone())
    }

    /// Renewal safety margin.
    #[must_use]
    pub const fn renewal_margin(&self) -> Duration {
        Duration::from_secs(self.renewal_margin_days * 24 * 3600)
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            renewal_margin_days: default_renewal_margin(),
        }
    }
}

// ============================================
// LifecycleConfig
// ============================================

/// Connection lifecycle timing section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Wire silence before a keep-alive probe, in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Delay before a drop is reported as unavailable, in seconds.
    #[serde(default = "default_grace")]
    pub grace_secs: u64,

    /// Reconnect delays in seconds; the last one repeats.
    #[serde(default = "default_backoff")]
    pub backoff_secs: Vec<u64>,

    /// Authenticated time after which the backoff sequence restarts.
    #[serde(default = "default_stable")]
    pub stable_secs: u64,

    /// Command response timeout in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Radio connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Handshake timeout in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Post-renewal authentication failures before a persistent error.
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures: u32,

    /// Consecutive bad frames before the link is torn down.
    #[serde(default = "default_max_protocol_errors")]
    pub max_protocol_errors: u32,

    /// How long `unlock_and_pull` waits for the unlocked state.
    #[serde(default = "default_pull_wait")]
    pub pull_wait_secs: u64,

    /// Period of the state and battery refresh while authenticated.
    #[serde(default = "default_poll")]
    pub poll_secs: u64,
}

fn default_keepalive() -> u64 {
    45
}

fn default_grace() -> u64 {
    15
}

fn default_backoff() -> Vec<u64> {
    vec![2, 5, 10, 30, 60]
}

fn default_stable() -> u64 {
    60
}

fn default_command_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    20
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_max_auth_failures() -> u32 {
    3
}

fn default_max_protocol_errors() -> u32 {
    8
}

fn default_pull_wait() -> u64 {
    15
}

fn default_poll() -> u64 {
    600
}

impl LifecycleConfig {
    fn validate(&self) -> Result<()> {
        let positive = [
            ("lifecycle.keepalive_secs", self.keepalive_secs),
            ("lifecycle.grace_secs", self.grace_secs),
            ("lifecycle.command_timeout_secs", self.command_timeout_secs),
            ("lifecycle.connect_timeout_secs", self.connect_timeout_secs),
            ("lifecycle.handshake_timeout_secs", self.handshake_timeout_secs),
            ("lifecycle.poll_secs", self.poll_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(DaemonError::config_invalid(field, "must be greater than 0"));
            }
        }
        if self.backoff_secs.is_empty() {
            return Err(DaemonError::config_invalid(
                "lifecycle.backoff_secs",
                "needs at least one delay",
            ));
        }
        if self.backoff_secs.windows(2).any(|w| w[1] < w[0]) {
            return Err(DaemonError::config_invalid(
                "lifecycle.backoff_secs",
                "delays must not decrease",
            ));
        }
        if self.max_auth_failures == 0 {
            return Err(DaemonError::config_invalid(
                "lifecycle.max_auth_failures",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Keep-alive period.
    #[must_use]
    pub const fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Grace window.
    #[must_use]
    pub const fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// Backoff sequence.
    #[must_use]
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_secs.iter().copied().map(Duration::from_secs).collect()
    }

    /// Sustained-success period.
    #[must_use]
    pub const fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_secs)
    }

    /// Command timeout.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Unlock-then-pull wait.
    #[must_use]
    pub const fn pull_wait(&self) -> Duration {
        Duration::from_secs(self.pull_wait_secs)
    }

    /// State and battery refresh period.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive(),
            grace_secs: default_grace(),
            backoff_secs: default_backoff(),
            stable_secs: default_stable(),
            command_timeout_secs: default_command_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
            max_auth_failures: default_max_auth_failures(),
            max_protocol_errors: default_max_protocol_errors(),
            pull_wait_secs: default_pull_wait(),
            poll_secs: default_poll(),
        }
    }
}

// ============================================
// StorageConfig
// ============================================

/// Persisted state section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the files below.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Credential record file name.
    #[serde(default = "default_credential_file")]
    pub credential_file: String,

    /// User map file name.
    #[serde(default = "default_users_file")]
    pub users_file: String,
}

fn default_data_dir() -> String {
    "/var/lib/latchlink".to_string()
}

fn default_credential_file() -> String {
    "credential.json".to_string()
}

fn default_users_file() -> String {
    "users.json".to_string()
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.data_dir.is_empty() {
            return Err(DaemonError::config_invalid("storage.data_dir", "cannot be empty"));
        }
        Ok(())
    }

    /// Full path of the credential file.
    #[must_use]
    pub fn credential_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.credential_file)
    }

    /// Full path of the user map file.
    #[must_use]
    pub fn users_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.users_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            credential_file: default_credential_file(),
            users_file: default_users_file(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal transport section valid in every build.
    const PROXY: &str = "[transport]\nmode = \"proxy\"\nproxy_addr = \"127.0.0.1:7600\"\n";

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.lifecycle.keepalive(), Duration::from_secs(45));
        assert_eq!(config.lifecycle.grace(), Duration::from_secs(15));
        assert_eq!(
            config.lifecycle.backoff(),
            [2, 5, 10, 30, 60].map(Duration::from_secs).to_vec()
        );
        assert_eq!(config.lifecycle.poll_interval(), Duration::from_secs(600));
        assert_eq!(config.cloud.renewal_margin(), Duration::from_secs(5 * 86_400));
    }

    #[test]
    fn test_default_mode_matches_build() {
        let mut config = DaemonConfig::default();
        if LOCAL_RADIO {
            assert_eq!(config.transport.mode, TransportMode::Direct);
            assert!(config.validate().is_ok());
        } else {
            // a radio-less build never defaults to a mode it cannot run
            assert_eq!(config.transport.mode, TransportMode::Proxy);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("proxy_addr"));

            config.transport.proxy_addr = Some("127.0.0.1:7600".into());
            assert!(config.validate().is_ok());

            config.transport.mode = TransportMode::Direct;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("ble"));
        }
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [lock]
            name = "Front door"
            serial = "10530206-030484"
            device_id = 12345

            [transport]
            mode = "proxy"
            proxy_addr = "192.168.1.40:7600"

            [cloud]
            api_key = "tk_test"
            renewal_margin_days = 7

            [lifecycle]
            keepalive_secs = 30
            backoff_secs = [1, 2, 4]

            [storage]
            data_dir = "/tmp/latchlink"

            [logging]
            level = "debug"
        "#;

        let config = DaemonConfig::from_str(toml).unwrap();
        assert_eq!(config.lock.require_device_id().unwrap(), DeviceId(12345));
        assert_eq!(config.transport.mode, TransportMode::Proxy);
        assert_eq!(config.cloud.renewal_margin_days, 7);
        assert_eq!(config.lifecycle.keepalive_secs, 30);
        assert_eq!(config.lifecycle.grace_secs, 15);
        assert_eq!(
            config.storage.credential_path(),
            PathBuf::from("/tmp/latchlink/credential.json")
        );

        let filter = config.scan_filter().unwrap();
        assert_eq!(
            filter.service_uuid.as_deref(),
            Some("10530000-0206-0304-8400-000000000000")
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(DaemonConfig::from_str("[transport]\nmode = \"proxy\"").is_err());

        let cases = [
            "[lifecycle]\nbackoff_secs = []",
            "[lifecycle]\nbackoff_secs = [10, 5]",
            "[lifecycle]\ngrace_secs = 0",
            "[lifecycle]\npoll_secs = 0",
            "[lock]\nserial = \"123\"",
        ];
        for case in cases {
            let toml = format!("{PROXY}{case}");
            assert!(DaemonConfig::from_str(&toml).is_err(), "accepted: {case}");
        }
    }

    #[test]
    fn test_scan_filter_needs_selection() {
        let config = DaemonConfig::default();
        assert!(config.scan_filter().is_err());

        let toml = format!("{PROXY}[lock]\naddress = \"aa:bb:cc:dd:ee:ff\"");
        let config = DaemonConfig::from_str(&toml).unwrap();
        let filter = config.scan_filter().unwrap();
        assert_eq!(filter.address, Some(DeviceAddress::new("AA:BB:CC:DD:EE:FF")));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = DaemonConfig::default();
        config.transport.proxy_addr = Some("127.0.0.1:7600".into());
        let parsed = DaemonConfig::from_str(&config.to_toml()).unwrap();
        assert_eq!(parsed.lifecycle, config.lifecycle);
        assert_eq!(parsed.transport.mode, config.transport.mode);
    }
}
