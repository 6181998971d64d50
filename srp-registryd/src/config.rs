use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::DEFAULT_DOMAIN;
use shared::types::AddressMode;
use srp_registry::{LeaseConfig, RegistryOptions};
use srp_registry::lease::{
    DEFAULT_MAX_KEY_LEASE, DEFAULT_MAX_LEASE, DEFAULT_MIN_KEY_LEASE, DEFAULT_MIN_LEASE,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub registry: RegistryConfig,
    #[serde(default)]
    pub lease: LeaseSection,
    #[serde(default)]
    pub anycast: AnycastConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub interface: String,
    pub address: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseSection {
    #[serde(default = "default_min_lease")]
    pub min_lease_secs: u32,
    #[serde(default = "default_max_lease")]
    pub max_lease_secs: u32,
    #[serde(default = "default_min_key_lease")]
    pub min_key_lease_secs: u32,
    #[serde(default = "default_max_key_lease")]
    pub max_key_lease_secs: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnycastConfig {
    #[serde(default)]
    pub address_mode: AddressMode,
    #[serde(default)]
    pub sequence_number: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Upper bound between expiry ticks; ticks also run at the next deadline
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_min_lease() -> u32 {
    DEFAULT_MIN_LEASE
}

fn default_max_lease() -> u32 {
    DEFAULT_MAX_LEASE
}

fn default_min_key_lease() -> u32 {
    DEFAULT_MIN_KEY_LEASE
}

fn default_max_key_lease() -> u32 {
    DEFAULT_MAX_KEY_LEASE
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/srp-registry/snapshot.db")
}

fn default_tick_interval() -> u64 {
    1
}

fn default_listen() -> String {
    "[::]:8053".to_string()
}

impl Default for LeaseSection {
    fn default() -> Self {
        Self {
            min_lease_secs: default_min_lease(),
            max_lease_secs: default_max_lease(),
            min_key_lease_secs: default_min_key_lease(),
            max_key_lease_secs: default_max_key_lease(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            tick_interval_secs: default_tick_interval(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl LeaseSection {
    pub fn to_lease_config(&self) -> LeaseConfig {
        LeaseConfig {
            min_lease: self.min_lease_secs,
            max_lease: self.max_lease_secs,
            min_key_lease: self.min_key_lease_secs,
            max_key_lease: self.max_key_lease_secs,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config
            .lease
            .to_lease_config()
            .validate()
            .context("Invalid [lease] section")?;
        Ok(config)
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            domain: self.registry.domain.clone(),
            lease_config: self.lease.to_lease_config(),
            address_mode: self.anycast.address_mode,
            sequence_number: self.anycast.sequence_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [registry]
            interface = "wpan0"
            address = "fd00::1"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.domain, DEFAULT_DOMAIN);
        assert!(config.registry.enabled);
        assert_eq!(config.lease.to_lease_config(), LeaseConfig::default());
        assert_eq!(config.anycast.address_mode, AddressMode::Unicast);
        assert_eq!(config.api.listen, "[::]:8053");
        assert_eq!(config.snapshot.tick_interval_secs, 1);
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            [registry]
            interface = "wpan0"
            address = "fd00::1"
            domain = "home.arpa"
            enabled = false

            [lease]
            min_lease_secs = 30
            max_lease_secs = 7200
            min_key_lease_secs = 30
            max_key_lease_secs = 14400

            [anycast]
            address_mode = "anycast"
            sequence_number = 7

            [snapshot]
            db_path = "/tmp/srp.db"
            tick_interval_secs = 5
            "#,
        )
        .unwrap();

        let options = config.registry_options();
        assert_eq!(options.domain, "home.arpa");
        assert_eq!(options.lease_config.max_key_lease, 14400);
        assert_eq!(options.address_mode, AddressMode::Anycast);
        assert_eq!(options.sequence_number, 7);
        assert_eq!(config.snapshot.db_path, PathBuf::from("/tmp/srp.db"));
    }

    #[test]
    fn test_rejects_inverted_lease_range() {
        let result = Config::parse(
            r#"
            [registry]
            interface = "wpan0"
            address = "fd00::1"

            [lease]
            min_lease_secs = 600
            max_lease_secs = 60
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_wide_sequence_number() {
        let result = Config::parse(
            r#"
            [registry]
            interface = "wpan0"
            address = "fd00::1"

            [anycast]
            sequence_number = 300
            "#,
        );
        assert!(result.is_err());
    }
}
