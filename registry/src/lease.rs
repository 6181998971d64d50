use chrono::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{RegistryError, Result};

pub const DEFAULT_MIN_LEASE: u32 = 30;
pub const DEFAULT_MAX_LEASE: u32 = 27 * 3600;
pub const DEFAULT_MIN_KEY_LEASE: u32 = 30;
pub const DEFAULT_MAX_KEY_LEASE: u32 = 189 * 3600;

/// Bounds, in seconds, that requested leases are clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    pub min_lease: u32,
    pub max_lease: u32,
    pub min_key_lease: u32,
    pub max_key_lease: u32,
}

/// Lease and key lease actually granted to a registration, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantedLease {
    pub lease: u32,
    pub key_lease: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            min_lease: DEFAULT_MIN_LEASE,
            max_lease: DEFAULT_MAX_LEASE,
            min_key_lease: DEFAULT_MIN_KEY_LEASE,
            max_key_lease: DEFAULT_MAX_KEY_LEASE,
        }
    }
}

impl LeaseConfig {
    /// Checks both ranges are ordered and that the key-lease range sits at
    /// or above the lease range, so a granted key lease never undercuts the
    /// granted lease.
    pub fn validate(&self) -> Result<()> {
        if self.min_lease > self.max_lease {
            return Err(RegistryError::InvalidArgs(format!(
                "min lease {} exceeds max lease {}",
                self.min_lease, self.max_lease
            )));
        }
        if self.min_key_lease > self.max_key_lease {
            return Err(RegistryError::InvalidArgs(format!(
                "min key lease {} exceeds max key lease {}",
                self.min_key_lease, self.max_key_lease
            )));
        }
        if self.min_lease > self.min_key_lease || self.max_lease > self.max_key_lease {
            return Err(RegistryError::InvalidArgs(
                "key lease range must not be below lease range".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grant_lease(&self, requested: u32) -> u32 {
        requested.clamp(self.min_lease, self.max_lease)
    }

    pub fn grant_key_lease(&self, requested: u32) -> u32 {
        requested.clamp(self.min_key_lease, self.max_key_lease)
    }

    /// Clamps a requested lease pair. Negative durations are rejected;
    /// anything else succeeds with the clamped values.
    pub fn grant(&self, requested_lease: Duration, requested_key_lease: Duration) -> Result<GrantedLease> {
        let lease = self.grant_lease(whole_seconds(requested_lease, "lease")?);
        let key_lease = self
            .grant_key_lease(whole_seconds(requested_key_lease, "key lease")?)
            .max(lease);

        Ok(GrantedLease { lease, key_lease })
    }
}

fn whole_seconds(duration: Duration, what: &str) -> Result<u32> {
    if duration < Duration::zero() {
        return Err(RegistryError::InvalidArgs(format!("negative {}: {}", what, duration)));
    }
    Ok(u32::try_from(duration.num_seconds()).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LeaseConfig {
        LeaseConfig {
            min_lease: 30,
            max_lease: 7200,
            min_key_lease: 30,
            max_key_lease: 14400,
        }
    }

    #[test]
    fn test_default_is_valid() {
        assert!(LeaseConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_ranges() {
        let mut cfg = config();
        cfg.min_lease = 8000;
        assert!(matches!(cfg.validate(), Err(RegistryError::InvalidArgs(_))));

        let mut cfg = config();
        cfg.min_key_lease = 20000;
        assert!(matches!(cfg.validate(), Err(RegistryError::InvalidArgs(_))));

        let mut cfg = config();
        cfg.max_key_lease = 3600;
        assert!(matches!(cfg.validate(), Err(RegistryError::InvalidArgs(_))));
    }

    #[test]
    fn test_grant_clamps_into_range() {
        let cfg = config();

        let granted = cfg.grant(Duration::seconds(10), Duration::seconds(10)).unwrap();
        assert_eq!(granted, GrantedLease { lease: 30, key_lease: 30 });

        let granted = cfg.grant(Duration::seconds(90000), Duration::seconds(90000)).unwrap();
        assert_eq!(granted, GrantedLease { lease: 7200, key_lease: 14400 });

        let granted = cfg.grant(Duration::seconds(3600), Duration::seconds(7200)).unwrap();
        assert_eq!(granted, GrantedLease { lease: 3600, key_lease: 7200 });
    }

    #[test]
    fn test_grant_raises_key_lease_to_lease() {
        let granted = config().grant(Duration::seconds(3600), Duration::seconds(60)).unwrap();
        assert_eq!(granted.key_lease, 3600);
    }

    #[test]
    fn test_grant_rejects_negative() {
        let cfg = config();
        assert!(matches!(
            cfg.grant(Duration::seconds(-1), Duration::seconds(60)),
            Err(RegistryError::InvalidArgs(_))
        ));
        assert!(matches!(
            cfg.grant(Duration::seconds(60), Duration::milliseconds(-5)),
            Err(RegistryError::InvalidArgs(_))
        ));
    }
}
