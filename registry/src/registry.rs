use std::net::Ipv6Addr;
use chrono::{DateTime, Duration, Utc};
use shared::protocol::DEFAULT_DOMAIN;
use shared::types::{
    AddressMode, DeregistrationRequest, HostView, RegistrationRequest, RegistryState,
    ServiceRegistration, ServiceView,
};
use crate::anycast::AnycastCoordinator;
use crate::error::{RegistryError, Result};
use crate::expiry::{ExpiryEngine, ExpiryReport};
use crate::lease::LeaseConfig;
use crate::name;
use crate::query::{self, ServiceFilter};
use crate::record::{HostHandle, ServiceHandle, ServiceKey};
use crate::store::{self, RecordStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    pub domain: String,
    pub lease_config: LeaseConfig,
    pub address_mode: AddressMode,
    pub sequence_number: u8,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            lease_config: LeaseConfig::default(),
            address_mode: AddressMode::default(),
            sequence_number: 0,
        }
    }
}

/// One registry instance: records, their expiry schedule and the
/// configuration they are granted under.
///
/// Everything runs on the caller's thread and time only moves when the
/// caller passes a new `now`.
#[derive(Debug)]
pub struct Registry {
    state: RegistryState,
    enabled: bool,
    transport_ready: bool,
    domain: String,
    lease_config: LeaseConfig,
    anycast: AnycastCoordinator,
    store: RecordStore,
    expiry: ExpiryEngine,
}

impl Registry {
    /// Creates a disabled registry. The transport is assumed ready until
    /// told otherwise.
    pub fn new(options: RegistryOptions) -> Result<Self> {
        options.lease_config.validate()?;
        let domain = name::normalize_domain(&options.domain)?;

        Ok(Self {
            state: RegistryState::Disabled,
            enabled: false,
            transport_ready: true,
            domain,
            lease_config: options.lease_config,
            anycast: AnycastCoordinator::new(options.address_mode, options.sequence_number),
            store: RecordStore::new(),
            expiry: ExpiryEngine::new(),
        })
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.update_state();
    }

    /// Reports whether the transport collaborator can currently deliver
    /// requests. An enabled registry without transport is `Stopped`.
    pub fn set_transport_ready(&mut self, ready: bool) {
        self.transport_ready = ready;
        self.update_state();
    }

    fn update_state(&mut self) {
        let next = match (self.enabled, self.transport_ready) {
            (false, _) => RegistryState::Disabled,
            (true, true) => RegistryState::Running,
            (true, false) => RegistryState::Stopped,
        };
        if next == self.state {
            return;
        }

        if self.state == RegistryState::Running {
            tracing::info!("Dropping {} hosts on leaving running state", self.store.len());
            self.store.clear();
            self.expiry.clear();
        }
        tracing::info!("Registry state {} -> {}", self.state, next);
        self.state = next;
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn set_domain(&mut self, domain: &str) -> Result<()> {
        self.ensure_disabled("domain")?;
        self.domain = name::normalize_domain(domain)?;
        tracing::info!("Domain set to {}", self.domain);
        Ok(())
    }

    pub fn lease_config(&self) -> LeaseConfig {
        self.lease_config
    }

    /// Replaces the lease bounds. Allowed in any state; leases already
    /// granted keep their deadlines.
    pub fn set_lease_config(&mut self, config: LeaseConfig) -> Result<()> {
        config.validate()?;
        self.lease_config = config;
        tracing::info!("Lease config set to {:?}", config);
        Ok(())
    }

    pub fn anycast(&self) -> AnycastCoordinator {
        self.anycast
    }

    pub fn address_mode(&self) -> AddressMode {
        self.anycast.address_mode()
    }

    pub fn set_address_mode(&mut self, mode: AddressMode) -> Result<()> {
        self.ensure_disabled("address mode")?;
        self.anycast.set_address_mode(mode);
        tracing::info!("Address mode set to {}", mode);
        Ok(())
    }

    pub fn sequence_number(&self) -> u8 {
        self.anycast.sequence_number()
    }

    pub fn set_sequence_number(&mut self, sequence_number: u8) -> Result<()> {
        self.ensure_disabled("anycast sequence number")?;
        self.anycast.set_sequence_number(sequence_number);
        tracing::info!("Anycast sequence number set to {}", sequence_number);
        Ok(())
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn register_host(
        &mut self,
        full_name: &str,
        addresses: Vec<Ipv6Addr>,
        requested_lease: Duration,
        requested_key_lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<HostHandle> {
        self.ensure_running()?;
        let handle = self.store.register_host(
            &self.lease_config,
            full_name,
            addresses,
            requested_lease,
            requested_key_lease,
            now,
        )?;
        self.expiry.track(&self.store, &handle);
        Ok(handle)
    }

    pub fn register_service(
        &mut self,
        host: &HostHandle,
        registration: &ServiceRegistration,
    ) -> Result<ServiceHandle> {
        self.ensure_running()?;
        let handle = self.store.register_service(host, registration)?;
        self.expiry.track(&self.store, host);
        Ok(handle)
    }

    pub fn deregister_host(&mut self, full_name: &str) -> Result<()> {
        self.ensure_running()?;
        self.store.deregister_host(full_name)?;
        if let Some(handle) = self.store.find_host(full_name) {
            self.expiry.track(&self.store, &handle);
        }
        Ok(())
    }

    pub fn deregister_service(&mut self, host: &HostHandle, instance_name: &str) -> Result<()> {
        self.ensure_running()?;
        self.store.deregister_service(host, instance_name)?;
        self.expiry.track(&self.store, host);
        Ok(())
    }

    pub fn find_host(&self, full_name: &str) -> Option<HostHandle> {
        self.store.find_host(full_name)
    }

    pub fn find_service(&self, host: &HostHandle, instance_name: &str) -> Option<ServiceHandle> {
        self.store.find_service(host, instance_name)
    }

    /// Applies a decoded registration update as one unit: it is checked in
    /// full before anything is stored. A zero lease removes the host.
    pub fn process_registration(
        &mut self,
        request: &RegistrationRequest,
        now: DateTime<Utc>,
    ) -> Result<HostView> {
        self.ensure_running()?;

        if !request.key_validated {
            return Err(RegistryError::InvalidArgs(format!(
                "key for {} was not validated",
                request.full_name
            )));
        }
        if !name::is_sub_domain(&request.full_name, &self.domain) {
            return Err(RegistryError::InvalidArgs(format!(
                "{} is not within domain {}",
                request.full_name, self.domain
            )));
        }
        let lease = seconds(request.lease_secs, "lease")?;
        let key_lease = seconds(request.key_lease_secs, "key lease")?;

        if request.lease_secs == 0 {
            self.deregister_host(&request.full_name)?;
            return self.host_view(&request.full_name);
        }

        self.check_services(request)?;

        let host = self.store.register_host(
            &self.lease_config,
            &request.full_name,
            request.addresses.clone(),
            lease,
            key_lease,
            now,
        )?;

        let (subs, bases): (Vec<_>, Vec<_>) = request
            .services
            .iter()
            .partition(|service| service.sub_type_label.is_some());
        for service in bases.into_iter().chain(subs) {
            self.store.register_service(&host, service)?;
        }

        self.expiry.track(&self.store, &host);
        self.host_view(&request.full_name)
    }

    pub fn process_deregistration(&mut self, request: &DeregistrationRequest) -> Result<()> {
        match &request.instance_name {
            Some(instance_name) => {
                let host = self
                    .find_host(&request.full_name)
                    .ok_or_else(|| RegistryError::NotFound(format!("host {}", request.full_name)))?;
                self.deregister_service(&host, instance_name)
            }
            None => self.deregister_host(&request.full_name),
        }
    }

    /// Runs expiry as of `now`. Handles taken before a tick may no longer
    /// resolve afterwards.
    pub fn tick(&mut self, now: DateTime<Utc>) -> ExpiryReport {
        self.expiry.tick(&mut self.store, now)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.expiry.next_deadline()
    }

    pub fn host_views(&self) -> Vec<HostView> {
        self.store.host_views()
    }

    pub fn service_views(&self, filter: &ServiceFilter) -> Vec<ServiceView> {
        self.store.service_views(filter)
    }

    fn host_view(&self, full_name: &str) -> Result<HostView> {
        self.find_host(full_name)
            .and_then(|handle| self.store.host(&handle))
            .map(query::host_view)
            .ok_or_else(|| RegistryError::NotFound(format!("host {}", full_name)))
    }

    /// Rejects a request that would fail half way through: bad service
    /// names, services on a tombstoned host, or sub-types without a base.
    fn check_services(&self, request: &RegistrationRequest) -> Result<()> {
        let existing = self
            .find_host(&request.full_name)
            .and_then(|handle| self.store.host(&handle));

        for service in &request.services {
            store::validate_service(service)?;

            let Some(label) = &service.sub_type_label else {
                continue;
            };
            let in_request = request.services.iter().any(|other| {
                other.sub_type_label.is_none() && other.instance_name == service.instance_name
            });
            // The host is revived by this request, but its old services
            // stay tombstoned, so only an active base counts.
            let in_store = existing.is_some_and(|host| {
                host.services
                    .get(&ServiceKey::base(&service.instance_name))
                    .is_some_and(|base| !base.is_deleted())
            });
            if !in_request && !in_store {
                return Err(RegistryError::OrphanSubType {
                    instance: service.instance_name.clone(),
                    sub_type: label.clone(),
                });
            }
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state != RegistryState::Running {
            return Err(RegistryError::InvalidState(format!("registry is {}", self.state)));
        }
        Ok(())
    }

    fn ensure_disabled(&self, setting: &str) -> Result<()> {
        if self.state != RegistryState::Disabled {
            return Err(RegistryError::InvalidState(format!(
                "{} can only change while disabled (registry is {})",
                setting, self.state
            )));
        }
        Ok(())
    }
}

fn seconds(secs: i64, what: &str) -> Result<Duration> {
    if secs < 0 {
        return Err(RegistryError::InvalidArgs(format!("negative {}: {}", what, secs)));
    }
    Duration::try_seconds(secs)
        .ok_or_else(|| RegistryError::InvalidArgs(format!("{} out of range: {}", what, secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> Registry {
        let mut registry = Registry::new(RegistryOptions::default()).unwrap();
        registry.set_enabled(true);
        registry
    }

    #[test]
    fn test_state_transitions() {
        let mut registry = Registry::new(RegistryOptions::default()).unwrap();
        assert_eq!(registry.state(), RegistryState::Disabled);

        registry.set_enabled(true);
        assert_eq!(registry.state(), RegistryState::Running);

        registry.set_transport_ready(false);
        assert_eq!(registry.state(), RegistryState::Stopped);

        registry.set_transport_ready(true);
        assert_eq!(registry.state(), RegistryState::Running);

        registry.set_enabled(false);
        assert_eq!(registry.state(), RegistryState::Disabled);
    }

    #[test]
    fn test_leaving_running_clears_records() {
        let mut registry = running();
        registry
            .register_host("a", vec![], Duration::seconds(60), Duration::seconds(60), Utc::now())
            .unwrap();

        registry.set_transport_ready(false);
        assert!(registry.store().is_empty());
        assert_eq!(registry.next_deadline(), None);
    }

    #[test]
    fn test_mutations_require_running() {
        let mut registry = Registry::new(RegistryOptions::default()).unwrap();
        let result =
            registry.register_host("a", vec![], Duration::seconds(60), Duration::seconds(60), Utc::now());
        assert!(matches!(result, Err(RegistryError::InvalidState(_))));
    }

    #[test]
    fn test_anycast_settings_require_disabled() {
        let mut registry = running();
        assert!(matches!(
            registry.set_sequence_number(5),
            Err(RegistryError::InvalidState(_))
        ));
        assert!(matches!(
            registry.set_address_mode(AddressMode::Anycast),
            Err(RegistryError::InvalidState(_))
        ));
        assert!(matches!(registry.set_domain("example.com"), Err(RegistryError::InvalidState(_))));

        registry.set_enabled(false);
        registry.set_sequence_number(5).unwrap();
        registry.set_address_mode(AddressMode::Anycast).unwrap();
        registry.set_domain("example.com").unwrap();
        assert_eq!(registry.sequence_number(), 5);
        assert_eq!(registry.address_mode(), AddressMode::Anycast);
        assert_eq!(registry.domain(), "example.com.");
    }

    #[test]
    fn test_lease_config_allowed_while_running() {
        let mut registry = running();
        let config = LeaseConfig {
            min_lease: 60,
            max_lease: 600,
            min_key_lease: 60,
            max_key_lease: 6000,
        };
        registry.set_lease_config(config).unwrap();
        assert_eq!(registry.lease_config(), config);

        let invalid = LeaseConfig { min_lease: 700, ..config };
        assert!(matches!(
            registry.set_lease_config(invalid),
            Err(RegistryError::InvalidArgs(_))
        ));
        assert_eq!(registry.lease_config(), config);
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let options = RegistryOptions {
            domain: String::new(),
            ..RegistryOptions::default()
        };
        assert!(matches!(Registry::new(options), Err(RegistryError::InvalidArgs(_))));
    }

    #[test]
    fn test_seconds() {
        assert_eq!(seconds(30, "lease"), Ok(Duration::seconds(30)));
        assert!(matches!(seconds(-1, "lease"), Err(RegistryError::InvalidArgs(_))));
        assert!(matches!(seconds(i64::MAX, "lease"), Err(RegistryError::InvalidArgs(_))));
    }
}
