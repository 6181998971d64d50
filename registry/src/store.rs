use std::net::Ipv6Addr;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use shared::types::ServiceRegistration;
use crate::error::{RegistryError, Result};
use crate::expiry::RecordRef;
use crate::lease::LeaseConfig;
use crate::name;
use crate::record::{Host, HostHandle, HostId, RecordState, Service, ServiceHandle, ServiceKey};

/// Owns every host and, through them, every service.
///
/// Hosts are kept in insertion order, which is the traversal order of
/// the query iterators.
#[derive(Debug, Default)]
pub struct RecordStore {
    hosts: IndexMap<String, Host>,
    next_id: HostId,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Creates or refreshes a host. Requested durations are clamped into the
    /// configured ranges; only negative durations or a malformed name fail.
    pub fn register_host(
        &mut self,
        config: &LeaseConfig,
        full_name: &str,
        addresses: Vec<Ipv6Addr>,
        requested_lease: Duration,
        requested_key_lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<HostHandle> {
        name::validate_name(full_name)?;
        let granted = config.grant(requested_lease, requested_key_lease)?;
        let state = RecordState::granted(now, granted);

        if let Some(host) = self.hosts.get_mut(full_name) {
            if host.state.is_deleted() {
                tracing::info!("Reviving host {}", full_name);
            } else {
                tracing::debug!("Refreshing host {}", full_name);
            }
            host.addresses = addresses;
            host.state = state;
            host.granted = granted;
            // Active services share the host's lease; tombstones keep theirs.
            for service in host.services.values_mut() {
                if service.state.is_active() {
                    service.state = state;
                }
            }
            return Ok(host.handle());
        }

        let id = self.next_id;
        self.next_id += 1;

        let host = Host {
            id,
            full_name: full_name.to_string(),
            addresses,
            state,
            granted,
            services: IndexMap::new(),
        };
        let handle = host.handle();
        self.hosts.insert(full_name.to_string(), host);

        tracing::info!(
            "Registered host {} (lease {}s, key lease {}s)",
            full_name,
            granted.lease,
            granted.key_lease
        );
        Ok(handle)
    }

    /// Creates or refreshes a service under an active host. The service
    /// inherits the host's current lease deadlines.
    pub fn register_service(
        &mut self,
        host: &HostHandle,
        registration: &ServiceRegistration,
    ) -> Result<ServiceHandle> {
        validate_service(registration)?;

        let owner = self.host_mut(host)?;
        if owner.state.is_deleted() {
            return Err(RegistryError::InvalidState(format!(
                "host {} is deleted",
                owner.full_name
            )));
        }

        if let Some(label) = &registration.sub_type_label {
            let has_base = owner
                .services
                .get(&ServiceKey::base(&registration.instance_name))
                .is_some_and(|base| base.state.is_active());
            if !has_base {
                return Err(RegistryError::OrphanSubType {
                    instance: registration.instance_name.clone(),
                    sub_type: label.clone(),
                });
            }
        }

        let service = Service {
            host_id: owner.id,
            instance_name: registration.instance_name.clone(),
            service_type: registration.service_type.clone(),
            sub_type_label: registration.sub_type_label.clone(),
            port: registration.port,
            priority: registration.priority,
            weight: registration.weight,
            txt_data: registration.txt_data.clone(),
            state: owner.state,
        };
        let key = service.key();

        match owner.services.insert(key.clone(), service) {
            Some(_) => tracing::debug!("Refreshed service {:?} on {}", key, owner.full_name),
            None => tracing::info!(
                "Registered service {} ({}{}) on {}",
                registration.instance_name,
                registration.service_type,
                registration
                    .sub_type_label
                    .as_deref()
                    .map(|label| format!(", sub-type {}", label))
                    .unwrap_or_default(),
                owner.full_name
            ),
        }

        Ok(ServiceHandle { host: host.clone(), key })
    }

    /// Tombstones a host together with all of its services. Deregistering
    /// a tombstone again succeeds and changes nothing.
    pub fn deregister_host(&mut self, full_name: &str) -> Result<()> {
        let host = self
            .hosts
            .get_mut(full_name)
            .ok_or_else(|| RegistryError::NotFound(format!("host {}", full_name)))?;

        host.state.tombstone();
        for service in host.services.values_mut() {
            service.state.tombstone();
        }

        tracing::info!("Deregistered host {}", full_name);
        Ok(())
    }

    /// Tombstones a service instance and its sub-types, leaving the host and
    /// sibling instances untouched.
    pub fn deregister_service(&mut self, host: &HostHandle, instance_name: &str) -> Result<()> {
        let owner = self.host_mut(host)?;
        if !owner.services.contains_key(&ServiceKey::base(instance_name)) {
            return Err(RegistryError::NotFound(format!(
                "service {} on {}",
                instance_name, owner.full_name
            )));
        }

        for service in owner
            .services
            .values_mut()
            .filter(|service| service.instance_name == instance_name)
        {
            service.state.tombstone();
        }

        tracing::info!("Deregistered service {} on {}", instance_name, owner.full_name);
        Ok(())
    }

    pub fn find_host(&self, full_name: &str) -> Option<HostHandle> {
        self.hosts.get(full_name).map(Host::handle)
    }

    /// Looks up the base-type service of an instance.
    pub fn find_service(&self, host: &HostHandle, instance_name: &str) -> Option<ServiceHandle> {
        let key = ServiceKey::base(instance_name);
        self.host(host)?.services.contains_key(&key).then(|| ServiceHandle {
            host: host.clone(),
            key,
        })
    }

    /// Resolves a handle. Fails once the host has been purged.
    pub fn host(&self, handle: &HostHandle) -> Option<&Host> {
        self.hosts
            .get(&handle.full_name)
            .filter(|host| host.id == handle.id)
    }

    pub fn service(&self, handle: &ServiceHandle) -> Option<&Service> {
        self.host(&handle.host)?.services.get(&handle.key)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Host> + '_ {
        self.hosts.values()
    }

    pub(crate) fn clear(&mut self) {
        self.hosts.clear();
    }

    /// Tombstones a record whose lease ran out by `now`. Returns every
    /// record that changed state, including services cascaded from a host.
    pub(crate) fn expire_lease(
        &mut self,
        record: &RecordRef,
        now: DateTime<Utc>,
    ) -> Vec<(RecordRef, RecordState)> {
        let mut changed = Vec::new();

        match record {
            RecordRef::Host(handle) => {
                let Ok(host) = self.host_mut(handle) else {
                    return changed;
                };
                if !lease_passed(&host.state, now) {
                    return changed;
                }
                host.state.tombstone();
                changed.push((record.clone(), host.state));
                tracing::info!("Lease expired for host {}", host.full_name);

                for (key, service) in host.services.iter_mut() {
                    if service.state.tombstone() {
                        changed.push((
                            RecordRef::Service(ServiceHandle {
                                host: handle.clone(),
                                key: key.clone(),
                            }),
                            service.state,
                        ));
                    }
                }
            }
            RecordRef::Service(handle) => {
                let Ok(host) = self.host_mut(&handle.host) else {
                    return changed;
                };
                let expired = host
                    .services
                    .get(&handle.key)
                    .is_some_and(|service| lease_passed(&service.state, now));
                if !expired {
                    return changed;
                }

                // A base instance takes its sub-types down with it.
                let base = handle.key.sub_type_label.is_none();
                for (key, service) in host.services.iter_mut() {
                    let affected = *key == handle.key
                        || (base && key.instance_name == handle.key.instance_name);
                    if affected && service.state.tombstone() {
                        changed.push((
                            RecordRef::Service(ServiceHandle {
                                host: handle.host.clone(),
                                key: key.clone(),
                            }),
                            service.state,
                        ));
                    }
                }
                tracing::debug!("Lease expired for {:?} on {}", handle.key, host.full_name);
            }
        }

        changed
    }

    /// Removes a tombstone whose key lease ran out by `now`. Returns how many
    /// records were removed.
    pub(crate) fn purge(&mut self, record: &RecordRef, now: DateTime<Utc>) -> usize {
        match record {
            RecordRef::Host(handle) => {
                let due = self
                    .host(handle)
                    .is_some_and(|host| key_lease_passed(&host.state, now));
                if !due {
                    return 0;
                }
                match self.hosts.shift_remove(&handle.full_name) {
                    Some(host) => {
                        tracing::info!("Purged host {}", host.full_name);
                        1 + host.services.len()
                    }
                    None => 0,
                }
            }
            RecordRef::Service(handle) => {
                let Ok(host) = self.host_mut(&handle.host) else {
                    return 0;
                };
                let due = host
                    .services
                    .get(&handle.key)
                    .is_some_and(|service| key_lease_passed(&service.state, now));
                if !due {
                    return 0;
                }

                let base = handle.key.sub_type_label.is_none();
                let before = host.services.len();
                host.services.retain(|key, _| {
                    !(*key == handle.key || (base && key.instance_name == handle.key.instance_name))
                });
                tracing::debug!("Purged {:?} on {}", handle.key, host.full_name);
                before - host.services.len()
            }
        }
    }

    fn host_mut(&mut self, handle: &HostHandle) -> Result<&mut Host> {
        self.hosts
            .get_mut(&handle.full_name)
            .filter(|host| host.id == handle.id)
            .ok_or_else(|| RegistryError::NotFound(format!("host {}", handle.full_name)))
    }
}

/// Checks the parts of a service registration that do not depend on the
/// store's contents.
pub(crate) fn validate_service(registration: &ServiceRegistration) -> Result<()> {
    name::validate_label(&registration.instance_name)?;
    name::validate_name(&registration.service_type)?;
    if let Some(label) = &registration.sub_type_label {
        name::validate_label(label)?;
    }
    Ok(())
}

fn lease_passed(state: &RecordState, now: DateTime<Utc>) -> bool {
    state.lease_expire_at().is_some_and(|deadline| deadline <= now)
}

fn key_lease_passed(state: &RecordState, now: DateTime<Utc>) -> bool {
    state.is_deleted() && state.key_lease_expire_at() <= now
}
