use std::net::Ipv6Addr;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use crate::lease::GrantedLease;

pub type HostId = u64;

/// Lifecycle of a host or service record.
///
/// An active record carries both deadlines; a tombstone only needs the
/// key-lease deadline after which it is purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Active {
        lease_expire_at: DateTime<Utc>,
        key_lease_expire_at: DateTime<Utc>,
    },
    Deleted {
        key_lease_expire_at: DateTime<Utc>,
    },
}

impl RecordState {
    pub fn granted(now: DateTime<Utc>, granted: GrantedLease) -> Self {
        RecordState::Active {
            lease_expire_at: now + Duration::seconds(i64::from(granted.lease)),
            key_lease_expire_at: now + Duration::seconds(i64::from(granted.key_lease)),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RecordState::Active { .. })
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, RecordState::Deleted { .. })
    }

    pub fn lease_expire_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RecordState::Active { lease_expire_at, .. } => Some(*lease_expire_at),
            RecordState::Deleted { .. } => None,
        }
    }

    pub fn key_lease_expire_at(&self) -> DateTime<Utc> {
        match self {
            RecordState::Active { key_lease_expire_at, .. }
            | RecordState::Deleted { key_lease_expire_at } => *key_lease_expire_at,
        }
    }

    /// Turns an active record into a tombstone. Returns false if it
    /// already was one.
    pub(crate) fn tombstone(&mut self) -> bool {
        match *self {
            RecordState::Active { key_lease_expire_at, .. } => {
                *self = RecordState::Deleted { key_lease_expire_at };
                true
            }
            RecordState::Deleted { .. } => false,
        }
    }
}

/// Reference to a host. Only valid until the host is purged; a host
/// re-created under the same name gets a new id and old handles stop
/// resolving.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostHandle {
    pub(crate) id: HostId,
    pub(crate) full_name: String,
}

impl HostHandle {
    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

/// Services are keyed by instance name plus sub-type label; the base-type
/// record of an instance has no label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceKey {
    pub(crate) instance_name: String,
    pub(crate) sub_type_label: Option<String>,
}

impl ServiceKey {
    pub(crate) fn base(instance_name: &str) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            sub_type_label: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceHandle {
    pub(crate) host: HostHandle,
    pub(crate) key: ServiceKey,
}

impl ServiceHandle {
    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    pub fn instance_name(&self) -> &str {
        &self.key.instance_name
    }

    pub fn sub_type_label(&self) -> Option<&str> {
        self.key.sub_type_label.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct Host {
    pub(crate) id: HostId,
    pub(crate) full_name: String,
    pub(crate) addresses: Vec<Ipv6Addr>,
    pub(crate) state: RecordState,
    pub(crate) granted: GrantedLease,
    pub(crate) services: IndexMap<ServiceKey, Service>,
}

impl Host {
    pub fn handle(&self) -> HostHandle {
        HostHandle {
            id: self.id,
            full_name: self.full_name.clone(),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn addresses(&self) -> &[Ipv6Addr] {
        &self.addresses
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    /// Lease granted by the most recent registration, in seconds
    pub fn lease(&self) -> u32 {
        self.granted.lease
    }

    /// Key lease granted by the most recent registration, in seconds
    pub fn key_lease(&self) -> u32 {
        self.granted.key_lease
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

#[derive(Debug, Clone)]
pub struct Service {
    /// Owning host
    pub(crate) host_id: HostId,
    pub(crate) instance_name: String,
    pub(crate) service_type: String,
    pub(crate) sub_type_label: Option<String>,
    pub(crate) port: u16,
    pub(crate) priority: u16,
    pub(crate) weight: u16,
    pub(crate) txt_data: Vec<u8>,
    pub(crate) state: RecordState,
}

impl Service {
    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn sub_type_label(&self) -> Option<&str> {
        self.sub_type_label.as_deref()
    }

    pub fn is_sub_type(&self) -> bool {
        self.sub_type_label.is_some()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn weight(&self) -> u16 {
        self.weight
    }

    pub fn txt_data(&self) -> &[u8] {
        &self.txt_data
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    pub(crate) fn key(&self) -> ServiceKey {
        ServiceKey {
            instance_name: self.instance_name.clone(),
            sub_type_label: self.sub_type_label.clone(),
        }
    }
}
