use std::fmt;
use std::net::Ipv6Addr;
use serde::{Serialize, Deserialize};

/// A registered host as seen by discovery consumers.
/// This is a snapshot: it does not track later changes in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostView {
    /// Full host name, e.g. "printer.default.service.arpa."
    pub full_name: String,

    /// Addresses in registration order
    pub addresses: Vec<Ipv6Addr>,

    /// Whether the host is a tombstone awaiting purge
    pub deleted: bool,
}

/// A registered base-type service instance as seen by discovery consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceView {
    /// Instance name, e.g. "office-printer"
    pub instance_name: String,

    /// Base service type, e.g. "_ipps._tcp"
    pub service_type: String,

    /// Labels of the active sub-types registered for this instance
    pub sub_type_labels: Vec<String>,

    pub port: u16,
    pub priority: u16,
    pub weight: u16,

    /// Raw TXT record data, opaque to the registry
    pub txt_data: Vec<u8>,

    /// Whether the service is a tombstone awaiting purge
    pub deleted: bool,

    /// Full name of the owning host
    pub host_full_name: String,
}

/// One service instance carried by a registration request.
///
/// A request registers the base-type record of an instance with
/// `sub_type_label` unset, and one extra entry per sub-type label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub instance_name: String,
    pub service_type: String,
    #[serde(default)]
    pub sub_type_label: Option<String>,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub priority: u16,
    #[serde(default)]
    pub weight: u16,
    #[serde(default)]
    pub txt_data: Vec<u8>,
}

/// An already-decoded registration update delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub full_name: String,
    #[serde(default)]
    pub addresses: Vec<Ipv6Addr>,
    #[serde(default)]
    pub services: Vec<ServiceRegistration>,

    /// Requested lease in seconds. Negative values are malformed.
    pub lease_secs: i64,

    /// Requested key lease in seconds. Negative values are malformed.
    pub key_lease_secs: i64,

    /// Set by the key validation collaborator; the registry trusts it.
    #[serde(default)]
    pub key_validated: bool,
}

/// Removes a whole host, or a single service instance when
/// `instance_name` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeregistrationRequest {
    pub full_name: String,
    #[serde(default)]
    pub instance_name: Option<String>,
}

/// Addressing mode of a registry instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    #[default]
    Unicast,
    Anycast,
}

impl fmt::Display for AddressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressMode::Unicast => f.write_str("unicast"),
            AddressMode::Anycast => f.write_str("anycast"),
        }
    }
}

/// Operational state of a registry instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryState {
    #[default]
    Disabled,
    Running,
    Stopped,
}

impl fmt::Display for RegistryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryState::Disabled => f.write_str("disabled"),
            RegistryState::Running => f.write_str("running"),
            RegistryState::Stopped => f.write_str("stopped"),
        }
    }
}
