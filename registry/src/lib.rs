//! Lease-governed SRP registration registry.
//!
//! A [`Registry`] accepts host and service registrations, grants them
//! leases clamped by its [`LeaseConfig`], tombstones them on deregistration
//! or lease expiry and purges tombstones once their key lease runs out.
//! Time is supplied by the caller; nothing here blocks or spawns.

pub mod anycast;
pub mod error;
pub mod expiry;
pub mod lease;
pub mod name;
pub mod query;
pub mod record;
pub mod registry;
pub mod store;

pub use anycast::{parse_sequence_number, AnycastCoordinator};
pub use error::{RegistryError, Result};
pub use expiry::{DeadlineKind, ExpiryEngine, ExpiryReport, RecordRef};
pub use lease::{GrantedLease, LeaseConfig};
pub use query::{ServiceFilter, StateMatch, TypeMatch};
pub use record::{Host, HostHandle, HostId, RecordState, Service, ServiceHandle};
pub use registry::{Registry, RegistryOptions};
pub use store::RecordStore;
