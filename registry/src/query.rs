//! Read-only traversal of the record store.
//!
//! Iterators borrow the store, so no expiry tick or registration can run
//! while one is alive. Calling again restarts the traversal.

use shared::types::{HostView, ServiceView};
use crate::record::{Host, Service, ServiceHandle};
use crate::store::RecordStore;

/// Which records of an instance to visit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TypeMatch {
    #[default]
    Any,
    BaseOnly,
    SubTypeOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StateMatch {
    #[default]
    Any,
    ActiveOnly,
    DeletedOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    pub service_type: Option<String>,
    pub instance_name: Option<String>,
    pub types: TypeMatch,
    pub states: StateMatch,
}

impl ServiceFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    pub fn with_instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = Some(instance_name.into());
        self
    }

    pub fn base_only(mut self) -> Self {
        self.types = TypeMatch::BaseOnly;
        self
    }

    pub fn sub_types_only(mut self) -> Self {
        self.types = TypeMatch::SubTypeOnly;
        self
    }

    pub fn active_only(mut self) -> Self {
        self.states = StateMatch::ActiveOnly;
        self
    }

    pub fn deleted_only(mut self) -> Self {
        self.states = StateMatch::DeletedOnly;
        self
    }

    pub fn matches(&self, service: &Service) -> bool {
        let type_ok = match self.types {
            TypeMatch::Any => true,
            TypeMatch::BaseOnly => !service.is_sub_type(),
            TypeMatch::SubTypeOnly => service.is_sub_type(),
        };
        let state_ok = match self.states {
            StateMatch::Any => true,
            StateMatch::ActiveOnly => !service.is_deleted(),
            StateMatch::DeletedOnly => service.is_deleted(),
        };

        type_ok
            && state_ok
            && self
                .service_type
                .as_deref()
                .map_or(true, |t| service.service_type().eq_ignore_ascii_case(t))
            && self
                .instance_name
                .as_deref()
                .map_or(true, |name| service.instance_name() == name)
    }
}

impl RecordStore {
    /// Hosts in insertion order, tombstones included.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> + '_ {
        self.iter()
    }

    pub fn host_views(&self) -> Vec<HostView> {
        self.hosts().map(host_view).collect()
    }

    /// Views of the base-type services matching `filter`; sub-types show up
    /// as labels on their base. The filter's type selection is ignored.
    pub fn service_views(&self, filter: &ServiceFilter) -> Vec<ServiceView> {
        let filter = filter.clone().base_only();
        self.hosts()
            .flat_map(|host| {
                host.services(filter.clone())
                    .map(move |service| service_view(host, service))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl Host {
    pub fn services(&self, filter: ServiceFilter) -> impl Iterator<Item = &Service> + '_ {
        self.services.values().filter(move |service| filter.matches(service))
    }

    /// Active sub-types registered for the instance of `base`. The base
    /// itself is never included.
    pub fn sub_types<'a>(&'a self, base: &'a Service) -> impl Iterator<Item = &'a Service> + 'a {
        self.services.values().filter(move |service| {
            service.is_sub_type()
                && !service.is_deleted()
                && service.instance_name() == base.instance_name()
        })
    }

    pub fn service_handle(&self, service: &Service) -> ServiceHandle {
        ServiceHandle {
            host: self.handle(),
            key: service.key(),
        }
    }
}

pub fn host_view(host: &Host) -> HostView {
    HostView {
        full_name: host.full_name().to_string(),
        addresses: host.addresses().to_vec(),
        deleted: host.is_deleted(),
    }
}

pub fn service_view(host: &Host, service: &Service) -> ServiceView {
    ServiceView {
        instance_name: service.instance_name().to_string(),
        service_type: service.service_type().to_string(),
        sub_type_labels: host
            .sub_types(service)
            .filter_map(|sub| sub.sub_type_label().map(str::to_string))
            .collect(),
        port: service.port(),
        priority: service.priority(),
        weight: service.weight(),
        txt_data: service.txt_data().to_vec(),
        deleted: service.is_deleted(),
        host_full_name: host.full_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use shared::types::ServiceRegistration;
    use crate::lease::LeaseConfig;
    use crate::record::HostHandle;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn host(store: &mut RecordStore, name: &str) -> HostHandle {
        store
            .register_host(
                &LeaseConfig::default(),
                name,
                vec![],
                Duration::seconds(600),
                Duration::seconds(1200),
                start(),
            )
            .unwrap()
    }

    fn reg(instance: &str, service_type: &str, sub_type: Option<&str>) -> ServiceRegistration {
        ServiceRegistration {
            instance_name: instance.to_string(),
            service_type: service_type.to_string(),
            sub_type_label: sub_type.map(str::to_string),
            port: 80,
            priority: 1,
            weight: 2,
            txt_data: vec![],
        }
    }

    fn populated() -> (RecordStore, HostHandle) {
        let mut store = RecordStore::new();
        let a = host(&mut store, "a");
        store.register_service(&a, &reg("web", "_http._tcp", None)).unwrap();
        store.register_service(&a, &reg("web", "_http._tcp", Some("_printer"))).unwrap();
        store.register_service(&a, &reg("web", "_http._tcp", Some("_admin"))).unwrap();
        store.register_service(&a, &reg("shell", "_ssh._tcp", None)).unwrap();
        host(&mut store, "b");
        (store, a)
    }

    #[test]
    fn test_hosts_in_insertion_order() {
        let (mut store, _) = populated();
        host(&mut store, "c");

        let names: Vec<_> = store.hosts().map(Host::full_name).collect();
        assert_eq!(names, ["a", "b", "c"]);

        let again: Vec<_> = store.hosts().map(Host::full_name).collect();
        assert_eq!(names, again);
    }

    #[test]
    fn test_service_filters() {
        let (store, a) = populated();
        let host = store.host(&a).unwrap();

        assert_eq!(host.services(ServiceFilter::any()).count(), 4);
        assert_eq!(host.services(ServiceFilter::any().base_only()).count(), 2);
        assert_eq!(host.services(ServiceFilter::any().sub_types_only()).count(), 2);
        assert_eq!(
            host.services(ServiceFilter::any().with_service_type("_ssh._tcp")).count(),
            1
        );
        assert_eq!(
            host.services(ServiceFilter::any().with_instance_name("web")).count(),
            3
        );
    }

    #[test]
    fn test_state_filters() {
        let (mut store, a) = populated();
        store.deregister_service(&a, "shell").unwrap();
        let host = store.host(&a).unwrap();

        let deleted: Vec<_> = host
            .services(ServiceFilter::any().deleted_only())
            .map(Service::instance_name)
            .collect();
        assert_eq!(deleted, ["shell"]);
        assert_eq!(host.services(ServiceFilter::any().active_only()).count(), 3);
    }

    #[test]
    fn test_sub_types_only_active_and_exclude_base() {
        let (mut store, a) = populated();

        // Tombstone one sub-type directly; registration never does this alone.
        let admin = store
            .hosts()
            .flat_map(|h| {
                h.services(ServiceFilter::any().sub_types_only())
                    .map(move |s| h.service_handle(s))
            })
            .find(|handle| handle.sub_type_label() == Some("_admin"))
            .unwrap();
        store.expire_lease(
            &crate::expiry::RecordRef::Service(admin),
            start() + Duration::seconds(600),
        );

        let host = store.host(&a).unwrap();
        let base = host
            .services(ServiceFilter::any().base_only().with_instance_name("web"))
            .next()
            .unwrap();
        let labels: Vec<_> = host.sub_types(base).filter_map(Service::sub_type_label).collect();
        assert_eq!(labels, ["_printer"]);
    }

    #[test]
    fn test_service_views() {
        let (store, _) = populated();
        let views = store.service_views(&ServiceFilter::any());

        assert_eq!(views.len(), 2);
        let web = &views[0];
        assert_eq!(web.instance_name, "web");
        assert_eq!(web.sub_type_labels, ["_printer", "_admin"]);
        assert_eq!(web.host_full_name, "a");
        assert_eq!((web.port, web.priority, web.weight), (80, 1, 2));
        assert!(!web.deleted);
    }

    #[test]
    fn test_host_views() {
        let (mut store, _) = populated();
        store.deregister_host("b").unwrap();

        let views = store.host_views();
        assert_eq!(views.len(), 2);
        assert!(!views[0].deleted);
        assert!(views[1].deleted);
    }
}
