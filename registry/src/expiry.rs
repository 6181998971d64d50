use std::cmp::Reverse;
use std::collections::BinaryHeap;
use chrono::{DateTime, Utc};
use crate::record::{HostHandle, RecordState, ServiceHandle};
use crate::store::RecordStore;

/// Which deadline of a record an entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeadlineKind {
    Lease,
    KeyLease,
}

/// Identity of a scheduled record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordRef {
    Host(HostHandle),
    Service(ServiceHandle),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledExpiry {
    deadline: DateTime<Utc>,
    kind: DeadlineKind,
    record: RecordRef,
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    /// Records that turned into tombstones
    pub expired: usize,
    /// Records physically removed
    pub purged: usize,
}

impl ExpiryReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.purged == 0
    }
}

/// Deadline schedule for the records of one store.
///
/// Entries are never removed when a record is refreshed or deleted early.
/// Instead each entry only acts if, when it comes due, the record still
/// is in the state the entry was scheduled for and its deadline has passed.
#[derive(Debug, Default)]
pub struct ExpiryEngine {
    schedule: BinaryHeap<Reverse<ScheduledExpiry>>,
}

impl ExpiryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending entries, stale ones included
    pub fn pending(&self) -> usize {
        self.schedule.len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.schedule.peek().map(|Reverse(entry)| entry.deadline)
    }

    pub fn clear(&mut self) {
        self.schedule.clear();
    }

    /// Schedules the current deadlines of a host and all of its services.
    pub fn track(&mut self, store: &RecordStore, handle: &HostHandle) {
        let Some(host) = store.host(handle) else {
            return;
        };

        self.schedule(RecordRef::Host(handle.clone()), host.state());
        for service in host.services.values() {
            self.schedule(
                RecordRef::Service(ServiceHandle {
                    host: handle.clone(),
                    key: service.key(),
                }),
                service.state(),
            );
        }
    }

    /// Runs expiry as of `now` in two phases: lapsed leases first turn
    /// records into tombstones, then tombstones whose key lease lapsed are
    /// purged. A record tombstoned in the first phase is purged in the same
    /// tick only if its key lease has lapsed as well.
    pub fn tick(&mut self, store: &mut RecordStore, now: DateTime<Utc>) -> ExpiryReport {
        let mut report = ExpiryReport::default();
        let mut key_leases = Vec::new();

        for entry in self.drain_due(now) {
            match entry.kind {
                DeadlineKind::Lease => {
                    for (record, state) in store.expire_lease(&entry.record, now) {
                        report.expired += 1;
                        self.schedule(record, state);
                    }
                }
                DeadlineKind::KeyLease => key_leases.push(entry),
            }
        }

        // Phase one only schedules key leases, so this picks up the
        // tombstones it just created that are already due.
        key_leases.extend(self.drain_due(now));

        for entry in key_leases {
            report.purged += store.purge(&entry.record, now);
        }

        if !report.is_empty() {
            tracing::debug!(
                "Expiry tick at {}: {} expired, {} purged",
                now,
                report.expired,
                report.purged
            );
        }
        report
    }

    fn schedule(&mut self, record: RecordRef, state: RecordState) {
        let (deadline, kind) = match state {
            RecordState::Active { lease_expire_at, .. } => (lease_expire_at, DeadlineKind::Lease),
            RecordState::Deleted { key_lease_expire_at } => {
                (key_lease_expire_at, DeadlineKind::KeyLease)
            }
        };
        self.schedule.push(Reverse(ScheduledExpiry { deadline, kind, record }));
    }

    fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledExpiry> {
        let mut due = Vec::new();
        while self
            .schedule
            .peek()
            .is_some_and(|Reverse(entry)| entry.deadline <= now)
        {
            if let Some(Reverse(entry)) = self.schedule.pop() {
                due.push(entry);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use shared::types::ServiceRegistration;
    use crate::lease::LeaseConfig;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        start() + Duration::seconds(secs)
    }

    fn register(
        store: &mut RecordStore,
        engine: &mut ExpiryEngine,
        name: &str,
        lease: i64,
        key_lease: i64,
        now: DateTime<Utc>,
    ) -> HostHandle {
        let handle = store
            .register_host(
                &LeaseConfig::default(),
                name,
                vec![],
                Duration::seconds(lease),
                Duration::seconds(key_lease),
                now,
            )
            .unwrap();
        engine.track(store, &handle);
        handle
    }

    fn printer() -> ServiceRegistration {
        ServiceRegistration {
            instance_name: "printer".to_string(),
            service_type: "_ipp._tcp".to_string(),
            sub_type_label: None,
            port: 631,
            priority: 0,
            weight: 0,
            txt_data: vec![],
        }
    }

    #[test]
    fn test_lease_expiry_tombstones_then_purges() {
        let mut store = RecordStore::new();
        let mut engine = ExpiryEngine::new();
        let host = register(&mut store, &mut engine, "a", 60, 600, start());
        store.register_service(&host, &printer()).unwrap();
        engine.track(&store, &host);

        assert_eq!(engine.tick(&mut store, at(59)), ExpiryReport::default());
        assert!(store.host(&host).unwrap().state().is_active());

        let report = engine.tick(&mut store, at(60));
        assert_eq!(report, ExpiryReport { expired: 2, purged: 0 });
        let tombstone = store.host(&host).unwrap();
        assert!(tombstone.is_deleted());
        assert!(tombstone.services.values().all(|s| s.is_deleted()));

        assert_eq!(engine.tick(&mut store, at(599)).purged, 0);
        assert_eq!(store.len(), 1);

        let report = engine.tick(&mut store, at(600));
        assert_eq!(report.purged, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_refresh_invalidates_old_deadline() {
        let mut store = RecordStore::new();
        let mut engine = ExpiryEngine::new();
        let host = register(&mut store, &mut engine, "a", 60, 600, start());
        register(&mut store, &mut engine, "a", 60, 600, at(50));

        assert_eq!(engine.tick(&mut store, at(60)).expired, 0);
        assert!(store.host(&host).unwrap().state().is_active());

        assert_eq!(engine.tick(&mut store, at(110)).expired, 1);
        assert!(store.host(&host).unwrap().is_deleted());
    }

    #[test]
    fn test_deregistered_host_purged_at_key_lease() {
        let mut store = RecordStore::new();
        let mut engine = ExpiryEngine::new();
        let host = register(&mut store, &mut engine, "a", 60, 600, start());
        store.deregister_host("a").unwrap();
        engine.track(&store, &host);

        assert_eq!(engine.tick(&mut store, at(599)), ExpiryReport::default());
        assert_eq!(store.len(), 1);
        assert_eq!(engine.tick(&mut store, at(600)).purged, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_late_tick_runs_both_phases() {
        let mut store = RecordStore::new();
        let mut engine = ExpiryEngine::new();
        register(&mut store, &mut engine, "a", 60, 600, start());
        register(&mut store, &mut engine, "b", 60, 6000, start());

        let report = engine.tick(&mut store, at(1000));
        assert_eq!(report, ExpiryReport { expired: 2, purged: 1 });
        assert!(store.find_host("a").is_none());
        assert!(store.find_host("b").is_some());
    }

    #[test]
    fn test_revived_tombstone_is_not_purged() {
        let mut store = RecordStore::new();
        let mut engine = ExpiryEngine::new();
        register(&mut store, &mut engine, "a", 60, 120, start());
        store.deregister_host("a").unwrap();
        let host = store.find_host("a").unwrap();
        engine.track(&store, &host);

        register(&mut store, &mut engine, "a", 600, 1200, at(100));

        assert_eq!(engine.tick(&mut store, at(120)), ExpiryReport::default());
        assert!(store.host(&host).unwrap().state().is_active());
    }

    #[test]
    fn test_next_deadline() {
        let mut store = RecordStore::new();
        let mut engine = ExpiryEngine::new();
        assert_eq!(engine.next_deadline(), None);

        register(&mut store, &mut engine, "a", 300, 600, start());
        register(&mut store, &mut engine, "b", 60, 600, start());
        assert_eq!(engine.next_deadline(), Some(at(60)));

        engine.tick(&mut store, at(60));
        assert_eq!(engine.next_deadline(), Some(at(300)));
    }
}
