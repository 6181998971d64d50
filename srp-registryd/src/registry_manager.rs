use std::thread;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use shared::types::{
    AddressMode, DeregistrationRequest, HostView, RegistrationRequest, RegistryState, ServiceView,
};
use srp_registry::{ExpiryReport, LeaseConfig, Registry, ServiceFilter};
use crate::config::SnapshotConfig;
use crate::snapshot::{db::SnapshotDb, hash};

/// Configuration-level view of the registry, published on every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStatus {
    pub state: RegistryState,
    pub domain: String,
    pub address_mode: AddressMode,
    pub sequence_number: u8,
    pub lease: LeaseConfig,
}

impl RegistryStatus {
    pub fn of(registry: &Registry) -> Self {
        Self {
            state: registry.state(),
            domain: registry.domain().to_string(),
            address_mode: registry.address_mode(),
            sequence_number: registry.sequence_number(),
            lease: registry.lease_config(),
        }
    }
}

type Reply<T> = oneshot::Sender<srp_registry::Result<T>>;

/// Commands sent to the registry thread
pub enum RegistryCommand {
    Register(RegistrationRequest, Reply<HostView>),
    Deregister(DeregistrationRequest, Reply<()>),
    Hosts(oneshot::Sender<Vec<HostView>>),
    Services(ServiceFilter, oneshot::Sender<Vec<ServiceView>>),
    SetLeaseConfig(LeaseConfig, Reply<()>),
    SetAddressMode(AddressMode, Reply<()>),
    SetSequenceNumber(u8, Reply<()>),
    SetDomain(String, Reply<()>),
    SetEnabled(bool, oneshot::Sender<()>),
    Tick {
        now: DateTime<Utc>,
        reply: oneshot::Sender<(ExpiryReport, Option<DateTime<Utc>>)>,
    },
    Shutdown,
}

/// Handle to interact with the registry thread
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

struct Publisher {
    db: SnapshotDb,
    hash_tx: watch::Sender<String>,
    status_tx: watch::Sender<RegistryStatus>,
}

impl Publisher {
    /// Rewrites the snapshot and republishes its hash. The published hash
    /// is always that of the stored snapshot, so a failed write is retried
    /// on the next call. Failures are logged; the in-memory registry stays
    /// authoritative.
    fn snapshot(&self, registry: &Registry) {
        let hosts = registry.host_views();
        let services = registry.service_views(&ServiceFilter::any());
        let new_hash = hash::compute_hash(&hosts, &services);

        if *self.hash_tx.borrow() == new_hash {
            return;
        }
        if let Err(e) = self.db.replace(&hosts, &services, &new_hash, Utc::now()) {
            tracing::error!("Failed to write snapshot: {:#}", e);
            return;
        }
        let _ = self.hash_tx.send(new_hash);
    }

    fn status(&self, registry: &Registry) {
        self.status_tx.send_if_modified(|status| {
            let next = RegistryStatus::of(registry);
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }
}

impl RegistryHandle {
    /// Spawn the registry thread. It owns the registry, so every command
    /// runs to completion before the next one starts.
    pub fn spawn(
        mut registry: Registry,
        db: SnapshotDb,
        hash_tx: watch::Sender<String>,
        status_tx: watch::Sender<RegistryStatus>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<RegistryCommand>(256);
        let publisher = Publisher { db, hash_tx, status_tx };

        thread::spawn(move || {
            publisher.status(&registry);
            publisher.snapshot(&registry);

            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    RegistryCommand::Register(request, reply) => {
                        let result = registry.process_registration(&request, Utc::now());
                        if result.is_ok() {
                            publisher.snapshot(&registry);
                        }
                        let _ = reply.send(result);
                    }
                    RegistryCommand::Deregister(request, reply) => {
                        let result = registry.process_deregistration(&request);
                        if result.is_ok() {
                            publisher.snapshot(&registry);
                        }
                        let _ = reply.send(result);
                    }
                    RegistryCommand::Hosts(reply) => {
                        let _ = reply.send(registry.host_views());
                    }
                    RegistryCommand::Services(filter, reply) => {
                        let _ = reply.send(registry.service_views(&filter));
                    }
                    RegistryCommand::SetLeaseConfig(config, reply) => {
                        let result = registry.set_lease_config(config);
                        publisher.status(&registry);
                        let _ = reply.send(result);
                    }
                    RegistryCommand::SetAddressMode(mode, reply) => {
                        let result = registry.set_address_mode(mode);
                        publisher.status(&registry);
                        let _ = reply.send(result);
                    }
                    RegistryCommand::SetSequenceNumber(sequence_number, reply) => {
                        let result = registry.set_sequence_number(sequence_number);
                        publisher.status(&registry);
                        let _ = reply.send(result);
                    }
                    RegistryCommand::SetDomain(domain, reply) => {
                        let result = registry.set_domain(&domain);
                        publisher.status(&registry);
                        let _ = reply.send(result);
                    }
                    RegistryCommand::SetEnabled(enabled, reply) => {
                        registry.set_enabled(enabled);
                        publisher.status(&registry);
                        publisher.snapshot(&registry);
                        let _ = reply.send(());
                    }
                    RegistryCommand::Tick { now, reply } => {
                        let report = registry.tick(now);
                        if !report.is_empty() {
                            publisher.snapshot(&registry);
                        }
                        let _ = reply.send((report, registry.next_deadline()));
                    }
                    RegistryCommand::Shutdown => {
                        tracing::info!("Registry thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    pub async fn register(&self, request: RegistrationRequest) -> Result<HostView> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Register(request, reply)).await?;
        Ok(rx.await??)
    }

    pub async fn deregister(&self, request: DeregistrationRequest) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Deregister(request, reply)).await?;
        Ok(rx.await??)
    }

    pub async fn hosts(&self) -> Result<Vec<HostView>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Hosts(reply)).await?;
        Ok(rx.await?)
    }

    pub async fn services(&self, filter: ServiceFilter) -> Result<Vec<ServiceView>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Services(filter, reply)).await?;
        Ok(rx.await?)
    }

    pub async fn set_lease_config(&self, config: LeaseConfig) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::SetLeaseConfig(config, reply)).await?;
        Ok(rx.await??)
    }

    pub async fn set_address_mode(&self, mode: AddressMode) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::SetAddressMode(mode, reply)).await?;
        Ok(rx.await??)
    }

    pub async fn set_sequence_number(&self, sequence_number: u8) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::SetSequenceNumber(sequence_number, reply)).await?;
        Ok(rx.await??)
    }

    pub async fn set_domain(&self, domain: String) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::SetDomain(domain, reply)).await?;
        Ok(rx.await??)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::SetEnabled(enabled, reply)).await?;
        Ok(rx.await?)
    }

    /// Run expiry as of `now`. Returns what happened and when the next
    /// deadline falls.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<(ExpiryReport, Option<DateTime<Utc>>)> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Tick { now, reply }).await?;
        Ok(rx.await?)
    }

    /// Shutdown the registry thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(RegistryCommand::Shutdown).await?;
        Ok(())
    }
}

/// Expiry loop: ticks at the next record deadline, or after the
/// configured interval if that comes first.
pub async fn run(
    registry: RegistryHandle,
    config: SnapshotConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let max_wait = Duration::from_secs(config.tick_interval_secs.max(1));
    let mut wait = max_wait;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                match registry.tick(Utc::now()).await {
                    Ok((report, next)) => {
                        if !report.is_empty() {
                            tracing::info!(
                                "Expiry: {} records expired, {} purged",
                                report.expired,
                                report.purged
                            );
                        }
                        wait = next_wait(next, Utc::now(), max_wait);
                    }
                    Err(e) => {
                        tracing::error!("Failed to run expiry tick: {}", e);
                        wait = max_wait;
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Expiry loop shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn next_wait(next: Option<DateTime<Utc>>, now: DateTime<Utc>, max_wait: Duration) -> Duration {
    next.map_or(max_wait, |deadline| {
        (deadline - now).to_std().unwrap_or(Duration::ZERO).min(max_wait)
    })
}
