use std::collections::HashMap;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::protocol::{
    REGISTRY_SERVICE_TYPE, TXT_ADDRESS_MODE, TXT_DOMAIN, TXT_SEQUENCE_NUMBER,
};
use shared::types::RegistryState;
use crate::config::RegistryConfig;
use crate::registry_manager::RegistryStatus;

/// TXT records peers should currently see, or `None` when the registry
/// is not accepting registrations.
fn advertised(status: &RegistryStatus) -> Option<HashMap<String, String>> {
    (status.state == RegistryState::Running).then(|| txt_records(status))
}

fn txt_records(status: &RegistryStatus) -> HashMap<String, String> {
    HashMap::from([
        (TXT_DOMAIN.to_string(), status.domain.clone()),
        (TXT_ADDRESS_MODE.to_string(), status.address_mode.to_string()),
        (TXT_SEQUENCE_NUMBER.to_string(), status.sequence_number.to_string()),
    ])
}

pub fn register_registry(
    daemon: &ServiceDaemon,
    config: &RegistryConfig,
    status: &RegistryStatus,
    api_port: u16,
) -> Result<ServiceInfo> {
    let hostname = hostname::get()
        .context("Failed to get system hostname")?
        .to_string_lossy()
        .to_string();

    let instance_name = format!("srp-registry-{}", hostname);
    let host_name = format!("{}.local.", hostname);

    let service_info = ServiceInfo::new(
        REGISTRY_SERVICE_TYPE,
        &instance_name,
        &host_name,
        config.address.as_str(),
        api_port,
        txt_records(status),
    )
    .context("Failed to create ServiceInfo")?;

    daemon
        .register(service_info.clone())
        .context("Failed to register mDNS service")?;

    tracing::info!(
        "Registered {} as {} (mode {}, seq {})",
        REGISTRY_SERVICE_TYPE,
        instance_name,
        status.address_mode,
        status.sequence_number
    );

    Ok(service_info)
}

pub fn unregister_registry(daemon: &ServiceDaemon, service_info: &ServiceInfo) -> Result<()> {
    daemon
        .unregister(service_info.get_fullname())
        .context("Failed to unregister mDNS service")?;

    tracing::info!("Unregistered {}", service_info.get_fullname());
    Ok(())
}

/// Keeps the advertisement in line with the registry: present while it
/// runs, re-registered when domain or anycast settings change.
pub async fn run_advertiser(
    daemon: ServiceDaemon,
    config: RegistryConfig,
    api_port: u16,
    mut status_rx: watch::Receiver<RegistryStatus>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut current: Option<(HashMap<String, String>, ServiceInfo)> = None;

    loop {
        let status = status_rx.borrow_and_update().clone();
        let wanted = advertised(&status);

        if current.as_ref().map(|(shown, _)| shown) != wanted.as_ref() {
            if let Some((_, info)) = current.take() {
                if let Err(e) = unregister_registry(&daemon, &info) {
                    tracing::warn!("Failed to withdraw advertisement: {:#}", e);
                }
            }
            if let Some(shown) = wanted {
                match register_registry(&daemon, &config, &status, api_port) {
                    Ok(info) => current = Some((shown, info)),
                    Err(e) => tracing::error!("Failed to advertise registry: {:#}", e),
                }
            }
        }

        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    if let Some((_, info)) = current {
        unregister_registry(&daemon, &info)?;
    }
    tracing::info!("mDNS advertiser shutting down");
    Ok(())
}
