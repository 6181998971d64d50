use std::net::Ipv6Addr;
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{HostView, ServiceView};

#[derive(Serialize)]
struct HostHashView<'a> {
    full_name: &'a str,
    addresses: &'a [Ipv6Addr],
    deleted: bool,
}

#[derive(Serialize)]
struct ServiceHashView<'a> {
    host_full_name: &'a str,
    instance_name: &'a str,
    service_type: &'a str,
    sub_type_labels: &'a [String],
    port: u16,
    priority: u16,
    weight: u16,
    txt_data: &'a [u8],
    deleted: bool,
}

/// Computes a SHA-256 hash over the registry's views.
/// Hosts are sorted by name and services by (host, instance) so the hash
/// only changes when registered data does, not when insertion order does.
/// Address order within a host is part of the data and is kept.
pub fn compute_hash(hosts: &[HostView], services: &[ServiceView]) -> String {
    let mut host_indices: Vec<usize> = (0..hosts.len()).collect();
    host_indices.sort_by(|&a, &b| hosts[a].full_name.cmp(&hosts[b].full_name));

    let mut service_indices: Vec<usize> = (0..services.len()).collect();
    service_indices.sort_by(|&a, &b| {
        (&services[a].host_full_name, &services[a].instance_name)
            .cmp(&(&services[b].host_full_name, &services[b].instance_name))
    });

    let host_views: Vec<HostHashView<'_>> = host_indices
        .iter()
        .map(|&i| {
            let h = &hosts[i];
            HostHashView {
                full_name: &h.full_name,
                addresses: &h.addresses,
                deleted: h.deleted,
            }
        })
        .collect();

    let service_views: Vec<ServiceHashView<'_>> = service_indices
        .iter()
        .map(|&i| {
            let s = &services[i];
            ServiceHashView {
                host_full_name: &s.host_full_name,
                instance_name: &s.instance_name,
                service_type: &s.service_type,
                sub_type_labels: &s.sub_type_labels,
                port: s.port,
                priority: s.priority,
                weight: s.weight,
                txt_data: &s.txt_data,
                deleted: s.deleted,
            }
        })
        .collect();

    let json = serde_json::to_string(&(host_views, service_views))
        .expect("Failed to serialize views for hashing");

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}
