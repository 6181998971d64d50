use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::{HostView, ServiceView};
use chrono::{DateTime, Utc};

/// Point-in-time copy of the registry's host and service views, for
/// tooling that reads registrations without going through the API.
/// Never read back as live state.
pub struct SnapshotDb {
    conn: Connection,
}

impl SnapshotDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                full_name   TEXT PRIMARY KEY,
                position    INTEGER NOT NULL,
                addresses   TEXT NOT NULL,
                deleted     INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS services (
                host_full_name  TEXT NOT NULL,
                instance_name   TEXT NOT NULL,
                position        INTEGER NOT NULL,
                service_type    TEXT NOT NULL,
                sub_type_labels TEXT NOT NULL,
                port            INTEGER NOT NULL,
                priority        INTEGER NOT NULL,
                weight          INTEGER NOT NULL,
                txt_data        BLOB NOT NULL,
                deleted         INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (host_full_name, instance_name)
            );

            CREATE INDEX IF NOT EXISTS idx_service_type ON services(service_type);

            CREATE TABLE IF NOT EXISTS snapshot_meta (
                id        INTEGER PRIMARY KEY CHECK (id = 0),
                taken_at  TEXT NOT NULL,
                hash      TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Replace the stored snapshot with the given views in one transaction.
    pub fn replace(
        &self,
        hosts: &[HostView],
        services: &[ServiceView],
        hash: &str,
        taken_at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin snapshot transaction")?;

        tx.execute("DELETE FROM services", [])
            .context("Failed to clear services")?;
        tx.execute("DELETE FROM hosts", [])
            .context("Failed to clear hosts")?;

        for (position, host) in hosts.iter().enumerate() {
            let addresses_json = serde_json::to_string(&host.addresses)
                .context("Failed to serialize addresses")?;
            tx.execute(
                "INSERT INTO hosts (full_name, position, addresses, deleted) VALUES (?1, ?2, ?3, ?4)",
                params![&host.full_name, position as i64, &addresses_json, host.deleted as i32],
            )
            .with_context(|| format!("Failed to store host {}", host.full_name))?;
        }

        for (position, service) in services.iter().enumerate() {
            let labels_json = serde_json::to_string(&service.sub_type_labels)
                .context("Failed to serialize sub-type labels")?;
            tx.execute(
                r#"
                INSERT INTO services (
                    host_full_name, instance_name, position, service_type, sub_type_labels,
                    port, priority, weight, txt_data, deleted
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    &service.host_full_name,
                    &service.instance_name,
                    position as i64,
                    &service.service_type,
                    &labels_json,
                    service.port,
                    service.priority,
                    service.weight,
                    &service.txt_data,
                    service.deleted as i32,
                ],
            )
            .with_context(|| format!("Failed to store service {}", service.instance_name))?;
        }

        tx.execute(
            r#"
            INSERT INTO snapshot_meta (id, taken_at, hash) VALUES (0, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET taken_at = excluded.taken_at, hash = excluded.hash
            "#,
            params![taken_at.to_rfc3339(), hash],
        )
        .context("Failed to store snapshot metadata")?;

        tx.commit().context("Failed to commit snapshot")?;
        Ok(())
    }

    /// Hosts in registry order
    pub fn load_hosts(&self) -> Result<Vec<HostView>> {
        let mut stmt = self
            .conn
            .prepare("SELECT full_name, addresses, deleted FROM hosts ORDER BY position")
            .context("Failed to prepare query")?;

        let hosts = stmt
            .query_map([], Self::row_to_host)
            .context("Failed to query hosts")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect hosts")?;

        Ok(hosts)
    }

    /// Services in registry order
    pub fn load_services(&self) -> Result<Vec<ServiceView>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT instance_name, service_type, sub_type_labels, port, priority, weight,
                        txt_data, deleted, host_full_name
                 FROM services ORDER BY position"
            )
            .context("Failed to prepare query")?;

        let services = stmt
            .query_map([], Self::row_to_service)
            .context("Failed to query services")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect services")?;

        Ok(services)
    }

    /// Hash recorded with the last snapshot, if any
    pub fn last_hash(&self) -> Result<Option<String>> {
        let hash = self
            .conn
            .query_row(
                "SELECT hash FROM snapshot_meta WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query snapshot metadata")?;

        Ok(hash)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn row_to_host(row: &rusqlite::Row) -> Result<HostView, rusqlite::Error> {
        let addresses_json: String = row.get(1)?;
        let deleted: i32 = row.get(2)?;

        let addresses = serde_json::from_str(&addresses_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?;

        Ok(HostView {
            full_name: row.get(0)?,
            addresses,
            deleted: deleted != 0,
        })
    }

    fn row_to_service(row: &rusqlite::Row) -> Result<ServiceView, rusqlite::Error> {
        let labels_json: String = row.get(2)?;
        let deleted: i32 = row.get(7)?;

        let sub_type_labels = serde_json::from_str(&labels_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?;

        Ok(ServiceView {
            instance_name: row.get(0)?,
            service_type: row.get(1)?,
            sub_type_labels,
            port: row.get::<_, u16>(3)?,
            priority: row.get::<_, u16>(4)?,
            weight: row.get::<_, u16>(5)?,
            txt_data: row.get(6)?,
            deleted: deleted != 0,
            host_full_name: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn host(name: &str, deleted: bool) -> HostView {
        HostView {
            full_name: name.to_string(),
            addresses: vec![Ipv6Addr::new(0xfd00, 0, 0, 1, 0, 0, 0, 1)],
            deleted,
        }
    }

    fn service(instance: &str, host: &str) -> ServiceView {
        ServiceView {
            instance_name: instance.to_string(),
            service_type: "_ipps._tcp".to_string(),
            sub_type_labels: vec!["_color".to_string()],
            port: 631,
            priority: 1,
            weight: 2,
            txt_data: b"\x07rp=ipp".to_vec(),
            deleted: false,
            host_full_name: host.to_string(),
        }
    }

    #[test]
    fn test_replace_and_load() {
        let db = SnapshotDb::open(":memory:").unwrap();
        let hosts = vec![host("b.default.service.arpa.", false), host("a.default.service.arpa.", true)];
        let services = vec![service("office", "b.default.service.arpa.")];

        db.replace(&hosts, &services, "abc", Utc::now()).unwrap();

        assert_eq!(db.load_hosts().unwrap(), hosts);
        assert_eq!(db.load_services().unwrap(), services);
        assert_eq!(db.last_hash().unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_replace_drops_previous_snapshot() {
        let db = SnapshotDb::open(":memory:").unwrap();
        db.replace(
            &[host("a.default.service.arpa.", false)],
            &[service("office", "a.default.service.arpa.")],
            "first",
            Utc::now(),
        )
        .unwrap();

        db.replace(&[], &[], "second", Utc::now()).unwrap();

        assert!(db.load_hosts().unwrap().is_empty());
        assert!(db.load_services().unwrap().is_empty());
        assert_eq!(db.last_hash().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_empty_database() {
        let db = SnapshotDb::open(":memory:").unwrap();
        assert!(db.load_hosts().unwrap().is_empty());
        assert_eq!(db.last_hash().unwrap(), None);
    }
}
