// src/recording/storage.rs
//! Traffic storage using SQLite
//!
//! Holds the `connections` and `devices` tables. The reporting side reads
//! them directly; this core only appends connections and upserts devices.

use crate::recording::records::{ConnectionRecord, ConnectionStatus, DeviceRecord, UNRESOLVED_MAC};
use crate::utils::errors::{GatewayError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    src_ip TEXT NOT NULL,
    src_port INTEGER NOT NULL,
    src_mac TEXT,
    dst_ip TEXT NOT NULL,
    dst_port INTEGER NOT NULL,
    dst_domain TEXT,
    bytes_sent INTEGER NOT NULL DEFAULT 0,
    bytes_received INTEGER NOT NULL DEFAULT 0,
    duration REAL NOT NULL DEFAULT 0.0,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_connections_timestamp ON connections(timestamp);
CREATE INDEX IF NOT EXISTS idx_connections_src_ip ON connections(src_ip);
CREATE INDEX IF NOT EXISTS idx_connections_dst_ip ON connections(dst_ip);
CREATE INDEX IF NOT EXISTS idx_connections_dst_domain ON connections(dst_domain);
CREATE INDEX IF NOT EXISTS idx_timestamp_src ON connections(timestamp, src_ip);
CREATE INDEX IF NOT EXISTS idx_timestamp_dst ON connections(timestamp, dst_ip);

CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mac_address TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    hostname TEXT,
    name TEXT,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    total_bytes_sent INTEGER NOT NULL DEFAULT 0,
    total_bytes_received INTEGER NOT NULL DEFAULT 0,
    connection_count INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_devices_mac ON devices(mac_address)
    WHERE mac_address != 'unknown';
CREATE INDEX IF NOT EXISTS idx_devices_ip ON devices(ip_address);
"#;

/// Per-source totals computed from the connections table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceTotals {
    pub connections: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// SQLite-backed traffic store
#[derive(Clone)]
pub struct TrafficStore {
    db: Arc<Mutex<Connection>>,
}

impl TrafficStore {
    /// Open (or create) the database at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                GatewayError::Storage(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| GatewayError::Storage(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let store = Self::from_connection(conn).await?;
        info!("Traffic store initialized at {:?}", path);
        Ok(store)
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| GatewayError::Storage(format!("Failed to open database: {}", e)))?;
        Self::from_connection(conn).await
    }

    async fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            db: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute_batch(SCHEMA)
            .map_err(|e| GatewayError::Storage(format!("Schema creation failed: {}", e)))
    }

    /// Append `record` and fold it into its source device, atomically
    pub async fn commit_session(&self, record: &ConnectionRecord) -> Result<()> {
        let mut db = self.db.lock().await;
        commit_session_tx(&mut db, record, Utc::now())?;

        debug!(
            src = %record.src_ip,
            dst = %record.dst_ip,
            "Committed connection record"
        );
        Ok(())
    }

    /// Most recent connections, newest first
    pub async fn recent_connections(&self, limit: usize) -> Result<Vec<ConnectionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT timestamp, src_ip, src_port, dst_ip, dst_port, dst_domain, \
             bytes_sent, bytes_received, duration, status \
             FROM connections ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit as i64], connection_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub async fn connection_count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM connections", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Connection totals recorded for one source address
    pub async fn source_totals(&self, ip: IpAddr) -> Result<SourceTotals> {
        let db = self.db.lock().await;
        let totals = db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(bytes_sent), 0), COALESCE(SUM(bytes_received), 0) \
             FROM connections WHERE src_ip = ?1",
            params![ip.to_string()],
            |row| {
                Ok(SourceTotals {
                    connections: row.get::<_, i64>(0)? as u64,
                    bytes_sent: row.get::<_, i64>(1)? as u64,
                    bytes_received: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(totals)
    }

    pub async fn device_by_ip(&self, ip: IpAddr) -> Result<Option<DeviceRecord>> {
        let db = self.db.lock().await;
        let device = db
            .query_row(
                "SELECT mac_address, ip_address, hostname, name, first_seen, last_seen, \
                 total_bytes_sent, total_bytes_received, connection_count \
                 FROM devices WHERE ip_address = ?1 ORDER BY id LIMIT 1",
                params![ip.to_string()],
                device_from_row,
            )
            .optional()?;
        Ok(device)
    }

    pub async fn devices(&self) -> Result<Vec<DeviceRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT mac_address, ip_address, hostname, name, first_seen, last_seen, \
             total_bytes_sent, total_bytes_received, connection_count \
             FROM devices ORDER BY last_seen DESC",
        )?;

        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute_batch(sql)?;
        Ok(())
    }
}

fn commit_session_tx(
    conn: &mut Connection,
    record: &ConnectionRecord,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    let src_ip = record.src_ip.to_string();

    tx.execute(
        "INSERT INTO connections (timestamp, src_ip, src_port, dst_ip, dst_port, dst_domain, \
         bytes_sent, bytes_received, duration, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.timestamp,
            src_ip,
            record.src_port,
            record.dst_ip.to_string(),
            record.dst_port,
            record.dst_domain,
            record.bytes_sent as i64,
            record.bytes_received as i64,
            record.duration_seconds,
            record.status.as_str(),
        ],
    )?;

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM devices WHERE ip_address = ?1 ORDER BY id LIMIT 1",
            params![src_ip],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            tx.execute(
                "UPDATE devices SET last_seen = ?1, \
                 total_bytes_sent = total_bytes_sent + ?2, \
                 total_bytes_received = total_bytes_received + ?3, \
                 connection_count = connection_count + 1 \
                 WHERE id = ?4",
                params![
                    now,
                    record.bytes_sent as i64,
                    record.bytes_received as i64,
                    id
                ],
            )?;
        }
        None => {
            tx.execute(
                "INSERT INTO devices (mac_address, ip_address, first_seen, last_seen, \
                 total_bytes_sent, total_bytes_received, connection_count) \
                 VALUES (?1, ?2, ?3, ?3, ?4, ?5, 1)",
                params![
                    UNRESOLVED_MAC,
                    src_ip,
                    now,
                    record.bytes_sent as i64,
                    record.bytes_received as i64,
                ],
            )?;
        }
    }

    tx.commit()
}

fn parse_ip(row: &Row<'_>, idx: usize) -> rusqlite::Result<IpAddr> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<ConnectionRecord> {
    let status: String = row.get(9)?;
    let status = ConnectionStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            Type::Text,
            format!("unknown connection status '{}'", status).into(),
        )
    })?;

    Ok(ConnectionRecord {
        timestamp: row.get(0)?,
        src_ip: parse_ip(row, 1)?,
        src_port: row.get(2)?,
        dst_ip: parse_ip(row, 3)?,
        dst_port: row.get(4)?,
        dst_domain: row.get(5)?,
        bytes_sent: row.get::<_, i64>(6)? as u64,
        bytes_received: row.get::<_, i64>(7)? as u64,
        duration_seconds: row.get(8)?,
        status,
    })
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        mac_address: row.get(0)?,
        ip_address: parse_ip(row, 1)?,
        hostname: row.get(2)?,
        assigned_name: row.get(3)?,
        first_seen: row.get(4)?,
        last_seen: row.get(5)?,
        total_bytes_sent: row.get::<_, i64>(6)? as u64,
        total_bytes_received: row.get::<_, i64>(7)? as u64,
        connection_count: row.get::<_, i64>(8)? as u64,
    })
}
