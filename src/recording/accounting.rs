// src/recording/accounting.rs
//! Accounting sink for finished relay sessions
//!
//! Turns a finished session into one `ConnectionRecord` and one device
//! mutation. Failures are logged and the session is dropped from accounting;
//! traffic has already been delivered by the time this runs.

use crate::interception::relay::FinishedSession;
use crate::recording::storage::TrafficStore;
use crate::utils::errors::{GatewayError, Result};
use metrics::counter;
use tracing::{debug, error};

/// Persists finished sessions into the traffic store
#[derive(Clone)]
pub struct AccountingSink {
    store: TrafficStore,
}

impl AccountingSink {
    pub fn new(store: TrafficStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TrafficStore {
        &self.store
    }

    /// Append the connection record and upsert the source device
    pub async fn record(&self, finished: &FinishedSession) -> Result<()> {
        let record = finished.to_record();

        self.store
            .commit_session(&record)
            .await
            .map_err(|e| GatewayError::Accounting(format!("session {}: {}", finished.id, e)))?;

        debug!(
            "Logged: {}:{} -> {}:{} ({}\u{2191}/{}\u{2193}) {:.3}s {}",
            record.src_ip,
            record.src_port,
            record.dst_ip,
            record.dst_port,
            record.bytes_sent,
            record.bytes_received,
            record.duration_seconds,
            record.status
        );
        Ok(())
    }

    /// Record a finished session, logging instead of propagating failure
    pub async fn settle(&self, finished: &FinishedSession) {
        if let Err(e) = self.record(finished).await {
            counter!("gateway_accounting_failures_total").increment(1);
            error!(session = %finished.id, error = %e, "Failed to log connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::records::ConnectionStatus;
    use std::time::Duration;

    fn finished(sent: u64, received: u64) -> FinishedSession {
        FinishedSession {
            id: ulid::Ulid::new(),
            source: "192.168.1.50:40000".parse().unwrap(),
            destination: "93.184.216.34:443".parse().unwrap(),
            started_at: chrono::Utc::now(),
            duration: Duration::from_millis(1500),
            bytes_sent: sent,
            bytes_received: received,
            status: ConnectionStatus::Closed,
        }
    }

    #[tokio::test]
    async fn test_record_appends_connection_and_device() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        let sink = AccountingSink::new(store.clone());

        sink.record(&finished(1024, 2048)).await.unwrap();

        let recent = store.recent_connections(1).await.unwrap();
        assert_eq!(recent[0].bytes_sent, 1024);
        assert_eq!(recent[0].bytes_received, 2048);
        assert!((recent[0].duration_seconds - 1.5).abs() < 1e-9);

        let device = store
            .device_by_ip("192.168.1.50".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(device.connection_count, 1);
    }

    #[tokio::test]
    async fn test_record_failure_is_accounting_error() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        store.execute_raw("DROP TABLE connections").await.unwrap();
        let sink = AccountingSink::new(store);

        let result = sink.record(&finished(1, 1)).await;
        assert!(matches!(result, Err(GatewayError::Accounting(_))));
    }

    #[tokio::test]
    async fn test_settle_swallows_failure() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        store.execute_raw("DROP TABLE devices").await.unwrap();
        let sink = AccountingSink::new(store.clone());

        sink.settle(&finished(1, 1)).await;
        assert_eq!(store.connection_count().await.unwrap(), 0);
    }
}
