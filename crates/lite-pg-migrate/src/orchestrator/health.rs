//! Connectivity probe for both endpoints.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::traits::SourceReader;
use crate::drivers::{redact_dsn, Connection};

/// Result of probing the source and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_endpoint: String,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,

    pub target_endpoint: String,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,

    /// True when both endpoints answered.
    pub healthy: bool,
}

impl HealthCheckResult {
    /// Connect to both endpoints and run a trivial query against each.
    pub async fn probe(config: &Config) -> Self {
        let max_conns = 1;
        let (source_connected, source_latency_ms, source_error) =
            probe_endpoint(&config.source.dsn, max_conns).await;
        let (target_connected, target_latency_ms, target_error) =
            probe_endpoint(&config.target.dsn, max_conns).await;

        Self {
            source_endpoint: redact_dsn(&config.source.dsn),
            source_connected,
            source_latency_ms,
            source_error,
            target_endpoint: redact_dsn(&config.target.dsn),
            target_connected,
            target_latency_ms,
            target_error,
            healthy: source_connected && target_connected,
        }
    }
}

async fn probe_endpoint(dsn: &str, max_conns: usize) -> (bool, u64, Option<String>) {
    let start = Instant::now();
    let result = match Connection::connect(dsn, max_conns).await {
        Ok(conn) => {
            let result = conn.test_connection().await;
            conn.close().await;
            result
        }
        Err(e) => Err(e),
    };
    let latency = start.elapsed().as_millis() as u64;
    match result {
        Ok(()) => (true, latency, None),
        Err(e) => (false, latency, Some(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_health_check_reports_each_endpoint() {
        let dir = tempdir().unwrap();
        let source = format!("sqlite:///{}", dir.path().join("source.db").display());
        let config = Config::from_dsns(source, "postgresql://app@127.0.0.1:1/none?connect_timeout=1");

        let result = HealthCheckResult::probe(&config).await;
        assert!(result.source_connected);
        assert!(result.source_error.is_none());
        assert!(!result.target_connected);
        assert!(result.target_error.is_some());
        assert!(!result.healthy);
    }
}
