//! Configuration Management
//!
//! Collector settings, loaded from `<config_dir>/azinv/config.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Subscription to collect
    pub subscription_id: Option<String>,
    /// Region whose resources are collected
    pub region: Option<String>,
    /// Max in-flight API calls per parallel batch, 0 means sequential
    pub parallel_thread_limit: usize,
    /// Targeted runs with more refs than this fall back to full listings
    pub targeted_api_collection_threshold: usize,
    /// Reuse resources of unchanged deployments from the snapshot
    pub enabled_deployments_caching: bool,
    /// Clock skew tolerated when comparing deployment timestamps
    pub timestamp_tolerance_ms: u64,
    /// Provisioning operation marking resources created by a deployment
    pub create_operation: String,
    /// Max stack ids per snapshot resource query
    pub snapshot_batch_size: usize,
    /// Proxy used for template downloads
    pub proxy: Option<String>,
    /// Verify TLS certificates on template downloads
    pub ssl_verify: bool,
    /// Force sequential execution (deterministic runs)
    pub sequential: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            subscription_id: None,
            region: None,
            parallel_thread_limit: 0,
            targeted_api_collection_threshold: 500,
            enabled_deployments_caching: true,
            timestamp_tolerance_ms: 1000,
            create_operation: "create".to_string(),
            snapshot_batch_size: 1000,
            proxy: None,
            ssl_verify: true,
            sequential: false,
        }
    }
}

impl CollectorConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("azinv").join("config.json"))
    }

    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Worker limit actually used by parallel batches.
    ///
    /// Sequential in test builds and when `sequential` is set.
    pub fn effective_thread_limit(&self) -> usize {
        if cfg!(test) || self.sequential {
            0
        } else {
            self.parallel_thread_limit
        }
    }

    pub fn timestamp_tolerance(&self) -> Duration {
        Duration::from_millis(self.timestamp_tolerance_ms)
    }

    /// Get effective subscription (config > Azure CLI default)
    pub fn effective_subscription(&self) -> Option<String> {
        self.subscription_id
            .clone()
            .or_else(crate::azure::auth::get_default_subscription)
    }

    /// Snapshot chunk size, never zero
    pub fn snapshot_chunk(&self) -> usize {
        self.snapshot_batch_size.max(1)
    }
}
