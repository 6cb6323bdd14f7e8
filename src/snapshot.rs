//! Snapshot Store
//!
//! Read-only view of the previous collection's stacks and their resources.

use crate::azure::models::StackResource;
use crate::error::SnapshotError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A stack as persisted by the previous run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStack {
    /// Internal primary key
    pub id: i64,
    pub ems_ref: String,
    pub finish_time: Option<DateTime<Utc>>,
}

/// A stack resource row as persisted by the previous run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStackResource {
    pub stack_id: i64,
    pub ems_ref: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logical_resource: Option<String>,
    #[serde(default)]
    pub physical_resource: Option<String>,
    #[serde(default)]
    pub resource_category: Option<String>,
    #[serde(default)]
    pub resource_status: Option<String>,
    #[serde(default)]
    pub resource_status_reason: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<PersistedStackResource> for StackResource {
    fn from(row: PersistedStackResource) -> Self {
        Self {
            ems_ref: row.ems_ref,
            name: row.name,
            logical_resource: row.logical_resource,
            physical_resource: row.physical_resource,
            resource_category: row.resource_category,
            resource_status: row.resource_status,
            resource_status_reason: row.resource_status_reason,
            last_updated: row.last_updated,
        }
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persisted stacks, restricted to `refs` (compared case-insensitively)
    /// when given
    async fn persisted_stacks(
        &self,
        refs: Option<&[String]>,
    ) -> Result<Vec<PersistedStack>, SnapshotError>;

    /// Resource rows belonging to any of `stack_ids`
    async fn persisted_stack_resources(
        &self,
        stack_ids: &[i64],
    ) -> Result<Vec<PersistedStackResource>, SnapshotError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    stacks: Vec<PersistedStack>,
    #[serde(default)]
    stack_resources: Vec<PersistedStackResource>,
}

/// Snapshot kept in a JSON document: `{"stacks": [...], "stack_resources": [...]}`
#[derive(Debug, Default)]
pub struct JsonSnapshotStore {
    doc: SnapshotDocument,
}

impl JsonSnapshotStore {
    /// Load a snapshot file; a missing file is an empty snapshot
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        if !path.exists() {
            tracing::info!("No snapshot at {:?}, every stack will be refetched", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, SnapshotError> {
        let doc: SnapshotDocument = serde_json::from_str(content)?;
        tracing::debug!(
            "Snapshot loaded: {} stacks, {} stack resources",
            doc.stacks.len(),
            doc.stack_resources.len()
        );
        Ok(Self { doc })
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn persisted_stacks(
        &self,
        refs: Option<&[String]>,
    ) -> Result<Vec<PersistedStack>, SnapshotError> {
        let wanted: Option<HashSet<String>> =
            refs.map(|r| r.iter().map(|id| id.to_ascii_lowercase()).collect());

        Ok(self
            .doc
            .stacks
            .iter()
            .filter(|s| {
                wanted
                    .as_ref()
                    .map_or(true, |w| w.contains(&s.ems_ref.to_ascii_lowercase()))
            })
            .cloned()
            .collect())
    }

    async fn persisted_stack_resources(
        &self,
        stack_ids: &[i64],
    ) -> Result<Vec<PersistedStackResource>, SnapshotError> {
        let wanted: HashSet<i64> = stack_ids.iter().copied().collect();

        Ok(self
            .doc
            .stack_resources
            .iter()
            .filter(|r| wanted.contains(&r.stack_id))
            .cloned()
            .collect())
    }
}
