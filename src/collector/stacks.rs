//! Change detection for deployments
//!
//! Each live stack is compared once against the snapshot. Unchanged stacks get
//! their resources from the snapshot, changed stacks from the API, never both.

use super::{parallel, CollectionScope, Collector};
use crate::azure::api::CloudApi;
use crate::azure::models::{name_from_id, resource_group_from_id, Deployment, StackResource};
use crate::error::{
    soft_fallback, ApiError, BatchError, CollectorError, Fallback, Operation, Result,
};
use crate::snapshot::PersistedStack;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Terminal classification of a stack for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    /// Snapshot is current, resources come from the snapshot
    Unchanged,
    /// Resources and template must be fetched live
    Changed,
}

/// Where a stack's resources were taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOrigin {
    Snapshot,
    Live,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackResources {
    pub origin: ResourceOrigin,
    pub resources: Vec<StackResource>,
}

/// Classify a stack from its remote and persisted timestamps.
///
/// Unchanged iff both are present and the persisted one is not older than the
/// remote one by more than `tolerance`.
pub fn classify(
    remote: Option<DateTime<Utc>>,
    persisted: Option<DateTime<Utc>>,
    tolerance: Duration,
) -> StackState {
    let (Some(remote), Some(persisted)) = (remote, persisted) else {
        return StackState::Changed;
    };

    if persisted >= remote {
        return StackState::Unchanged;
    }

    let skew = (remote - persisted).to_std().unwrap_or(Duration::MAX);
    if skew <= tolerance {
        StackState::Unchanged
    } else {
        StackState::Changed
    }
}

/// Stacks of this run with their classification and resources
#[derive(Debug, Default)]
pub struct StackCatalog {
    stacks: Vec<Deployment>,
    states: HashMap<String, StackState>,
    resources: HashMap<String, Arc<StackResources>>,
}

impl StackCatalog {
    pub fn stacks(&self) -> &[Deployment] {
        &self.stacks
    }

    pub fn state(&self, stack_id: &str) -> Option<StackState> {
        self.states.get(stack_id).copied()
    }

    pub fn resources(&self, stack_id: &str) -> Option<Arc<StackResources>> {
        self.resources.get(stack_id).cloned()
    }

    pub fn changed(&self) -> impl Iterator<Item = &Deployment> {
        self.stacks
            .iter()
            .filter(|s| self.state(&s.id) != Some(StackState::Unchanged))
    }

    pub fn unchanged_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| **s == StackState::Unchanged)
            .count()
    }
}

/// Operations of `deployment` that created resources, normalized.
///
/// A missing deployment yields no resources.
pub(crate) async fn raw_stack_resources(
    api: &dyn CloudApi,
    deployment: &Deployment,
    create_operation: &str,
) -> std::result::Result<Vec<StackResource>, ApiError> {
    match api
        .list_deployment_operations(&deployment.name, &deployment.resource_group)
        .await
    {
        Ok(ops) => Ok(ops
            .into_iter()
            .filter(|op| op.is_provisioning(create_operation))
            .map(StackResource::from)
            .collect()),
        Err(e) if soft_fallback(Operation::DeploymentOperations, &e) == Some(Fallback::Empty) => {
            tracing::debug!("Records not found for {}: {}", deployment.id, e);
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

fn dedup_by_id(stacks: Vec<Deployment>) -> Vec<Deployment> {
    let mut seen = HashSet::new();
    stacks
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .collect()
}

impl Collector {
    /// Live stacks for the current scope
    pub(super) async fn fetch_stacks(&self) -> Result<Vec<Deployment>> {
        let refs = match &self.scope {
            CollectionScope::Targeted(refs)
                if refs.len() <= self.config.targeted_api_collection_threshold =>
            {
                return self.fetch_targeted_stacks(refs).await;
            }
            CollectionScope::Targeted(refs) => Some(refs),
            CollectionScope::Full => None,
        };

        let api = self.api.as_ref();
        let mut stacks = self
            .list_in_region(move |rg| api.list_deployments(&rg.name))
            .await?;

        if let Some(refs) = refs {
            // ARM ids compare case-insensitively
            let wanted: HashSet<String> = refs.iter().map(|r| r.to_ascii_lowercase()).collect();
            stacks.retain(|s| wanted.contains(&s.id.to_ascii_lowercase()));
        }

        Ok(dedup_by_id(stacks))
    }

    /// One `get` per targeted ref; refs that no longer exist or lie outside
    /// the run's region are skipped
    async fn fetch_targeted_stacks(&self, refs: &[String]) -> Result<Vec<Deployment>> {
        let groups = self.indexed_resource_groups().await?;
        let api = self.api.as_ref();
        let mut refs = refs.to_vec();
        refs.sort();
        refs.dedup();

        let mut results = parallel::run(
            refs.iter(),
            self.config.effective_thread_limit(),
            |r| r.to_string(),
            move |r| async move {
                let Some(group) = resource_group_from_id(r) else {
                    return Err(ApiError::NotFound(r.clone()));
                };
                api.get_deployment(name_from_id(r), group).await
            },
        )
        .await;

        let mut stacks = Vec::with_capacity(refs.len());
        let mut failures = Vec::new();
        for r in &refs {
            match results.remove(r.as_str()) {
                Some(Ok(stack)) => {
                    let located = groups.get(&stack.resource_group).is_some_and(|rg| {
                        self.in_region(stack.location.as_deref(), &rg.location)
                    });
                    if located {
                        stacks.push(stack);
                    } else {
                        tracing::debug!("Skipping {} outside region {}", stack.id, self.region);
                    }
                }
                Some(Err(e)) if soft_fallback(Operation::TargetedGet, &e).is_some() => {
                    tracing::debug!("Record not found {}: {}", r, e);
                }
                Some(Err(e)) => failures.push((r.clone(), e)),
                None => {}
            }
        }

        if !failures.is_empty() {
            return Err(BatchError {
                operation: Operation::TargetedGet,
                failures,
            }
            .into());
        }

        Ok(dedup_by_id(stacks))
    }

    /// Classify every stack and resolve its resources
    pub(super) async fn build_stack_catalog(&self, stacks: Vec<Deployment>) -> Result<StackCatalog> {
        let mut states: HashMap<String, StackState> = HashMap::with_capacity(stacks.len());
        let mut resources: HashMap<String, Arc<StackResources>> = HashMap::new();

        if self.config.enabled_deployments_caching {
            // targeted runs query the ids as the API spells them
            let ids: Vec<String> = stacks.iter().map(|s| s.id.clone()).collect();
            let refs = match &self.scope {
                CollectionScope::Targeted(_) => Some(ids.as_slice()),
                CollectionScope::Full => None,
            };
            let persisted: HashMap<String, PersistedStack> = self
                .snapshot
                .persisted_stacks(refs)
                .await?
                .into_iter()
                .map(|p| (p.ems_ref.to_ascii_lowercase(), p))
                .collect();

            let tolerance = self.config.timestamp_tolerance();
            let mut unchanged_pks: HashMap<i64, String> = HashMap::new();
            for stack in &stacks {
                let db = persisted.get(&stack.id.to_ascii_lowercase());
                let state = classify(stack.timestamp(), db.and_then(|p| p.finish_time), tolerance);
                states.entry(stack.id.clone()).or_insert(state);

                if let (StackState::Unchanged, Some(db)) = (state, db) {
                    unchanged_pks.insert(db.id, stack.id.clone());
                }
            }

            resources = self.snapshot_resources(&unchanged_pks).await?;
        } else {
            for stack in &stacks {
                states.insert(stack.id.clone(), StackState::Changed);
            }
        }

        let changed: Vec<&Deployment> = stacks
            .iter()
            .filter(|s| states.get(&s.id) == Some(&StackState::Changed))
            .collect();
        tracing::info!(
            "Stacks classified: {} unchanged, {} changed",
            stacks.len() - changed.len(),
            changed.len()
        );

        let live = self.live_resources(&changed).await?;
        for (id, res) in live {
            // an unchanged stack never receives live resources
            resources.entry(id).or_insert(res);
        }

        Ok(StackCatalog {
            stacks,
            states,
            resources,
        })
    }

    /// Snapshot rows for the unchanged stacks, queried in bounded chunks.
    /// Every unchanged stack gets an entry, possibly empty.
    async fn snapshot_resources(
        &self,
        unchanged_pks: &HashMap<i64, String>,
    ) -> Result<HashMap<String, Arc<StackResources>>> {
        let mut by_ref: HashMap<String, Vec<StackResource>> = unchanged_pks
            .values()
            .map(|r| (r.clone(), Vec::new()))
            .collect();

        let mut pks: Vec<i64> = unchanged_pks.keys().copied().collect();
        pks.sort_unstable();

        for batch in pks.chunks(self.config.snapshot_chunk()) {
            for row in self.snapshot.persisted_stack_resources(batch).await? {
                let Some(ems_ref) = unchanged_pks.get(&row.stack_id) else {
                    continue;
                };
                if let Some(list) = by_ref.get_mut(ems_ref) {
                    list.push(StackResource::from(row));
                }
            }
        }

        Ok(by_ref
            .into_iter()
            .map(|(id, resources)| {
                (
                    id,
                    Arc::new(StackResources {
                        origin: ResourceOrigin::Snapshot,
                        resources,
                    }),
                )
            })
            .collect())
    }

    /// Live resources for changed stacks via the orchestrator
    async fn live_resources(
        &self,
        changed: &[&Deployment],
    ) -> Result<HashMap<String, Arc<StackResources>>> {
        if changed.is_empty() {
            return Ok(HashMap::new());
        }

        let api = self.api.as_ref();
        let create_op = self.config.create_operation.as_str();
        let results = parallel::run(
            changed.iter().copied(),
            self.config.effective_thread_limit(),
            |d| d.id.clone(),
            move |d| raw_stack_resources(api, d, create_op),
        )
        .await;

        let (ok, err) = parallel::partition(Operation::DeploymentOperations, results);
        if let Some(err) = err {
            return Err(CollectorError::Batch(err));
        }

        Ok(ok
            .into_iter()
            .map(|(id, resources)| {
                (
                    id,
                    Arc::new(StackResources {
                        origin: ResourceOrigin::Live,
                        resources,
                    }),
                )
            })
            .collect())
    }
}
