//! Incremental inventory collector
//!
//! A [`Collector`] owns one collection run. Every collection it exposes is
//! fetched at most once and memoized in the run's [`RunContext`]; joins between
//! resource kinds go through indexed lookups instead of scans.
//!
//! # Architecture
//!
//! - [`parallel`] - Bounded-parallel fetch orchestrator
//! - [`stacks`] - Deployment change detection against the snapshot
//! - [`templates`] - Direct and linked template resolution
//! - [`lookup`] - Indexed lookup caches
//! - [`resolvers`] - Power status and storage account keys
//!
//! # Example
//!
//! ```ignore
//! let collector = Collector::new(api, snapshot, transport, config, "eastus");
//! for stack in collector.stacks().await? {
//!     let resources = collector.stack_resources(stack).await?;
//! }
//! let templates = collector.stack_templates().await?;
//! ```

pub mod lookup;
pub mod parallel;
pub mod resolvers;
pub mod stacks;
pub mod templates;

use crate::azure::api::CloudApi;
use crate::azure::http::TemplateTransport;
use crate::azure::models::{
    AccountKey, Deployment, Located, ManagedDisk, NetworkInterface, PublicIp, ResourceGroup,
    RouteTable, StorageAccount, VirtualMachine,
};
use crate::config::CollectorConfig;
use crate::error::{soft_fallback, ApiResult, BatchError, CollectorError, Operation, Result};
use crate::snapshot::SnapshotStore;
use lookup::{Indexed, KeyCase};
use resolvers::AccountKeyMap;
use serde::Serialize;
use stacks::{StackCatalog, StackResources, StackState};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use templates::{Template, TemplateSet};
use tokio::sync::{OnceCell, RwLock};

/// Which stacks a run covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CollectionScope {
    #[default]
    Full,
    /// Only the stacks with these external reference ids
    Targeted(Vec<String>),
}

/// Caches owned by a single run
#[derive(Default)]
struct RunContext {
    resource_groups: OnceCell<Indexed<ResourceGroup>>,
    stacks: OnceCell<StackCatalog>,
    templates: OnceCell<TemplateSet>,
    instances: OnceCell<Indexed<VirtualMachine>>,
    network_ports: OnceCell<Indexed<NetworkInterface>>,
    network_routers: OnceCell<Indexed<RouteTable>>,
    floating_ips: OnceCell<Indexed<PublicIp>>,
    managed_disks: OnceCell<Indexed<ManagedDisk>>,
    storage_accounts: OnceCell<Indexed<StorageAccount>>,
    /// Resources of stacks outside the classified catalog
    extra_stack_resources: RwLock<HashMap<String, Arc<StackResources>>>,
    power_states: RwLock<HashMap<String, Option<String>>>,
    account_keys: OnceCell<AccountKeyMap>,
}

/// Collects the inventory of one region of a subscription
pub struct Collector {
    api: Arc<dyn CloudApi>,
    snapshot: Arc<dyn SnapshotStore>,
    templates: Arc<dyn TemplateTransport>,
    config: CollectorConfig,
    region: String,
    scope: CollectionScope,
    ctx: RunContext,
}

/// Counts of what a run collected
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub region: String,
    pub resource_groups: usize,
    pub stacks: usize,
    pub unchanged_stacks: usize,
    pub stack_resources: usize,
    pub templates: usize,
    pub template_downloads: usize,
    pub instances: usize,
    pub network_ports: usize,
    pub network_routers: usize,
    pub floating_ips: usize,
    pub managed_disks: usize,
    pub storage_accounts: usize,
}

impl Collector {
    pub fn new(
        api: Arc<dyn CloudApi>,
        snapshot: Arc<dyn SnapshotStore>,
        templates: Arc<dyn TemplateTransport>,
        config: CollectorConfig,
        region: &str,
    ) -> Self {
        Self {
            api,
            snapshot,
            templates,
            config,
            region: region.to_string(),
            scope: CollectionScope::Full,
            ctx: RunContext::default(),
        }
    }

    /// Restrict the run to `scope`
    pub fn with_scope(mut self, scope: CollectionScope) -> Self {
        self.scope = scope;
        self.ctx = RunContext::default();
        self
    }

    /// Drop every cache and start a new run
    pub fn begin_run(&mut self) {
        self.ctx = RunContext::default();
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// Resource groups, indexed by name (case-insensitive, as ARM compares them)
    async fn indexed_resource_groups(&self) -> Result<&Indexed<ResourceGroup>> {
        self.ctx
            .resource_groups
            .get_or_try_init(|| async {
                let groups = self
                    .api
                    .list_resource_groups()
                    .await
                    .map_err(|e| CollectorError::api(Operation::ListResourceGroups, e))?;
                Ok(Indexed::build(groups, KeyCase::Insensitive, |rg| {
                    rg.name.as_str()
                }))
            })
            .await
    }

    pub async fn resource_groups(&self) -> Result<&[ResourceGroup]> {
        Ok(self.indexed_resource_groups().await?.items())
    }

    /// Whether an item located at `location` (or, when absent, in a group
    /// located at `group_location`) belongs to this run's region
    fn in_region(&self, location: Option<&str>, group_location: &str) -> bool {
        location
            .unwrap_or(group_location)
            .eq_ignore_ascii_case(&self.region)
    }

    /// Run `fetch` for every resource group and keep the items located in this
    /// run's region. Items without a location inherit their group's.
    async fn list_in_region<'a, T, F, Fut>(&'a self, fetch: F) -> Result<Vec<T>>
    where
        T: Located,
        F: Fn(&'a ResourceGroup) -> Fut,
        Fut: Future<Output = ApiResult<Vec<T>>>,
    {
        let groups = self.resource_groups().await?;
        let mut results = parallel::run(
            groups.iter(),
            self.config.effective_thread_limit(),
            |rg| rg.name.clone(),
            fetch,
        )
        .await;

        let mut items = Vec::new();
        let mut failures = Vec::new();
        for rg in groups {
            match results.remove(&rg.name) {
                Some(Ok(found)) => items.extend(
                    found
                        .into_iter()
                        .filter(|item| self.in_region(item.location(), &rg.location)),
                ),
                Some(Err(e)) if soft_fallback(Operation::ResourceGroupListing, &e).is_some() => {
                    tracing::debug!("Resource group {} not found: {}", rg.name, e);
                }
                Some(Err(e)) => failures.push((rg.name.clone(), e)),
                None => {}
            }
        }

        if !failures.is_empty() {
            return Err(BatchError {
                operation: Operation::ResourceGroupListing,
                failures,
            }
            .into());
        }

        Ok(items)
    }

    async fn stack_catalog(&self) -> Result<&StackCatalog> {
        self.ctx
            .stacks
            .get_or_try_init(|| async {
                let stacks = self.fetch_stacks().await?;
                self.build_stack_catalog(stacks).await
            })
            .await
    }

    /// Deployments of this run, classified against the snapshot
    pub async fn stacks(&self) -> Result<&[Deployment]> {
        Ok(self.stack_catalog().await?.stacks())
    }

    /// Classification of `stack_id`, `None` for stacks not in this run
    pub async fn stack_state(&self, stack_id: &str) -> Result<Option<StackState>> {
        Ok(self.stack_catalog().await?.state(stack_id))
    }

    /// Resources created by `stack`.
    ///
    /// Stacks outside the run's catalog are fetched live once and memoized.
    pub async fn stack_resources(&self, stack: &Deployment) -> Result<Arc<StackResources>> {
        if let Some(found) = self.stack_catalog().await?.resources(&stack.id) {
            return Ok(found);
        }
        if let Some(found) = self.ctx.extra_stack_resources.read().await.get(&stack.id) {
            return Ok(found.clone());
        }

        let resources =
            stacks::raw_stack_resources(self.api.as_ref(), stack, &self.config.create_operation)
                .await
                .map_err(|e| CollectorError::api(Operation::DeploymentOperations, e))?;

        let mut extra = self.ctx.extra_stack_resources.write().await;
        Ok(extra
            .entry(stack.id.clone())
            .or_insert_with(|| {
                Arc::new(StackResources {
                    origin: stacks::ResourceOrigin::Live,
                    resources,
                })
            })
            .clone())
    }

    async fn template_set(&self) -> Result<&TemplateSet> {
        self.ctx
            .templates
            .get_or_try_init(|| async {
                let catalog = self.stack_catalog().await?;
                self.resolve_templates(catalog).await
            })
            .await
    }

    /// Templates of changed stacks whose content could be obtained
    pub async fn stack_templates(&self) -> Result<Vec<&Template>> {
        Ok(self.template_set().await?.templates().collect())
    }

    /// Template resolved for `stack_id`; stacks sharing a URI share the record
    pub async fn template_for_stack(&self, stack_id: &str) -> Result<Option<&Template>> {
        Ok(self.template_set().await?.for_stack(stack_id))
    }

    async fn indexed_instances(&self) -> Result<&Indexed<VirtualMachine>> {
        self.ctx
            .instances
            .get_or_try_init(|| async {
                let api = self.api.as_ref();
                let vms = self
                    .list_in_region(move |rg| api.list_virtual_machines(&rg.name))
                    .await?;
                Ok(Indexed::build(vms, KeyCase::Sensitive, |vm| vm.id.as_str()))
            })
            .await
    }

    pub async fn instances(&self) -> Result<&[VirtualMachine]> {
        Ok(self.indexed_instances().await?.items())
    }

    async fn indexed_network_ports(&self) -> Result<&Indexed<NetworkInterface>> {
        self.ctx
            .network_ports
            .get_or_try_init(|| async {
                let api = self.api.as_ref();
                let nics = self
                    .list_in_region(move |rg| api.list_network_interfaces(&rg.name))
                    .await?;
                Ok(Indexed::build(nics, KeyCase::Sensitive, |n| n.id.as_str()))
            })
            .await
    }

    pub async fn network_ports(&self) -> Result<&[NetworkInterface]> {
        Ok(self.indexed_network_ports().await?.items())
    }

    async fn indexed_network_routers(&self) -> Result<&Indexed<RouteTable>> {
        self.ctx
            .network_routers
            .get_or_try_init(|| async {
                let api = self.api.as_ref();
                let tables = self
                    .list_in_region(move |rg| api.list_route_tables(&rg.name))
                    .await?;
                Ok(Indexed::build(tables, KeyCase::Sensitive, |t| t.id.as_str()))
            })
            .await
    }

    pub async fn network_routers(&self) -> Result<&[RouteTable]> {
        Ok(self.indexed_network_routers().await?.items())
    }

    async fn indexed_floating_ips(&self) -> Result<&Indexed<PublicIp>> {
        self.ctx
            .floating_ips
            .get_or_try_init(|| async {
                let api = self.api.as_ref();
                let ips = self
                    .list_in_region(move |rg| api.list_public_ips(&rg.name))
                    .await?;
                Ok(Indexed::build(ips, KeyCase::Sensitive, |ip| ip.id.as_str()))
            })
            .await
    }

    pub async fn floating_ips(&self) -> Result<&[PublicIp]> {
        Ok(self.indexed_floating_ips().await?.items())
    }

    async fn indexed_managed_disks(&self) -> Result<&Indexed<ManagedDisk>> {
        self.ctx
            .managed_disks
            .get_or_try_init(|| async {
                let disks = self
                    .api
                    .list_managed_disks()
                    .await
                    .map_err(|e| CollectorError::api(Operation::ManagedDisks, e))?;
                Ok(Indexed::build(disks, KeyCase::Insensitive, |d| d.id.as_str()))
            })
            .await
    }

    pub async fn managed_disks(&self) -> Result<&[ManagedDisk]> {
        Ok(self.indexed_managed_disks().await?.items())
    }

    // =========================================================================
    // Joins
    // =========================================================================

    /// Network interfaces attached to `instance`; unknown ids are left out
    pub async fn instance_network_ports(
        &self,
        instance: &VirtualMachine,
    ) -> Result<Vec<&NetworkInterface>> {
        let index = self.indexed_network_ports().await?;
        Ok(instance
            .network_interface_ids()
            .filter_map(|id| index.get(id))
            .collect())
    }

    pub async fn instance_floating_ip(&self, public_ip_id: &str) -> Result<Option<&PublicIp>> {
        Ok(self.indexed_floating_ips().await?.get(public_ip_id))
    }

    /// Managed disk by id, case-insensitive
    pub async fn instance_managed_disk(&self, disk_id: &str) -> Result<Option<&ManagedDisk>> {
        Ok(self.indexed_managed_disks().await?.get(disk_id))
    }

    /// Collect everything once and count it
    pub async fn summary(&self) -> Result<CollectionSummary> {
        let stacks = self.stack_catalog().await?;
        let stack_resources: usize = stacks
            .stacks()
            .iter()
            .filter_map(|s| stacks.resources(&s.id))
            .map(|r| r.resources.len())
            .sum();
        let templates = self.template_set().await?;

        let instances = self.instances().await?;
        self.prefetch_power_states(instances).await?;

        let accounts = self.storage_accounts().await?;
        let mut keyed: Vec<&[AccountKey]> = Vec::with_capacity(accounts.len());
        for account in accounts {
            if let Some(keys) = self.instance_account_keys(account).await? {
                keyed.push(keys);
            }
        }
        tracing::debug!("Account keys loaded for {} storage accounts", keyed.len());

        Ok(CollectionSummary {
            region: self.region.clone(),
            resource_groups: self.resource_groups().await?.len(),
            stacks: stacks.stacks().len(),
            unchanged_stacks: stacks.unchanged_count(),
            stack_resources,
            templates: templates.templates().count(),
            template_downloads: templates.downloads(),
            instances: instances.len(),
            network_ports: self.network_ports().await?.len(),
            network_routers: self.network_routers().await?.len(),
            floating_ips: self.floating_ips().await?.len(),
            managed_disks: self.managed_disks().await?.len(),
            storage_accounts: accounts.len(),
        })
    }
}
