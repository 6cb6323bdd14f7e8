//! In-memory cloud, snapshot and template transport for collector tests
#![allow(dead_code)]

use async_trait::async_trait;
use azinv::azure::api::CloudApi;
use azinv::azure::http::TemplateTransport;
use azinv::azure::models::{
    AccountKey, ArmResource, Deployment, DeploymentOperation, Disk, InstanceStatus, InstanceView,
    ManagedDisk, NetworkInterface, NetworkProfile, OperationProperties, PublicIp, ResourceGroup,
    RouteTable, StorageAccount, StorageProfile, SubResource, TargetResource, TemplateLink, Vhd,
    VirtualMachine, VmProperties,
};
use azinv::error::{ApiError, ApiResult, SnapshotError};
use azinv::snapshot::{PersistedStack, PersistedStackResource, SnapshotStore};
use azinv::{Collector, CollectorConfig};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const REGION: &str = "eastus";

/// Error injected into a fake call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    NotFound,
    Conflict,
    Server,
}

impl Fail {
    fn to_error(self, what: &str) -> ApiError {
        match self {
            Fail::NotFound => ApiError::NotFound(what.to_string()),
            Fail::Conflict => ApiError::Conflict(what.to_string()),
            Fail::Server => ApiError::Http {
                status: 500,
                message: format!("boom: {what}"),
            },
        }
    }
}

/// Call log shared by the fakes, keyed by `method` and `method:target`
#[derive(Debug, Default)]
pub struct Calls(Mutex<HashMap<String, usize>>);

impl Calls {
    fn hit(&self, method: &str, target: &str) {
        let mut calls = self.0.lock().unwrap();
        *calls.entry(method.to_string()).or_default() += 1;
        *calls.entry(format!("{method}:{target}")).or_default() += 1;
    }

    pub fn count(&self, key: &str) -> usize {
        self.0.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct FakeCloud {
    pub groups: Vec<ResourceGroup>,
    pub groups_fail: Option<Fail>,
    /// By resource group
    pub deployments: HashMap<String, Vec<Deployment>>,
    pub deployments_fail: HashMap<String, Fail>,
    /// By deployment name
    pub operations: HashMap<String, Vec<DeploymentOperation>>,
    pub operations_fail: HashMap<String, Fail>,
    pub direct_templates: HashMap<String, Value>,
    pub direct_templates_fail: HashMap<String, Fail>,
    /// By resource group
    pub vms: HashMap<String, Vec<VirtualMachine>>,
    /// By VM name
    pub views: HashMap<String, InstanceView>,
    pub views_fail: HashMap<String, Fail>,
    pub nics: HashMap<String, Vec<NetworkInterface>>,
    pub public_ips: HashMap<String, Vec<PublicIp>>,
    pub route_tables: HashMap<String, Vec<RouteTable>>,
    pub disks: Vec<ManagedDisk>,
    pub accounts: Vec<StorageAccount>,
    /// By account name
    pub keys: HashMap<String, Vec<AccountKey>>,
    pub keys_fail: HashMap<String, Fail>,
    pub calls: Calls,
}

impl FakeCloud {
    pub fn with_groups(groups: &[(&str, &str)]) -> Self {
        Self {
            groups: groups.iter().map(|(n, l)| group(n, l)).collect(),
            ..Default::default()
        }
    }

    pub fn add_deployment(&mut self, d: Deployment) {
        self.deployments
            .entry(d.resource_group.clone())
            .or_default()
            .push(d);
    }

    pub fn add_vm(&mut self, vm: VirtualMachine) {
        self.vms.entry(vm.resource_group.clone()).or_default().push(vm);
    }

    pub fn count(&self, key: &str) -> usize {
        self.calls.count(key)
    }
}

fn by_group<T: Clone>(map: &HashMap<String, Vec<T>>, rg: &str) -> Vec<T> {
    map.get(rg).cloned().unwrap_or_default()
}

fn check(fails: &HashMap<String, Fail>, key: &str) -> ApiResult<()> {
    match fails.get(key) {
        Some(f) => Err(f.to_error(key)),
        None => Ok(()),
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn list_resource_groups(&self) -> ApiResult<Vec<ResourceGroup>> {
        self.calls.hit("list_resource_groups", "");
        match self.groups_fail {
            Some(f) => Err(f.to_error("resourcegroups")),
            None => Ok(self.groups.clone()),
        }
    }

    async fn list_deployments(&self, resource_group: &str) -> ApiResult<Vec<Deployment>> {
        self.calls.hit("list_deployments", resource_group);
        check(&self.deployments_fail, resource_group)?;
        Ok(by_group(&self.deployments, resource_group))
    }

    async fn get_deployment(&self, name: &str, resource_group: &str) -> ApiResult<Deployment> {
        self.calls.hit("get_deployment", name);
        // ARM names compare case-insensitively
        self.deployments
            .iter()
            .filter(|(rg, _)| rg.eq_ignore_ascii_case(resource_group))
            .flat_map(|(_, list)| list.iter())
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(name.to_string()))
    }

    async fn get_deployment_template(&self, name: &str, _resource_group: &str) -> ApiResult<Value> {
        self.calls.hit("get_deployment_template", name);
        check(&self.direct_templates_fail, name)?;
        Ok(self.direct_templates.get(name).cloned().unwrap_or(Value::Null))
    }

    async fn list_deployment_operations(
        &self,
        name: &str,
        _resource_group: &str,
    ) -> ApiResult<Vec<DeploymentOperation>> {
        self.calls.hit("list_deployment_operations", name);
        check(&self.operations_fail, name)?;
        Ok(by_group(&self.operations, name))
    }

    async fn list_virtual_machines(&self, resource_group: &str) -> ApiResult<Vec<VirtualMachine>> {
        self.calls.hit("list_virtual_machines", resource_group);
        Ok(by_group(&self.vms, resource_group))
    }

    async fn get_instance_view(&self, name: &str, _resource_group: &str) -> ApiResult<InstanceView> {
        self.calls.hit("get_instance_view", name);
        check(&self.views_fail, name)?;
        Ok(self.views.get(name).cloned().unwrap_or_default())
    }

    async fn list_network_interfaces(
        &self,
        resource_group: &str,
    ) -> ApiResult<Vec<NetworkInterface>> {
        self.calls.hit("list_network_interfaces", resource_group);
        Ok(by_group(&self.nics, resource_group))
    }

    async fn list_public_ips(&self, resource_group: &str) -> ApiResult<Vec<PublicIp>> {
        self.calls.hit("list_public_ips", resource_group);
        Ok(by_group(&self.public_ips, resource_group))
    }

    async fn list_route_tables(&self, resource_group: &str) -> ApiResult<Vec<RouteTable>> {
        self.calls.hit("list_route_tables", resource_group);
        Ok(by_group(&self.route_tables, resource_group))
    }

    async fn list_managed_disks(&self) -> ApiResult<Vec<ManagedDisk>> {
        self.calls.hit("list_managed_disks", "");
        Ok(self.disks.clone())
    }

    async fn list_storage_accounts(&self) -> ApiResult<Vec<StorageAccount>> {
        self.calls.hit("list_storage_accounts", "");
        Ok(self.accounts.clone())
    }

    async fn list_account_keys(
        &self,
        account_name: &str,
        _resource_group: &str,
    ) -> ApiResult<Vec<AccountKey>> {
        self.calls.hit("list_account_keys", account_name);
        check(&self.keys_fail, account_name)?;
        Ok(by_group(&self.keys, account_name))
    }
}

#[derive(Debug, Default)]
pub struct FakeSnapshot {
    pub stacks: Vec<PersistedStack>,
    pub resources: Vec<PersistedStackResource>,
    /// Refs filter of every `persisted_stacks` call
    pub stack_queries: Mutex<Vec<Option<Vec<String>>>>,
    /// Size of every `persisted_stack_resources` batch
    pub resource_batches: Mutex<Vec<usize>>,
}

impl FakeSnapshot {
    pub fn stack(&mut self, pk: i64, ems_ref: &str, finish_time: &str) {
        self.stacks.push(PersistedStack {
            id: pk,
            ems_ref: ems_ref.to_string(),
            finish_time: Some(ts(finish_time)),
        });
    }

    pub fn resource(&mut self, pk: i64, ems_ref: &str) {
        self.resources.push(PersistedStackResource {
            stack_id: pk,
            ems_ref: ems_ref.to_string(),
            name: Some(format!("persisted-{pk}")),
            logical_resource: None,
            physical_resource: None,
            resource_category: None,
            resource_status: Some("Succeeded".into()),
            resource_status_reason: None,
            last_updated: None,
        });
    }

    pub fn stack_queries(&self) -> Vec<Option<Vec<String>>> {
        self.stack_queries.lock().unwrap().clone()
    }

    pub fn resource_batches(&self) -> Vec<usize> {
        self.resource_batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotStore for FakeSnapshot {
    async fn persisted_stacks(
        &self,
        refs: Option<&[String]>,
    ) -> Result<Vec<PersistedStack>, SnapshotError> {
        self.stack_queries.lock().unwrap().push(refs.map(<[String]>::to_vec));
        Ok(self
            .stacks
            .iter()
            .filter(|s| {
                refs.map_or(true, |r| {
                    r.iter().any(|id| id.eq_ignore_ascii_case(&s.ems_ref))
                })
            })
            .cloned()
            .collect())
    }

    async fn persisted_stack_resources(
        &self,
        stack_ids: &[i64],
    ) -> Result<Vec<PersistedStackResource>, SnapshotError> {
        self.resource_batches.lock().unwrap().push(stack_ids.len());
        Ok(self
            .resources
            .iter()
            .filter(|r| stack_ids.contains(&r.stack_id))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    pub bodies: HashMap<String, String>,
    pub fail: HashMap<String, Fail>,
    pub calls: Calls,
}

impl FakeTransport {
    pub fn serve(mut self, uri: &str, body: &str) -> Self {
        self.bodies.insert(uri.to_string(), body.to_string());
        self
    }
}

#[async_trait]
impl TemplateTransport for FakeTransport {
    async fn fetch(&self, uri: &str) -> ApiResult<String> {
        self.calls.hit("fetch", uri);
        check(&self.fail, uri)?;
        self.bodies
            .get(uri)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(uri.to_string()))
    }
}

/// Collector over shared fakes so tests can inspect the call logs afterwards
pub fn collector(
    api: &Arc<FakeCloud>,
    snapshot: &Arc<FakeSnapshot>,
    transport: &Arc<FakeTransport>,
    config: CollectorConfig,
) -> Collector {
    Collector::new(
        api.clone(),
        snapshot.clone(),
        transport.clone(),
        config,
        REGION,
    )
}

pub fn config() -> CollectorConfig {
    CollectorConfig {
        parallel_thread_limit: 4,
        ..Default::default()
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

pub fn group(name: &str, location: &str) -> ResourceGroup {
    ResourceGroup {
        id: format!("/subscriptions/sub/resourceGroups/{name}"),
        name: name.to_string(),
        location: location.to_string(),
    }
}

pub fn deployment_id(rg: &str, name: &str) -> String {
    format!("/subscriptions/sub/resourceGroups/{rg}/providers/Microsoft.Resources/deployments/{name}")
}

pub fn deployment(rg: &str, name: &str, timestamp: &str) -> Deployment {
    let mut d = Deployment {
        id: deployment_id(rg, name),
        name: name.to_string(),
        resource_group: rg.to_string(),
        ..Default::default()
    };
    d.properties.timestamp = Some(timestamp.to_string());
    d
}

pub fn linked(mut d: Deployment, uri: &str) -> Deployment {
    d.properties.template_link = Some(TemplateLink {
        uri: Some(uri.to_string()),
        content_version: Some("1.0.0.0".into()),
    });
    d
}

pub fn operation(id: &str, provisioning: &str) -> DeploymentOperation {
    DeploymentOperation {
        id: id.to_string(),
        operation_id: Some(id.rsplit('/').next().unwrap_or(id).to_string()),
        properties: OperationProperties {
            provisioning_operation: Some(provisioning.to_string()),
            provisioning_state: Some("Succeeded".into()),
            target_resource: Some(TargetResource {
                id: Some(format!("{id}/target")),
                resource_name: Some(format!("res-{id}")),
                resource_type: Some("Microsoft.Network/virtualNetworks".into()),
            }),
            ..Default::default()
        },
    }
}

pub fn vm(rg: &str, name: &str) -> VirtualMachine {
    VirtualMachine {
        id: format!("/subscriptions/sub/resourceGroups/{rg}/providers/Microsoft.Compute/virtualMachines/{name}"),
        name: name.to_string(),
        resource_group: rg.to_string(),
        ..Default::default()
    }
}

pub fn unmanaged_vm(rg: &str, name: &str, disk_uri: &str) -> VirtualMachine {
    let mut v = vm(rg, name);
    v.properties = VmProperties {
        storage_profile: StorageProfile {
            os_disk: Some(Disk {
                name: Some(format!("{name}-os")),
                vhd: Some(Vhd {
                    uri: Some(disk_uri.to_string()),
                }),
                managed_disk: None,
            }),
            data_disks: Vec::new(),
        },
        ..Default::default()
    };
    v
}

pub fn with_nics(mut v: VirtualMachine, nic_ids: &[&str]) -> VirtualMachine {
    v.properties.network_profile = NetworkProfile {
        network_interfaces: nic_ids
            .iter()
            .map(|id| SubResource { id: id.to_string() })
            .collect(),
    };
    v
}

pub fn arm(rg: &str, id: &str, name: &str) -> ArmResource {
    ArmResource {
        id: id.to_string(),
        name: name.to_string(),
        resource_group: rg.to_string(),
        ..Default::default()
    }
}

pub fn nic(rg: &str, id: &str) -> NetworkInterface {
    NetworkInterface {
        id: id.to_string(),
        name: id.rsplit('/').next().unwrap_or(id).to_string(),
        resource_group: rg.to_string(),
        ..Default::default()
    }
}

pub fn power_view(state: &str) -> InstanceView {
    InstanceView {
        statuses: vec![
            InstanceStatus {
                code: "ProvisioningState/succeeded".into(),
                display_status: Some("Provisioning succeeded".into()),
            },
            InstanceStatus {
                code: format!("PowerState/{}", state.to_ascii_lowercase()),
                display_status: Some(format!("VM {state}")),
            },
        ],
    }
}

pub fn key(name: &str) -> AccountKey {
    AccountKey {
        key_name: name.to_string(),
        value: format!("secret-{name}"),
        permissions: Some("FULL".into()),
    }
}
