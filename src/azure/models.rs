//! Typed Azure Resource Manager records
//!
//! Only the fields the collector reads are typed; the remaining payload of
//! generic resources is kept as raw JSON in `properties`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resources that may carry their own location
pub trait Located {
    fn location(&self) -> Option<&str>;
}

/// Extract the resource group segment of an ARM resource id
///
/// e.g. `/subscriptions/s/resourceGroups/rg1/providers/...` -> `rg1`
pub fn resource_group_from_id(id: &str) -> Option<&str> {
    let mut parts = id.split('/');
    while let Some(part) = parts.next() {
        if part.eq_ignore_ascii_case("resourceGroups") {
            return parts.next().filter(|s| !s.is_empty());
        }
    }
    None
}

/// Extract the last path segment of an ARM resource id
pub fn name_from_id(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateLink {
    pub uri: Option<String>,
    pub content_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentProperties {
    /// Remote-reported last change, RFC 3339
    pub timestamp: Option<String>,
    pub provisioning_state: Option<String>,
    pub template_link: Option<TemplateLink>,
}

/// A template deployment, the "stack" of the inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    /// Filled by the client from the listing scope when absent from the payload
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub properties: DeploymentProperties,
}

impl Deployment {
    /// Remote timestamp, `None` when missing or unparsable
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.properties.timestamp.as_deref()?;
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                tracing::debug!("Unparsable timestamp {:?} on {}: {}", raw, self.id, e);
                None
            }
        }
    }

    pub fn template_uri(&self) -> Option<&str> {
        self.properties
            .template_link
            .as_ref()
            .and_then(|l| l.uri.as_deref())
    }

    pub fn template_content_version(&self) -> Option<&str> {
        self.properties
            .template_link
            .as_ref()
            .and_then(|l| l.content_version.as_deref())
    }
}

impl Located for Deployment {
    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResource {
    pub id: Option<String>,
    pub resource_name: Option<String>,
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProperties {
    pub provisioning_operation: Option<String>,
    pub provisioning_state: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub status_message: Option<Value>,
    pub target_resource: Option<TargetResource>,
}

/// One entry of a deployment's operation log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOperation {
    pub id: String,
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub properties: OperationProperties,
}

impl DeploymentOperation {
    pub fn is_provisioning(&self, operation: &str) -> bool {
        self.properties
            .provisioning_operation
            .as_deref()
            .is_some_and(|op| op.eq_ignore_ascii_case(operation))
    }
}

/// A resource created by a stack, identical whether it came from the live API
/// or from the snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackResource {
    pub ems_ref: String,
    pub name: Option<String>,
    pub logical_resource: Option<String>,
    pub physical_resource: Option<String>,
    pub resource_category: Option<String>,
    pub resource_status: Option<String>,
    pub resource_status_reason: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<DeploymentOperation> for StackResource {
    fn from(op: DeploymentOperation) -> Self {
        let props = op.properties;
        let target = props.target_resource.unwrap_or_default();
        let reason = props.status_message.and_then(|m| match m {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

        Self {
            ems_ref: op.id,
            name: target.resource_name.clone(),
            logical_resource: target.resource_name,
            physical_resource: target.id,
            resource_category: target.resource_type,
            resource_status: props.provisioning_state,
            resource_status_reason: reason,
            last_updated: props.timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vhd {
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubResource {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vhd: Option<Vhd>,
    #[serde(default)]
    pub managed_disk: Option<SubResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    #[serde(default)]
    pub os_disk: Option<Disk>,
    #[serde(default)]
    pub data_disks: Vec<Disk>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    #[serde(default)]
    pub network_interfaces: Vec<SubResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmProperties {
    #[serde(default)]
    pub storage_profile: StorageProfile,
    #[serde(default)]
    pub network_profile: NetworkProfile,
}

/// A virtual machine (inventory "instance")
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub properties: VmProperties,
}

impl VirtualMachine {
    /// OS disk followed by data disks
    pub fn disks(&self) -> impl Iterator<Item = &Disk> {
        let profile = &self.properties.storage_profile;
        profile.os_disk.iter().chain(profile.data_disks.iter())
    }

    /// Whether the VM uses managed disks (decided by its OS disk)
    pub fn is_managed_disk(&self) -> bool {
        self.properties
            .storage_profile
            .os_disk
            .as_ref()
            .is_some_and(|d| d.managed_disk.is_some())
    }

    pub fn network_interface_ids(&self) -> impl Iterator<Item = &str> {
        self.properties
            .network_profile
            .network_interfaces
            .iter()
            .map(|n| n.id.as_str())
    }
}

impl Located for VirtualMachine {
    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub code: String,
    #[serde(default)]
    pub display_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceView {
    #[serde(default)]
    pub statuses: Vec<InstanceStatus>,
}

impl InstanceView {
    /// Display status of the first status whose code starts with `prefix`
    pub fn status_with_prefix(&self, prefix: &str) -> Option<&str> {
        self.statuses
            .iter()
            .find(|s| s.code.starts_with(prefix))
            .and_then(|s| s.display_status.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationProperties {
    #[serde(default, rename = "publicIPAddress")]
    pub public_ip_address: Option<SubResource>,
    #[serde(default, rename = "privateIPAddress")]
    pub private_ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpConfiguration {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: IpConfigurationProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceProperties {
    #[serde(default)]
    pub ip_configurations: Vec<IpConfiguration>,
}

/// A network interface (inventory "network port")
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub properties: NetworkInterfaceProperties,
}

impl NetworkInterface {
    pub fn public_ip_ids(&self) -> impl Iterator<Item = &str> {
        self.properties
            .ip_configurations
            .iter()
            .filter_map(|c| c.properties.public_ip_address.as_ref())
            .map(|p| p.id.as_str())
    }
}

impl Located for NetworkInterface {
    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

/// A resource whose payload is carried untyped: public IPs, route tables,
/// managed disks, storage accounts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmResource {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub properties: Value,
}

impl Located for ArmResource {
    fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

pub type PublicIp = ArmResource;
pub type RouteTable = ArmResource;
pub type ManagedDisk = ArmResource;
pub type StorageAccount = ArmResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountKey {
    pub key_name: String,
    pub value: String,
    #[serde(default)]
    pub permissions: Option<String>,
}
