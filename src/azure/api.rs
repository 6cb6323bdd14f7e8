//! Cloud API capability consumed by the collector

use super::models::{
    AccountKey, Deployment, DeploymentOperation, InstanceView, ManagedDisk,
    NetworkInterface, PublicIp, ResourceGroup, RouteTable, StorageAccount, VirtualMachine,
};
use crate::error::ApiResult;
use async_trait::async_trait;
use serde_json::Value;

/// Typed access to the Azure Resource Manager API
///
/// One method per resource kind. Implementations report missing resources as
/// [`ApiError::NotFound`](crate::error::ApiError::NotFound) and stored-state
/// conflicts as [`ApiError::Conflict`](crate::error::ApiError::Conflict); the
/// collector decides which of those are tolerated.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn list_resource_groups(&self) -> ApiResult<Vec<ResourceGroup>>;

    async fn list_deployments(&self, resource_group: &str) -> ApiResult<Vec<Deployment>>;

    async fn get_deployment(&self, name: &str, resource_group: &str) -> ApiResult<Deployment>;

    /// Template stored with the deployment
    async fn get_deployment_template(&self, name: &str, resource_group: &str) -> ApiResult<Value>;

    async fn list_deployment_operations(
        &self,
        name: &str,
        resource_group: &str,
    ) -> ApiResult<Vec<DeploymentOperation>>;

    async fn list_virtual_machines(&self, resource_group: &str) -> ApiResult<Vec<VirtualMachine>>;

    async fn get_instance_view(&self, name: &str, resource_group: &str) -> ApiResult<InstanceView>;

    async fn list_network_interfaces(
        &self,
        resource_group: &str,
    ) -> ApiResult<Vec<NetworkInterface>>;

    async fn list_public_ips(&self, resource_group: &str) -> ApiResult<Vec<PublicIp>>;

    async fn list_route_tables(&self, resource_group: &str) -> ApiResult<Vec<RouteTable>>;

    /// Subscription-wide
    async fn list_managed_disks(&self) -> ApiResult<Vec<ManagedDisk>>;

    /// Subscription-wide
    async fn list_storage_accounts(&self) -> ApiResult<Vec<StorageAccount>>;

    async fn list_account_keys(
        &self,
        account_name: &str,
        resource_group: &str,
    ) -> ApiResult<Vec<AccountKey>>;
}
