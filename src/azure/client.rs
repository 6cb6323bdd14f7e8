//! Azure Client
//!
//! Resource Manager client combining authentication and HTTP functionality,
//! and the [`CloudApi`] implementation used by the binary.

use super::api::CloudApi;
use super::auth::ArmCredentials;
use super::http::ArmHttpClient;
use super::models::{
    resource_group_from_id, AccountKey, Deployment, DeploymentOperation, InstanceView,
    ManagedDisk, NetworkInterface, PublicIp, ResourceGroup, RouteTable, StorageAccount,
    VirtualMachine,
};
use crate::error::ApiResult;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

const RESOURCES_API_VERSION: &str = "2021-04-01";
const COMPUTE_API_VERSION: &str = "2023-03-01";
const DISKS_API_VERSION: &str = "2023-04-02";
const NETWORK_API_VERSION: &str = "2023-05-01";
const STORAGE_API_VERSION: &str = "2023-01-01";

/// Main Azure Resource Manager client
#[derive(Clone)]
pub struct ArmClient {
    pub credentials: ArmCredentials,
    pub http: ArmHttpClient,
    pub subscription_id: String,
    endpoint: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<AccountKey>,
}

/// Records whose resource group can be filled from their id or listing scope
trait ScopedRecord {
    fn id(&self) -> &str;
    fn resource_group_mut(&mut self) -> &mut String;
}

macro_rules! scoped_record {
    ($($ty:ty),*) => {
        $(impl ScopedRecord for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn resource_group_mut(&mut self) -> &mut String {
                &mut self.resource_group
            }
        })*
    };
}

scoped_record!(Deployment, VirtualMachine, NetworkInterface, super::models::ArmResource);

fn fill_resource_group<T: ScopedRecord>(mut items: Vec<T>, scope: Option<&str>) -> Vec<T> {
    for item in &mut items {
        if item.resource_group_mut().is_empty() {
            let group = resource_group_from_id(item.id())
                .or(scope)
                .unwrap_or_default()
                .to_string();
            *item.resource_group_mut() = group;
        }
    }
    items
}

fn segment(s: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(s)
}

impl ArmClient {
    /// Create a new client against the public Azure endpoint
    pub fn new(subscription_id: &str, credentials: ArmCredentials) -> ApiResult<Self> {
        Self::with_endpoint(subscription_id, credentials, DEFAULT_ENDPOINT)
    }

    /// Create a client against a custom endpoint (sovereign clouds, tests)
    pub fn with_endpoint(
        subscription_id: &str,
        credentials: ArmCredentials,
        endpoint: &str,
    ) -> ApiResult<Self> {
        Ok(Self {
            credentials,
            http: ArmHttpClient::new()?,
            subscription_id: subscription_id.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Make a GET request
    pub async fn get(&self, url: &str) -> ApiResult<Value> {
        let token = self.credentials.get_token().await?;
        self.http.get(url, &token).await
    }

    /// Make a POST request
    pub async fn post(&self, url: &str, body: Option<&Value>) -> ApiResult<Value> {
        let token = self.credentials.get_token().await?;
        self.http.post(url, &token, body).await
    }

    /// GET a single record
    async fn get_one<T: DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        Ok(serde_json::from_value(self.get(url).await?)?)
    }

    /// GET a list endpoint, following `nextLink` until exhausted
    async fn get_all<T: DeserializeOwned>(&self, url: &str) -> ApiResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());

        while let Some(url) = next {
            let page: Page = serde_json::from_value(self.get(&url).await?)?;
            for value in page.value {
                items.push(serde_json::from_value(value)?);
            }
            next = page.next_link.filter(|l| !l.is_empty());
        }

        Ok(items)
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Build a subscription-scoped URL
    pub fn subscription_url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}/subscriptions/{}/{}?api-version={}",
            self.endpoint,
            segment(&self.subscription_id),
            path,
            api_version
        )
    }

    /// Build a resource-group-scoped provider URL
    pub fn group_url(&self, resource_group: &str, provider_path: &str, api_version: &str) -> String {
        self.subscription_url(
            &format!(
                "resourceGroups/{}/providers/{}",
                segment(resource_group),
                provider_path
            ),
            api_version,
        )
    }

    /// Build a deployment URL, `suffix` appended after the deployment name
    pub fn deployment_url(&self, name: &str, resource_group: &str, suffix: &str) -> String {
        self.group_url(
            resource_group,
            &format!("Microsoft.Resources/deployments/{}{}", segment(name), suffix),
            RESOURCES_API_VERSION,
        )
    }
}

#[async_trait]
impl CloudApi for ArmClient {
    async fn list_resource_groups(&self) -> ApiResult<Vec<ResourceGroup>> {
        let url = self.subscription_url("resourcegroups", RESOURCES_API_VERSION);
        self.get_all(&url).await
    }

    async fn list_deployments(&self, resource_group: &str) -> ApiResult<Vec<Deployment>> {
        let url = self.group_url(
            resource_group,
            "Microsoft.Resources/deployments",
            RESOURCES_API_VERSION,
        );
        Ok(fill_resource_group(
            self.get_all(&url).await?,
            Some(resource_group),
        ))
    }

    async fn get_deployment(&self, name: &str, resource_group: &str) -> ApiResult<Deployment> {
        let url = self.deployment_url(name, resource_group, "");
        let deployment: Deployment = self.get_one(&url).await?;
        Ok(fill_resource_group(vec![deployment], Some(resource_group))
            .pop()
            .unwrap_or_default())
    }

    async fn get_deployment_template(&self, name: &str, resource_group: &str) -> ApiResult<Value> {
        let url = self.deployment_url(name, resource_group, "/exportTemplate");
        let response = self.post(&url, None).await?;
        Ok(response.get("template").cloned().unwrap_or(response))
    }

    async fn list_deployment_operations(
        &self,
        name: &str,
        resource_group: &str,
    ) -> ApiResult<Vec<DeploymentOperation>> {
        let url = self.deployment_url(name, resource_group, "/operations");
        self.get_all(&url).await
    }

    async fn list_virtual_machines(&self, resource_group: &str) -> ApiResult<Vec<VirtualMachine>> {
        let url = self.group_url(
            resource_group,
            "Microsoft.Compute/virtualMachines",
            COMPUTE_API_VERSION,
        );
        Ok(fill_resource_group(
            self.get_all(&url).await?,
            Some(resource_group),
        ))
    }

    async fn get_instance_view(&self, name: &str, resource_group: &str) -> ApiResult<InstanceView> {
        let url = self.group_url(
            resource_group,
            &format!(
                "Microsoft.Compute/virtualMachines/{}/instanceView",
                segment(name)
            ),
            COMPUTE_API_VERSION,
        );
        self.get_one(&url).await
    }

    async fn list_network_interfaces(
        &self,
        resource_group: &str,
    ) -> ApiResult<Vec<NetworkInterface>> {
        let url = self.group_url(
            resource_group,
            "Microsoft.Network/networkInterfaces",
            NETWORK_API_VERSION,
        );
        Ok(fill_resource_group(
            self.get_all(&url).await?,
            Some(resource_group),
        ))
    }

    async fn list_public_ips(&self, resource_group: &str) -> ApiResult<Vec<PublicIp>> {
        let url = self.group_url(
            resource_group,
            "Microsoft.Network/publicIPAddresses",
            NETWORK_API_VERSION,
        );
        Ok(fill_resource_group(
            self.get_all(&url).await?,
            Some(resource_group),
        ))
    }

    async fn list_route_tables(&self, resource_group: &str) -> ApiResult<Vec<RouteTable>> {
        let url = self.group_url(
            resource_group,
            "Microsoft.Network/routeTables",
            NETWORK_API_VERSION,
        );
        Ok(fill_resource_group(
            self.get_all(&url).await?,
            Some(resource_group),
        ))
    }

    async fn list_managed_disks(&self) -> ApiResult<Vec<ManagedDisk>> {
        let url = self.subscription_url("providers/Microsoft.Compute/disks", DISKS_API_VERSION);
        Ok(fill_resource_group(self.get_all(&url).await?, None))
    }

    async fn list_storage_accounts(&self) -> ApiResult<Vec<StorageAccount>> {
        let url = self.subscription_url(
            "providers/Microsoft.Storage/storageAccounts",
            STORAGE_API_VERSION,
        );
        Ok(fill_resource_group(self.get_all(&url).await?, None))
    }

    async fn list_account_keys(
        &self,
        account_name: &str,
        resource_group: &str,
    ) -> ApiResult<Vec<AccountKey>> {
        let url = self.group_url(
            resource_group,
            &format!(
                "Microsoft.Storage/storageAccounts/{}/listKeys",
                segment(account_name)
            ),
            STORAGE_API_VERSION,
        );
        let list: KeyList = serde_json::from_value(self.post(&url, None).await?)?;
        Ok(list.keys)
    }
}
