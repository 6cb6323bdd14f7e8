//! Power status and storage account key resolvers

use super::lookup::{Indexed, KeyCase};
use super::{parallel, Collector};
use crate::azure::api::CloudApi;
use crate::azure::models::{AccountKey, StorageAccount, VirtualMachine};
use crate::error::{
    soft_fallback, ApiError, BatchError, CollectorError, Fallback, Operation, Result, POWER_OFF,
};
use std::collections::{HashMap, HashSet};

/// Status code prefix of the power state entry in an instance view
pub const POWER_STATE_PREFIX: &str = "PowerState/";

/// Account keys keyed by (account name, resource group)
pub type AccountKeyMap = HashMap<(String, String), Vec<AccountKey>>;

pub(crate) async fn raw_power_status(
    api: &dyn CloudApi,
    vm: &VirtualMachine,
) -> std::result::Result<Option<String>, ApiError> {
    match api.get_instance_view(&vm.name, &vm.resource_group).await {
        Ok(view) => Ok(view
            .status_with_prefix(POWER_STATE_PREFIX)
            .map(str::to_string)),
        Err(e) if soft_fallback(Operation::InstanceView, &e) == Some(Fallback::PowerOff) => {
            // deleted while we were collecting
            tracing::debug!("Instance {} not found, reporting {}", vm.id, POWER_OFF);
            Ok(Some(POWER_OFF.to_string()))
        }
        Err(e) => Err(e),
    }
}

/// Storage account name of an unmanaged disk: first label of the blob host
///
/// e.g. `https://acct1.blob.core.windows.net/vhds/os.vhd` -> `acct1`
pub fn storage_account_name(disk_uri: &str) -> Option<String> {
    let parsed = url::Url::parse(disk_uri).ok()?;
    let host = parsed.host_str()?;
    host.split('.')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Storage accounts referenced by unmanaged disks of `instances`, lowercased
pub fn used_storage_account_names(instances: &[VirtualMachine]) -> HashSet<String> {
    instances
        .iter()
        .filter(|vm| !vm.is_managed_disk())
        .flat_map(|vm| vm.disks())
        .filter_map(|disk| disk.vhd.as_ref()?.uri.as_deref())
        .filter_map(storage_account_name)
        .collect()
}

impl Collector {
    /// Power status of `vm`, fetched on first access and cached for the run
    pub async fn power_status(&self, vm: &VirtualMachine) -> Result<Option<String>> {
        if let Some(cached) = self.ctx.power_states.read().await.get(&vm.id) {
            return Ok(cached.clone());
        }

        let status = raw_power_status(self.api.as_ref(), vm)
            .await
            .map_err(|e| CollectorError::api(Operation::InstanceView, e))?;

        let mut cache = self.ctx.power_states.write().await;
        Ok(cache.entry(vm.id.clone()).or_insert(status).clone())
    }

    /// Fetch power states of all `instances` in one parallel pass.
    ///
    /// Does nothing once the cache holds any entry.
    pub async fn prefetch_power_states(&self, instances: &[VirtualMachine]) -> Result<()> {
        if instances.is_empty() || !self.ctx.power_states.read().await.is_empty() {
            return Ok(());
        }

        let api = self.api.as_ref();
        let results = parallel::run(
            instances.iter(),
            self.config.effective_thread_limit(),
            |vm| vm.id.clone(),
            move |vm| raw_power_status(api, vm),
        )
        .await;

        let (ok, err) = parallel::partition(Operation::InstanceView, results);
        {
            let mut cache = self.ctx.power_states.write().await;
            for (id, status) in ok {
                cache.entry(id).or_insert(status);
            }
        }

        match err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Storage accounts used by at least one instance's unmanaged disks
    pub async fn storage_accounts(&self) -> Result<&[StorageAccount]> {
        Ok(self.indexed_storage_accounts().await?.items())
    }

    async fn indexed_storage_accounts(&self) -> Result<&Indexed<StorageAccount>> {
        self.ctx
            .storage_accounts
            .get_or_try_init(|| async {
                let used = used_storage_account_names(self.instances().await?);
                if used.is_empty() {
                    return Ok(Indexed::build(
                        Vec::<StorageAccount>::new(),
                        KeyCase::Insensitive,
                        |a| a.name.as_str(),
                    ));
                }

                let mut accounts = self
                    .api
                    .list_storage_accounts()
                    .await
                    .map_err(|e| CollectorError::api(Operation::StorageAccounts, e))?;
                accounts.retain(|a| used.contains(&a.name.to_ascii_lowercase()));
                tracing::debug!("{} storage accounts in use", accounts.len());

                Ok(Indexed::build(accounts, KeyCase::Insensitive, |a| {
                    a.name.as_str()
                }))
            })
            .await
    }

    /// Storage account by name, case-insensitive; `None` when not in use
    pub async fn instance_storage_accounts(&self, name: &str) -> Result<Option<&StorageAccount>> {
        Ok(self.indexed_storage_accounts().await?.get(name))
    }

    /// Keys of `account`; all used accounts are fetched in one pass on first call
    pub async fn instance_account_keys(
        &self,
        account: &StorageAccount,
    ) -> Result<Option<&[AccountKey]>> {
        let keys = self
            .ctx
            .account_keys
            .get_or_try_init(|| self.fetch_account_keys())
            .await?;

        Ok(keys
            .get(&(account.name.clone(), account.resource_group.clone()))
            .map(Vec::as_slice))
    }

    async fn fetch_account_keys(&self) -> Result<AccountKeyMap> {
        let accounts = self.storage_accounts().await?;
        if accounts.is_empty() {
            return Ok(AccountKeyMap::new());
        }

        let api = self.api.as_ref();
        let results = parallel::run(
            accounts.iter(),
            self.config.effective_thread_limit(),
            |a| (a.name.clone(), a.resource_group.clone()),
            move |a| api.list_account_keys(&a.name, &a.resource_group),
        )
        .await;

        let mut keys = AccountKeyMap::with_capacity(results.len());
        let mut failures = Vec::new();
        for ((name, group), result) in results {
            match result {
                Ok(k) => {
                    keys.insert((name, group), k);
                }
                Err(e) => failures.push((format!("{group}/{name}"), e)),
            }
        }

        if !failures.is_empty() {
            return Err(BatchError {
                operation: Operation::AccountKeys,
                failures,
            }
            .into());
        }

        Ok(keys)
    }
}
