//! Template resolution for changed stacks
//!
//! A stack's template is either stored with the deployment (direct) or linked
//! by URI. Linked templates are registered per distinct URI and downloaded once,
//! whatever the number of stacks pointing at them.

use super::parallel;
use super::stacks::StackCatalog;
use super::Collector;
use crate::azure::models::Deployment;
use crate::error::{
    soft_fallback, ApiError, BatchError, CollectorError, Fallback, Operation, Result,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// A resolved deployment template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    pub description: String,
    pub name: String,
    /// Id of the stack that registered the template
    pub uid: String,
    /// Canonical JSON, `None` until downloaded or when the download failed
    pub content: Option<String>,
}

impl Template {
    fn for_stack(stack: &Deployment, content: Option<String>) -> Self {
        Self {
            description: format!(
                "contentVersion: {}",
                stack.template_content_version().unwrap_or_default()
            ),
            name: stack.name.clone(),
            uid: stack.id.clone(),
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TemplateKey {
    Direct(String),
    Linked(String),
}

/// Templates of the run and the stack -> template mapping
#[derive(Debug, Default)]
pub struct TemplateSet {
    all: Vec<Template>,
    by_key: HashMap<TemplateKey, usize>,
    by_stack: HashMap<String, usize>,
    downloads: usize,
}

impl TemplateSet {
    /// Register `stack` under `key`; the first registrant of a key wins
    fn register(&mut self, key: TemplateKey, stack: &Deployment, content: Option<String>) {
        let idx = match self.by_key.get(&key) {
            Some(&idx) => idx,
            None => {
                self.all.push(Template::for_stack(stack, content));
                let idx = self.all.len() - 1;
                self.by_key.insert(key, idx);
                idx
            }
        };
        self.by_stack.insert(stack.id.clone(), idx);
    }

    fn pending_uris(&self) -> Vec<(String, usize)> {
        let mut pending: Vec<(String, usize)> = self
            .by_key
            .iter()
            .filter_map(|(key, &idx)| match key {
                TemplateKey::Linked(uri) if self.all[idx].content.is_none() => {
                    Some((uri.clone(), idx))
                }
                _ => None,
            })
            .collect();
        pending.sort_by_key(|(_, idx)| *idx);
        pending
    }

    /// Templates whose content was obtained
    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.all.iter().filter(|t| t.content.is_some())
    }

    /// Template resolved for `stack_id`, if its content was obtained
    pub fn for_stack(&self, stack_id: &str) -> Option<&Template> {
        self.by_stack
            .get(stack_id)
            .map(|&idx| &self.all[idx])
            .filter(|t| t.content.is_some())
    }

    /// Number of URI downloads attempted
    pub fn downloads(&self) -> usize {
        self.downloads
    }
}

/// Decode then re-encode, so formatting differences do not defeat equality
pub fn normalize_template(body: &str) -> std::result::Result<String, serde_json::Error> {
    let parsed: Value = serde_json::from_str(body)?;
    Ok(parsed.to_string())
}

impl Collector {
    /// Resolve templates of every changed stack in `catalog`
    pub(super) async fn resolve_templates(&self, catalog: &StackCatalog) -> Result<TemplateSet> {
        let changed: Vec<&Deployment> = catalog.changed().collect();
        let api = self.api.as_ref();

        let mut direct = parallel::run(
            changed.iter().copied(),
            self.config.effective_thread_limit(),
            |d| d.id.clone(),
            move |d| api.get_deployment_template(&d.name, &d.resource_group),
        )
        .await;

        let mut set = TemplateSet::default();
        let mut failures = Vec::new();

        for stack in &changed {
            match direct.remove(&stack.id) {
                Some(Ok(content)) if !content.is_null() => {
                    set.register(
                        TemplateKey::Direct(stack.id.clone()),
                        stack,
                        Some(content.to_string()),
                    );
                    continue;
                }
                Some(Err(e)) => match soft_fallback(Operation::DirectTemplate, &e) {
                    Some(Fallback::Absent) => {
                        tracing::debug!("No stored template for {}: {}", stack.id, e);
                    }
                    _ => {
                        failures.push((stack.id.clone(), e));
                        continue;
                    }
                },
                _ => {}
            }

            if let Some(uri) = stack.template_uri() {
                set.register(TemplateKey::Linked(uri.to_string()), stack, None);
            }
        }

        if !failures.is_empty() {
            return Err(BatchError {
                operation: Operation::DirectTemplate,
                failures,
            }
            .into());
        }

        tracing::info!("Retrieving templates...");
        for (uri, idx) in set.pending_uris() {
            set.downloads += 1;
            match self.download_template(&uri).await {
                Ok(content) => set.all[idx].content = Some(content),
                Err(e) => match soft_fallback(Operation::TemplateDownload, &e) {
                    Some(_) => {
                        tracing::error!("Failed to download Azure template {}. Reason: {}", uri, e);
                    }
                    None => return Err(CollectorError::api(Operation::TemplateDownload, e)),
                },
            }
        }
        tracing::info!("Retrieving templates...Complete - Count [{}]", set.downloads);

        Ok(set)
    }

    async fn download_template(&self, uri: &str) -> std::result::Result<String, ApiError> {
        let body = self.templates.fetch(uri).await?;
        Ok(normalize_template(&body)?)
    }
}
