//! Idempotent resource management
//!
//! Lookup, get-or-create and delete for every Image Builder resource kind.
//! Names are deterministic, so a repeated build finds what an earlier one
//! created. A create that reports "already exists" falls back to a lookup.

use crate::aws::{ErrorClass, ImageBuilderApi, ResourceSummary};
use crate::aws::imagebuilder::ComponentRequest;
use crate::cleanup::{CleanupReport, delete_in_order};
use crate::error::{BuildError, find_build_error};
use crate::executor::{BatchExecutor, ErrorPolicy};
use amiforge_common::version::{next_available, sort_descending};
use amiforge_common::{ResourceKind, ResourceNames, SemanticVersion};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A resolved resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
    pub arn: String,
    pub version: Option<String>,
}

impl From<&ResourceSummary> for ResourceHandle {
    fn from(summary: &ResourceSummary) -> Self {
        Self {
            kind: summary.kind,
            name: summary.name.clone(),
            arn: summary.arn.clone(),
            version: summary.version.clone(),
        }
    }
}

/// Outcome of get-or-create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub handle: ResourceHandle,
    /// False when an existing resource was reused
    pub created: bool,
}

/// `{kind, name}` pair for batched existence checks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceCheck {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceCheck {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// `kind/name`, the key used in existence maps
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind.as_str(), self.name)
    }
}

pub struct ResourceManager<C> {
    client: Arc<C>,
    executor: BatchExecutor,
    force_recreate: bool,
}

impl<C: ImageBuilderApi> ResourceManager<C> {
    pub fn new(client: Arc<C>, executor: BatchExecutor) -> Self {
        Self {
            client,
            executor,
            force_recreate: false,
        }
    }

    pub fn with_force_recreate(mut self, force_recreate: bool) -> Self {
        self.force_recreate = force_recreate;
        self
    }

    pub fn force_recreate(&self) -> bool {
        self.force_recreate
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }

    /// Look up a resource by exact name, and version when given.
    ///
    /// Returns [`BuildError::NotFound`] when nothing matches. Without a
    /// version, the newest version of a versioned resource is returned.
    pub async fn get(
        &self,
        kind: ResourceKind,
        name: &str,
        version: Option<&str>,
    ) -> Result<ResourceHandle> {
        let summaries = self.client.list_resources(kind, name).await?;
        summaries
            .iter()
            .filter(|s| s.name == name)
            .filter(|s| version.is_none_or(|v| s.version.as_deref() == Some(v)))
            .max_by_key(|s| {
                s.version
                    .as_deref()
                    .and_then(|v| v.parse::<SemanticVersion>().ok())
            })
            .map(ResourceHandle::from)
            .ok_or_else(|| {
                BuildError::NotFound {
                    kind,
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Like [`get`](Self::get), but a missing resource is `Ok(None)`.
    pub async fn find(
        &self,
        kind: ResourceKind,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<ResourceHandle>> {
        match self.get(kind, name, version).await {
            Ok(handle) => Ok(Some(handle)),
            Err(e) if find_build_error(&e).is_some_and(BuildError::is_not_found) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reuse an existing resource or create it.
    ///
    /// With force-recreate, an existing resource is deleted first and a new
    /// one created. `create` returns the new ARN.
    #[instrument(skip_all, fields(kind = %kind.as_str(), name = %name))]
    pub async fn get_or_create<F, Fut>(
        &self,
        kind: ResourceKind,
        name: &str,
        version: Option<&str>,
        create: F,
    ) -> Result<Provisioned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(existing) = self.find(kind, name, version).await? {
            if !self.force_recreate {
                info!(arn = %existing.arn, "Reusing existing resource");
                return Ok(Provisioned {
                    handle: existing,
                    created: false,
                });
            }
            info!(arn = %existing.arn, "Force recreate: deleting existing resource");
            self.delete(&existing).await?;
        }

        self.create_or_adopt(kind, name, version, create).await
    }

    /// Create a resource; on "already exists", adopt the existing one.
    ///
    /// If the fallback lookup also fails, the original creation error is returned.
    pub async fn create_or_adopt<F, Fut>(
        &self,
        kind: ResourceKind,
        name: &str,
        version: Option<&str>,
        create: F,
    ) -> Result<Provisioned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        match create().await {
            Ok(arn) => {
                info!(kind = %kind.as_str(), name = %name, arn = %arn, "Created resource");
                Ok(Provisioned {
                    handle: ResourceHandle {
                        kind,
                        name: name.to_string(),
                        arn,
                        version: version.map(str::to_string),
                    },
                    created: true,
                })
            }
            Err(e) if self.client.classify(&e) == ErrorClass::AlreadyExists => {
                debug!(kind = %kind.as_str(), name = %name, "Already exists, looking it up");
                match self.get(kind, name, version).await {
                    Ok(handle) => {
                        info!(arn = %handle.arn, "Adopted existing resource");
                        Ok(Provisioned {
                            handle,
                            created: false,
                        })
                    }
                    Err(lookup) => {
                        warn!(error = ?lookup, "Lookup after 'already exists' failed");
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, handle: &ResourceHandle) -> Result<()> {
        self.client.delete_resource(handle.kind, &handle.arn).await?;
        info!(kind = %handle.kind.as_str(), name = %handle.name, "Deleted resource");
        Ok(())
    }

    /// Delete by name. A missing resource is a [`BuildError::NotFound`].
    pub async fn delete_by_name(
        &self,
        kind: ResourceKind,
        name: &str,
        version: Option<&str>,
    ) -> Result<()> {
        let handle = self.get(kind, name, version).await?;
        self.delete(&handle).await
    }

    /// Create a component at `request.version`, adopting it if it exists.
    pub async fn create_component(&self, request: &ComponentRequest) -> Result<Provisioned> {
        self.create_or_adopt(
            ResourceKind::Component,
            &request.name,
            Some(&request.version),
            || self.client.create_component(request),
        )
        .await
    }

    /// All versions registered under a component name, newest first
    pub async fn component_versions(&self, name: &str) -> Result<Vec<String>> {
        let summaries = self.client.list_resources(ResourceKind::Component, name).await?;
        let mut versions: Vec<String> = summaries
            .into_iter()
            .filter(|s| s.name == name)
            .filter_map(|s| s.version)
            .collect();
        sort_descending(&mut versions);
        versions.dedup();
        Ok(versions)
    }

    /// The versions components should be created at, in input order.
    ///
    /// Without force-recreate these are the requested versions. With it, the
    /// existing versions of every component are listed in one batch and a
    /// collision advances to the next unused patch version.
    pub async fn resolve_component_versions(
        &self,
        requested: &[(String, SemanticVersion)],
        cancel: &CancellationToken,
    ) -> Result<Vec<SemanticVersion>> {
        if !self.force_recreate {
            return Ok(requested.iter().map(|(_, version)| *version).collect());
        }

        let names = requested.iter().map(|(name, _)| name.clone()).collect();
        let existing = self.component_versions_batch(names, cancel).await?;
        requested
            .iter()
            .map(|(name, version)| {
                let taken = existing.get(name).map(Vec::as_slice).unwrap_or_default();
                let resolved = next_available(*version, taken)
                    .with_context(|| format!("Cannot pick a new version for component {name}"))?;
                if resolved != *version {
                    info!(
                        component = %name,
                        requested = %version,
                        resolved = %resolved,
                        "Component version exists, advancing"
                    );
                }
                Ok(resolved)
            })
            .collect()
    }

    /// Delete this build's pipeline, recipes, distribution and infrastructure
    /// configs ahead of a force-recreate. Components are versioned and kept.
    #[instrument(skip_all, fields(build = %names.base()))]
    pub async fn cleanup_build(
        &self,
        names: &ResourceNames,
        cancel: &CancellationToken,
    ) -> CleanupReport {
        let lookups = [
            (ResourceKind::Pipeline, names.pipeline()),
            (ResourceKind::Recipe, names.recipe()),
            (ResourceKind::DistributionConfig, names.distribution()),
            (ResourceKind::InfrastructureConfig, names.infrastructure()),
        ];

        let mut handles = Vec::new();
        let mut report = CleanupReport::default();
        for (kind, name) in lookups {
            match self.client.list_resources(kind, &name).await {
                Ok(found) => {
                    if found.is_empty() {
                        debug!(kind = %kind.as_str(), name = %name, "Nothing to clean up");
                    }
                    handles.extend(found.iter().filter(|s| s.name == name).map(ResourceHandle::from));
                }
                Err(e) => {
                    warn!(kind = %kind.as_str(), name = %name, error = ?e, "Lookup before cleanup failed");
                    report.failed += 1;
                }
            }
        }

        report.merge(&delete_in_order(self.client.as_ref(), &self.executor, handles, cancel).await);
        info!(
            deleted = report.deleted,
            failed = report.failed,
            "Pre-build cleanup complete"
        );
        report
    }

    /// Delete all but the newest `keep` versions of a component (at least one is kept).
    ///
    /// Every stale version is attempted. Returns the deleted versions, or a
    /// [`BuildError::Batch`] naming the ones that could not be deleted.
    pub async fn cleanup_old_component_versions(
        &self,
        name: &str,
        keep: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let summaries: Vec<ResourceSummary> = self
            .client
            .list_resources(ResourceKind::Component, name)
            .await?
            .into_iter()
            .filter(|s| s.name == name)
            .collect();
        let mut versions: Vec<String> = summaries.iter().filter_map(|s| s.version.clone()).collect();
        sort_descending(&mut versions);
        versions.dedup();

        let stale: Vec<String> = versions.into_iter().skip(keep.max(1)).collect();
        if stale.is_empty() {
            return Ok(stale);
        }
        let arns: Vec<String> = summaries
            .iter()
            .filter(|s| s.version.as_ref().is_some_and(|v| stale.contains(v)))
            .map(|s| s.arn.clone())
            .collect();

        self.delete_components(arns, cancel)
            .await
            .with_context(|| format!("Failed to remove old versions of component {name}"))?;
        info!(component = %name, removed = stale.len(), "Removed old component versions");
        Ok(stale)
    }

    /// Delete components by ARN, attempting every one.
    pub async fn delete_components(&self, arns: Vec<String>, cancel: &CancellationToken) -> Result<()> {
        self.executor
            .run(
                "delete components",
                arns,
                ErrorPolicy::CollectAll,
                cancel,
                |_, arn| async move {
                    self.client
                        .delete_resource(ResourceKind::Component, &arn)
                        .await
                },
            )
            .await
            .into_result()
            .map(|_| ())
    }

    /// Check whether many resources exist. A failed lookup counts as absent.
    pub async fn check_existence(
        &self,
        checks: Vec<ResourceCheck>,
        cancel: &CancellationToken,
    ) -> HashMap<String, bool> {
        let keys: Vec<String> = checks.iter().map(ResourceCheck::key).collect();
        let outcome = self
            .executor
            .run(
                "check existence",
                checks,
                ErrorPolicy::CollectAll,
                cancel,
                |_, check| async move {
                    Ok(self.find(check.kind, &check.name, None).await?.is_some())
                },
            )
            .await;

        let (found, _) = outcome.into_parts();
        let mut existence: HashMap<String, bool> = keys.iter().map(|k| (k.clone(), false)).collect();
        for (index, exists) in found {
            existence.insert(keys[index].clone(), exists);
        }
        existence
    }

    /// Versions of many components, keyed by name
    pub async fn component_versions_batch(
        &self,
        names: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<String>>> {
        let results = self
            .executor
            .run(
                "list component versions",
                names,
                ErrorPolicy::CollectAll,
                cancel,
                |_, name| async move {
                    let versions = self.component_versions(&name).await?;
                    Ok((name, versions))
                },
            )
            .await
            .into_result()?;
        Ok(results.into_iter().collect())
    }
}
