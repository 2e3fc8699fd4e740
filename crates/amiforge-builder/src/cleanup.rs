//! Resource deletion in dependency order
//!
//! Shared by rollback, the force-recreate pre-clean and the tag-based
//! `cleanup` command. Deletions never abort: each outcome is counted in a
//! [`CleanupReport`] and failures are logged.

use crate::aws::{ErrorClass, ImageBuilderApi, ResourceSummary};
use crate::executor::{BatchExecutor, ErrorPolicy};
use crate::resources::ResourceHandle;
use amiforge_common::ResourceKind;
use amiforge_common::tags::{TAG_BUILD_ID, TAG_CREATED_AT, TAG_NAME, parse_created_at};
use anyhow::Result;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a single resource cleanup operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupResult {
    /// Resource was successfully deleted
    Deleted,
    /// Resource was already deleted (not found)
    AlreadyDeleted,
    /// Cleanup failed with error
    Failed,
    /// Resource was skipped (dry run or cancelled)
    Skipped,
}

/// Report of cleanup operations
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub total_found: usize,
    pub deleted: usize,
    pub already_deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl CleanupReport {
    pub fn record(&mut self, result: CleanupResult) {
        match result {
            CleanupResult::Deleted => self.deleted += 1,
            CleanupResult::AlreadyDeleted => self.already_deleted += 1,
            CleanupResult::Failed => self.failed += 1,
            CleanupResult::Skipped => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &CleanupReport) {
        self.total_found += other.total_found;
        self.deleted += other.deleted;
        self.already_deleted += other.already_deleted;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    /// Every resource is gone
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Delete a single resource and handle "not found" errors gracefully.
pub async fn delete_resource<C: ImageBuilderApi>(client: &C, handle: &ResourceHandle) -> CleanupResult {
    match client.delete_resource(handle.kind, &handle.arn).await {
        Ok(()) => {
            info!(kind = %handle.kind.as_str(), name = %handle.name, arn = %handle.arn, "Deleted");
            CleanupResult::Deleted
        }
        Err(e) if client.classify(&e) == ErrorClass::NotFound => {
            debug!(kind = %handle.kind.as_str(), name = %handle.name, "Already deleted");
            CleanupResult::AlreadyDeleted
        }
        Err(e) => {
            warn!(
                kind = %handle.kind.as_str(),
                name = %handle.name,
                arn = %handle.arn,
                error = ?e,
                "Cleanup failed"
            );
            CleanupResult::Failed
        }
    }
}

/// Delete handles tier by tier in [`ResourceKind::cleanup_priority`] order.
///
/// Handles within one tier do not depend on each other and are deleted
/// concurrently. A tier starts only after the previous one has finished.
pub async fn delete_in_order<C: ImageBuilderApi>(
    client: &C,
    executor: &BatchExecutor,
    handles: Vec<ResourceHandle>,
    cancel: &CancellationToken,
) -> CleanupReport {
    let mut report = CleanupReport {
        total_found: handles.len(),
        ..Default::default()
    };

    let mut tiers: BTreeMap<u8, Vec<ResourceHandle>> = BTreeMap::new();
    for handle in handles {
        tiers
            .entry(handle.kind.cleanup_priority())
            .or_default()
            .push(handle);
    }

    for (priority, tier) in tiers {
        debug!(priority, count = tier.len(), "Deleting cleanup tier");
        let outcome = executor
            .run(
                "delete resources",
                tier,
                ErrorPolicy::CollectAll,
                cancel,
                |_, handle| async move { Ok::<_, anyhow::Error>(delete_resource(client, &handle).await) },
            )
            .await;
        report.skipped += outcome.skipped();
        let (results, _) = outcome.into_parts();
        for (_, result) in results {
            report.record(result);
        }
    }

    report
}

/// List resources created by amiforge, optionally limited to one build name.
///
/// Sorted in cleanup order, then by name.
pub async fn list_managed<C: ImageBuilderApi>(
    client: &C,
    build_name: Option<&str>,
) -> Result<Vec<ResourceSummary>> {
    let mut resources = Vec::new();
    for kind in ResourceKind::ALL {
        let listed = client.list_managed(kind).await?;
        resources.extend(listed.into_iter().filter(|r| {
            build_name.is_none_or(|name| r.tags.get(TAG_NAME).map(String::as_str) == Some(name))
        }));
    }
    resources.sort_by(|a, b| {
        a.kind
            .cleanup_priority()
            .cmp(&b.kind.cleanup_priority())
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.version.cmp(&b.version))
    });
    Ok(resources)
}

/// Delete listed resources, or only report them when `dry_run` is set.
pub async fn cleanup_managed<C: ImageBuilderApi>(
    client: &C,
    executor: &BatchExecutor,
    resources: &[ResourceSummary],
    dry_run: bool,
    cancel: &CancellationToken,
) -> CleanupReport {
    if dry_run {
        for resource in resources {
            info!(kind = %resource.kind.as_str(), name = %resource.name, "[DRY RUN] Would delete");
        }
        return CleanupReport {
            total_found: resources.len(),
            skipped: resources.len(),
            ..Default::default()
        };
    }

    let handles = resources.iter().map(ResourceHandle::from).collect();
    delete_in_order(client, executor, handles, cancel).await
}

/// Render managed resources as a table
pub fn render_table(resources: &[ResourceSummary]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Type"),
            Cell::new("Name"),
            Cell::new("Version"),
            Cell::new("Build"),
            Cell::new("Created"),
        ]);

    for resource in resources {
        let created = resource
            .tags
            .get(TAG_CREATED_AT)
            .and_then(|s| parse_created_at(s))
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(resource.kind.as_str()),
            Cell::new(&resource.name),
            Cell::new(resource.version.as_deref().unwrap_or("-")),
            Cell::new(resource.tags.get(TAG_BUILD_ID).map(String::as_str).unwrap_or("-")),
            Cell::new(created),
        ]);
    }
    table
}

/// Render managed resources as JSON
pub fn render_json(resources: &[ResourceSummary]) -> serde_json::Value {
    resources
        .iter()
        .map(|r| {
            serde_json::json!({
                "type": r.kind.as_str(),
                "name": r.name,
                "version": r.version,
                "arn": r.arn,
                "tags": r.tags,
            })
        })
        .collect()
}
