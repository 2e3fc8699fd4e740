//! Ledger of resources created during one build attempt
//!
//! Handles are recorded as each creation succeeds, in creation order. On
//! success the ledger is committed and forgotten; on failure it is rolled back:
//! pipeline, then recipe, then distribution and infrastructure configs
//! together, then components. Rollback is best effort and never fails.

use crate::aws::ImageBuilderApi;
use crate::cleanup::{CleanupReport, delete_in_order};
use crate::executor::BatchExecutor;
use crate::resources::{Provisioned, ResourceHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Append-only record of the resources this attempt owns
#[derive(Debug, Default)]
pub struct CreatedResources {
    entries: Vec<ResourceHandle>,
    settled: bool,
}

impl CreatedResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, handle: ResourceHandle) {
        info!(kind = %handle.kind.as_str(), name = %handle.name, "Tracking created resource");
        self.entries.push(handle);
    }

    /// Record a get-or-create outcome. Reused resources belong to an earlier
    /// build and are not rolled back.
    pub fn record_provisioned(&mut self, provisioned: &Provisioned) {
        if provisioned.created {
            self.record(provisioned.handle.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handles in creation order
    pub fn handles(&self) -> &[ResourceHandle] {
        &self.entries
    }

    /// Keep everything: the attempt succeeded.
    pub fn commit(mut self) -> Vec<ResourceHandle> {
        self.settled = true;
        std::mem::take(&mut self.entries)
    }

    /// Delete everything recorded, newest first within each dependency tier.
    ///
    /// Runs with its own cancellation token so a cancelled build still cleans up.
    pub async fn rollback<C: ImageBuilderApi>(
        mut self,
        client: &C,
        executor: &BatchExecutor,
    ) -> CleanupReport {
        self.settled = true;
        let mut handles = std::mem::take(&mut self.entries);
        if handles.is_empty() {
            return CleanupReport::default();
        }

        handles.reverse();
        info!(count = handles.len(), "Rolling back created resources");
        let report = delete_in_order(client, executor, handles, &CancellationToken::new()).await;
        if report.failed > 0 {
            warn!(
                failed = report.failed,
                deleted = report.deleted,
                "Rollback left resources behind; run `amiforge cleanup` to remove them"
            );
        } else {
            info!(deleted = report.deleted, "Rollback complete");
        }
        report
    }
}

impl Drop for CreatedResources {
    fn drop(&mut self) {
        if !self.settled && !self.entries.is_empty() {
            warn!(
                count = self.entries.len(),
                "Created resources dropped without commit or rollback"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::MockImageBuilderApi;
    use amiforge_common::ResourceKind;
    use std::sync::{Arc, Mutex};

    fn handle(kind: ResourceKind, name: &str) -> ResourceHandle {
        ResourceHandle {
            kind,
            name: name.to_string(),
            arn: format!("arn:{name}"),
            version: None,
        }
    }

    #[test]
    fn reused_resources_are_not_owned() {
        let mut ledger = CreatedResources::new();
        ledger.record_provisioned(&Provisioned {
            handle: handle(ResourceKind::InfrastructureConfig, "web-infra"),
            created: false,
        });
        ledger.record_provisioned(&Provisioned {
            handle: handle(ResourceKind::DistributionConfig, "web-dist"),
            created: true,
        });
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.handles()[0].name, "web-dist");
        assert_eq!(ledger.commit().len(), 1);
    }

    #[tokio::test]
    async fn rollback_in_reverse_dependency_order() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let seen = deleted.clone();
        let mut mock = MockImageBuilderApi::new();
        mock.expect_delete_resource().returning(move |_, arn| {
            seen.lock().unwrap().push(arn.to_string());
            Ok(())
        });

        let mut ledger = CreatedResources::new();
        ledger.record(handle(ResourceKind::Component, "web-0-shell"));
        ledger.record(handle(ResourceKind::Component, "web-1-ansible"));
        ledger.record(handle(ResourceKind::DistributionConfig, "web-dist"));
        ledger.record(handle(ResourceKind::Recipe, "web-recipe"));
        ledger.record(handle(ResourceKind::Pipeline, "web-pipeline"));

        let report = ledger.rollback(&mock, &BatchExecutor::new(1)).await;
        assert_eq!(report.deleted, 5);

        let deleted = deleted.lock().unwrap();
        assert_eq!(deleted[0], "arn:web-pipeline");
        assert_eq!(deleted[1], "arn:web-recipe");
        assert_eq!(deleted[2], "arn:web-dist");
        assert!(deleted[3..].iter().all(|arn| arn.contains("-shell") || arn.contains("-ansible")));
    }

    #[tokio::test]
    async fn rollback_continues_past_failures() {
        let mut mock = MockImageBuilderApi::new();
        mock.expect_delete_resource()
            .times(3)
            .returning(|kind, _| match kind {
                ResourceKind::Recipe => Err(anyhow::anyhow!("resource in use")),
                _ => Ok(()),
            });
        mock.expect_classify()
            .returning(crate::aws::classify_anyhow_error);

        let mut ledger = CreatedResources::new();
        ledger.record(handle(ResourceKind::Component, "web-0-shell"));
        ledger.record(handle(ResourceKind::Recipe, "web-recipe"));
        ledger.record(handle(ResourceKind::Pipeline, "web-pipeline"));

        let report = ledger.rollback(&mock, &BatchExecutor::default()).await;
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn empty_rollback_makes_no_calls() {
        let mut mock = MockImageBuilderApi::new();
        mock.expect_delete_resource().never();
        let report = CreatedResources::new()
            .rollback(&mock, &BatchExecutor::default())
            .await;
        assert_eq!(report, CleanupReport::default());
    }
}
