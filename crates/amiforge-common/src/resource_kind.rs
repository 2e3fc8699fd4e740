//! Image Builder resource types and cleanup ordering
//!
//! Provides consistent cleanup priority across rollback, force-recreate and
//! tag-based cleanup. Resources must be deleted in reverse dependency order.

use std::fmt;

/// Types of Image Builder resources managed by amiforge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Image pipeline (references recipe, infra and dist)
    Pipeline,
    /// Image recipe (references components)
    Recipe,
    /// Distribution configuration
    DistributionConfig,
    /// Infrastructure configuration
    InfrastructureConfig,
    /// Build component
    Component,
}

impl ResourceKind {
    /// All kinds, in cleanup order.
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Pipeline,
        ResourceKind::Recipe,
        ResourceKind::DistributionConfig,
        ResourceKind::InfrastructureConfig,
        ResourceKind::Component,
    ];

    /// Get cleanup priority (lower number = cleanup first)
    ///
    /// - 0: Pipeline (nothing references it)
    /// - 1: Recipe (referenced by the pipeline)
    /// - 2: Distribution and infrastructure configs (independent of each other)
    /// - 3: Components (referenced by the recipe)
    pub fn cleanup_priority(self) -> u8 {
        match self {
            ResourceKind::Pipeline => 0,
            ResourceKind::Recipe => 1,
            ResourceKind::DistributionConfig => 2,
            ResourceKind::InfrastructureConfig => 2,
            ResourceKind::Component => 3,
        }
    }

    /// Short machine-readable name, used in logs and existence-check keys.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Pipeline => "pipeline",
            ResourceKind::Recipe => "recipe",
            ResourceKind::DistributionConfig => "dist",
            ResourceKind::InfrastructureConfig => "infra",
            ResourceKind::Component => "component",
        }
    }

    /// Whether lookups for this kind are scoped to a semantic version
    pub fn is_versioned(self) -> bool {
        matches!(self, ResourceKind::Recipe | ResourceKind::Component)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Pipeline => "image pipeline",
            ResourceKind::Recipe => "image recipe",
            ResourceKind::DistributionConfig => "distribution configuration",
            ResourceKind::InfrastructureConfig => "infrastructure configuration",
            ResourceKind::Component => "component",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_before_recipe() {
        assert!(
            ResourceKind::Pipeline.cleanup_priority() < ResourceKind::Recipe.cleanup_priority(),
            "Pipeline must be deleted before the recipe it references"
        );
    }

    #[test]
    fn test_recipe_before_components() {
        assert!(
            ResourceKind::Recipe.cleanup_priority() < ResourceKind::Component.cleanup_priority(),
            "Recipe must be deleted before its components"
        );
    }

    #[test]
    fn test_configs_share_a_tier() {
        assert_eq!(
            ResourceKind::DistributionConfig.cleanup_priority(),
            ResourceKind::InfrastructureConfig.cleanup_priority()
        );
    }

    #[test]
    fn test_all_is_sorted_by_priority() {
        let priorities: Vec<u8> = ResourceKind::ALL
            .iter()
            .map(|k| k.cleanup_priority())
            .collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_versioned_kinds() {
        assert!(ResourceKind::Recipe.is_versioned());
        assert!(ResourceKind::Component.is_versioned());
        assert!(!ResourceKind::Pipeline.is_versioned());
        assert!(!ResourceKind::InfrastructureConfig.is_versioned());
    }
}
