//! Shared AWS configuration context
//!
//! Provides `AwsContext` for loading AWS SDK configuration once and
//! creating the Image Builder, EC2 and CloudWatch Logs clients from the same
//! config.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::sync::Arc;

/// Shared AWS configuration context for creating service clients.
///
/// # Example
/// ```ignore
/// let aws = AwsContext::with_profile("us-east-1", Some("builds")).await;
///
/// let imagebuilder = ImageBuilderClient::from_context(&aws);
/// let ec2 = Ec2ImageClient::from_context(&aws);
/// ```
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
    region: String,
    profile: Option<String>,
}

impl AwsContext {
    /// Load AWS configuration for the specified region using the default
    /// credential chain.
    pub async fn new(region: &str) -> Self {
        Self::with_profile(region, None).await
    }

    /// Load AWS configuration for the specified region, optionally using a
    /// named profile from the shared config files.
    pub async fn with_profile(region: &str, profile: Option<&str>) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        Self {
            config: Arc::new(config),
            region: region.to_string(),
            profile: profile.map(str::to_string),
        }
    }

    /// Create a context for another region that reuses this context's profile.
    pub async fn for_region(&self, region: &str) -> Self {
        Self::with_profile(region, self.profile.as_deref()).await
    }

    /// Get the underlying SDK config for direct client construction.
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Get the region string.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Get the profile name, if one was configured.
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Create an Image Builder client from this context.
    pub fn imagebuilder_client(&self) -> aws_sdk_imagebuilder::Client {
        aws_sdk_imagebuilder::Client::new(self.sdk_config())
    }

    /// Create an EC2 client from this context.
    pub fn ec2_client(&self) -> aws_sdk_ec2::Client {
        aws_sdk_ec2::Client::new(self.sdk_config())
    }

    /// Create a CloudWatch Logs client from this context.
    pub fn logs_client(&self) -> aws_sdk_cloudwatchlogs::Client {
        aws_sdk_cloudwatchlogs::Client::new(self.sdk_config())
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_context_creation() {
        let ctx = AwsContext::new("us-east-1").await;
        assert_eq!(ctx.region(), "us-east-1");
        assert!(ctx.profile().is_none());
    }

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_for_region_keeps_profile() {
        let ctx = AwsContext::with_profile("us-east-1", Some("default")).await;
        let other = ctx.for_region("eu-west-1").await;

        assert_eq!(other.region(), "eu-west-1");
        assert_eq!(other.profile(), Some("default"));
    }
}
