//! Shared AWS configuration and deployment identity
//!
//! Provides `DeployContext` for loading AWS SDK configuration once and
//! creating every service client from the same config. The context also
//! carries the deployment identifier so builders never read it from ambient
//! process state.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::sync::Arc;

/// Shared AWS configuration plus the active deployment identifier.
///
/// One context is created per invocation; all service clients and all
/// resource names derive from it.
///
/// # Example
/// ```ignore
/// let ctx = DeployContext::new("us-east-2", "0198c2f4a1b2").await;
///
/// let ec2 = Ec2Client::from_context(&ctx);
/// let elb = ElbClient::from_context(&ctx);
/// let ecs = EcsClient::from_context(&ctx);
/// ```
#[derive(Clone)]
pub struct DeployContext {
    config: Arc<SdkConfig>,
    region: String,
    deploy_id: String,
}

impl DeployContext {
    /// Load AWS configuration for the specified region.
    ///
    /// Credentials, shared config files, and IAM-role providers are resolved
    /// by the SDK's default chain.
    pub async fn new(region: &str, deploy_id: &str) -> Self {
        Self::with_profile(region, deploy_id, None).await
    }

    /// Load AWS configuration with an explicit profile override.
    pub async fn with_profile(region: &str, deploy_id: &str, profile: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        Self {
            config: Arc::new(config),
            region: region.to_string(),
            deploy_id: deploy_id.to_string(),
        }
    }

    /// Get the underlying SDK config for direct client construction.
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Get the region string.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Get the deployment identifier every resource name is qualified with.
    pub fn deploy_id(&self) -> &str {
        &self.deploy_id
    }

    /// Create an EC2 client from this context.
    pub fn ec2_client(&self) -> aws_sdk_ec2::Client {
        aws_sdk_ec2::Client::new(self.sdk_config())
    }

    /// Create an ELBv2 client from this context.
    pub fn elb_client(&self) -> aws_sdk_elasticloadbalancingv2::Client {
        aws_sdk_elasticloadbalancingv2::Client::new(self.sdk_config())
    }

    /// Create an ECS client from this context.
    pub fn ecs_client(&self) -> aws_sdk_ecs::Client {
        aws_sdk_ecs::Client::new(self.sdk_config())
    }

    /// Create an IAM client from this context.
    pub fn iam_client(&self) -> aws_sdk_iam::Client {
        aws_sdk_iam::Client::new(self.sdk_config())
    }

    /// Create a Route 53 client from this context.
    pub fn route53_client(&self) -> aws_sdk_route53::Client {
        aws_sdk_route53::Client::new(self.sdk_config())
    }

    /// Create an ACM client from this context.
    pub fn acm_client(&self) -> aws_sdk_acm::Client {
        aws_sdk_acm::Client::new(self.sdk_config())
    }

    /// Create an Application Auto Scaling client from this context.
    pub fn autoscaling_client(&self) -> aws_sdk_applicationautoscaling::Client {
        aws_sdk_applicationautoscaling::Client::new(self.sdk_config())
    }

    /// Create an STS client from this context.
    pub fn sts_client(&self) -> aws_sdk_sts::Client {
        aws_sdk_sts::Client::new(self.sdk_config())
    }
}

impl std::fmt::Debug for DeployContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployContext")
            .field("region", &self.region)
            .field("deploy_id", &self.deploy_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require AWS credentials and are skipped in regular runs

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_context_creation() {
        let ctx = DeployContext::new("us-east-2", "testdeploy01").await;
        assert_eq!(ctx.region(), "us-east-2");
        assert_eq!(ctx.deploy_id(), "testdeploy01");
    }

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_context_clone() {
        let ctx1 = DeployContext::new("us-east-2", "testdeploy01").await;
        let ctx2 = ctx1.clone();

        // Both point at the same Arc'd config
        assert_eq!(ctx1.region(), ctx2.region());
        assert_eq!(ctx1.deploy_id(), ctx2.deploy_id());
    }
}
