//! Desired-count autoscaling for the service

use super::context::DeployContext;
use super::error::ignore_not_found;
use anyhow::{Context, Result};
use aws_sdk_applicationautoscaling::types::{
    MetricType, PolicyType, PredefinedMetricSpecification, ScalableDimension, ServiceNamespace,
    TargetTrackingScalingPolicyConfiguration,
};
use tracing::{debug, info};

use crate::config::AutoscalingConfig;

/// Resolved scaling parameters for one service.
///
/// Derived from [`AutoscalingConfig`] before any call is made; carries the
/// defaulted CPU target so the two API calls below stay trivial.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingSpec {
    resource_id: String,
    min_capacity: i32,
    max_capacity: i32,
    target_value: f64,
}

/// The Application Auto Scaling resource id for a service.
pub fn resource_id(cluster: &str, service_name: &str) -> String {
    format!("service/{cluster}/{service_name}")
}

impl ScalingSpec {
    /// Build the spec for a service's desired-count dimension.
    pub fn new(config: &AutoscalingConfig, cluster: &str, service_name: &str) -> Self {
        Self {
            resource_id: resource_id(cluster, service_name),
            min_capacity: config.min as i32,
            max_capacity: config.max as i32,
            target_value: config.cpu_avg_threshold,
        }
    }

    /// The Application Auto Scaling resource id (`service/<cluster>/<name>`).
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Minimum task count.
    pub fn min_capacity(&self) -> i32 {
        self.min_capacity
    }

    /// Maximum task count.
    pub fn max_capacity(&self) -> i32 {
        self.max_capacity
    }

    /// Average-CPU target for the tracking policy.
    pub fn target_value(&self) -> f64 {
        self.target_value
    }
}

/// Application Auto Scaling client for the service's desired count
pub struct ScalingClient {
    client: aws_sdk_applicationautoscaling::Client,
}

impl ScalingClient {
    /// Create an Application Auto Scaling client from a pre-loaded context
    pub fn from_context(ctx: &DeployContext) -> Self {
        Self {
            client: ctx.autoscaling_client(),
        }
    }

    /// Register the scalable target and attach the CPU tracking policy.
    pub async fn attach(&self, spec: &ScalingSpec) -> Result<()> {
        info!(
            resource = %spec.resource_id(),
            min = spec.min_capacity(),
            max = spec.max_capacity(),
            target = spec.target_value(),
            "Attaching autoscaling"
        );

        self.client
            .register_scalable_target()
            .service_namespace(ServiceNamespace::Ecs)
            .resource_id(spec.resource_id())
            .scalable_dimension(ScalableDimension::EcsServiceDesiredCount)
            .min_capacity(spec.min_capacity())
            .max_capacity(spec.max_capacity())
            .send()
            .await
            .context("Failed to register scalable target")?;

        let tracking = TargetTrackingScalingPolicyConfiguration::builder()
            .target_value(spec.target_value())
            .predefined_metric_specification(
                PredefinedMetricSpecification::builder()
                    .predefined_metric_type(MetricType::EcsServiceAverageCpuUtilization)
                    .build()
                    .context("Failed to build metric specification")?,
            )
            .build()
            .context("Failed to build tracking configuration")?;

        self.client
            .put_scaling_policy()
            .policy_name(policy_name(spec.resource_id()))
            .service_namespace(ServiceNamespace::Ecs)
            .resource_id(spec.resource_id())
            .scalable_dimension(ScalableDimension::EcsServiceDesiredCount)
            .policy_type(PolicyType::TargetTrackingScaling)
            .target_tracking_scaling_policy_configuration(tracking)
            .send()
            .await
            .context("Failed to put scaling policy")?;

        info!(resource = %spec.resource_id(), "Autoscaling attached");
        Ok(())
    }

    /// Remove the policy and scalable target. Idempotent, and usable from
    /// teardown paths that only know the resource id.
    pub async fn detach(&self, resource_id: &str) -> Result<()> {
        let result = self
            .client
            .delete_scaling_policy()
            .policy_name(policy_name(resource_id))
            .service_namespace(ServiceNamespace::Ecs)
            .resource_id(resource_id)
            .scalable_dimension(ScalableDimension::EcsServiceDesiredCount)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete scaling policy")? {
            Some(_) => info!(resource = %resource_id, "Scaling policy deleted"),
            None => debug!(resource = %resource_id, "Scaling policy already gone"),
        }

        let result = self
            .client
            .deregister_scalable_target()
            .service_namespace(ServiceNamespace::Ecs)
            .resource_id(resource_id)
            .scalable_dimension(ScalableDimension::EcsServiceDesiredCount)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to deregister scalable target")? {
            Some(_) => info!(resource = %resource_id, "Scalable target deregistered"),
            None => debug!(resource = %resource_id, "Scalable target already gone"),
        }

        Ok(())
    }
}

fn policy_name(resource_id: &str) -> String {
    format!("{}-cpu-tracking", resource_id.replace('/', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use webship_common::defaults::DEFAULT_CPU_TARGET;

    #[test]
    fn spec_carries_configured_bounds_and_target() {
        let spec = ScalingSpec::new(
            &AutoscalingConfig {
                min: 1,
                max: 5,
                cpu_avg_threshold: 50.0,
            },
            "nginx-0198c2f4a1b2",
            "nginx-0198c2f4a1b2",
        );

        assert_eq!(spec.resource_id(), "service/nginx-0198c2f4a1b2/nginx-0198c2f4a1b2");
        assert_eq!(spec.min_capacity(), 1);
        assert_eq!(spec.max_capacity(), 5);
        assert_eq!(spec.target_value(), 50.0);
    }

    #[test]
    fn default_target_comes_from_the_config_default() {
        let scaling: AutoscalingConfig = serde_json::from_str(r#"{"min":2,"max":4}"#).unwrap();
        let spec = ScalingSpec::new(&scaling, "c", "s");
        assert_eq!(spec.target_value(), DEFAULT_CPU_TARGET);
    }

    #[test]
    fn policy_name_is_slash_free() {
        let spec = ScalingSpec::new(
            &AutoscalingConfig {
                min: 1,
                max: 2,
                cpu_avg_threshold: 75.0,
            },
            "c",
            "s",
        );
        assert_eq!(policy_name(spec.resource_id()), "service-c-s-cpu-tracking");
    }
}
