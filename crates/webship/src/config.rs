//! Deployment configuration types and validation

use serde::{Deserialize, Serialize};
use thiserror::Error;
use webship_common::defaults::default_cpu_target;
use webship_common::naming::MAX_ELB_NAME_LEN;

/// Longest logical service name we accept.
///
/// The deployment id suffix (12 chars plus a dash) must still fit inside the
/// 32-character ALB/target-group name limit.
pub const MAX_SERVICE_NAME_LEN: usize = MAX_ELB_NAME_LEN - 13;

/// What the user wants running: one container image behind a load balancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Logical service name, used as the stem for every resource name
    pub name: String,

    /// Container image reference (e.g. "nginx:1.27" or "ghcr.io/acme/api:v2")
    pub image: String,

    /// TCP port the container listens on
    pub port: u16,

    /// Fargate CPU units as the ECS API expects them (e.g. "256");
    /// the task definition defaults this to "256" when unset
    #[serde(default)]
    pub cpu: Option<String>,

    /// Fargate memory in MiB as the ECS API expects it (e.g. "512");
    /// the task definition defaults this to "512" when unset
    #[serde(default)]
    pub memory: Option<String>,

    /// Autoscaling bounds; absent means a fixed-size service
    #[serde(default)]
    pub autoscaling: Option<AutoscalingConfig>,

    /// Route 53 hosted zone for a custom domain. Presence switches the whole
    /// ingress path to HTTPS with a DNS-validated certificate.
    #[serde(default)]
    pub hosted_zone: Option<String>,
}

/// CPU-tracking autoscaling bounds for the service's desired count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoscalingConfig {
    /// Minimum number of running tasks
    pub min: u32,

    /// Maximum number of running tasks
    pub max: u32,

    /// Average-CPU target for the tracking policy, percent
    #[serde(default = "default_cpu_target")]
    pub cpu_avg_threshold: f64,
}

/// Where the service runs. Supplied by the caller, never created here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkContext {
    /// VPC the security groups are created in
    pub vpc_id: String,

    /// Subnets for the load balancer and the tasks (at least one; the ALB
    /// itself needs two availability zones to actually provision)
    pub subnet_ids: Vec<String>,
}

/// Rejected configuration, reported before any AWS call is made.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("service name must not be empty")]
    EmptyName,

    #[error("service name '{0}' must start with a lowercase letter and contain only [a-z0-9-]")]
    InvalidName(String),

    #[error("service name '{0}' is longer than {MAX_SERVICE_NAME_LEN} characters")]
    NameTooLong(String),

    #[error("container image must not be empty")]
    EmptyImage,

    #[error("container image '{0}' is not a valid image reference")]
    MalformedImage(String),

    #[error("port must be a non-zero TCP port")]
    InvalidPort,

    #[error("autoscaling minimum must be at least 1")]
    ZeroMinCapacity,

    #[error("autoscaling bounds are inverted: min {min} > max {max}")]
    InvertedBounds { min: u32, max: u32 },

    #[error("CPU target {0} is outside (0, 100]")]
    InvalidCpuTarget(f64),

    #[error("hosted zone must not be empty when set")]
    EmptyHostedZone,

    #[error("at least one subnet is required")]
    NoSubnets,
}

impl ServiceConfig {
    /// Validate the configuration.
    ///
    /// Every rule here guards an AWS-side failure that would otherwise only
    /// surface minutes into a deploy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !valid_service_name(&self.name) {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }
        if self.name.len() > MAX_SERVICE_NAME_LEN {
            return Err(ConfigError::NameTooLong(self.name.clone()));
        }
        if self.image.is_empty() {
            return Err(ConfigError::EmptyImage);
        }
        if !valid_image_reference(&self.image) {
            return Err(ConfigError::MalformedImage(self.image.clone()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if let Some(scaling) = &self.autoscaling {
            scaling.validate()?;
        }
        if let Some(zone) = &self.hosted_zone {
            if zone.trim_end_matches('.').is_empty() {
                return Err(ConfigError::EmptyHostedZone);
            }
        }
        Ok(())
    }

    /// Port the load balancer listens on: 443 with a custom domain, else 80.
    pub fn exposed_port(&self) -> u16 {
        if self.hosted_zone.is_some() {
            webship_common::defaults::HTTPS_PORT
        } else {
            webship_common::defaults::HTTP_PORT
        }
    }
}

impl AutoscalingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min == 0 {
            return Err(ConfigError::ZeroMinCapacity);
        }
        if self.min > self.max {
            return Err(ConfigError::InvertedBounds {
                min: self.min,
                max: self.max,
            });
        }
        if self.cpu_avg_threshold <= 0.0 || self.cpu_avg_threshold > 100.0 {
            return Err(ConfigError::InvalidCpuTarget(self.cpu_avg_threshold));
        }
        Ok(())
    }
}

impl NetworkContext {
    /// Validate the network context.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subnet_ids.is_empty() {
            return Err(ConfigError::NoSubnets);
        }
        Ok(())
    }
}

/// DNS-label style names: lowercase alphanumeric plus dashes, letter first.
fn valid_service_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// A loose check on image references: no whitespace, no empty tag or
/// repository part. Full OCI reference grammar is left to the registry.
fn valid_image_reference(image: &str) -> bool {
    if image.chars().any(char::is_whitespace) {
        return false;
    }
    // Split off a tag, if any. A colon may also belong to a registry port,
    // so only the last segment after '/' is checked for one.
    let last = image.rsplit('/').next().unwrap_or(image);
    match last.split_once(':') {
        Some((repo, tag)) => !repo.is_empty() && !tag.is_empty(),
        None => !last.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServiceConfig {
        ServiceConfig {
            name: "nginx".into(),
            image: "nginx:latest".into(),
            port: 80,
            cpu: None,
            memory: None,
            autoscaling: None,
            hosted_zone: None,
        }
    }

    #[test]
    fn accepts_minimal_config() {
        assert_eq!(base_config().validate(), Ok(()));
    }

    #[test]
    fn rejects_empty_name() {
        let mut config = base_config();
        config.name = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyName));
    }

    #[test]
    fn rejects_bad_name_characters() {
        for name in ["Nginx", "my_svc", "1api", "-api", "api.web"] {
            let mut config = base_config();
            config.name = name.into();
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidName(_))),
                "expected InvalidName for {name}"
            );
        }
    }

    #[test]
    fn rejects_overlong_name() {
        let mut config = base_config();
        config.name = "a".repeat(MAX_SERVICE_NAME_LEN + 1);
        assert!(matches!(config.validate(), Err(ConfigError::NameTooLong(_))));
    }

    #[test]
    fn rejects_malformed_images() {
        for image in ["", "nginx latest", "nginx:", ":latest"] {
            let mut config = base_config();
            config.image = image.into();
            assert!(config.validate().is_err(), "expected rejection for {image:?}");
        }
    }

    #[test]
    fn accepts_registry_with_port() {
        let mut config = base_config();
        config.image = "registry.local:5000/acme/api:v2".into();
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_port_zero() {
        let mut config = base_config();
        config.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));
    }

    #[test]
    fn rejects_bad_autoscaling_bounds() {
        let mut config = base_config();
        config.autoscaling = Some(AutoscalingConfig {
            min: 0,
            max: 3,
            cpu_avg_threshold: 75.0,
        });
        assert_eq!(config.validate(), Err(ConfigError::ZeroMinCapacity));

        config.autoscaling = Some(AutoscalingConfig {
            min: 5,
            max: 2,
            cpu_avg_threshold: 75.0,
        });
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvertedBounds { min: 5, max: 2 })
        );

        config.autoscaling = Some(AutoscalingConfig {
            min: 1,
            max: 2,
            cpu_avg_threshold: 0.0,
        });
        assert_eq!(config.validate(), Err(ConfigError::InvalidCpuTarget(0.0)));

        config.autoscaling = Some(AutoscalingConfig {
            min: 1,
            max: 2,
            cpu_avg_threshold: 100.5,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCpuTarget(_))
        ));
    }

    #[test]
    fn rejects_empty_hosted_zone() {
        let mut config = base_config();
        config.hosted_zone = Some(".".into());
        assert_eq!(config.validate(), Err(ConfigError::EmptyHostedZone));
    }

    #[test]
    fn exposed_port_follows_hosted_zone() {
        let mut config = base_config();
        assert_eq!(config.exposed_port(), 80);
        config.hosted_zone = Some("labs.example.com".into());
        assert_eq!(config.exposed_port(), 443);
    }

    #[test]
    fn network_requires_subnets() {
        let network = NetworkContext {
            vpc_id: "vpc-123".into(),
            subnet_ids: vec![],
        };
        assert_eq!(network.validate(), Err(ConfigError::NoSubnets));
    }

    #[test]
    fn serde_omits_optional_sizing() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"name":"api","image":"acme/api:v1","port":8080}"#).unwrap();
        assert_eq!(config.cpu, None);
        assert_eq!(config.memory, None);
        assert!(config.autoscaling.is_none());
        assert!(config.hosted_zone.is_none());
    }

    #[test]
    fn serde_defaults_fill_cpu_threshold() {
        let scaling: AutoscalingConfig = serde_json::from_str(r#"{"min":1,"max":5}"#).unwrap();
        assert_eq!(scaling.cpu_avg_threshold, 75.0);
    }
}
