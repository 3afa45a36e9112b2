//! AWS client modules for the deployer
//!
//! This module provides wrappers around AWS SDK clients for:
//! - EC2: security groups for the load balancer and the tasks
//! - ELBv2: application load balancer, target group, listener
//! - Route 53 / ACM: custom-domain records and the DNS-validated certificate
//! - IAM: task execution role and its log policy
//! - ECS: cluster, task definition, service
//! - Application Auto Scaling: desired-count scaling target and policy
//! - STS: account ID lookup

pub mod account;
pub mod autoscaling;
pub mod certificate;
pub mod context;
pub mod dns;
pub mod ecs;
pub mod error;
pub mod iam;
pub mod load_balancer;
pub mod security_group;
pub mod tags;

// Core clients
pub use account::{get_current_account_id, AccountId};
pub use autoscaling::{ScalingClient, ScalingSpec};
pub use certificate::AcmClient;
pub use context::DeployContext;
pub use dns::Route53Client;
pub use ecs::{EcsClient, ServiceSpec, TaskSpec};
pub use iam::IamClient;
pub use load_balancer::{ElbClient, ListenerSpec};
pub use security_group::Ec2Client;

// Error handling
pub use error::{classify_anyhow_error, classify_aws_error, ignore_not_found, AwsError};
