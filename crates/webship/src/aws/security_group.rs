//! Security group management
//!
//! Two groups exist per deployment: an ingress group on the load balancer,
//! open to the world on the exposed port, and a service group on the tasks,
//! reachable only from the ingress group on the container port.

use super::context::DeployContext;
use super::error::{classify_anyhow_error, ignore_not_found};
use super::tags;
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{IpPermission, IpRange, ResourceType, UserIdGroupPair};
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::{debug, info, warn};
use webship_common::naming::qualified_name;
use webship_common::tags::TagMap;

/// EC2 client for managing deployment security groups
pub struct Ec2Client {
    client: aws_sdk_ec2::Client,
}

impl Ec2Client {
    /// Create a new EC2 client (loads AWS config from environment)
    pub async fn new(region: &str, deploy_id: &str) -> Result<Self> {
        let ctx = DeployContext::new(region, deploy_id).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create an EC2 client from a pre-loaded deploy context
    pub fn from_context(ctx: &DeployContext) -> Self {
        Self {
            client: ctx.ec2_client(),
        }
    }

    /// Create the ingress security group for the load balancer.
    ///
    /// Allows inbound TCP on `exposed_port` from anywhere; the default
    /// allow-all egress is left in place.
    ///
    /// # Returns
    /// The security group ID
    pub async fn create_ingress_security_group(
        &self,
        service: &str,
        deploy_id: &str,
        exposed_port: u16,
        vpc_id: &str,
        user_tags: &TagMap,
    ) -> Result<String> {
        let sg_name = format!("{}-alb", qualified_name(service, deploy_id));
        info!(name = %sg_name, port = exposed_port, "Creating ingress security group");

        let sg_id = self
            .create_group(&sg_name, vpc_id, service, deploy_id, user_tags)
            .await?;

        let permission = IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(i32::from(exposed_port))
            .to_port(i32::from(exposed_port))
            .ip_ranges(
                IpRange::builder()
                    .cidr_ip("0.0.0.0/0")
                    .description("public ingress")
                    .build(),
            )
            .build();

        self.client
            .authorize_security_group_ingress()
            .group_id(&sg_id)
            .ip_permissions(permission)
            .send()
            .await
            .context("Failed to open the ingress security group")?;

        info!(sg_id = %sg_id, "Ingress security group ready");
        Ok(sg_id)
    }

    /// Create the service security group for the tasks.
    ///
    /// Allows inbound TCP on `container_port` from exactly `peer_sg_id`
    /// (the ingress group), nothing else.
    pub async fn create_service_security_group(
        &self,
        service: &str,
        deploy_id: &str,
        container_port: u16,
        vpc_id: &str,
        peer_sg_id: &str,
        user_tags: &TagMap,
    ) -> Result<String> {
        let sg_name = format!("{}-svc", qualified_name(service, deploy_id));
        info!(
            name = %sg_name,
            port = container_port,
            peer = %peer_sg_id,
            "Creating service security group"
        );

        let sg_id = self
            .create_group(&sg_name, vpc_id, service, deploy_id, user_tags)
            .await?;

        let permission = IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(i32::from(container_port))
            .to_port(i32::from(container_port))
            .user_id_group_pairs(
                UserIdGroupPair::builder()
                    .group_id(peer_sg_id)
                    .description("traffic from the load balancer")
                    .build(),
            )
            .build();

        self.client
            .authorize_security_group_ingress()
            .group_id(&sg_id)
            .ip_permissions(permission)
            .send()
            .await
            .context("Failed to allow load-balancer traffic into the service group")?;

        info!(sg_id = %sg_id, "Service security group ready");
        Ok(sg_id)
    }

    /// Add an explicit egress rule on the ingress group toward the service
    /// group on the container port.
    ///
    /// TODO: the group's default allow-all egress already covers this; remove
    /// that default (RevokeSecurityGroupEgress on 0.0.0.0/0) once the scoped
    /// rule has been exercised in a real deployment, so only this path
    /// remains.
    pub async fn authorize_egress_to_service(
        &self,
        ingress_sg_id: &str,
        service_sg_id: &str,
        container_port: u16,
    ) -> Result<()> {
        info!(
            from = %ingress_sg_id,
            to = %service_sg_id,
            port = container_port,
            "Adding egress rule from load balancer to service"
        );

        let permission = IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(i32::from(container_port))
            .to_port(i32::from(container_port))
            .user_id_group_pairs(
                UserIdGroupPair::builder()
                    .group_id(service_sg_id)
                    .description("forwarded traffic to tasks")
                    .build(),
            )
            .build();

        self.client
            .authorize_security_group_egress()
            .group_id(ingress_sg_id)
            .ip_permissions(permission)
            .send()
            .await
            .context("Failed to add egress rule toward the service group")?;

        Ok(())
    }

    /// Remove the egress rule toward the service group.
    ///
    /// The two groups reference each other, so this rule must be gone before
    /// the service group can be deleted. Idempotent.
    pub async fn revoke_egress_to_service(
        &self,
        ingress_sg_id: &str,
        service_sg_id: &str,
        container_port: u16,
    ) -> Result<()> {
        let permission = IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(i32::from(container_port))
            .to_port(i32::from(container_port))
            .user_id_group_pairs(UserIdGroupPair::builder().group_id(service_sg_id).build())
            .build();

        let result = self
            .client
            .revoke_security_group_egress()
            .group_id(ingress_sg_id)
            .ip_permissions(permission)
            .send()
            .await;

        match ignore_not_found(result).context("Failed to revoke egress rule")? {
            Some(_) => debug!(from = %ingress_sg_id, to = %service_sg_id, "Egress rule revoked"),
            None => debug!(from = %ingress_sg_id, "Egress rule already gone"),
        }
        Ok(())
    }

    /// Delete a security group.
    ///
    /// Returns Ok(()) if the group was deleted or never existed. Retries on
    /// DependencyViolation (ENIs still releasing after task shutdown).
    pub async fn delete_security_group(&self, security_group_id: &str) -> Result<()> {
        info!(sg_id = %security_group_id, "Deleting security group");

        let sg_id = security_group_id.to_string();
        let sg_id_for_log = sg_id.clone();

        (|| async {
            let result = self
                .client
                .delete_security_group()
                .group_id(&sg_id)
                .send()
                .await;
            match ignore_not_found(result).context("Failed to delete security group")? {
                Some(_) => info!(sg_id = %sg_id, "Security group deleted"),
                None => debug!(sg_id = %sg_id, "Security group already deleted"),
            }
            Ok(())
        })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(60))
                .with_max_times(5),
        )
        .when(|e| classify_anyhow_error(e).is_retryable())
        .notify(|e, dur| {
            warn!(
                sg_id = %sg_id_for_log,
                delay = ?dur,
                error = %e,
                "Security group deletion failed, retrying..."
            );
        })
        .await
    }

    /// Find a deployment's security group by its exact group name.
    ///
    /// Teardown uses this since group names are derived from (service,
    /// deploy_id) and ids are not persisted anywhere.
    pub async fn find_security_group(&self, group_name: &str) -> Result<Option<String>> {
        use aws_sdk_ec2::types::Filter;

        let response = self
            .client
            .describe_security_groups()
            .filters(
                Filter::builder()
                    .name("group-name")
                    .values(group_name)
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe security groups")?;

        Ok(response
            .security_groups()
            .first()
            .and_then(|sg| sg.group_id())
            .map(|id| id.to_string()))
    }

    async fn create_group(
        &self,
        sg_name: &str,
        vpc_id: &str,
        service: &str,
        deploy_id: &str,
        user_tags: &TagMap,
    ) -> Result<String> {
        let response = self
            .client
            .create_security_group()
            .group_name(sg_name)
            .description(format!("webship security group for {service} ({deploy_id})"))
            .vpc_id(vpc_id)
            .tag_specifications(tags::ec2_tag_spec(
                ResourceType::SecurityGroup,
                service,
                deploy_id,
                user_tags,
            ))
            .send()
            .await
            .with_context(|| format!("Failed to create security group {sg_name}"))?;

        response
            .group_id()
            .context("No security group ID in response")
            .map(|id| id.to_string())
    }
}
