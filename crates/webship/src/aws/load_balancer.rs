//! Application load balancer, target group, and listener
//!
//! The listener is described by an immutable [`ListenerSpec`] assembled
//! before any resource exists. An HTTPS spec cannot be built without a
//! certificate ARN, so a listener can never go live ahead of certificate
//! validation.

use super::context::DeployContext;
use super::error::ignore_not_found;
use super::tags;
use anyhow::{Context, Result};
use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, Certificate, LoadBalancerSchemeEnum, LoadBalancerTypeEnum,
    ProtocolEnum, TargetTypeEnum,
};
use tracing::{debug, info};
use webship_common::defaults::{HTTPS_PORT, HTTP_PORT, TARGET_GROUP_PORT};
use webship_common::naming::elb_name;
use webship_common::tags::TagMap;

/// Listener protocol, decided once by the presence of a custom domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerProtocol {
    Http,
    Https,
}

/// Immutable description of the public listener.
///
/// Built up-front from the TLS decision; the two constructors are the only
/// ways to obtain one, so an HTTPS listener always carries a certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerSpec {
    port: u16,
    protocol: ListenerProtocol,
    certificate_arn: Option<String>,
}

impl ListenerSpec {
    /// Plain-HTTP listener on port 80, for services without a custom domain.
    pub fn http() -> Self {
        Self {
            port: HTTP_PORT,
            protocol: ListenerProtocol::Http,
            certificate_arn: None,
        }
    }

    /// HTTPS listener on port 443 terminating TLS with the given certificate.
    pub fn https(certificate_arn: impl Into<String>) -> Self {
        Self {
            port: HTTPS_PORT,
            protocol: ListenerProtocol::Https,
            certificate_arn: Some(certificate_arn.into()),
        }
    }

    /// Port the listener accepts traffic on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Listener protocol.
    pub fn protocol(&self) -> ListenerProtocol {
        self.protocol
    }

    /// Certificate ARN; present exactly when the protocol is HTTPS.
    pub fn certificate_arn(&self) -> Option<&str> {
        self.certificate_arn.as_deref()
    }
}

/// A provisioned load balancer's identifiers.
#[derive(Debug, Clone)]
pub struct ProvisionedLoadBalancer {
    pub arn: String,
    /// Public DNS name, e.g. `nginx-xyz-1234.us-east-2.elb.amazonaws.com`
    pub dns_name: String,
    /// The ALB's canonical hosted zone, needed for Route 53 alias records
    pub zone_id: String,
}

/// ELBv2 client for the ingress topology
pub struct ElbClient {
    client: aws_sdk_elasticloadbalancingv2::Client,
}

impl ElbClient {
    /// Create an ELBv2 client from a pre-loaded deploy context
    pub fn from_context(ctx: &DeployContext) -> Self {
        Self {
            client: ctx.elb_client(),
        }
    }

    /// Create an internet-facing application load balancer on the given
    /// subnets, guarded by the ingress security group.
    pub async fn create_load_balancer(
        &self,
        service: &str,
        deploy_id: &str,
        subnet_ids: &[String],
        security_group_id: &str,
        user_tags: &TagMap,
    ) -> Result<ProvisionedLoadBalancer> {
        let name = elb_name(service, deploy_id);
        info!(name = %name, subnets = subnet_ids.len(), "Creating load balancer");

        let response = self
            .client
            .create_load_balancer()
            .name(&name)
            .r#type(LoadBalancerTypeEnum::Application)
            .scheme(LoadBalancerSchemeEnum::InternetFacing)
            .set_subnets(Some(subnet_ids.to_vec()))
            .security_groups(security_group_id)
            .set_tags(Some(tags::elb_tags(service, deploy_id, user_tags)?))
            .send()
            .await
            .with_context(|| format!("Failed to create load balancer {name}"))?;

        let lb = response
            .load_balancers()
            .first()
            .context("No load balancer in response")?;

        let provisioned = ProvisionedLoadBalancer {
            arn: lb
                .load_balancer_arn()
                .context("No load balancer ARN in response")?
                .to_string(),
            dns_name: lb
                .dns_name()
                .context("No load balancer DNS name in response")?
                .to_string(),
            zone_id: lb
                .canonical_hosted_zone_id()
                .context("No canonical hosted zone in response")?
                .to_string(),
        };

        info!(arn = %provisioned.arn, dns = %provisioned.dns_name, "Load balancer created");
        Ok(provisioned)
    }

    /// Create the target group the listener forwards to.
    ///
    /// Target type is IP: awsvpc-mode tasks register by ENI address, not by
    /// instance id. The group listens on port 80 regardless of the exposed
    /// port; TLS, when present, terminates at the listener.
    pub async fn create_target_group(
        &self,
        service: &str,
        deploy_id: &str,
        vpc_id: &str,
        user_tags: &TagMap,
    ) -> Result<String> {
        let name = elb_name(service, deploy_id);
        info!(name = %name, "Creating target group");

        let response = self
            .client
            .create_target_group()
            .name(&name)
            .protocol(ProtocolEnum::Http)
            .port(i32::from(TARGET_GROUP_PORT))
            .vpc_id(vpc_id)
            .target_type(TargetTypeEnum::Ip)
            .health_check_protocol(ProtocolEnum::Http)
            .health_check_path("/")
            .set_tags(Some(tags::elb_tags(service, deploy_id, user_tags)?))
            .send()
            .await
            .with_context(|| format!("Failed to create target group {name}"))?;

        let arn = response
            .target_groups()
            .first()
            .and_then(|tg| tg.target_group_arn())
            .context("No target group ARN in response")?
            .to_string();

        info!(arn = %arn, "Target group created");
        Ok(arn)
    }

    /// Create the listener described by `spec`, forwarding to the target
    /// group.
    ///
    /// Callers in the TLS path must only reach this point with an issued
    /// certificate; [`ListenerSpec::https`] cannot be built without one.
    pub async fn create_listener(
        &self,
        load_balancer_arn: &str,
        target_group_arn: &str,
        spec: &ListenerSpec,
    ) -> Result<String> {
        info!(
            port = spec.port(),
            protocol = ?spec.protocol(),
            "Creating listener"
        );

        let forward = Action::builder()
            .r#type(ActionTypeEnum::Forward)
            .target_group_arn(target_group_arn)
            .build()
            .context("Failed to build listener forward action")?;

        let mut request = self
            .client
            .create_listener()
            .load_balancer_arn(load_balancer_arn)
            .port(i32::from(spec.port()))
            .protocol(match spec.protocol() {
                ListenerProtocol::Http => ProtocolEnum::Http,
                ListenerProtocol::Https => ProtocolEnum::Https,
            })
            .default_actions(forward);

        if let Some(certificate_arn) = spec.certificate_arn() {
            request = request.certificates(
                Certificate::builder()
                    .certificate_arn(certificate_arn)
                    .build(),
            );
        }

        let response = request.send().await.context("Failed to create listener")?;

        let arn = response
            .listeners()
            .first()
            .and_then(|l| l.listener_arn())
            .context("No listener ARN in response")?
            .to_string();

        info!(arn = %arn, "Listener created");
        Ok(arn)
    }

    /// Look up a deployment's load balancer by name.
    pub async fn find_load_balancer(&self, name: &str) -> Result<Option<ProvisionedLoadBalancer>> {
        let result = self
            .client
            .describe_load_balancers()
            .names(name)
            .send()
            .await;

        let Some(response) = ignore_not_found(result).context("Failed to describe load balancers")?
        else {
            return Ok(None);
        };

        Ok(response.load_balancers().first().and_then(|lb| {
            Some(ProvisionedLoadBalancer {
                arn: lb.load_balancer_arn()?.to_string(),
                dns_name: lb.dns_name()?.to_string(),
                zone_id: lb.canonical_hosted_zone_id()?.to_string(),
            })
        }))
    }

    /// Look up a deployment's target group ARN by name.
    pub async fn find_target_group(&self, name: &str) -> Result<Option<String>> {
        let result = self.client.describe_target_groups().names(name).send().await;

        let Some(response) = ignore_not_found(result).context("Failed to describe target groups")?
        else {
            return Ok(None);
        };

        Ok(response
            .target_groups()
            .first()
            .and_then(|tg| tg.target_group_arn())
            .map(|arn| arn.to_string()))
    }

    /// Delete every listener attached to a load balancer.
    pub async fn delete_listeners(&self, load_balancer_arn: &str) -> Result<()> {
        let result = self
            .client
            .describe_listeners()
            .load_balancer_arn(load_balancer_arn)
            .send()
            .await;

        let Some(response) = ignore_not_found(result).context("Failed to describe listeners")?
        else {
            debug!(lb = %load_balancer_arn, "Load balancer already gone, no listeners to delete");
            return Ok(());
        };

        for listener in response.listeners() {
            if let Some(arn) = listener.listener_arn() {
                let result = self.client.delete_listener().listener_arn(arn).send().await;
                match ignore_not_found(result).context("Failed to delete listener")? {
                    Some(_) => info!(listener = %arn, "Listener deleted"),
                    None => debug!(listener = %arn, "Listener already deleted"),
                }
            }
        }
        Ok(())
    }

    /// Delete a target group. Idempotent.
    pub async fn delete_target_group(&self, target_group_arn: &str) -> Result<()> {
        let result = self
            .client
            .delete_target_group()
            .target_group_arn(target_group_arn)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete target group")? {
            Some(_) => info!(arn = %target_group_arn, "Target group deleted"),
            None => debug!(arn = %target_group_arn, "Target group already deleted"),
        }
        Ok(())
    }

    /// Delete a load balancer. Idempotent.
    pub async fn delete_load_balancer(&self, load_balancer_arn: &str) -> Result<()> {
        let result = self
            .client
            .delete_load_balancer()
            .load_balancer_arn(load_balancer_arn)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete load balancer")? {
            Some(_) => info!(arn = %load_balancer_arn, "Load balancer deleted"),
            None => debug!(arn = %load_balancer_arn, "Load balancer already deleted"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_spec_has_no_certificate() {
        let spec = ListenerSpec::http();
        assert_eq!(spec.port(), 80);
        assert_eq!(spec.protocol(), ListenerProtocol::Http);
        assert_eq!(spec.certificate_arn(), None);
    }

    #[test]
    fn https_spec_requires_certificate() {
        let spec = ListenerSpec::https("arn:aws:acm:us-east-2:123456789012:certificate/abc");
        assert_eq!(spec.port(), 443);
        assert_eq!(spec.protocol(), ListenerProtocol::Https);
        assert_eq!(
            spec.certificate_arn(),
            Some("arn:aws:acm:us-east-2:123456789012:certificate/abc")
        );
    }
}
