//! Deployment orchestration
//!
//! One deploy is a straight line: validate the configuration, build the
//! ingress topology (security group, load balancer, target group, listener,
//! and the DNS/certificate branch when a hosted zone is given), then the
//! compute topology (execution role, cluster, task definition, service
//! security group, service), then optionally attach autoscaling. Every
//! created resource lands in a ledger; if any step fails the ledger is
//! unwound in reverse so a failed deploy leaves nothing behind.

use crate::aws::account::{get_current_account_id, AccountId};
use crate::aws::autoscaling::{ScalingClient, ScalingSpec};
use crate::aws::certificate::AcmClient;
use crate::aws::dns::Route53Client;
use crate::aws::ecs::{EcsClient, ServiceSpec, TaskSpec};
use crate::aws::iam::IamClient;
use crate::aws::load_balancer::{ElbClient, ListenerSpec, ProvisionedLoadBalancer};
use crate::aws::security_group::Ec2Client;
use crate::aws::DeployContext;
use crate::config::{NetworkContext, ServiceConfig};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use webship_common::naming::{fqdn, qualified_name, role_name};
use webship_common::tags::TagMap;

/// Everything the caller gets back from a successful deploy.
#[derive(Debug, Clone)]
pub struct DeployOutput {
    /// The service's externally reachable URL - the one value most callers
    /// care about
    pub url: String,
    /// Deployment identifier, needed later for `destroy`
    pub deploy_id: String,
    /// The load balancer's DNS name (also the URL host when no custom
    /// domain was configured)
    pub load_balancer_dns: String,
    /// Cluster the service runs in
    pub cluster: String,
    /// ARN of the created ECS service
    pub service_arn: String,
}

/// Output of the ingress subgraph, consumed by the compute subgraph.
struct IngressResources {
    security_group_id: String,
    target_group_arn: String,
    load_balancer: ProvisionedLoadBalancer,
    /// Present exactly when a hosted zone was configured
    fqdn: Option<String>,
}

/// A resource created during this deploy, recorded for rollback.
enum CreatedResource {
    SecurityGroup(String),
    LoadBalancer(String),
    TargetGroup(String),
    AliasRecord {
        zone_id: String,
        fqdn: String,
        alb_dns_name: String,
        alb_zone_id: String,
    },
    Certificate(String),
    ValidationRecord {
        zone_id: String,
        name: String,
        value: String,
    },
    ExecutionRole(String),
    TaskDefinition(String),
    Cluster(String),
    Service {
        cluster: String,
        name: String,
    },
    EgressRule {
        from_sg: String,
        to_sg: String,
        port: u16,
    },
    Scaling(ScalingSpec),
}

/// Reverse-order teardown ledger for a single deploy.
#[derive(Default)]
struct Ledger {
    created: Vec<CreatedResource>,
}

impl Ledger {
    fn record(&mut self, resource: CreatedResource) {
        self.created.push(resource);
    }

    fn len(&self) -> usize {
        self.created.len()
    }

    /// Delete everything recorded, newest first. Failures are logged and
    /// skipped so one stubborn resource does not strand the rest.
    async fn rollback(self, ctx: &DeployContext) {
        let ec2 = Ec2Client::from_context(ctx);
        let elb = ElbClient::from_context(ctx);
        let ecs = EcsClient::from_context(ctx);
        let iam = IamClient::from_context(ctx);
        let route53 = Route53Client::from_context(ctx);
        let acm = AcmClient::from_context(ctx);
        let scaling = ScalingClient::from_context(ctx);

        for resource in self.created.into_iter().rev() {
            let result = match &resource {
                CreatedResource::Scaling(spec) => scaling.detach(spec.resource_id()).await,
                CreatedResource::Service { cluster, name } => {
                    ecs.delete_service(cluster, name).await
                }
                CreatedResource::Cluster(name) => ecs.delete_cluster(name).await,
                CreatedResource::TaskDefinition(family) => {
                    ecs.deregister_task_definition(family).await
                }
                CreatedResource::ExecutionRole(name) => iam.delete_execution_role(name).await,
                CreatedResource::ValidationRecord {
                    zone_id,
                    name,
                    value,
                } => route53.delete_validation_cname(zone_id, name, value).await,
                CreatedResource::Certificate(arn) => acm.delete_certificate(arn).await,
                CreatedResource::AliasRecord {
                    zone_id,
                    fqdn,
                    alb_dns_name,
                    alb_zone_id,
                } => {
                    route53
                        .delete_alias(zone_id, fqdn, alb_dns_name, alb_zone_id)
                        .await
                }
                CreatedResource::TargetGroup(arn) => elb.delete_target_group(arn).await,
                CreatedResource::LoadBalancer(arn) => {
                    // Listeners go with the balancer, but delete them first so
                    // the certificate is unreferenced by the time we reach it
                    if let Err(e) = elb.delete_listeners(arn).await {
                        warn!(error = ?e, "Failed to delete listeners during rollback");
                    }
                    elb.delete_load_balancer(arn).await
                }
                CreatedResource::EgressRule { from_sg, to_sg, port } => {
                    ec2.revoke_egress_to_service(from_sg, to_sg, *port).await
                }
                CreatedResource::SecurityGroup(id) => ec2.delete_security_group(id).await,
            };

            if let Err(e) = result {
                warn!(error = ?e, "Rollback step failed, continuing");
            }
        }
    }
}

/// Deploy a service, returning its externally reachable URL.
///
/// On failure, every resource created so far is deleted before the error is
/// returned; there is no partial-success state.
pub async fn deploy(
    ctx: &DeployContext,
    config: &ServiceConfig,
    network: &NetworkContext,
    user_tags: &TagMap,
    cancel: Option<&CancellationToken>,
) -> Result<DeployOutput> {
    config.validate().context("Invalid service configuration")?;
    network.validate().context("Invalid network context")?;

    let mut ledger = Ledger::default();
    match run(ctx, config, network, user_tags, cancel, &mut ledger).await {
        Ok(output) => {
            info!(url = %output.url, "Deploy complete");
            Ok(output)
        }
        Err(e) => {
            warn!(
                resources = ledger.len(),
                "Deploy failed, rolling back created resources"
            );
            ledger.rollback(ctx).await;
            Err(e)
        }
    }
}

async fn run(
    ctx: &DeployContext,
    config: &ServiceConfig,
    network: &NetworkContext,
    user_tags: &TagMap,
    cancel: Option<&CancellationToken>,
    ledger: &mut Ledger,
) -> Result<DeployOutput> {
    let service = config.name.as_str();
    let deploy_id = ctx.deploy_id();

    info!(
        service = %service,
        deploy_id = %deploy_id,
        image = %config.image,
        region = %ctx.region(),
        "Starting deploy"
    );

    // Validates credentials up-front and feeds the IAM policy ARN scope;
    // resolved once and reused for the whole deploy.
    let account_id = get_current_account_id(ctx.sdk_config()).await?;

    let ingress = build_ingress(ctx, config, network, user_tags, cancel, ledger).await?;
    let service_arn = build_compute(
        ctx, config, network, &ingress, &account_id, user_tags, cancel, ledger,
    )
    .await?;

    let cluster = qualified_name(service, deploy_id);
    if let Some(scaling_config) = &config.autoscaling {
        let spec = ScalingSpec::new(scaling_config, &cluster, &cluster);
        ScalingClient::from_context(ctx).attach(&spec).await?;
        ledger.record(CreatedResource::Scaling(spec));
    }

    Ok(DeployOutput {
        url: service_url(ingress.fqdn.as_deref(), &ingress.load_balancer.dns_name),
        deploy_id: deploy_id.to_string(),
        load_balancer_dns: ingress.load_balancer.dns_name,
        cluster,
        service_arn,
    })
}

/// Build the public-facing half: security group, load balancer, target
/// group, listener, and - with a hosted zone - the DNS and certificate
/// chain the listener depends on.
async fn build_ingress(
    ctx: &DeployContext,
    config: &ServiceConfig,
    network: &NetworkContext,
    user_tags: &TagMap,
    cancel: Option<&CancellationToken>,
    ledger: &mut Ledger,
) -> Result<IngressResources> {
    let ec2 = Ec2Client::from_context(ctx);
    let elb = ElbClient::from_context(ctx);

    let service = config.name.as_str();
    let deploy_id = ctx.deploy_id();
    let exposed_port = config.exposed_port();

    let security_group_id = ec2
        .create_ingress_security_group(service, deploy_id, exposed_port, &network.vpc_id, user_tags)
        .await?;
    ledger.record(CreatedResource::SecurityGroup(security_group_id.clone()));

    let load_balancer = elb
        .create_load_balancer(
            service,
            deploy_id,
            &network.subnet_ids,
            &security_group_id,
            user_tags,
        )
        .await?;
    ledger.record(CreatedResource::LoadBalancer(load_balancer.arn.clone()));

    let target_group_arn = elb
        .create_target_group(service, deploy_id, &network.vpc_id, user_tags)
        .await?;
    ledger.record(CreatedResource::TargetGroup(target_group_arn.clone()));

    // The listener spec is assembled fully before the listener is created;
    // in the TLS branch that means the certificate is already issued.
    let (listener_spec, service_fqdn) = match &config.hosted_zone {
        Some(zone) => {
            let domain = fqdn(&qualified_name(service, deploy_id), zone);
            let certificate_arn = issue_certificate(
                ctx,
                config,
                zone,
                &domain,
                &load_balancer,
                user_tags,
                cancel,
                ledger,
            )
            .await?;
            (ListenerSpec::https(certificate_arn), Some(domain))
        }
        None => (ListenerSpec::http(), None),
    };

    elb.create_listener(&load_balancer.arn, &target_group_arn, &listener_spec)
        .await?;

    Ok(IngressResources {
        security_group_id,
        target_group_arn,
        load_balancer,
        fqdn: service_fqdn,
    })
}

/// The TLS chain: alias record for the service domain, certificate request,
/// validation record, and the wait for issuance.
#[allow(clippy::too_many_arguments)]
async fn issue_certificate(
    ctx: &DeployContext,
    config: &ServiceConfig,
    zone: &str,
    domain: &str,
    load_balancer: &ProvisionedLoadBalancer,
    user_tags: &TagMap,
    cancel: Option<&CancellationToken>,
    ledger: &mut Ledger,
) -> Result<String> {
    let route53 = Route53Client::from_context(ctx);
    let acm = AcmClient::from_context(ctx);
    let service = config.name.as_str();
    let deploy_id = ctx.deploy_id();

    let zone_id = route53.lookup_zone_id(zone).await?;

    route53
        .upsert_alias(
            &zone_id,
            domain,
            &load_balancer.dns_name,
            &load_balancer.zone_id,
        )
        .await?;
    ledger.record(CreatedResource::AliasRecord {
        zone_id: zone_id.clone(),
        fqdn: domain.to_string(),
        alb_dns_name: load_balancer.dns_name.clone(),
        alb_zone_id: load_balancer.zone_id.clone(),
    });

    let certificate_arn = acm
        .request_certificate(domain, service, deploy_id, user_tags)
        .await?;
    ledger.record(CreatedResource::Certificate(certificate_arn.clone()));

    let validation = acm.validation_record(&certificate_arn, cancel).await?;
    route53
        .upsert_validation_cname(&zone_id, &validation.name, &validation.value)
        .await?;
    ledger.record(CreatedResource::ValidationRecord {
        zone_id,
        name: validation.name,
        value: validation.value,
    });

    acm.wait_for_issued(&certificate_arn, cancel).await?;

    Ok(certificate_arn)
}

/// Build the compute half: execution role, cluster, task definition,
/// service security group, and the service itself.
#[allow(clippy::too_many_arguments)]
async fn build_compute(
    ctx: &DeployContext,
    config: &ServiceConfig,
    network: &NetworkContext,
    ingress: &IngressResources,
    account_id: &AccountId,
    user_tags: &TagMap,
    cancel: Option<&CancellationToken>,
    ledger: &mut Ledger,
) -> Result<String> {
    let ec2 = Ec2Client::from_context(ctx);
    let ecs = EcsClient::from_context(ctx);
    let iam = IamClient::from_context(ctx);

    let service = config.name.as_str();
    let deploy_id = ctx.deploy_id();

    let execution_role_arn = iam
        .create_execution_role(
            service,
            deploy_id,
            ctx.region(),
            account_id,
            user_tags,
            cancel,
        )
        .await?;
    ledger.record(CreatedResource::ExecutionRole(role_name(service, deploy_id)));

    let cluster = ecs.create_cluster(service, deploy_id, user_tags).await?;
    ledger.record(CreatedResource::Cluster(cluster.clone()));

    let task_spec = TaskSpec::new(config, deploy_id, ctx.region(), &execution_role_arn);
    let task_definition_arn = ecs
        .register_task_definition(&task_spec, service, deploy_id, user_tags)
        .await?;
    ledger.record(CreatedResource::TaskDefinition(
        task_spec.family().to_string(),
    ));

    let service_sg_id = ec2
        .create_service_security_group(
            service,
            deploy_id,
            config.port,
            &network.vpc_id,
            &ingress.security_group_id,
            user_tags,
        )
        .await?;
    ledger.record(CreatedResource::SecurityGroup(service_sg_id.clone()));

    ec2.authorize_egress_to_service(&ingress.security_group_id, &service_sg_id, config.port)
        .await?;
    ledger.record(CreatedResource::EgressRule {
        from_sg: ingress.security_group_id.clone(),
        to_sg: service_sg_id.clone(),
        port: config.port,
    });

    let service_spec = ServiceSpec {
        cluster: cluster.clone(),
        service_name: qualified_name(service, deploy_id),
        task_definition_arn,
        target_group_arn: ingress.target_group_arn.clone(),
        container_name: task_spec.container_name().to_string(),
        container_port: config.port,
        subnet_ids: network.subnet_ids.clone(),
        security_group_id: service_sg_id,
    };

    let service_arn = ecs
        .create_service(&service_spec, service, deploy_id, user_tags)
        .await?;
    ledger.record(CreatedResource::Service {
        cluster,
        name: service_spec.service_name.clone(),
    });

    Ok(service_arn)
}

/// The externally reachable URL: HTTPS on the custom domain when one was
/// configured, plain HTTP on the balancer's DNS name otherwise.
pub fn service_url(fqdn: Option<&str>, load_balancer_dns: &str) -> String {
    match fqdn {
        Some(domain) => format!("https://{domain}"),
        None => format!("http://{load_balancer_dns}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_https_and_the_domain_with_a_hosted_zone() {
        assert_eq!(
            service_url(
                Some("nginx-0198c2f4a1b2.labs.example.com"),
                "nginx-0198c2f4a1b2-1234.us-east-2.elb.amazonaws.com"
            ),
            "https://nginx-0198c2f4a1b2.labs.example.com"
        );
    }

    #[test]
    fn url_uses_http_and_the_alb_dns_name_without_one() {
        assert_eq!(
            service_url(None, "nginx-0198c2f4a1b2-1234.us-east-2.elb.amazonaws.com"),
            "http://nginx-0198c2f4a1b2-1234.us-east-2.elb.amazonaws.com"
        );
    }
}
