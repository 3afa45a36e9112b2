//! Deployment teardown
//!
//! Every resource name webship creates is derived from (service, deploy-id),
//! so a deployment can be destroyed without any local state: derive the
//! names, look up what still exists, and delete in dependency order. Each
//! step is idempotent and a failing step is logged and skipped, so a
//! half-gone deployment can be destroyed again safely.

use crate::aws::autoscaling::{resource_id, ScalingClient};
use crate::aws::certificate::AcmClient;
use crate::aws::dns::Route53Client;
use crate::aws::ecs::EcsClient;
use crate::aws::iam::IamClient;
use crate::aws::load_balancer::ElbClient;
use crate::aws::security_group::Ec2Client;
use crate::aws::DeployContext;
use anyhow::Result;
use tracing::{info, warn};
use webship_common::naming::{elb_name, fqdn, qualified_name, role_name};

/// What to tear down.
#[derive(Debug, Clone)]
pub struct DestroyConfig {
    /// Logical service name the deployment was created with
    pub service: String,
    /// Hosted zone the deployment used, if any; without it the DNS and
    /// certificate resources are not touched
    pub hosted_zone: Option<String>,
    /// Container port the deployment used (needed to revoke the scoped
    /// egress rule between the two security groups)
    pub port: u16,
    /// Print what would be deleted without deleting (default in the CLI)
    pub dry_run: bool,
}

/// Report of teardown operations
#[derive(Default, Debug)]
pub struct DestroyReport {
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DestroyReport {
    fn track(&mut self, what: &str, result: Result<()>) {
        match result {
            Ok(()) => self.deleted += 1,
            Err(e) => {
                warn!(step = %what, error = ?e, "Teardown step failed, continuing");
                self.failed += 1;
            }
        }
    }

    fn skip(&mut self, what: &str) {
        info!(step = %what, "[DRY RUN] Would delete");
        self.skipped += 1;
    }
}

/// Tear down one deployment.
///
/// Order matters: autoscaling and the service go first (they pin the target
/// group and the ENIs), then the ingress chain, then IAM and the security
/// groups, which AWS refuses to delete while anything references them.
pub async fn destroy(ctx: &DeployContext, config: &DestroyConfig) -> Result<DestroyReport> {
    let service = config.service.as_str();
    let deploy_id = ctx.deploy_id();

    let cluster = qualified_name(service, deploy_id);
    let service_name = cluster.clone();
    let lb_name = elb_name(service, deploy_id);
    let exec_role = role_name(service, deploy_id);
    let ingress_sg_name = format!("{cluster}-alb");
    let service_sg_name = format!("{cluster}-svc");

    info!(
        service = %service,
        deploy_id = %deploy_id,
        dry_run = config.dry_run,
        "Destroying deployment"
    );

    let mut report = DestroyReport::default();

    let ecs = EcsClient::from_context(ctx);
    let elb = ElbClient::from_context(ctx);
    let ec2 = Ec2Client::from_context(ctx);
    let iam = IamClient::from_context(ctx);
    let scaling = ScalingClient::from_context(ctx);

    // Scaling and compute first
    if config.dry_run {
        report.skip("autoscaling");
        report.skip("service");
        report.skip("cluster");
        report.skip("task definition");
    } else {
        report.track(
            "autoscaling",
            scaling.detach(&resource_id(&cluster, &service_name)).await,
        );
        report.track("scale down", ecs.scale_to_zero(&cluster, &service_name).await);
        report.track("service", ecs.delete_service(&cluster, &service_name).await);
        report.track("cluster", ecs.delete_cluster(&cluster).await);
        report.track("task definition", ecs.deregister_task_definition(&cluster).await);
    }

    // Capture the balancer before deleting it; alias-record deletion needs
    // its DNS name and canonical zone
    let load_balancer = elb.find_load_balancer(&lb_name).await.unwrap_or_else(|e| {
        warn!(error = ?e, "Could not look up load balancer, assuming gone");
        None
    });

    if config.dry_run {
        report.skip("listeners");
    } else if let Some(lb) = &load_balancer {
        report.track("listeners", elb.delete_listeners(&lb.arn).await);
    }

    // DNS and certificate, now that no listener references the certificate
    if let Some(zone) = &config.hosted_zone {
        destroy_dns(ctx, config, zone, service, deploy_id, load_balancer.as_ref(), &mut report)
            .await;
    }

    // The rest of the ingress chain
    if config.dry_run {
        report.skip("target group");
        report.skip("load balancer");
    } else {
        if let Some(arn) = elb.find_target_group(&lb_name).await.unwrap_or(None) {
            report.track("target group", elb.delete_target_group(&arn).await);
        }
        if let Some(lb) = &load_balancer {
            report.track("load balancer", elb.delete_load_balancer(&lb.arn).await);
        }
    }

    // IAM and security groups last
    if config.dry_run {
        report.skip("execution role");
        report.skip("security groups");
    } else {
        report.track("execution role", iam.delete_execution_role(&exec_role).await);

        let ingress_sg = ec2.find_security_group(&ingress_sg_name).await.unwrap_or(None);
        let service_sg = ec2.find_security_group(&service_sg_name).await.unwrap_or(None);

        // The groups reference each other; drop the scoped egress rule so
        // neither deletion trips over the other
        if let (Some(from), Some(to)) = (&ingress_sg, &service_sg) {
            report.track(
                "egress rule",
                ec2.revoke_egress_to_service(from, to, config.port).await,
            );
        }
        if let Some(sg_id) = service_sg {
            report.track("service security group", ec2.delete_security_group(&sg_id).await);
        }
        if let Some(sg_id) = ingress_sg {
            report.track("ingress security group", ec2.delete_security_group(&sg_id).await);
        }
    }

    info!(
        deleted = report.deleted,
        failed = report.failed,
        skipped = report.skipped,
        "Teardown finished"
    );
    Ok(report)
}

async fn destroy_dns(
    ctx: &DeployContext,
    config: &DestroyConfig,
    zone: &str,
    service: &str,
    deploy_id: &str,
    load_balancer: Option<&crate::aws::load_balancer::ProvisionedLoadBalancer>,
    report: &mut DestroyReport,
) {
    let route53 = Route53Client::from_context(ctx);
    let acm = AcmClient::from_context(ctx);
    let domain = fqdn(&qualified_name(service, deploy_id), zone);

    if config.dry_run {
        report.skip("certificate");
        report.skip("DNS records");
        return;
    }

    let zone_id = match route53.lookup_zone_id(zone).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = ?e, zone = %zone, "Hosted zone lookup failed, skipping DNS teardown");
            report.failed += 1;
            return;
        }
    };

    if let Some(certificate_arn) = acm.find_certificate(&domain).await.unwrap_or(None) {
        // The validation record outlives the certificate in Route 53, so
        // grab it before deleting
        let validation = acm
            .current_validation_record(&certificate_arn)
            .await
            .unwrap_or(None);

        report.track("certificate", acm.delete_certificate(&certificate_arn).await);

        if let Some(record) = validation {
            report.track(
                "validation record",
                route53
                    .delete_validation_cname(&zone_id, &record.name, &record.value)
                    .await,
            );
        }
    }

    if let Some(lb) = load_balancer {
        report.track(
            "alias record",
            route53
                .delete_alias(&zone_id, &domain, &lb.dns_name, &lb.zone_id)
                .await,
        );
    }
}
