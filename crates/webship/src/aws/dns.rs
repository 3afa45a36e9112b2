//! Route 53 record management for custom domains

use super::context::DeployContext;
use anyhow::{Context, Result};
use aws_sdk_route53::types::{
    AliasTarget, Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use tracing::{debug, info};

/// Route 53 client for the optional custom-domain branch
pub struct Route53Client {
    client: aws_sdk_route53::Client,
}

impl Route53Client {
    /// Create a Route 53 client from a pre-loaded deploy context
    pub fn from_context(ctx: &DeployContext) -> Self {
        Self {
            client: ctx.route53_client(),
        }
    }

    /// Resolve a hosted zone id from its domain name.
    ///
    /// This is the only lookup the deployer performs against pre-existing
    /// infrastructure; the zone must exist before a deploy references it.
    pub async fn lookup_zone_id(&self, zone_name: &str) -> Result<String> {
        let wanted = normalize_zone(zone_name);

        let response = self
            .client
            .list_hosted_zones_by_name()
            .dns_name(&wanted)
            .send()
            .await
            .with_context(|| format!("Failed to look up hosted zone {zone_name}"))?;

        let zone = response
            .hosted_zones()
            .iter()
            .find(|z| normalize_zone(z.name()) == wanted)
            .with_context(|| format!("Hosted zone {zone_name} not found in this account"))?;

        // Route 53 returns ids as "/hostedzone/Z123..."
        let id = zone
            .id()
            .rsplit('/')
            .next()
            .unwrap_or_else(|| zone.id())
            .to_string();

        debug!(zone = %zone_name, zone_id = %id, "Resolved hosted zone");
        Ok(id)
    }

    /// Upsert the alias A-record pointing the service domain at the ALB.
    pub async fn upsert_alias(
        &self,
        zone_id: &str,
        fqdn: &str,
        alb_dns_name: &str,
        alb_zone_id: &str,
    ) -> Result<()> {
        info!(fqdn = %fqdn, target = %alb_dns_name, "Upserting alias record");

        let alias = AliasTarget::builder()
            .hosted_zone_id(alb_zone_id)
            .dns_name(alb_dns_name)
            .evaluate_target_health(false)
            .build()
            .context("Failed to build alias target")?;

        let record = ResourceRecordSet::builder()
            .name(fqdn)
            .r#type(RrType::A)
            .alias_target(alias)
            .build()
            .context("Failed to build alias record set")?;

        self.change(zone_id, ChangeAction::Upsert, record)
            .await
            .with_context(|| format!("Failed to upsert alias record {fqdn}"))
    }

    /// Delete the alias A-record. Idempotent: a missing record is fine.
    pub async fn delete_alias(
        &self,
        zone_id: &str,
        fqdn: &str,
        alb_dns_name: &str,
        alb_zone_id: &str,
    ) -> Result<()> {
        let alias = AliasTarget::builder()
            .hosted_zone_id(alb_zone_id)
            .dns_name(alb_dns_name)
            .evaluate_target_health(false)
            .build()
            .context("Failed to build alias target")?;

        let record = ResourceRecordSet::builder()
            .name(fqdn)
            .r#type(RrType::A)
            .alias_target(alias)
            .build()
            .context("Failed to build alias record set")?;

        match self.change(zone_id, ChangeAction::Delete, record).await {
            Ok(()) => info!(fqdn = %fqdn, "Alias record deleted"),
            // Route 53 rejects deletes of absent records with InvalidChangeBatch
            Err(e) if format!("{e:?}").contains("InvalidChangeBatch") => {
                debug!(fqdn = %fqdn, "Alias record already gone")
            }
            Err(e) => return Err(e.context(format!("Failed to delete alias record {fqdn}"))),
        }
        Ok(())
    }

    /// Upsert the CNAME record ACM asks for to prove domain ownership.
    pub async fn upsert_validation_cname(
        &self,
        zone_id: &str,
        record_name: &str,
        record_value: &str,
    ) -> Result<()> {
        info!(record = %record_name, "Upserting certificate validation record");

        let record = ResourceRecordSet::builder()
            .name(record_name)
            .r#type(RrType::Cname)
            .ttl(300)
            .resource_records(
                ResourceRecord::builder()
                    .value(record_value)
                    .build()
                    .context("Failed to build validation record value")?,
            )
            .build()
            .context("Failed to build validation record set")?;

        self.change(zone_id, ChangeAction::Upsert, record)
            .await
            .with_context(|| format!("Failed to upsert validation record {record_name}"))
    }

    /// Delete the validation CNAME. Idempotent like [`Self::delete_alias`].
    pub async fn delete_validation_cname(
        &self,
        zone_id: &str,
        record_name: &str,
        record_value: &str,
    ) -> Result<()> {
        let record = ResourceRecordSet::builder()
            .name(record_name)
            .r#type(RrType::Cname)
            .ttl(300)
            .resource_records(
                ResourceRecord::builder()
                    .value(record_value)
                    .build()
                    .context("Failed to build validation record value")?,
            )
            .build()
            .context("Failed to build validation record set")?;

        match self.change(zone_id, ChangeAction::Delete, record).await {
            Ok(()) => info!(record = %record_name, "Validation record deleted"),
            Err(e) if format!("{e:?}").contains("InvalidChangeBatch") => {
                debug!(record = %record_name, "Validation record already gone")
            }
            Err(e) => {
                return Err(e.context(format!("Failed to delete validation record {record_name}")))
            }
        }
        Ok(())
    }

    async fn change(
        &self,
        zone_id: &str,
        action: ChangeAction,
        record: ResourceRecordSet,
    ) -> Result<()> {
        let batch = ChangeBatch::builder()
            .changes(
                Change::builder()
                    .action(action)
                    .resource_record_set(record)
                    .build()
                    .context("Failed to build record change")?,
            )
            .build()
            .context("Failed to build change batch")?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await?;
        Ok(())
    }
}

/// Route 53 reports zone names with a trailing dot; compare without it.
fn normalize_zone(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_names_normalize_consistently() {
        assert_eq!(normalize_zone("labs.example.com."), "labs.example.com");
        assert_eq!(normalize_zone("Labs.Example.COM"), "labs.example.com");
        assert_eq!(normalize_zone("labs.example.com"), "labs.example.com");
    }
}
