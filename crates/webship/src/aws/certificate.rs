//! DNS-validated certificates via ACM
//!
//! Issuance is asynchronous: ACM hands back the ARN immediately, fills in
//! the DNS validation record shortly after, and only flips the certificate
//! to `ISSUED` once the CA has observed that record. Each of those stages
//! gets its own wait here.

use super::context::DeployContext;
use super::error::ignore_not_found;
use super::tags;
use crate::wait::{wait_until, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_acm::types::{CertificateStatus, ValidationMethod};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webship_common::tags::TagMap;

/// The CNAME record ACM wants published to prove domain ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRecord {
    pub name: String,
    pub value: String,
}

/// ACM client for the optional TLS branch
pub struct AcmClient {
    client: aws_sdk_acm::Client,
}

impl AcmClient {
    /// Create an ACM client from a pre-loaded deploy context
    pub fn from_context(ctx: &DeployContext) -> Self {
        Self {
            client: ctx.acm_client(),
        }
    }

    /// Request a DNS-validated certificate for the service domain.
    ///
    /// # Returns
    /// The certificate ARN. The certificate is not usable until
    /// [`Self::wait_for_issued`] succeeds.
    pub async fn request_certificate(
        &self,
        fqdn: &str,
        service: &str,
        deploy_id: &str,
        user_tags: &TagMap,
    ) -> Result<String> {
        info!(domain = %fqdn, "Requesting certificate");

        let arn = self
            .client
            .request_certificate()
            .domain_name(fqdn)
            .validation_method(ValidationMethod::Dns)
            .idempotency_token(idempotency_token(service, deploy_id))
            .set_tags(Some(tags::acm_tags(service, deploy_id, user_tags)?))
            .send()
            .await
            .with_context(|| format!("Failed to request certificate for {fqdn}"))?
            .certificate_arn()
            .context("No certificate ARN in response")?
            .to_string();

        info!(arn = %arn, "Certificate requested");
        Ok(arn)
    }

    /// Fetch the DNS validation record for a requested certificate.
    ///
    /// ACM populates the record asynchronously, usually within seconds, so
    /// this polls until it appears.
    pub async fn validation_record(
        &self,
        certificate_arn: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<ValidationRecord> {
        wait_until(
            WaitConfig::default(),
            cancel,
            || async {
                let response = self
                    .client
                    .describe_certificate()
                    .certificate_arn(certificate_arn)
                    .send()
                    .await
                    .context("Failed to describe certificate")?;

                let record = response
                    .certificate()
                    .and_then(|c| c.domain_validation_options().first())
                    .and_then(|dv| dv.resource_record())
                    .map(|rr| ValidationRecord {
                        name: rr.name().to_string(),
                        value: rr.value().to_string(),
                    });
                Ok(record)
            },
            "certificate validation record",
        )
        .await
    }

    /// Wait until the certificate is issued.
    ///
    /// The listener serving HTTPS traffic is only created after this
    /// returns; a certificate that fails validation aborts the deploy.
    pub async fn wait_for_issued(
        &self,
        certificate_arn: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        info!(arn = %certificate_arn, "Waiting for certificate validation");

        wait_until(
            WaitConfig::certificate(),
            cancel,
            || async {
                let response = self
                    .client
                    .describe_certificate()
                    .certificate_arn(certificate_arn)
                    .send()
                    .await
                    .context("Failed to describe certificate")?;

                match response.certificate().and_then(|c| c.status()) {
                    Some(CertificateStatus::Issued) => Ok(Some(())),
                    Some(CertificateStatus::PendingValidation) | None => Ok(None),
                    Some(status) => anyhow::bail!(
                        "Certificate {certificate_arn} entered state {status:?} instead of ISSUED"
                    ),
                }
            },
            "certificate issuance",
        )
        .await?;

        info!(arn = %certificate_arn, "Certificate issued");
        Ok(())
    }

    /// Fetch the validation record without polling, for teardown paths
    /// where the certificate may be in any state.
    pub async fn current_validation_record(
        &self,
        certificate_arn: &str,
    ) -> Result<Option<ValidationRecord>> {
        let response = self
            .client
            .describe_certificate()
            .certificate_arn(certificate_arn)
            .send()
            .await
            .context("Failed to describe certificate")?;

        Ok(response
            .certificate()
            .and_then(|c| c.domain_validation_options().first())
            .and_then(|dv| dv.resource_record())
            .map(|rr| ValidationRecord {
                name: rr.name().to_string(),
                value: rr.value().to_string(),
            }))
    }

    /// Find a deployment's certificate ARN by its exact domain name.
    pub async fn find_certificate(&self, fqdn: &str) -> Result<Option<String>> {
        let response = self
            .client
            .list_certificates()
            .send()
            .await
            .context("Failed to list certificates")?;

        Ok(response
            .certificate_summary_list()
            .iter()
            .find(|summary| summary.domain_name() == Some(fqdn))
            .and_then(|summary| summary.certificate_arn())
            .map(|arn| arn.to_string()))
    }

    /// Delete a certificate. Idempotent.
    ///
    /// Fails with ResourceInUseException while a listener still references
    /// the certificate, so teardown deletes listeners first.
    pub async fn delete_certificate(&self, certificate_arn: &str) -> Result<()> {
        let result = self
            .client
            .delete_certificate()
            .certificate_arn(certificate_arn)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete certificate")? {
            Some(_) => info!(arn = %certificate_arn, "Certificate deleted"),
            None => debug!(arn = %certificate_arn, "Certificate already deleted"),
        }
        Ok(())
    }
}

/// ACM idempotency tokens allow `[a-zA-Z0-9_]`, at most 32 characters.
fn idempotency_token(service: &str, deploy_id: &str) -> String {
    let mut token: String = format!("{service}{deploy_id}")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    token.truncate(32);
    if token.is_empty() {
        warn!("Empty idempotency token after sanitizing, using fallback");
        token.push_str("webship");
    }
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_token_is_sanitized_and_bounded() {
        let token = idempotency_token("my-service-name", "0198c2f4-a1b2-7def-8123-456789abcdef");
        assert!(token.len() <= 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert!(token.starts_with("myservicename"));
    }

    #[test]
    fn idempotency_token_never_empty() {
        assert_eq!(idempotency_token("---", "--"), "webship");
    }
}
