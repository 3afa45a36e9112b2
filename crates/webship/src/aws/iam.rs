//! IAM execution role for the task definition

use super::account::AccountId;
use super::context::DeployContext;
use super::tags;
use crate::wait::{wait_until, WaitConfig};
use anyhow::{Context, Result};
use aws_sdk_iam::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webship_common::naming::{log_group_name, qualified_name, role_name};
use webship_common::tags::TagMap;

/// Inline policy name attached to every execution role
const LOG_POLICY_NAME: &str = "webship-logs";

/// The trust policy allowing ECS tasks to assume the role
const ECS_TASKS_ASSUME_ROLE_POLICY: &str = r#"{
    "Version": "2012-10-17",
    "Statement": [
        {
            "Effect": "Allow",
            "Principal": {
                "Service": "ecs-tasks.amazonaws.com"
            },
            "Action": "sts:AssumeRole"
        }
    ]
}"#;

/// Generate the execution role's only policy.
///
/// The role exists so the task can ship logs; it gets log-group and
/// log-stream permissions scoped to the deployment's own log group and
/// nothing else.
fn generate_log_policy(region: &str, account_id: &AccountId, log_group: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "TaskLogs",
                "Effect": "Allow",
                "Action": [
                    "logs:CreateLogGroup",
                    "logs:CreateLogStream",
                    "logs:PutLogEvents"
                ],
                "Resource": format!("arn:aws:logs:{region}:{account_id}:log-group:{log_group}*")
            }
        ]
    })
    .to_string()
}

/// IAM client for managing the execution role
pub struct IamClient {
    client: Client,
}

impl IamClient {
    /// Create an IAM client from a pre-loaded deploy context
    pub fn from_context(ctx: &DeployContext) -> Self {
        Self {
            client: ctx.iam_client(),
        }
    }

    /// Create the task execution role for a deployment.
    ///
    /// The role trusts only `ecs-tasks.amazonaws.com` and carries exactly
    /// one inline policy, scoped to the deployment's log group.
    ///
    /// # Returns
    /// The role ARN, after the role is visible in the IAM API.
    pub async fn create_execution_role(
        &self,
        service: &str,
        deploy_id: &str,
        region: &str,
        account_id: &AccountId,
        user_tags: &TagMap,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let name = role_name(service, deploy_id);
        let log_group = log_group_name(&qualified_name(service, deploy_id));

        info!(role_name = %name, "Creating task execution role");

        let role_arn = self
            .client
            .create_role()
            .role_name(&name)
            .assume_role_policy_document(ECS_TASKS_ASSUME_ROLE_POLICY)
            .description(format!("webship execution role for {service} ({deploy_id})"))
            .set_tags(Some(tags::iam_tags(service, deploy_id, user_tags)?))
            .send()
            .await
            .context("Failed to create execution role")?
            .role()
            .context("No role in CreateRole response")?
            .arn()
            .to_string();

        debug!(role_name = %name, "Execution role created");

        let policy_document = generate_log_policy(region, account_id, &log_group);
        self.client
            .put_role_policy()
            .role_name(&name)
            .policy_name(LOG_POLICY_NAME)
            .policy_document(&policy_document)
            .send()
            .await
            .context("Failed to attach log policy to execution role")?;

        debug!(role_name = %name, "Log policy attached");

        // IAM is eventually consistent; ECS rejects the role until it
        // propagates. Wait for visibility here so service creation only has
        // to retry the rare stragglers.
        let client = self.client.clone();
        let name_for_wait = name.clone();
        wait_until(
            WaitConfig {
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                timeout: Duration::from_secs(60),
            },
            cancel,
            || {
                let c = client.clone();
                let n = name_for_wait.clone();
                async move {
                    match c.get_role().role_name(&n).send().await {
                        Ok(_) => Ok(Some(())),
                        Err(_) => Ok(None), // Role not visible yet
                    }
                }
            },
            "IAM execution role",
        )
        .await
        .context("Waiting for execution role to become visible")?;

        info!(role_name = %name, role_arn = %role_arn, "Execution role ready");
        Ok(role_arn)
    }

    /// Delete the execution role and its inline policy
    pub async fn delete_execution_role(&self, role_name: &str) -> Result<()> {
        info!(role_name = %role_name, "Deleting execution role");

        // Inline policies must go before the role itself
        if let Err(e) = self
            .client
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(LOG_POLICY_NAME)
            .send()
            .await
        {
            debug!(error = ?e, "Failed to delete role policy (may already be deleted)");
        }

        if let Err(e) = self.client.delete_role().role_name(role_name).send().await {
            warn!(error = ?e, role_name = %role_name, "Failed to delete execution role");
        } else {
            info!(role_name = %role_name, "Execution role deleted");
        }

        Ok(())
    }

    /// Check if a role exists
    pub async fn role_exists(&self, role_name: &str) -> bool {
        self.client
            .get_role()
            .role_name(role_name)
            .send()
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_policy_is_scoped_to_the_deployment_log_group() {
        let account = AccountId::new("123456789012".to_string());
        let policy = generate_log_policy("us-east-2", &account, "/ecs/nginx-0198c2f4a1b2");

        let parsed: serde_json::Value = serde_json::from_str(&policy).unwrap();
        let statement = &parsed["Statement"][0];

        assert_eq!(
            statement["Resource"],
            "arn:aws:logs:us-east-2:123456789012:log-group:/ecs/nginx-0198c2f4a1b2*"
        );
        let actions = statement["Action"].as_array().unwrap();
        assert_eq!(actions.len(), 3);
        assert!(actions.iter().all(|a| a.as_str().unwrap().starts_with("logs:")));
    }

    #[test]
    fn trust_policy_names_only_the_ecs_task_principal() {
        let parsed: serde_json::Value = serde_json::from_str(ECS_TASKS_ASSUME_ROLE_POLICY).unwrap();
        let statements = parsed["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0]["Principal"]["Service"],
            "ecs-tasks.amazonaws.com"
        );
    }
}
