//! ECS cluster, task definition, and service

use super::context::DeployContext;
use super::error::{classify_anyhow_error, ignore_not_found, AwsError};
use super::tags;
use anyhow::{Context, Result};
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, Compatibility, ContainerDefinition, LaunchType,
    LogConfiguration, LogDriver, NetworkConfiguration, NetworkMode, PortMapping,
    TransportProtocol,
};
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::{debug, info, warn};
use webship_common::defaults::{DEFAULT_CPU, DEFAULT_MEMORY};
use webship_common::naming::{log_group_name, qualified_name};
use webship_common::tags::TagMap;

use crate::config::ServiceConfig;

/// Everything a task definition is derived from, resolved up-front.
///
/// One container per task is a fixed design decision; nothing here can
/// describe a second container.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    family: String,
    image: String,
    container_port: u16,
    cpu: Option<String>,
    memory: Option<String>,
    region: String,
    execution_role_arn: String,
    service: String,
}

impl TaskSpec {
    /// Derive the task specification from the service configuration.
    pub fn new(
        config: &ServiceConfig,
        deploy_id: &str,
        region: &str,
        execution_role_arn: &str,
    ) -> Self {
        Self {
            family: qualified_name(&config.name, deploy_id),
            image: config.image.clone(),
            container_port: config.port,
            cpu: config.cpu.clone(),
            memory: config.memory.clone(),
            region: region.to_string(),
            execution_role_arn: execution_role_arn.to_string(),
            service: config.name.clone(),
        }
    }

    /// Task definition family (the deployment-qualified name).
    pub fn family(&self) -> &str {
        &self.family
    }

    /// CPU units, defaulting to "256".
    pub fn cpu(&self) -> &str {
        self.cpu.as_deref().unwrap_or(DEFAULT_CPU)
    }

    /// Memory in MiB, defaulting to "512".
    pub fn memory(&self) -> &str {
        self.memory.as_deref().unwrap_or(DEFAULT_MEMORY)
    }

    /// The single container port mapping: container port = host port.
    pub fn port_mapping(&self) -> (u16, u16) {
        (self.container_port, self.container_port)
    }

    /// Log group the awslogs driver writes to (auto-created).
    pub fn log_group(&self) -> String {
        log_group_name(&self.family)
    }

    /// Container name inside the task (the logical service name).
    pub fn container_name(&self) -> &str {
        &self.service
    }

    fn container_definition(&self) -> Result<ContainerDefinition> {
        let log_config = LogConfiguration::builder()
            .log_driver(LogDriver::Awslogs)
            .options("awslogs-group", self.log_group())
            .options("awslogs-region", &self.region)
            .options("awslogs-stream-prefix", &self.service)
            .options("awslogs-create-group", "true")
            .build()
            .context("Failed to build log configuration")?;

        Ok(ContainerDefinition::builder()
            .name(&self.service)
            .image(&self.image)
            .essential(true)
            .port_mappings(
                PortMapping::builder()
                    .container_port(i32::from(self.container_port))
                    .host_port(i32::from(self.container_port))
                    .protocol(TransportProtocol::Tcp)
                    .build(),
            )
            .log_configuration(log_config)
            .build())
    }
}

/// Everything the long-running service is created from.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Cluster name the service runs in
    pub cluster: String,
    /// Deployment-qualified service name
    pub service_name: String,
    /// Registered task definition ARN
    pub task_definition_arn: String,
    /// Target group tasks register into
    pub target_group_arn: String,
    /// Container name inside the task
    pub container_name: String,
    /// Container port the target group forwards to
    pub container_port: u16,
    /// Subnets the tasks run in
    pub subnet_ids: Vec<String>,
    /// The service security group
    pub security_group_id: String,
}

/// ECS client for the compute topology
pub struct EcsClient {
    client: aws_sdk_ecs::Client,
}

impl EcsClient {
    /// Create an ECS client from a pre-loaded deploy context
    pub fn from_context(ctx: &DeployContext) -> Self {
        Self {
            client: ctx.ecs_client(),
        }
    }

    /// Create the deployment's cluster.
    ///
    /// # Returns
    /// The cluster name (which ECS also accepts wherever an ARN is expected).
    pub async fn create_cluster(
        &self,
        service: &str,
        deploy_id: &str,
        user_tags: &TagMap,
    ) -> Result<String> {
        let name = qualified_name(service, deploy_id);
        info!(cluster = %name, "Creating cluster");

        self.client
            .create_cluster()
            .cluster_name(&name)
            .set_tags(Some(tags::ecs_tags(service, deploy_id, user_tags)))
            .send()
            .await
            .with_context(|| format!("Failed to create cluster {name}"))?;

        info!(cluster = %name, "Cluster created");
        Ok(name)
    }

    /// Register the single-container Fargate task definition.
    pub async fn register_task_definition(
        &self,
        spec: &TaskSpec,
        service: &str,
        deploy_id: &str,
        user_tags: &TagMap,
    ) -> Result<String> {
        info!(
            family = %spec.family(),
            cpu = %spec.cpu(),
            memory = %spec.memory(),
            "Registering task definition"
        );

        let response = self
            .client
            .register_task_definition()
            .family(spec.family())
            .requires_compatibilities(Compatibility::Fargate)
            .network_mode(NetworkMode::Awsvpc)
            .cpu(spec.cpu())
            .memory(spec.memory())
            .execution_role_arn(&spec.execution_role_arn)
            .container_definitions(spec.container_definition()?)
            .set_tags(Some(tags::ecs_tags(service, deploy_id, user_tags)))
            .send()
            .await
            .with_context(|| format!("Failed to register task definition {}", spec.family()))?;

        let arn = response
            .task_definition()
            .and_then(|td| td.task_definition_arn())
            .context("No task definition ARN in response")?
            .to_string();

        info!(arn = %arn, "Task definition registered");
        Ok(arn)
    }

    /// Create the long-running service behind the target group.
    ///
    /// Returns as soon as ECS accepts the service; steady state is not
    /// awaited, so a crashing container surfaces later in the service's
    /// event log rather than here. Retries while IAM propagates the freshly
    /// created execution role.
    pub async fn create_service(&self, spec: &ServiceSpec, service: &str, deploy_id: &str, user_tags: &TagMap) -> Result<String> {
        info!(
            cluster = %spec.cluster,
            service = %spec.service_name,
            "Creating service"
        );

        let service_name_for_log = spec.service_name.clone();

        let arn = (|| async {
            self.do_create_service(spec, service, deploy_id, user_tags)
                .await
        })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(2))
                .with_max_delay(Duration::from_secs(30))
                .with_max_times(8),
        )
        .when(|e| {
            matches!(
                classify_anyhow_error(e),
                AwsError::RolePropagationDelay | AwsError::Throttled
            )
        })
        .notify(|e, dur| {
            warn!(
                service = %service_name_for_log,
                delay = ?dur,
                error = %e,
                "Service creation failed transiently, retrying..."
            );
        })
        .await?;

        info!(arn = %arn, "Service created");
        Ok(arn)
    }

    async fn do_create_service(
        &self,
        spec: &ServiceSpec,
        service: &str,
        deploy_id: &str,
        user_tags: &TagMap,
    ) -> Result<String> {
        let vpc_config = AwsVpcConfiguration::builder()
            .set_subnets(Some(spec.subnet_ids.clone()))
            .security_groups(&spec.security_group_id)
            .assign_public_ip(AssignPublicIp::Enabled)
            .build()
            .context("Failed to build service network configuration")?;

        let response = self
            .client
            .create_service()
            .cluster(&spec.cluster)
            .service_name(&spec.service_name)
            .task_definition(&spec.task_definition_arn)
            .desired_count(1)
            .launch_type(LaunchType::Fargate)
            .load_balancers(
                aws_sdk_ecs::types::LoadBalancer::builder()
                    .target_group_arn(&spec.target_group_arn)
                    .container_name(&spec.container_name)
                    .container_port(i32::from(spec.container_port))
                    .build(),
            )
            .network_configuration(
                NetworkConfiguration::builder()
                    .awsvpc_configuration(vpc_config)
                    .build(),
            )
            .set_tags(Some(tags::ecs_tags(service, deploy_id, user_tags)))
            .send()
            .await
            .with_context(|| format!("Failed to create service {}", spec.service_name))?;

        response
            .service()
            .and_then(|s| s.service_arn())
            .context("No service ARN in response")
            .map(|arn| arn.to_string())
    }

    /// Scale a service to zero tasks so deletion does not race running tasks.
    pub async fn scale_to_zero(&self, cluster: &str, service_name: &str) -> Result<()> {
        let result = self
            .client
            .update_service()
            .cluster(cluster)
            .service(service_name)
            .desired_count(0)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to scale service down")? {
            Some(_) => info!(service = %service_name, "Service scaled to zero"),
            None => debug!(service = %service_name, "Service already gone"),
        }
        Ok(())
    }

    /// Delete a service. Idempotent.
    pub async fn delete_service(&self, cluster: &str, service_name: &str) -> Result<()> {
        let result = self
            .client
            .delete_service()
            .cluster(cluster)
            .service(service_name)
            .force(true)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete service")? {
            Some(_) => info!(service = %service_name, "Service deleted"),
            None => debug!(service = %service_name, "Service already deleted"),
        }
        Ok(())
    }

    /// Delete a cluster. Idempotent.
    pub async fn delete_cluster(&self, cluster: &str) -> Result<()> {
        let result = self.client.delete_cluster().cluster(cluster).send().await;
        match ignore_not_found(result).context("Failed to delete cluster")? {
            Some(_) => info!(cluster = %cluster, "Cluster deleted"),
            None => debug!(cluster = %cluster, "Cluster already deleted"),
        }
        Ok(())
    }

    /// Deregister the latest revision of a task definition family. Idempotent.
    pub async fn deregister_task_definition(&self, family: &str) -> Result<()> {
        let described = self
            .client
            .describe_task_definition()
            .task_definition(family)
            .send()
            .await;

        let Some(response) =
            ignore_not_found(described).context("Failed to describe task definition")?
        else {
            debug!(family = %family, "Task definition already gone");
            return Ok(());
        };

        // ECS reports unknown families as a ClientException rather than a
        // typed not-found, so check the payload too.
        let Some(arn) = response
            .task_definition()
            .and_then(|td| td.task_definition_arn())
        else {
            debug!(family = %family, "Task definition already gone");
            return Ok(());
        };

        self.client
            .deregister_task_definition()
            .task_definition(arn)
            .send()
            .await
            .context("Failed to deregister task definition")?;

        info!(family = %family, "Task definition deregistered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cpu: Option<&str>, memory: Option<&str>) -> ServiceConfig {
        ServiceConfig {
            name: "nginx".into(),
            image: "nginx:latest".into(),
            port: 8080,
            cpu: cpu.map(String::from),
            memory: memory.map(String::from),
            autoscaling: None,
            hosted_zone: None,
        }
    }

    fn spec(cpu: Option<&str>, memory: Option<&str>) -> TaskSpec {
        TaskSpec::new(
            &config(cpu, memory),
            "0198c2f4a1b2",
            "us-east-2",
            "arn:aws:iam::123456789012:role/nginx-0198c2f4a1b2-exec",
        )
    }

    #[test]
    fn cpu_and_memory_default_when_unset() {
        let spec = spec(None, None);
        assert_eq!(spec.cpu(), "256");
        assert_eq!(spec.memory(), "512");
    }

    #[test]
    fn explicit_cpu_and_memory_pass_through() {
        let spec = spec(Some("1024"), Some("2048"));
        assert_eq!(spec.cpu(), "1024");
        assert_eq!(spec.memory(), "2048");
    }

    #[test]
    fn exactly_one_port_mapping_on_the_configured_port() {
        let spec = spec(None, None);
        assert_eq!(spec.port_mapping(), (8080, 8080));

        let container = spec.container_definition().unwrap();
        let mappings = container.port_mappings();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].container_port(), Some(8080));
        assert_eq!(mappings[0].host_port(), Some(8080));
        assert_eq!(mappings[0].protocol(), Some(&TransportProtocol::Tcp));
    }

    #[test]
    fn log_configuration_targets_the_deployment_log_group() {
        let spec = spec(None, None);
        assert_eq!(spec.log_group(), "/ecs/nginx-0198c2f4a1b2");

        let container = spec.container_definition().unwrap();
        let log_config = container.log_configuration().unwrap();
        assert_eq!(log_config.log_driver(), &LogDriver::Awslogs);

        let options = log_config.options().unwrap();
        assert_eq!(
            options.get("awslogs-group").map(String::as_str),
            Some("/ecs/nginx-0198c2f4a1b2")
        );
        assert_eq!(options.get("awslogs-region").map(String::as_str), Some("us-east-2"));
        assert_eq!(options.get("awslogs-stream-prefix").map(String::as_str), Some("nginx"));
        assert_eq!(options.get("awslogs-create-group").map(String::as_str), Some("true"));
    }

    #[test]
    fn family_is_deployment_qualified() {
        assert_eq!(spec(None, None).family(), "nginx-0198c2f4a1b2");
        assert_eq!(spec(None, None).container_name(), "nginx");
    }
}
