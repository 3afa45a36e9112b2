//! webship: deploy a containerized web service to AWS Fargate
//!
//! One command stands up the whole topology (cluster, service, load
//! balancer, security groups, IAM role, and optionally DNS + TLS) and
//! prints the service URL; another tears it down again.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use webship::aws::DeployContext;
use webship::config::{AutoscalingConfig, NetworkContext, ServiceConfig};
use webship::{deploy, destroy};
use webship_common::defaults::DEFAULT_CPU_TARGET;
use webship_common::naming::qualified_name;
use webship_common::tags::TagMap;

#[derive(Parser, Debug)]
#[command(name = "webship")]
#[command(about = "Deploy containerized web services to AWS Fargate")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Arguments for the deploy command (extracted to reduce enum size)
#[derive(clap::Args, Debug)]
struct DeployArgs {
    /// Logical service name (lowercase, digits, dashes)
    #[arg(short, long)]
    name: String,

    /// Container image reference (e.g. "nginx:1.27")
    #[arg(short, long)]
    image: String,

    /// TCP port the container listens on
    #[arg(short, long)]
    port: u16,

    /// Fargate CPU units (default "256")
    #[arg(long)]
    cpu: Option<String>,

    /// Fargate memory in MiB (default "512")
    #[arg(long)]
    memory: Option<String>,

    /// Minimum task count; enables autoscaling together with --max-tasks
    #[arg(long)]
    min_tasks: Option<u32>,

    /// Maximum task count; enables autoscaling together with --min-tasks
    #[arg(long)]
    max_tasks: Option<u32>,

    /// Average-CPU target for the scaling policy, percent
    #[arg(long, default_value_t = DEFAULT_CPU_TARGET)]
    cpu_target: f64,

    /// Route 53 hosted zone for a custom domain; switches the service to
    /// HTTPS with a DNS-validated certificate
    #[arg(long)]
    hosted_zone: Option<String>,

    /// AWS region
    #[arg(long, default_value = "us-east-2")]
    region: String,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long)]
    aws_profile: Option<String>,

    /// VPC the service runs in
    #[arg(long)]
    vpc_id: String,

    /// Comma-separated subnet ids (the ALB needs at least two AZs)
    #[arg(long)]
    subnets: String,

    /// Resource tag as key=value; repeatable
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Deployment identifier; generated when omitted. Reuse one to address
    /// the deployment later with `destroy`.
    #[arg(long)]
    deploy_id: Option<String>,

    /// Validate and print the plan without calling AWS
    #[arg(long)]
    dry_run: bool,
}

impl DeployArgs {
    /// Parse subnet ids from the comma-separated string
    fn parse_subnet_ids(&self) -> Vec<String> {
        self.subnets
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn parse_tags(&self) -> Result<TagMap> {
        let mut tags = TagMap::new();
        for raw in &self.tags {
            let (key, value) = raw
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Tag '{raw}' is not in key=value form"))?;
            tags.insert(key.to_string(), value.to_string());
        }
        Ok(tags)
    }

    fn autoscaling(&self) -> Result<Option<AutoscalingConfig>> {
        match (self.min_tasks, self.max_tasks) {
            (Some(min), Some(max)) => Ok(Some(AutoscalingConfig {
                min,
                max,
                cpu_avg_threshold: self.cpu_target,
            })),
            (None, None) => Ok(None),
            _ => anyhow::bail!("--min-tasks and --max-tasks must be given together"),
        }
    }

    fn service_config(&self) -> Result<ServiceConfig> {
        Ok(ServiceConfig {
            name: self.name.clone(),
            image: self.image.clone(),
            port: self.port,
            cpu: self.cpu.clone(),
            memory: self.memory.clone(),
            autoscaling: self.autoscaling()?,
            hosted_zone: self.hosted_zone.clone(),
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy a service and print its URL
    Deploy(Box<DeployArgs>),

    /// Tear down a deployment created with `deploy`
    Destroy {
        /// Logical service name the deployment was created with
        #[arg(short, long)]
        name: String,

        /// Deployment identifier printed by `deploy`
        #[arg(long)]
        deploy_id: String,

        /// Container port the deployment used
        #[arg(short, long)]
        port: u16,

        /// Hosted zone the deployment used, if any
        #[arg(long)]
        hosted_zone: Option<String>,

        /// AWS region
        #[arg(long, default_value = "us-east-2")]
        region: String,

        /// AWS profile to use (overrides AWS_PROFILE env var)
        #[arg(long)]
        aws_profile: Option<String>,

        /// Actually delete resources (default is dry-run)
        #[arg(long)]
        execute: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    // Print main error message
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    // Print error chain (causes)
    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    // Cancel long waits (IAM propagation, certificate issuance) on Ctrl-C;
    // the failed deploy then rolls itself back
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Command::Deploy(deploy_args) => run_deploy(*deploy_args, &cancel).await,
        Command::Destroy {
            name,
            deploy_id,
            port,
            hosted_zone,
            region,
            aws_profile,
            execute,
        } => {
            let ctx =
                DeployContext::with_profile(&region, &deploy_id, aws_profile.as_deref()).await;
            let report = destroy::destroy(
                &ctx,
                &destroy::DestroyConfig {
                    service: name,
                    hosted_zone,
                    port,
                    dry_run: !execute,
                },
            )
            .await?;

            if !execute {
                println!(
                    "Dry run: {} resources would be deleted. Re-run with --execute to delete.",
                    report.skipped
                );
            } else {
                println!(
                    "Destroyed: {} deleted, {} failed",
                    report.deleted, report.failed
                );
            }
            Ok(())
        }
    }
}

async fn run_deploy(args: DeployArgs, cancel: &CancellationToken) -> Result<()> {
    let config = args.service_config()?;
    let network = NetworkContext {
        vpc_id: args.vpc_id.clone(),
        subnet_ids: args.parse_subnet_ids(),
    };
    let user_tags = args.parse_tags()?;

    // Reject bad input before touching AWS, dry-run or not
    config.validate()?;
    network.validate()?;

    let deploy_id = args
        .deploy_id
        .clone()
        .unwrap_or_else(generate_deploy_id);

    if args.dry_run {
        print_plan(&config, &network, &deploy_id, &args.region, &user_tags);
        return Ok(());
    }

    if let Some(profile) = &args.aws_profile {
        info!(profile = %profile, "Using AWS profile");
    }

    let ctx = DeployContext::with_profile(&args.region, &deploy_id, args.aws_profile.as_deref())
        .await;
    let output = deploy::deploy(&ctx, &config, &network, &user_tags, Some(cancel)).await?;

    println!();
    println!("Service deployed.");
    println!("  URL:        {}", output.url);
    println!("  Cluster:    {}", output.cluster);
    println!("  Deploy id:  {}", output.deploy_id);
    println!();
    println!(
        "Tear down with: webship destroy --name {} --deploy-id {} --port {}{}",
        config.name,
        output.deploy_id,
        config.port,
        config
            .hosted_zone
            .as_deref()
            .map(|z| format!(" --hosted-zone {z}"))
            .unwrap_or_default()
    );
    Ok(())
}

/// Deployment ids only need to be unique per service; the first twelve hex
/// digits of a UUIDv7 keep qualified names inside AWS length limits while
/// staying time-sortable.
fn generate_deploy_id() -> String {
    let id = uuid::Uuid::now_v7().simple().to_string();
    id[..12].to_string()
}

/// Print what a deploy would create, without calling AWS
fn print_plan(
    config: &ServiceConfig,
    network: &NetworkContext,
    deploy_id: &str,
    region: &str,
    user_tags: &TagMap,
) {
    let qualified = qualified_name(&config.name, deploy_id);
    let (protocol, port) = if config.hosted_zone.is_some() {
        ("HTTPS", 443)
    } else {
        ("HTTP", 80)
    };

    println!("\n=== DRY RUN ===\n");
    println!("This would deploy:\n");
    println!("  Region:      {region}");
    println!("  Service:     {qualified}");
    println!("  Image:       {}", config.image);
    println!("  Port:        {}", config.port);
    println!(
        "  Sizing:      cpu={} memory={}",
        config.cpu.as_deref().unwrap_or("256"),
        config.memory.as_deref().unwrap_or("512"),
    );
    println!("  VPC:         {}", network.vpc_id);
    println!("  Subnets:     {}", network.subnet_ids.join(", "));
    println!("  Listener:    {protocol} on {port}");
    match &config.hosted_zone {
        Some(zone) => {
            println!("  Domain:      {qualified}.{}", zone.trim_end_matches('.'));
            println!("  Certificate: DNS-validated via Route 53");
            println!("  URL:         https://{qualified}.{}", zone.trim_end_matches('.'));
        }
        None => println!("  URL:         http://<load-balancer-dns>"),
    }
    match &config.autoscaling {
        Some(scaling) => println!(
            "  Autoscaling: {}..{} tasks at {}% avg CPU",
            scaling.min, scaling.max, scaling.cpu_avg_threshold
        ),
        None => println!("  Autoscaling: none (fixed at 1 task)"),
    }
    if !user_tags.is_empty() {
        println!("  Tags:        {}", user_tags.len());
    }
    println!();
    println!("To deploy for real, remove the --dry-run flag.");
}
