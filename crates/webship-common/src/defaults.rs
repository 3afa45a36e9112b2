//! Default configuration values shared between the CLI and the deployer
//!
//! These constants ensure consistent defaults across all webship components.

/// Default Fargate CPU reservation (CPU units, as the ECS API expects a string)
pub const DEFAULT_CPU: &str = "256";

/// Default Fargate memory reservation (MiB, as the ECS API expects a string)
pub const DEFAULT_MEMORY: &str = "512";

/// Default target for the CPU-utilization tracking policy (percent)
pub const DEFAULT_CPU_TARGET: f64 = 75.0;

/// Listener port for services without a custom domain
pub const HTTP_PORT: u16 = 80;

/// Listener port for services with a custom domain (TLS terminates at the ALB)
pub const HTTPS_PORT: u16 = 443;

/// Port the target group forwards to behind the listener
pub const TARGET_GROUP_PORT: u16 = 80;

// Serde default functions for struct field defaults

/// Returns the default CPU reservation
pub fn default_cpu() -> String {
    DEFAULT_CPU.to_string()
}

/// Returns the default memory reservation
pub fn default_memory() -> String {
    DEFAULT_MEMORY.to_string()
}

/// Returns the default CPU-utilization target
pub fn default_cpu_target() -> f64 {
    DEFAULT_CPU_TARGET
}
