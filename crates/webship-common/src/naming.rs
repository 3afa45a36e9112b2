//! Deployment-qualified resource naming
//!
//! Every AWS resource webship creates is named `<service>-<deploy-id>` so
//! parallel deployments of the same service never collide. All functions here
//! are pure and total; AWS name-length limits are enforced by truncation.

/// Maximum length AWS allows for ALB and target group names
pub const MAX_ELB_NAME_LEN: usize = 32;

/// Maximum length AWS allows for IAM role names
pub const MAX_IAM_NAME_LEN: usize = 64;

/// Qualify a logical service name with the active deployment identifier.
///
/// The result is deterministic for a given (name, deploy_id) pair and unique
/// across deployments as long as deploy ids are unique.
pub fn qualified_name(name: &str, deploy_id: &str) -> String {
    format!("{name}-{deploy_id}")
}

/// Name for ALB-family resources, truncated to the 32-character ELB limit.
pub fn elb_name(name: &str, deploy_id: &str) -> String {
    truncate(qualified_name(name, deploy_id), MAX_ELB_NAME_LEN)
}

/// Name for IAM roles, truncated to the 64-character IAM limit.
pub fn role_name(name: &str, deploy_id: &str) -> String {
    truncate(format!("{name}-{deploy_id}-exec"), MAX_IAM_NAME_LEN)
}

/// CloudWatch log group for a deployment's tasks.
pub fn log_group_name(qualified: &str) -> String {
    format!("/ecs/{qualified}")
}

/// Fully-qualified domain for a deployment inside a hosted zone.
///
/// Accepts the zone with or without a trailing dot (Route 53 reports zone
/// names with one).
pub fn fqdn(qualified: &str, zone: &str) -> String {
    format!("{qualified}.{}", zone.trim_end_matches('.'))
}

fn truncate(s: String, max: usize) -> String {
    if s.len() > max {
        s[..max].to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_is_deterministic() {
        assert_eq!(qualified_name("nginx", "0198c2f4a1b2"), "nginx-0198c2f4a1b2");
        assert_eq!(
            qualified_name("nginx", "0198c2f4a1b2"),
            qualified_name("nginx", "0198c2f4a1b2"),
        );
    }

    #[test]
    fn distinct_deployments_get_distinct_names() {
        assert_ne!(
            qualified_name("api", "aaaaaaaaaaaa"),
            qualified_name("api", "bbbbbbbbbbbb"),
        );
    }

    #[test]
    fn elb_name_respects_limit() {
        let name = elb_name("a-very-long-service-name", "0198c2f4a1b2deadbeef");
        assert!(name.len() <= MAX_ELB_NAME_LEN);
        assert!(name.starts_with("a-very-long-service-name"));
    }

    #[test]
    fn role_name_has_exec_suffix() {
        assert_eq!(role_name("api", "0198c2f4a1b2"), "api-0198c2f4a1b2-exec");
        assert!(role_name("a".repeat(70).as_str(), "x").len() <= MAX_IAM_NAME_LEN);
    }

    #[test]
    fn log_group_is_under_ecs_prefix() {
        assert_eq!(log_group_name("nginx-0198c2f4a1b2"), "/ecs/nginx-0198c2f4a1b2");
    }

    #[test]
    fn fqdn_strips_trailing_zone_dot() {
        assert_eq!(
            fqdn("nginx-0198c2f4a1b2", "labs.example.com"),
            "nginx-0198c2f4a1b2.labs.example.com"
        );
        assert_eq!(
            fqdn("nginx-0198c2f4a1b2", "labs.example.com."),
            "nginx-0198c2f4a1b2.labs.example.com"
        );
    }
}
