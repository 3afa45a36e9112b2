//! Per-SDK tag construction
//!
//! Each AWS SDK crate has its own `Tag` type; these helpers all render the
//! same set from [`webship_common::tags::standard_tags`] (standard webship
//! tags plus the user tag map, unmodified) so every resource in a deployment
//! is tagged identically.

use anyhow::Result;
use webship_common::tags::{standard_tags, TagMap};

/// Build an EC2 TagSpecification for the given resource type.
pub fn ec2_tag_spec(
    resource_type: aws_sdk_ec2::types::ResourceType,
    service: &str,
    deploy_id: &str,
    user_tags: &TagMap,
) -> aws_sdk_ec2::types::TagSpecification {
    use aws_sdk_ec2::types::{Tag, TagSpecification};

    let mut builder = TagSpecification::builder().resource_type(resource_type);
    for (k, v) in standard_tags(service, deploy_id, user_tags) {
        builder = builder.tags(Tag::builder().key(k).value(v).build());
    }
    builder.build()
}

/// Build ELBv2 tags for load balancers, target groups, and listeners.
pub fn elb_tags(
    service: &str,
    deploy_id: &str,
    user_tags: &TagMap,
) -> Result<Vec<aws_sdk_elasticloadbalancingv2::types::Tag>> {
    use aws_sdk_elasticloadbalancingv2::types::Tag;

    standard_tags(service, deploy_id, user_tags)
        .into_iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build ELB tag: {e}"))
        })
        .collect()
}

/// Build ECS tags for clusters, task definitions, and services.
pub fn ecs_tags(service: &str, deploy_id: &str, user_tags: &TagMap) -> Vec<aws_sdk_ecs::types::Tag> {
    use aws_sdk_ecs::types::Tag;

    standard_tags(service, deploy_id, user_tags)
        .into_iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

/// Build ACM tags for requested certificates.
pub fn acm_tags(
    service: &str,
    deploy_id: &str,
    user_tags: &TagMap,
) -> Result<Vec<aws_sdk_acm::types::Tag>> {
    use aws_sdk_acm::types::Tag;

    standard_tags(service, deploy_id, user_tags)
        .into_iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build ACM tag: {e}"))
        })
        .collect()
}

/// Build IAM tags for the execution role.
pub fn iam_tags(
    service: &str,
    deploy_id: &str,
    user_tags: &TagMap,
) -> Result<Vec<aws_sdk_iam::types::Tag>> {
    use aws_sdk_iam::types::Tag;

    standard_tags(service, deploy_id, user_tags)
        .into_iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build IAM tag: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use webship_common::tags::{TAG_DEPLOY_ID, TAG_SERVICE, TAG_TOOL, TAG_TOOL_VALUE};

    fn user_tags() -> TagMap {
        let mut tags = TagMap::new();
        tags.insert("env".into(), "staging".into());
        tags
    }

    #[test]
    fn ecs_tags_carry_standard_and_user_keys() {
        let tags = ecs_tags("nginx", "0198c2f4a1b2", &user_tags());
        let find = |key: &str| {
            tags.iter()
                .find(|t| t.key() == Some(key))
                .and_then(|t| t.value())
        };

        assert_eq!(find(TAG_TOOL), Some(TAG_TOOL_VALUE));
        assert_eq!(find(TAG_SERVICE), Some("nginx"));
        assert_eq!(find(TAG_DEPLOY_ID), Some("0198c2f4a1b2"));
        assert_eq!(find("env"), Some("staging"));
    }

    #[test]
    fn elb_tags_build_for_all_entries() {
        let tags = elb_tags("nginx", "0198c2f4a1b2", &user_tags()).unwrap();
        // 4 standard + 1 user
        assert_eq!(tags.len(), 5);
    }

    #[test]
    fn ec2_tag_spec_sets_resource_type() {
        use aws_sdk_ec2::types::ResourceType;

        let spec = ec2_tag_spec(
            ResourceType::SecurityGroup,
            "nginx",
            "0198c2f4a1b2",
            &TagMap::new(),
        );
        assert_eq!(spec.resource_type(), Some(&ResourceType::SecurityGroup));
        assert_eq!(spec.tags().len(), 4);
    }
}
