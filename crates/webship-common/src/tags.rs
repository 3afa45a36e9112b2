//! AWS resource tag constants for webship
//!
//! All webship-created AWS resources are tagged with these standard tags
//! to enable discovery, teardown, and lifecycle auditing. User-supplied tags
//! are propagated alongside them, unmodified.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `webship:tool` | Static identifier ("webship") |
//! | `webship:deploy-id` | Unique deployment identifier |
//! | `webship:service` | Logical service name |
//! | `webship:created-at` | RFC 3339 creation timestamp |

use std::collections::BTreeMap;

/// Tag key for tool identification - all webship resources have this
pub const TAG_TOOL: &str = "webship:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "webship";

/// Tag key for the deployment identifier
pub const TAG_DEPLOY_ID: &str = "webship:deploy-id";

/// Tag key for the logical service name
pub const TAG_SERVICE: &str = "webship:service";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "webship:created-at";

/// User-supplied tags, applied uniformly to every created resource.
///
/// Keys and values pass through to AWS as-is; no content validation is
/// performed. A `BTreeMap` keeps tag ordering stable across runs.
pub type TagMap = BTreeMap<String, String>;

/// The full key/value tag set for one deployment: the standard webship tags
/// followed by the user tags.
///
/// Per-SDK tag structs are built from this by the deployer; this function owns
/// the schema so every service tags identically.
pub fn standard_tags(
    service: &str,
    deploy_id: &str,
    user_tags: &TagMap,
) -> Vec<(String, String)> {
    let mut tags = vec![
        (TAG_TOOL.to_string(), TAG_TOOL_VALUE.to_string()),
        (TAG_DEPLOY_ID.to_string(), deploy_id.to_string()),
        (TAG_SERVICE.to_string(), service.to_string()),
        (TAG_CREATED_AT.to_string(), format_created_at(chrono::Utc::now())),
    ];
    for (k, v) in user_tags {
        tags.push((k.clone(), v.clone()));
    }
    tags
}

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_format_parse_roundtrip() {
        let now = Utc::now();
        let formatted = format_created_at(now);
        let parsed = parse_created_at(&formatted).unwrap();

        // Timestamps should be within 1 second (sub-second precision may vary)
        let diff = (now - parsed).num_seconds().abs();
        assert!(diff <= 1, "Roundtrip diff {} > 1 second", diff);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_created_at("not a timestamp").is_none());
        assert!(parse_created_at("").is_none());
    }

    #[test]
    fn user_tags_pass_through_unmodified() {
        let mut user = TagMap::new();
        user.insert("team".into(), "platform".into());
        user.insert("cost-center".into(), "42".into());

        let tags = standard_tags("nginx", "0198c2f4a1b2", &user);

        assert!(tags.iter().any(|(k, v)| k == TAG_TOOL && v == TAG_TOOL_VALUE));
        assert!(tags.iter().any(|(k, v)| k == TAG_DEPLOY_ID && v == "0198c2f4a1b2"));
        assert!(tags.iter().any(|(k, v)| k == TAG_SERVICE && v == "nginx"));
        assert!(tags.iter().any(|(k, v)| k == "team" && v == "platform"));
        assert!(tags.iter().any(|(k, v)| k == "cost-center" && v == "42"));
    }
}
