//! AWS resource tag constants for amiforge
//!
//! All amiforge-created Image Builder resources are tagged with these keys
//! to enable discovery and cleanup.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `amiforge:tool` | Static identifier ("amiforge") |
//! | `amiforge:name` | Build name the resource belongs to |
//! | `amiforge:version` | Build version (recipes and pipelines) |
//! | `amiforge:type` | Provisioner kind (components) |
//! | `amiforge:build-id` | Identifier of the build attempt that created it |
//! | `amiforge:created-at` | RFC 3339 creation timestamp |

use std::collections::HashMap;

/// Tag key for tool identification - all amiforge resources have this
pub const TAG_TOOL: &str = "amiforge:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "amiforge";

/// Tag key for the build name
pub const TAG_NAME: &str = "amiforge:name";

/// Tag key for the build version
pub const TAG_VERSION: &str = "amiforge:version";

/// Tag key for the provisioner kind of a component
pub const TAG_TYPE: &str = "amiforge:type";

/// Tag key for the build attempt identifier
pub const TAG_BUILD_ID: &str = "amiforge:build-id";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "amiforge:created-at";

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

/// Standard tag map for a resource created by a build attempt.
pub fn standard_tags(build_name: &str, build_id: &str) -> HashMap<String, String> {
    HashMap::from([
        (TAG_TOOL.to_string(), TAG_TOOL_VALUE.to_string()),
        (TAG_NAME.to_string(), build_name.to_string()),
        (TAG_BUILD_ID.to_string(), build_id.to_string()),
        (
            TAG_CREATED_AT.to_string(),
            format_created_at(chrono::Utc::now()),
        ),
    ])
}
