//! amiforge-common - Shared types and utilities
//!
//! This crate holds everything that does not need the AWS SDK: the build spec
//! data model, deterministic resource naming, version arithmetic, platform
//! detection, tag keys and defaults.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`naming`]: Deterministic resource names and build identifiers
//! - [`platform`]: Linux/Windows detection from provisioners
//! - [`resource_kind`]: Image Builder resource kinds and cleanup ordering
//! - [`spec`]: Build spec, targets and provisioners
//! - [`tags`]: AWS resource tag constants for discovery and cleanup
//! - [`version`]: Semantic version parsing and component version advancement

pub mod defaults;
pub mod naming;
pub mod platform;
pub mod resource_kind;
pub mod spec;
pub mod tags;
pub mod version;

// Re-export commonly used types
pub use naming::{ResourceNames, generate_build_id, normalize_ami_name};
pub use platform::Platform;
pub use resource_kind::ResourceKind;
pub use spec::{BuildResult, BuildSpec, FastLaunch, Provisioner, Target};
pub use version::{SemanticVersion, VersionError};
