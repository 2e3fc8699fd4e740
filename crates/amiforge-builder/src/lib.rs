//! amiforge-builder - EC2 Image Builder AMI orchestration
//!
//! This crate turns a build spec into Image Builder components, configurations,
//! a recipe and a pipeline, runs the pipeline and returns the produced AMI.
//! Resources are found again by deterministic name on later runs, and a failed
//! attempt removes whatever it created.
//!
//! ## Modules
//!
//! - [`aws`]: Image Builder and EC2 clients, error classification, tags
//! - [`executor`]: Bounded batch executor with fail-fast and collect-all policies
//! - [`resources`]: Idempotent get-or-create over named resources
//! - [`pipeline`]: Pipeline execution state machine and polling
//! - [`monitor`]: Opt-in build log tailing and build instance reporting
//! - [`orchestrator`]: The build sequence, rollback ledger and remediation
//! - [`operations`]: Share, copy, deregister and tag AMIs
//! - [`cleanup`]: Listing and deleting resources created by amiforge

pub mod aws;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod operations;
pub mod orchestrator;
pub mod pipeline;
pub mod resources;
pub mod validate;
pub mod wait;

pub use config::BuilderConfig;
pub use error::BuildError;
pub use executor::{BatchExecutor, BatchOutcome, ErrorPolicy};
pub use orchestrator::Orchestrator;
pub use monitor::BuildMonitor;
pub use pipeline::{JobState, PipelineRunner, PollConfig, PollObserver};
pub use resources::{ResourceHandle, ResourceManager};
