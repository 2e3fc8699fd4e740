//! amiforge: build and manage AMIs with EC2 Image Builder
//!
//! Builds an AMI from a JSON build spec, and shares, copies, deregisters and
//! cleans up the images and Image Builder resources it manages.

use amiforge_builder::aws::{AwsContext, Ec2ImageClient, ImageBuilderClient};
use amiforge_builder::cleanup::{cleanup_managed, list_managed, render_json, render_table};
use amiforge_builder::config::{AmiDefaults, AwsConfig, BuildFlags, MonitorConfig};
use amiforge_builder::error::{BuildError, find_build_error};
use amiforge_builder::operations::ImageOperations;
use amiforge_builder::resources::ResourceManager;
use amiforge_builder::validate::{report_existing, validate_spec};
use amiforge_builder::{BatchExecutor, BuilderConfig, Orchestrator};
use amiforge_common::BuildSpec;
use amiforge_common::defaults::{
    DEFAULT_BATCH_CONCURRENCY, DEFAULT_BUILD_TIMEOUT_SECS, DEFAULT_COMPONENT_VERSIONS_KEPT,
    DEFAULT_INSTANCE_TYPE, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REGION,
};
use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "amiforge")]
#[command(about = "Build AMIs with EC2 Image Builder")]
#[command(version)]
struct Args {
    #[command(flatten)]
    aws: AwsArgs,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct AwsArgs {
    /// AWS region
    #[arg(long, global = true, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// AWS profile to use
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,
}

impl From<&AwsArgs> for AwsConfig {
    fn from(args: &AwsArgs) -> Self {
        Self {
            region: args.region.clone(),
            profile: args.profile.clone(),
        }
    }
}

/// Fallbacks for values a spec target leaves unset
#[derive(clap::Args, Debug)]
struct SpecDefaultArgs {
    /// Instance profile used when the target sets none
    #[arg(long, env = "AMIFORGE_INSTANCE_PROFILE")]
    instance_profile: Option<String>,

    /// Parent image used when the spec has no base image
    #[arg(long, env = "AMIFORGE_PARENT_IMAGE")]
    parent_image: Option<String>,

    /// Instance type used when the target sets none
    #[arg(long, default_value = DEFAULT_INSTANCE_TYPE)]
    instance_type: String,

    /// Prefix for every resource name
    #[arg(long)]
    prefix: Option<String>,
}

/// Arguments for the build command (extracted to reduce enum size)
#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Path to the JSON build spec
    spec: PathBuf,

    #[command(flatten)]
    defaults: SpecDefaultArgs,

    /// Delete and recreate existing resources for this build name
    #[arg(long)]
    force: bool,

    /// Seconds between pipeline status polls
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval: u64,

    /// Image build deadline in seconds
    #[arg(long, default_value_t = DEFAULT_BUILD_TIMEOUT_SECS)]
    timeout: u64,

    /// Concurrent remote calls per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_CONCURRENCY)]
    concurrency: usize,

    /// Component versions kept when --force prunes old ones
    #[arg(long, default_value_t = DEFAULT_COMPONENT_VERSIONS_KEPT)]
    keep_versions: usize,

    /// Print the build's CloudWatch log output while it runs
    #[arg(long)]
    stream_logs: bool,

    /// Report the build instance's state while it runs
    #[arg(long)]
    show_instance_status: bool,
}

impl SpecDefaultArgs {
    fn into_config(self, aws: AwsConfig) -> BuilderConfig {
        BuilderConfig {
            aws,
            defaults: AmiDefaults {
                instance_type: self.instance_type,
                instance_profile: self.instance_profile,
                parent_image: self.parent_image,
                ..Default::default()
            },
            flags: BuildFlags {
                name_prefix: self.prefix,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

impl BuildArgs {
    fn into_config(self, aws: AwsConfig) -> BuilderConfig {
        let mut config = self.defaults.into_config(aws);
        config.monitor = MonitorConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
            timeout: Duration::from_secs(self.timeout),
            stream_logs: self.stream_logs,
            show_instance_status: self.show_instance_status,
        };
        config.flags.force_recreate = self.force;
        config.flags.concurrency = self.concurrency;
        config.flags.keep_component_versions = self.keep_versions;
        config
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an AMI from a build spec
    Build(Box<BuildArgs>),

    /// Validate a build spec without creating anything
    Validate {
        /// Path to the JSON build spec
        spec: PathBuf,

        #[command(flatten)]
        defaults: SpecDefaultArgs,

        /// Skip looking up which of the build's resources already exist
        #[arg(long)]
        offline: bool,
    },

    /// Grant other accounts launch permission on an AMI
    Share {
        /// AMI ID
        image_id: String,

        /// Comma-separated AWS account IDs
        #[arg(long, value_delimiter = ',', required = true)]
        accounts: Vec<String>,
    },

    /// Copy an AMI to another region
    Copy {
        /// AMI ID
        image_id: String,

        /// Region the AMI is in (defaults to --region)
        #[arg(long)]
        source_region: Option<String>,

        /// Region to copy to
        #[arg(long)]
        dest_region: String,
    },

    /// Deregister an AMI and delete its snapshots
    Deregister {
        /// AMI ID
        image_id: String,
    },

    /// List Image Builder resources created by amiforge
    List {
        /// Only show resources of this build name
        #[arg(long)]
        name: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Delete Image Builder resources created by amiforge
    Cleanup {
        /// Only clean up resources of this build name
        #[arg(long)]
        name: Option<String>,

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

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if let Some(BuildError::JobFailed {
        hints,
        image_arn,
        details,
        ..
    }) = find_build_error(e)
    {
        let _ = writeln!(stderr, "\n  Image build: {image_arn}");
        if let Some(step) = &details.failed_step {
            let _ = writeln!(stderr, "  Failed step: {step}");
        }
        if let Some(message) = &details.error_message {
            let _ = writeln!(stderr, "  Step error:  {message}");
        }
        if let Some(url) = &details.logs_url {
            let _ = writeln!(stderr, "  Build logs:  {url}");
        }
        for hint in hints {
            let _ = writeln!(stderr, "  \x1b[36mHint:\x1b[0m {hint}");
        }
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    // Reduce noise from the AWS SDK
    for target in [
        "aws_config",
        "aws_sdk_cloudwatchlogs",
        "aws_sdk_ec2",
        "aws_sdk_imagebuilder",
        "aws_smithy_runtime",
    ] {
        filter = filter.add_directive(format!("{target}=warn").parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;
    let aws_config = AwsConfig::from(&args.aws);

    match args.command {
        Command::Build(build_args) => handle_build(*build_args, aws_config).await?,
        Command::Validate {
            spec,
            defaults,
            offline,
        } => handle_validate(spec, defaults.into_config(aws_config), offline).await?,
        Command::Share { image_id, accounts } => {
            let ops = image_operations(&aws_config).await;
            ops.share(&image_id, &accounts).await?;
            println!("Shared {image_id} with {} account(s)", accounts.len());
        }
        Command::Copy {
            image_id,
            source_region,
            dest_region,
        } => {
            let source_region = source_region.unwrap_or_else(|| aws_config.region.clone());
            let ops = image_operations(&aws_config).await;
            let cancel = cancel_on_interrupt();
            let copied = ops
                .copy(&image_id, &source_region, &dest_region, &cancel)
                .await?;
            println!("{copied}");
        }
        Command::Deregister { image_id } => {
            let ops = image_operations(&aws_config).await;
            let report = ops
                .deregister(&image_id, Some(&aws_config.region), &CancellationToken::new())
                .await?;
            println!(
                "Deregistered {image_id}, deleted {} snapshot(s)",
                report.deleted_snapshots.len()
            );
            for snapshot in &report.remaining_snapshots {
                println!("  Snapshot left behind: {snapshot}");
            }
        }
        Command::List { name, format } => handle_list(&aws_config, name, format).await?,
        Command::Cleanup { name, execute } => handle_cleanup(&aws_config, name, execute).await?,
    }

    Ok(())
}

/// A token cancelled on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            token.cancel();
        }
    });
    cancel
}

async fn aws_context(config: &AwsConfig, region: &str) -> AwsContext {
    if let Some(profile) = &config.profile {
        info!(profile = %profile, "Using AWS profile");
    }
    AwsContext::with_profile(region, config.profile.as_deref()).await
}

async fn image_operations(config: &AwsConfig) -> ImageOperations {
    let ctx = aws_context(config, &config.region).await;
    ImageOperations::new(ctx, BatchExecutor::default())
}

/// Handle the build command
async fn handle_build(args: BuildArgs, aws_config: AwsConfig) -> Result<()> {
    let spec = BuildSpec::load(&args.spec)?;
    // Clients live in the target's region so the AMI can be tagged there
    let region = spec
        .ami_target()
        .ok()
        .and_then(|t| t.region.clone())
        .unwrap_or_else(|| aws_config.region.clone());
    let config = args.into_config(aws_config);

    let ctx = aws_context(&config.aws, &region).await;
    let orchestrator = Orchestrator::new(
        Arc::new(ImageBuilderClient::from_context(&ctx)),
        Arc::new(Ec2ImageClient::from_context(&ctx)),
        config,
    );

    let cancel = cancel_on_interrupt();
    let result = orchestrator.build(&spec, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Handle the validate command
async fn handle_validate(spec_path: PathBuf, config: BuilderConfig, offline: bool) -> Result<()> {
    let spec = BuildSpec::load(&spec_path)?;
    let mut report = validate_spec(&spec, &config, config.region());

    if !offline && report.valid {
        let ctx = aws_context(&config.aws, config.region()).await;
        let resources = ResourceManager::new(
            Arc::new(ImageBuilderClient::from_context(&ctx)),
            BatchExecutor::new(config.concurrency()),
        )
        .with_force_recreate(config.force_recreate());
        let cancel = cancel_on_interrupt();
        report_existing(&mut report, &spec, &config, config.region(), &resources, &cancel).await;
    }

    for error in &report.errors {
        println!("\x1b[31merror:\x1b[0m {error}");
    }
    for warning in &report.warnings {
        println!("\x1b[33mwarning:\x1b[0m {warning}");
    }
    for line in &report.info {
        println!("  {line}");
    }

    if !report.valid {
        bail!("{} is not a valid build spec", spec_path.display());
    }
    println!("\n{} is valid", spec_path.display());
    Ok(())
}

/// Handle the list command
async fn handle_list(config: &AwsConfig, name: Option<String>, format: OutputFormat) -> Result<()> {
    let ctx = aws_context(config, &config.region).await;
    let client = ImageBuilderClient::from_context(&ctx);
    let resources = list_managed(&client, name.as_deref()).await?;

    if resources.is_empty() && format == OutputFormat::Table {
        println!("No amiforge resources found.");
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&render_json(&resources))?),
        OutputFormat::Table => {
            println!("{}", render_table(&resources));
            println!("\nTotal: {} resources", resources.len());
        }
    }
    Ok(())
}

/// Handle the cleanup command
async fn handle_cleanup(config: &AwsConfig, name: Option<String>, execute: bool) -> Result<()> {
    let mode = if execute { "EXECUTE" } else { "DRY-RUN" };
    info!(region = %config.region, name = ?name, mode, "Cleaning up amiforge resources");

    let ctx = aws_context(config, &config.region).await;
    let client = ImageBuilderClient::from_context(&ctx);
    let resources = list_managed(&client, name.as_deref()).await?;
    let cancel = cancel_on_interrupt();
    let report = cleanup_managed(
        &client,
        &BatchExecutor::default(),
        &resources,
        !execute,
        &cancel,
    )
    .await;

    println!("\n=== Cleanup Report ===");
    println!("Mode: {mode}");
    println!("Region: {}", config.region);
    println!();
    println!("Resources found: {}", resources.len());
    if execute {
        println!("Deleted:         {}", report.deleted);
        println!("Already deleted: {}", report.already_deleted);
        println!("Failed:          {}", report.failed);
    } else {
        println!("{}", render_table(&resources));
        println!("Skipped: {} (dry-run mode)", report.skipped);
        println!();
        println!("Run with --execute to actually delete resources.");
    }

    if report.failed > 0 {
        bail!("{} resource(s) could not be deleted", report.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn build_args_map_to_config() {
        let args = Args::try_parse_from([
            "amiforge",
            "--region",
            "eu-west-1",
            "build",
            "spec.json",
            "--force",
            "--prefix",
            "ci",
            "--poll-interval",
            "10",
            "--timeout",
            "600",
            "--instance-profile",
            "builder",
        ])
        .unwrap();
        let aws = AwsConfig::from(&args.aws);
        let Command::Build(build) = args.command else {
            panic!("expected build command");
        };
        let config = build.into_config(aws);

        assert_eq!(config.region(), "eu-west-1");
        assert!(config.force_recreate());
        assert_eq!(config.name_prefix(), Some("ci"));
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(10));
        assert_eq!(config.monitor.timeout, Duration::from_secs(600));
        assert_eq!(config.defaults.instance_profile.as_deref(), Some("builder"));
        assert_eq!(config.concurrency(), DEFAULT_BATCH_CONCURRENCY);
        assert_eq!(config.flags.keep_component_versions, DEFAULT_COMPONENT_VERSIONS_KEPT);
        assert!(!config.monitor.stream_logs);
    }

    #[test]
    fn monitor_flags_and_zero_interval_pass_through() {
        let args = Args::try_parse_from([
            "amiforge",
            "build",
            "spec.json",
            "--poll-interval",
            "0",
            "--stream-logs",
            "--show-instance-status",
            "--keep-versions",
            "2",
        ])
        .unwrap();
        let aws = AwsConfig::from(&args.aws);
        let Command::Build(build) = args.command else {
            panic!("expected build command");
        };
        let config = build.into_config(aws);

        // Clamped by the pipeline runner, not here
        assert_eq!(config.monitor.poll_interval, Duration::ZERO);
        assert!(config.monitor.stream_logs);
        assert!(config.monitor.show_instance_status);
        assert_eq!(config.flags.keep_component_versions, 2);
    }

    #[test]
    fn share_splits_accounts() {
        let args = Args::try_parse_from([
            "amiforge",
            "share",
            "ami-1",
            "--accounts",
            "111111111111,222222222222",
        ])
        .unwrap();
        let Command::Share { accounts, .. } = args.command else {
            panic!("expected share command");
        };
        assert_eq!(accounts, vec!["111111111111", "222222222222"]);
    }
}
