//! Pipeline execution state machine
//!
//! `NotStarted -> Running -> {Completed, Failed, Cancelled}`. Starting an
//! execution returns immediately; [`PipelineRunner::wait_for_completion`] polls
//! the image build on a fixed interval until it is terminal or the deadline
//! passes. Cancelling the token stops polling locally; the remote build keeps
//! running.
//!
//! A [`PollObserver`] sees every successful status read, which is where build
//! log tailing and instance reporting hook in.

use crate::aws::imagebuilder::{build_log_group, image_name_from_arn, log_group_console_url};
use crate::aws::{ErrorClass, ImageBuilderApi, ImageSnapshot};
use crate::error::{BuildError, FailureDetails};
use amiforge_common::defaults::{default_build_timeout, default_poll_interval, min_poll_interval};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Map an Image Builder image status to a job state.
    ///
    /// Returns `None` for statuses this tool does not know.
    pub fn from_status(status: &str) -> Option<JobState> {
        match status {
            "PENDING" | "CREATING" | "BUILDING" | "TESTING" | "DISTRIBUTING" | "INTEGRATING" => {
                Some(JobState::Running)
            }
            "AVAILABLE" => Some(JobState::Completed),
            "FAILED" | "DEPRECATED" | "DELETED" | "DISABLED" => Some(JobState::Failed),
            "CANCELLED" => Some(JobState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::NotStarted => "not started",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Human-readable description of an image build stage
pub fn describe_stage(status: &str) -> &'static str {
    match status {
        "PENDING" => "Waiting for build resources",
        "CREATING" => "Launching build instance",
        "BUILDING" => "Running build components",
        "TESTING" => "Running test components",
        "DISTRIBUTING" => "Copying AMI to target regions",
        "INTEGRATING" => "Integrating with downstream services",
        "AVAILABLE" => "Image available",
        "CANCELLED" => "Build cancelled",
        "FAILED" => "Build failed",
        _ => "Unknown stage",
    }
}

const STAGE_ESTIMATES: &[(&str, u64)] = &[
    ("PENDING", 2),
    ("CREATING", 5),
    ("BUILDING", 20),
    ("TESTING", 5),
    ("DISTRIBUTING", 10),
    ("INTEGRATING", 2),
];

/// Typical time left once a build has reached `status`: the rest of this
/// stage plus every later stage.
pub fn estimate_remaining(status: &str) -> Option<Duration> {
    let position = STAGE_ESTIMATES.iter().position(|(s, _)| *s == status)?;
    let minutes: u64 = STAGE_ESTIMATES[position..].iter().map(|(_, m)| m).sum();
    Some(Duration::from_secs(minutes * 60))
}

/// Remediation hints for a failed image build, derived from its reason text.
pub fn failure_hints(reason: &str) -> Vec<&'static str> {
    let reason = reason.to_lowercase();
    let mut hints = Vec::new();
    if reason.contains("timeout") || reason.contains("timed out") {
        hints.push("The build timed out; use a larger instance type or split long provisioning steps");
    }
    if reason.contains("script") || reason.contains("exit code") || reason.contains("command") {
        hints.push("A provisioning command failed; check the component logs in CloudWatch or S3");
    }
    if reason.contains("network") || reason.contains("connect") {
        hints.push("Check that the subnet has outbound internet access or the required VPC endpoints");
    }
    if reason.contains("permission") || reason.contains("access denied") || reason.contains("not authorized") {
        hints.push("Check the instance profile policies (EC2InstanceProfileForImageBuilder and SSM)");
    }
    if reason.contains("disk") || reason.contains("no space") {
        hints.push("Increase the root volume size of the target");
    }
    if reason.contains("ami") {
        hints.push("Check that the parent image exists in this region and is accessible");
    }
    if reason.contains("component") {
        hints.push("Validate the component documents and their platform");
    }
    hints
}

/// Polling cadence and deadline
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollConfig {
    /// Raise the interval to the one-second minimum so a zero interval
    /// cannot turn polling into a busy loop.
    pub fn clamped(self) -> Self {
        Self {
            interval: self.interval.max(min_poll_interval()),
            ..self
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            timeout: default_build_timeout(),
        }
    }
}

/// A started pipeline execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineJob {
    pub pipeline_arn: String,
    pub image_build_arn: String,
    pub state: JobState,
    /// Last raw status read from the provider
    pub last_status: Option<String>,
}

/// The image produced by a completed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedImage {
    pub image_build_arn: String,
    pub ami_id: String,
    pub region: String,
}

/// Receives every successful status read while a job is polled
#[allow(async_fn_in_trait)] // Internal use only, observers are never boxed
pub trait PollObserver {
    async fn on_poll(&mut self, job: &PipelineJob, snapshot: &ImageSnapshot);
}

impl PollObserver for () {
    async fn on_poll(&mut self, _job: &PipelineJob, _snapshot: &ImageSnapshot) {}
}

pub struct PipelineRunner<C> {
    client: Arc<C>,
    config: PollConfig,
}

impl<C: ImageBuilderApi> PipelineRunner<C> {
    /// The poll interval is clamped to [`PollConfig::clamped`]'s minimum.
    pub fn new(client: Arc<C>, config: PollConfig) -> Self {
        Self {
            client,
            config: config.clamped(),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Start a pipeline execution without waiting for it.
    pub async fn start(&self, pipeline_arn: &str) -> Result<PipelineJob> {
        let image_build_arn = self
            .client
            .start_pipeline_execution(pipeline_arn)
            .await
            .with_context(|| format!("Failed to start pipeline {pipeline_arn}"))?;
        info!(image = %image_build_arn, "Pipeline execution started");
        Ok(PipelineJob {
            pipeline_arn: pipeline_arn.to_string(),
            image_build_arn,
            state: JobState::Running,
            last_status: None,
        })
    }

    /// Poll until the job is terminal, the deadline passes or `cancel` fires.
    ///
    /// Transient read errors are logged and the poll retried on the next tick.
    pub async fn wait_for_completion(
        &self,
        job: &mut PipelineJob,
        cancel: &CancellationToken,
    ) -> Result<CompletedImage> {
        self.wait_observed(job, cancel, &mut ()).await
    }

    /// [`wait_for_completion`](Self::wait_for_completion), handing every
    /// status read to `observer` before it is applied.
    #[instrument(skip_all, fields(image = %job.image_build_arn))]
    pub async fn wait_observed<O: PollObserver>(
        &self,
        job: &mut PipelineJob,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> Result<CompletedImage> {
        let start = Instant::now();
        let mut last_error: Option<anyhow::Error> = None;

        loop {
            if cancel.is_cancelled() {
                info!(status = ?job.last_status, "Stopped waiting for image build");
                return Err(BuildError::Cancelled.into());
            }

            let elapsed = start.elapsed();
            if elapsed >= self.config.timeout {
                let deadline = anyhow::Error::new(BuildError::DeadlineExceeded(self.config.timeout));
                return Err(match last_error {
                    Some(e) => deadline.context(format!("last poll failed: {e:#}")),
                    None => deadline,
                });
            }

            let delay = self.config.interval.min(self.config.timeout - elapsed);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    info!(status = ?job.last_status, "Stopped waiting for image build");
                    return Err(BuildError::Cancelled.into());
                }
            }

            let snapshot = match self.client.get_image(&job.image_build_arn).await {
                Ok(snapshot) => {
                    last_error = None;
                    snapshot
                }
                Err(e) if self.client.classify(&e) == ErrorClass::Transient => {
                    warn!(error = ?e, "Transient error reading image status, will retry");
                    last_error = Some(e);
                    continue;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "Failed to read status of {}",
                        job.image_build_arn
                    )));
                }
            };

            observer.on_poll(job, &snapshot).await;
            if let Some(done) = self.observe(job, snapshot, start.elapsed()).await? {
                return Ok(done);
            }
        }
    }

    /// Start and wait in one call
    pub async fn execute(&self, pipeline_arn: &str, cancel: &CancellationToken) -> Result<CompletedImage> {
        self.execute_observed(pipeline_arn, cancel, &mut ()).await
    }

    /// Start and wait in one call, with an observer on every poll
    pub async fn execute_observed<O: PollObserver>(
        &self,
        pipeline_arn: &str,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> Result<CompletedImage> {
        let mut job = self.start(pipeline_arn).await?;
        self.wait_observed(&mut job, cancel, observer).await
    }

    /// Where a failed build went wrong: the failed workflow step, its message
    /// and a link to the build's log group.
    ///
    /// Best effort: a failed lookup leaves the step fields empty.
    pub async fn failure_details(&self, image_build_arn: &str) -> FailureDetails {
        let logs_url = image_name_from_arn(image_build_arn)
            .map(|name| log_group_console_url(&self.client.region(), &build_log_group(name)));

        let steps = match self.client.list_workflow_steps(image_build_arn).await {
            Ok(steps) => steps,
            Err(e) => {
                debug!(error = ?e, "Could not read workflow executions");
                Vec::new()
            }
        };
        // Steps follow their workflow, so the last failed entry is the most specific
        let failed = steps.into_iter().rev().find(|step| step.is_failed());

        FailureDetails {
            failed_step: failed.as_ref().map(|step| step.name.clone()),
            error_message: failed.and_then(|step| step.message),
            logs_url,
        }
    }

    /// Apply one status read to the job. Returns the image once completed.
    async fn observe(
        &self,
        job: &mut PipelineJob,
        snapshot: ImageSnapshot,
        elapsed: Duration,
    ) -> Result<Option<CompletedImage>> {
        let state = JobState::from_status(&snapshot.status).ok_or_else(|| {
            BuildError::FatalProtocol(format!(
                "unknown image status '{}' for {}",
                snapshot.status, job.image_build_arn
            ))
        })?;

        if job.last_status.as_deref() != Some(snapshot.status.as_str()) {
            info!(
                status = %snapshot.status,
                stage = describe_stage(&snapshot.status),
                elapsed_secs = elapsed.as_secs(),
                remaining_estimate_mins = estimate_remaining(&snapshot.status).map(|d| d.as_secs() / 60),
                "Image build stage changed"
            );
        } else {
            debug!(status = %snapshot.status, "Image build still in progress");
        }
        job.state = state;
        job.last_status = Some(snapshot.status.clone());

        match state {
            JobState::NotStarted | JobState::Running => Ok(None),
            JobState::Completed => {
                let ami = snapshot.output_amis.into_iter().next().ok_or_else(|| {
                    BuildError::FatalProtocol(format!(
                        "image build {} completed without an output AMI",
                        job.image_build_arn
                    ))
                })?;
                info!(ami = %ami.image_id, region = %ami.region, "Image build completed");
                Ok(Some(CompletedImage {
                    image_build_arn: job.image_build_arn.clone(),
                    ami_id: ami.image_id,
                    region: ami.region,
                }))
            }
            JobState::Failed | JobState::Cancelled => {
                let reason = snapshot.reason.unwrap_or_else(|| "no reason given".to_string());
                let details = self.failure_details(&job.image_build_arn).await;
                warn!(
                    status = %snapshot.status,
                    reason = %reason,
                    failed_step = ?details.failed_step,
                    "Image build did not complete"
                );
                let hints = match &details.error_message {
                    Some(message) => failure_hints(&format!("{reason} {message}")),
                    None => failure_hints(&reason),
                };
                Err(BuildError::JobFailed {
                    status: snapshot.status,
                    hints,
                    reason,
                    image_arn: job.image_build_arn.clone(),
                    details,
                }
                .into())
            }
        }
    }
}
