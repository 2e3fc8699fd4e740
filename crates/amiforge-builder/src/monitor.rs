//! Live view of a running image build
//!
//! While the build is launching or running components, each poll can tail
//! the build's CloudWatch log group and report the build instance. Both are
//! opt-in through [`MonitorConfig`]; failures here are logged at debug and
//! never affect the build.

use crate::aws::imagebuilder::{build_log_group, image_name_from_arn};
use crate::aws::{BuildInstance, ImageApi, ImageBuilderApi, ImageSnapshot};
use crate::config::MonitorConfig;
use crate::pipeline::{PipelineJob, PollObserver};
use std::sync::Arc;
use tracing::{debug, info};

/// Longest log line shown, in characters
const MAX_LOG_LINE: usize = 500;

/// Build stages during which an instance exists and writes logs
fn is_observable(status: &str) -> bool {
    matches!(status, "CREATING" | "BUILDING")
}

fn shorten(message: &str) -> String {
    let message = message.trim();
    match message.char_indices().nth(MAX_LOG_LINE) {
        Some((end, _)) => format!("{}...", &message[..end]),
        None => message.to_string(),
    }
}

pub struct BuildMonitor<C, E> {
    client: Arc<C>,
    images: Arc<E>,
    stream_logs: bool,
    show_instance_status: bool,
    log_token: Option<String>,
    instance: Option<BuildInstance>,
    lines_streamed: usize,
}

impl<C: ImageBuilderApi, E: ImageApi> BuildMonitor<C, E> {
    pub fn new(client: Arc<C>, images: Arc<E>, config: &MonitorConfig) -> Self {
        Self {
            client,
            images,
            stream_logs: config.stream_logs,
            show_instance_status: config.show_instance_status,
            log_token: None,
            instance: None,
            lines_streamed: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.stream_logs || self.show_instance_status
    }

    /// Last build instance seen
    pub fn instance(&self) -> Option<&BuildInstance> {
        self.instance.as_ref()
    }

    pub fn lines_streamed(&self) -> usize {
        self.lines_streamed
    }

    async fn report_instance(&mut self, image_name: &str) {
        let found = match self.images.find_build_instance(image_name).await {
            Ok(found) => found,
            Err(e) => {
                debug!(error = ?e, "Could not look up build instance");
                return;
            }
        };
        let Some(found) = found else {
            debug!(image_name, "No build instance yet");
            return;
        };

        let changed = self.instance.as_ref().is_none_or(|seen| {
            seen.instance_id != found.instance_id || seen.state != found.state
        });
        if changed {
            info!(
                instance_id = %found.instance_id,
                instance_type = %found.instance_type,
                state = %found.state,
                reason = ?found.state_reason,
                private_ip = ?found.private_ip,
                availability_zone = ?found.availability_zone,
                "Build instance status"
            );
        }
        self.instance = Some(found);
    }

    async fn tail_logs(&mut self, image_name: &str) {
        let log_group = build_log_group(image_name);
        let page = match self
            .client
            .tail_build_logs(&log_group, self.log_token.clone())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                debug!(error = ?e, log_group = %log_group, "Could not read build logs");
                return;
            }
        };

        for event in &page.events {
            info!(
                target: "amiforge::build_log",
                timestamp_ms = event.timestamp_ms,
                "{}",
                shorten(&event.message)
            );
        }
        self.lines_streamed += page.events.len();
        if page.next_token.is_some() {
            self.log_token = page.next_token;
        }
    }
}

impl<C: ImageBuilderApi, E: ImageApi> PollObserver for BuildMonitor<C, E> {
    async fn on_poll(&mut self, job: &PipelineJob, snapshot: &ImageSnapshot) {
        if !self.is_enabled() || !is_observable(&snapshot.status) {
            return;
        }
        let Some(image_name) = image_name_from_arn(&job.image_build_arn) else {
            return;
        };

        if self.show_instance_status {
            self.report_instance(image_name).await;
        }
        if self.stream_logs {
            self.tail_logs(image_name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::{LogEvent, LogPage, MockImageApi, MockImageBuilderApi};
    use crate::pipeline::JobState;
    use mockall::predicate::eq;

    const IMAGE_ARN: &str = "arn:aws:imagebuilder:us-east-1:123456789012:image/web-recipe/1.0.0/1";

    fn job() -> PipelineJob {
        PipelineJob {
            pipeline_arn: "arn:pipeline".into(),
            image_build_arn: IMAGE_ARN.into(),
            state: JobState::Running,
            last_status: None,
        }
    }

    fn snapshot(status: &str) -> ImageSnapshot {
        ImageSnapshot {
            status: status.into(),
            ..Default::default()
        }
    }

    fn running(state: &str) -> BuildInstance {
        BuildInstance {
            instance_id: "i-0abc".into(),
            instance_type: "t3.medium".into(),
            state: state.into(),
            state_reason: None,
            private_ip: Some("10.0.0.12".into()),
            availability_zone: Some("us-east-1a".into()),
        }
    }

    #[tokio::test]
    async fn disabled_monitor_makes_no_calls() {
        // Mocks without expectations panic if called
        let mut monitor = BuildMonitor::new(
            Arc::new(MockImageBuilderApi::new()),
            Arc::new(MockImageApi::new()),
            &MonitorConfig::default(),
        );
        monitor.on_poll(&job(), &snapshot("BUILDING")).await;
        assert!(!monitor.is_enabled());
    }

    #[tokio::test]
    async fn logs_follow_the_forward_token() {
        let mut client = MockImageBuilderApi::new();
        client
            .expect_tail_build_logs()
            .with(eq("/aws/imagebuilder/web-recipe"), eq(None::<String>))
            .times(1)
            .returning(|_, _| {
                Ok(LogPage {
                    events: vec![LogEvent {
                        timestamp_ms: 1,
                        message: "Running component web-0-shell\n".into(),
                    }],
                    next_token: Some("f/1".into()),
                })
            });
        client
            .expect_tail_build_logs()
            .with(eq("/aws/imagebuilder/web-recipe"), eq(Some("f/1".to_string())))
            .times(1)
            .returning(|_, token| {
                Ok(LogPage {
                    events: Vec::new(),
                    next_token: token,
                })
            });
        let config = MonitorConfig {
            stream_logs: true,
            ..MonitorConfig::default()
        };
        let mut monitor = BuildMonitor::new(Arc::new(client), Arc::new(MockImageApi::new()), &config);

        monitor.on_poll(&job(), &snapshot("BUILDING")).await;
        monitor.on_poll(&job(), &snapshot("BUILDING")).await;
        // Not tailed once the build has moved past the instance stages
        monitor.on_poll(&job(), &snapshot("DISTRIBUTING")).await;

        assert_eq!(monitor.lines_streamed(), 1);
    }

    #[tokio::test]
    async fn instance_tracked_across_polls() {
        let mut images = MockImageApi::new();
        let mut states = vec!["running", "pending"];
        images
            .expect_find_build_instance()
            .with(eq("web-recipe"))
            .times(2)
            .returning(move |_| Ok(states.pop().map(running)));
        let config = MonitorConfig {
            show_instance_status: true,
            ..MonitorConfig::default()
        };
        let mut monitor = BuildMonitor::new(Arc::new(MockImageBuilderApi::new()), Arc::new(images), &config);

        monitor.on_poll(&job(), &snapshot("CREATING")).await;
        assert_eq!(monitor.instance().map(|i| i.state.as_str()), Some("pending"));
        monitor.on_poll(&job(), &snapshot("BUILDING")).await;
        assert_eq!(monitor.instance().map(|i| i.state.as_str()), Some("running"));
    }

    #[tokio::test]
    async fn lookup_errors_are_swallowed() {
        let mut images = MockImageApi::new();
        images
            .expect_find_build_instance()
            .returning(|_| Err(anyhow::anyhow!("UnauthorizedOperation")));
        let mut client = MockImageBuilderApi::new();
        client
            .expect_tail_build_logs()
            .returning(|_, _| Err(anyhow::anyhow!("AccessDeniedException")));
        let config = MonitorConfig {
            stream_logs: true,
            show_instance_status: true,
            ..MonitorConfig::default()
        };
        let mut monitor = BuildMonitor::new(Arc::new(client), Arc::new(images), &config);

        monitor.on_poll(&job(), &snapshot("BUILDING")).await;
        assert!(monitor.instance().is_none());
        assert_eq!(monitor.lines_streamed(), 0);
    }

    #[test]
    fn long_lines_shortened() {
        assert_eq!(shorten("  done \n"), "done");
        let long = "x".repeat(600);
        let short = shorten(&long);
        assert_eq!(short.len(), MAX_LOG_LINE + 3);
        assert!(short.ends_with("..."));
    }
}
