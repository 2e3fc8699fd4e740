//! CloudWatch Logs tailing for image build output

use crate::aws::context::AwsContext;
use crate::aws::error::{ErrorClass, classify_anyhow_error, sdk_error};
use anyhow::Result;
use aws_sdk_cloudwatchlogs::Client;
use aws_sdk_cloudwatchlogs::types::OrderBy;
use tracing::debug;

/// Streams considered when looking for the most recently written one
const STREAMS_CONSIDERED: i32 = 5;
/// Events fetched per tail request
const EVENTS_PER_PAGE: i32 = 50;

/// One build log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Milliseconds since the epoch
    pub timestamp_ms: i64,
    pub message: String,
}

/// Events read by one tail request plus the token to continue from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogPage {
    pub events: Vec<LogEvent>,
    pub next_token: Option<String>,
}

/// CloudWatch Logs client for reading image build output
pub struct BuildLogsClient {
    client: Client,
}

impl BuildLogsClient {
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.logs_client(),
        }
    }

    /// Read the newest events of the most recently written stream in
    /// `log_group`, continuing from `next_token` when one is given.
    ///
    /// Image Builder creates the group only once the build instance starts
    /// writing, so a missing group or stream yields an empty page.
    pub async fn tail(&self, log_group: &str, next_token: Option<String>) -> Result<LogPage> {
        let streams = match self
            .client
            .describe_log_streams()
            .log_group_name(log_group)
            .order_by(OrderBy::LastEventTime)
            .descending(true)
            .limit(STREAMS_CONSIDERED)
            .send()
            .await
            .map_err(sdk_error)
        {
            Ok(response) => response,
            Err(e) if classify_anyhow_error(&e) == ErrorClass::NotFound => {
                debug!(log_group, "Log group not found yet");
                return Ok(LogPage {
                    events: Vec::new(),
                    next_token,
                });
            }
            Err(e) => return Err(e.context(format!("Failed to describe log streams in {log_group}"))),
        };

        let Some(stream) = streams
            .log_streams()
            .first()
            .and_then(|s| s.log_stream_name())
        else {
            return Ok(LogPage {
                events: Vec::new(),
                next_token,
            });
        };

        let response = match self
            .client
            .get_log_events()
            .log_group_name(log_group)
            .log_stream_name(stream)
            .start_from_head(false)
            .limit(EVENTS_PER_PAGE)
            .set_next_token(next_token.clone())
            .send()
            .await
            .map_err(sdk_error)
        {
            Ok(response) => response,
            Err(e) if classify_anyhow_error(&e) == ErrorClass::NotFound => {
                debug!(log_group, stream, "Log stream not found yet");
                return Ok(LogPage {
                    events: Vec::new(),
                    next_token,
                });
            }
            Err(e) => return Err(e.context(format!("Failed to read log stream {stream}"))),
        };

        let events = response
            .events()
            .iter()
            .filter_map(|event| {
                Some(LogEvent {
                    timestamp_ms: event.timestamp()?,
                    message: event.message()?.to_string(),
                })
            })
            .collect();

        Ok(LogPage {
            events,
            next_token: response.next_forward_token().map(str::to_string),
        })
    }
}
