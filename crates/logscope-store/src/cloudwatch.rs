//! CloudWatch Logs client wrapper

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_sdk_cloudwatchlogs as cloudwatchlogs;
use cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use cloudwatchlogs::types::OrderBy;
use tracing::debug;

use crate::{
    EventPage, ListStreamsRequest, LogEvent, LogStore, LogStream, QueryEventsRequest,
    StoreError, StreamPage,
};

/// FilterLogEvents returns at most this many events per page
const MAX_EVENTS_PER_PAGE: usize = 10_000;

/// DescribeLogStreams returns at most this many streams per page
const MAX_STREAMS_PER_PAGE: i32 = 50;

/// Attempts per call when the service throttles us
const THROTTLE_ATTEMPTS: u32 = 4;

/// Backoff before the first retry, doubled on each attempt
const THROTTLE_BASE_DELAY: Duration = Duration::from_millis(200);

/// CloudWatch Logs backed [`LogStore`]
#[derive(Clone)]
pub struct CloudWatchStore {
    client: cloudwatchlogs::Client,
}

impl CloudWatchStore {
    /// Create a store from an already resolved SDK config.
    ///
    /// The SDK's own retries are disabled; throttling is retried by
    /// [`with_throttle_retry`] and every other error is returned at once.
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: cloudwatchlogs::Client::from_conf(client_config(config)),
        }
    }

    /// Create a store using the default credential chain
    pub async fn from_env(profile: Option<&str>, region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        Self::new(&loader.load().await)
    }
}

fn client_config(config: &aws_config::SdkConfig) -> cloudwatchlogs::Config {
    cloudwatchlogs::config::Builder::from(config)
        .retry_config(RetryConfig::disabled())
        .build()
}

#[async_trait]
impl LogStore for CloudWatchStore {
    async fn list_streams(&self, request: &ListStreamsRequest) -> Result<StreamPage, StoreError> {
        let mut builder = self
            .client
            .describe_log_streams()
            .log_group_name(&request.log_group)
            .limit(MAX_STREAMS_PER_PAGE)
            .set_next_token(request.next_token.clone());

        // The service rejects orderBy=LastEventTime combined with a name prefix
        builder = match &request.prefix {
            Some(prefix) => builder.log_stream_name_prefix(prefix),
            None if request.order_by_recency => {
                builder.order_by(OrderBy::LastEventTime).descending(true)
            }
            None => builder,
        };

        let output = with_throttle_retry("DescribeLogStreams", &request.log_group, || {
            builder.clone().send()
        })
        .await?;

        let streams = output
            .log_streams()
            .iter()
            .filter_map(|s| {
                let name = s.log_stream_name()?;
                Some(
                    LogStream::new(name, request.log_group.as_str())
                        .with_event_range(s.first_event_timestamp(), s.last_event_timestamp()),
                )
            })
            .collect::<Vec<_>>();

        debug!(
            log_group = %request.log_group,
            count = streams.len(),
            has_more = output.next_token().is_some(),
            "listed stream page"
        );

        Ok(StreamPage {
            streams,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn query_events(&self, request: &QueryEventsRequest) -> Result<EventPage, StoreError> {
        let limit = request.limit.clamp(1, MAX_EVENTS_PER_PAGE) as i32;
        let builder = self
            .client
            .filter_log_events()
            .log_group_name(&request.log_group)
            .log_stream_names(&request.stream_id)
            .start_time(request.start_time)
            .end_time(request.end_time)
            .set_filter_pattern(request.filter_pattern.clone())
            .limit(limit)
            .set_next_token(request.next_token.clone());

        let output = with_throttle_retry("FilterLogEvents", &request.log_group, || {
            builder.clone().send()
        })
        .await?;

        let events = output
            .events()
            .iter()
            .map(|e| {
                LogEvent::new(
                    e.timestamp().unwrap_or(0),
                    e.message().unwrap_or_default(),
                    e.log_stream_name().unwrap_or(request.stream_id.as_str()),
                )
            })
            .collect();

        Ok(EventPage {
            events,
            next_token: output.next_token().map(str::to_string),
        })
    }

    fn max_page_size(&self) -> usize {
        MAX_EVENTS_PER_PAGE
    }
}

/// Run `call`, retrying with exponential backoff while the service throttles
async fn with_throttle_retry<T, E, R, F, Fut>(
    operation: &'static str,
    log_group: &str,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SdkError<E, R>>>,
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let mut delay = THROTTLE_BASE_DELAY;
    for attempt in 1..=THROTTLE_ATTEMPTS {
        match call().await {
            Ok(output) => return Ok(output),
            Err(err) => match err.code() {
                Some("ThrottlingException") if attempt < THROTTLE_ATTEMPTS => {
                    debug!(operation, attempt, ?delay, "throttled, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Some("ThrottlingException") => {
                    return Err(StoreError::Throttled {
                        operation,
                        attempts: attempt,
                    });
                }
                Some("ResourceNotFoundException") => {
                    return Err(StoreError::GroupNotFound(log_group.to_string()));
                }
                _ => {
                    return Err(StoreError::api(
                        operation,
                        DisplayErrorContext(&err).to_string(),
                    ));
                }
            },
        }
    }
    Err(StoreError::Throttled {
        operation,
        attempts: THROTTLE_ATTEMPTS,
    })
}
