use std::future::Future;
use std::time::Duration;

use fastrace::Span;
use log::warn;
use sail_common::config;
use sail_telemetry::common::SpanAttribute;
use sail_telemetry::futures::{record_error, TracingFutureExt};

/// The policy for repeating an idempotent operation.
/// `max_count` is the number of retries after the first attempt.
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    Fixed {
        max_count: usize,
        delay: Duration,
    },
    ExponentialBackoff {
        max_count: usize,
        initial_delay: Duration,
        max_delay: Duration,
        factor: u32,
    },
}

struct ExponentialBackoffDelay {
    delay: Duration,
    max_delay: Duration,
    factor: u32,
}

impl Iterator for ExponentialBackoffDelay {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.delay;
        self.delay = std::cmp::min(delay * self.factor, self.max_delay);
        Some(delay)
    }
}

impl RetryStrategy {
    /// Runs the operation until it succeeds or the retries are exhausted,
    /// returning the error of the last attempt in the latter case.
    pub async fn run<F, Fut, T, E>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let mut delay = self.delay();
        let mut attempt = 0;
        loop {
            let span = Span::enter_with_local_parent("RetryStrategy::run")
                .with_property(|| (SpanAttribute::RETRY_ATTEMPT, attempt.to_string()));
            let result = f().in_span_with_recorder(span, record_error).await;
            match result {
                x @ Ok(_) => return x,
                Err(e) => {
                    if let Some(delay) = delay.next() {
                        warn!("attempt {} failed, retrying in {delay:?}: {e}", attempt + 1);
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!("attempt {} failed, giving up: {e}", attempt + 1);
                        return Err(e);
                    }
                }
            }
            attempt += 1;
        }
    }

    pub fn max_attempts(&self) -> usize {
        match self {
            Self::Fixed { max_count, .. } | Self::ExponentialBackoff { max_count, .. } => {
                max_count.saturating_add(1)
            }
        }
    }

    fn delay(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self {
            Self::ExponentialBackoff {
                max_count,
                initial_delay,
                max_delay,
                factor,
            } => Box::new(
                ExponentialBackoffDelay {
                    delay: *initial_delay,
                    max_delay: *max_delay,
                    factor: *factor,
                }
                .take(*max_count),
            ),
            Self::Fixed { max_count, delay } => Box::new(std::iter::repeat_n(*delay, *max_count)),
        }
    }
}

impl From<&config::RetryStrategy> for RetryStrategy {
    fn from(config: &config::RetryStrategy) -> Self {
        match config {
            config::RetryStrategy::Fixed(config::FixedRetryStrategy {
                max_count,
                delay_secs,
            }) => Self::Fixed {
                max_count: *max_count,
                delay: Duration::from_secs(*delay_secs),
            },
            config::RetryStrategy::ExponentialBackoff(
                config::ExponentialBackoffRetryStrategy {
                    max_count,
                    initial_delay_secs,
                    max_delay_secs,
                    factor,
                },
            ) => Self::ExponentialBackoff {
                max_count: *max_count,
                initial_delay: Duration::from_secs(*initial_delay_secs),
                max_delay: Duration::from_secs(*max_delay_secs),
                factor: *factor,
            },
        }
    }
}
