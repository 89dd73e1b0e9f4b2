use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use crate::config::EndpointConfig;
use crate::core::{Result, UploadError};

/// Delay between attempts
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// Delay after the `attempt`-th failure, counting from zero
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(attempt as f64);
                let delay = Duration::from_secs_f64(delay.min(max_delay.as_secs_f64()));
                std::cmp::min(delay, *max_delay)
            }
        }
    }
}

pub struct RetryConfig {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub should_retry: Box<dyn Fn(&UploadError) -> bool + Send + Sync>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential {
                initial: Duration::from_secs(1),
                multiplier: 2.0,
                max_delay: Duration::from_secs(30),
            },
            should_retry: Box::new(UploadError::is_transient),
        }
    }
}

impl RetryConfig {
    pub fn from_endpoint(config: &EndpointConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            strategy: RetryStrategy::Exponential {
                initial: Duration::from_millis(config.retry_initial_delay_ms),
                multiplier: 2.0,
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
            },
            ..Default::default()
        }
    }

    pub fn should_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&UploadError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Box::new(f);
        self
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts
pub async fn retry_with_config<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                attempt += 1;
                if attempt >= max_attempts || !(config.should_retry)(&error) {
                    return Err(error);
                }

                let delay = config.strategy.get_delay(attempt - 1);
                debug!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %error, "retrying");
                sleep(delay).await;
            }
        }
    }
}
