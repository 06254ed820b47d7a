use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::core::config::ReadinessConfig;
use crate::runtime::async_delay;
use crate::Result;

/// Lifecycle of the gate in front of one map surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Surface or style not yet signalled; operations queue
    NotReady,
    /// Retrying initialization or draining the queue; operations queue
    Initializing,
    /// Operations apply immediately
    Ready,
    /// Initialization retries exhausted; operations queue up to the cap
    Unavailable,
}

impl ReadinessState {
    pub fn accepts_operations(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotReady => "not ready",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `attempt` until it succeeds or the attempts are used up.
    /// Returns the number of attempts taken, or the last error.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> Result<u32>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut number = 1;
        loop {
            match attempt(number).await {
                Ok(()) => return Ok(number),
                Err(e) if number >= self.max_attempts => return Err(e),
                Err(e) => {
                    log::debug!(
                        "attempt {}/{} failed: {}, retrying in {:?}",
                        number,
                        self.max_attempts,
                        e,
                        self.delay
                    );
                    async_delay(self.delay).await;
                    number += 1;
                }
            }
        }
    }
}

impl From<&ReadinessConfig> for RetryPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self::new(config.max_attempts, config.retry_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MarkerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        let started = tokio::time::Instant::now();

        let attempts = policy
            .run(move |_| async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(MarkerError::Surface("not yet".into()))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(500));

        let result = policy
            .run(|n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(MarkerError::Surface(format!("attempt {}", n))) }
            })
            .await;

        assert!(matches!(result, Err(MarkerError::Surface(msg)) if msg == "attempt 5"));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&ReadinessConfig::default());
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_millis(500));
        assert!(!ReadinessState::Initializing.accepts_operations());
    }
}
