//! Bounded retry around a whole download

use modelstash_core::{DownloadContext, StashError, StashResult};
use std::future::Future;
use tracing::{debug, warn};

/// Default number of attempts per download
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What is being downloaded, for logs and the final error
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub model_name: String,
    pub context: DownloadContext,
}

impl DownloadTarget {
    pub fn new(model_name: impl Into<String>, context: DownloadContext) -> Self {
        Self {
            model_name: model_name.into(),
            context,
        }
    }
}

/// Runs an operation up to `max_attempts` times
#[derive(Debug, Clone, Copy)]
pub struct RetryingDownloadDriver {
    max_attempts: u32,
}

impl Default for RetryingDownloadDriver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryingDownloadDriver {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Call `op(attempt)` until it succeeds or attempts run out.
    ///
    /// Permanent errors (see [`StashError::is_transient`]) are returned as
    /// is, on the first occurrence.
    pub async fn run<T, F, Fut>(&self, target: &DownloadTarget, mut op: F) -> StashResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StashResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }

            let remaining = self.max_attempts - attempt;
            debug!(
                model_name = %target.model_name,
                attempt,
                error = %err,
                "Download attempt failed"
            );
            warn!(
                model_name = %target.model_name,
                attempt,
                remaining,
                "Attempt {attempt} failed. Remaining attempts: {remaining}"
            );

            if remaining == 0 {
                return Err(StashError::ExhaustedRetries {
                    model_name: target.model_name.clone(),
                    context: target.context.clone(),
                    source: Box::new(err),
                });
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn target() -> DownloadTarget {
        DownloadTarget::new("bge-small-en", DownloadContext::default())
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let driver = RetryingDownloadDriver::default();
        let value = driver
            .run(&target(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(StashError::Fetch("connection reset".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_llm_message() {
        let target = DownloadTarget::new(
            "orca",
            DownloadContext {
                model_size: Some("3".to_string()),
                model_format: Some("ggmlv3".to_string()),
            },
        );
        let calls = AtomicU32::new(0);
        let err = RetryingDownloadDriver::new(3)
            .run(&target, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(StashError::Fetch(format!("boom {attempt}"))) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            err.to_string(),
            "Failed to download model 'orca' (size: 3, format: ggmlv3) after multiple retries"
        );
        assert_eq!(err.source().unwrap().to_string(), "Fetch error: boom 3");
    }

    #[tokio::test]
    async fn test_exhausted_plain_message() {
        let err = RetryingDownloadDriver::new(2)
            .run(&target(), |_| async { Err::<(), _>(StashError::Fetch("x".into())) })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to download model 'bge-small-en' after multiple retries"
        );
    }

    #[tokio::test]
    async fn test_permanent_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let err = RetryingDownloadDriver::default()
            .run(&target(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StashError::InvalidUri("relative".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StashError::InvalidUri(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
