use crate::droid::{DispatchError, Remediator};
use crate::types::WorkUnit;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before the first retry; doubled on every further attempt
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

// Caps the backoff exponent so the delay cannot overflow
const MAX_BACKOFF_SHIFT: u32 = 10;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub retries: u32,
    pub backoff_base: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1 << attempt.min(MAX_BACKOFF_SHIFT))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Remediated,
    Failed,
}

/// Result of dispatching one work unit
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub unit: WorkUnit,
    pub status: DispatchStatus,
    /// Requests sent to the remote service
    pub attempts: u32,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Dispatch one work unit to the remediation service.
///
/// Never fails: errors are recorded on the returned record. An in-flight
/// attempt always runs to completion or timeout, but after `shutdown` is
/// cancelled no further retries are started.
pub async fn worker(
    unit: WorkUnit,
    remediator: &dyn Remediator,
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
) -> DispatchRecord {
    let start = Instant::now();
    info!("[Unit {}] {}", unit.id, unit.description());

    let mut attempts = 0;
    let result = loop {
        attempts += 1;
        let result = match tokio::time::timeout(policy.timeout, remediator.remediate(&unit)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(policy.timeout.as_secs())),
        };

        let err = match result {
            Ok(remediation) => break Ok(remediation),
            Err(e) => e,
        };

        if attempts > policy.retries {
            break Err(err);
        }
        if shutdown.is_cancelled() {
            warn!("[Unit {}] Not retrying after shutdown: {}", unit.id, err);
            break Err(err);
        }

        let delay = policy.backoff(attempts - 1);
        warn!(
            "[Unit {}] Attempt {}/{} failed: {}, retrying in {:.1}s",
            unit.id,
            attempts,
            policy.retries + 1,
            err,
            delay.as_secs_f64()
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                warn!("[Unit {}] Shutdown during backoff, giving up", unit.id);
                break Err(err);
            }
        }
    };

    let elapsed_secs = start.elapsed().as_secs_f64();
    match result {
        Ok(remediation) => {
            debug!(
                "[Unit {}] Session {:?}: {:?}",
                unit.id, remediation.session_id, remediation.summary
            );
            DispatchRecord {
                unit,
                status: DispatchStatus::Remediated,
                attempts,
                elapsed_secs,
                error: None,
                session_id: remediation.session_id,
                summary: remediation.summary,
            }
        }
        Err(e) => DispatchRecord {
            unit,
            status: DispatchStatus::Failed,
            attempts,
            elapsed_secs,
            error: Some(e.to_string()),
            session_id: None,
            summary: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::droid::Remediation;
    use crate::types::tests::violation;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Remediator for Flaky {
        async fn remediate(&self, _unit: &WorkUnit) -> Result<Remediation, DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(DispatchError::Remote(format!("failure {}", call)))
            } else {
                Ok(Remediation {
                    session_id: Some(format!("session-{}", call)),
                    summary: None,
                })
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl Remediator for Hangs {
        async fn remediate(&self, _unit: &WorkUnit) -> Result<Remediation, DispatchError> {
            std::future::pending().await
        }
    }

    fn flaky(failures: u32) -> Flaky {
        Flaky {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    fn unit() -> WorkUnit {
        WorkUnit {
            id: 0,
            file: "a.py".into(),
            scope: None,
            violations: vec![violation("a.py", "T201", 1)],
        }
    }

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff_base: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            retries: 5,
            backoff_base: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(16));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(1024));
    }

    #[tokio::test]
    async fn test_success_single_attempt() {
        let remediator = flaky(0);
        let record = worker(unit(), &remediator, &policy(3), &CancellationToken::new()).await;
        assert_eq!(record.status, DispatchStatus::Remediated);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.session_id.as_deref(), Some("session-0"));
    }

    #[tokio::test]
    async fn test_no_retries_by_default() {
        let remediator = flaky(1);
        let record = worker(unit(), &remediator, &policy(0), &CancellationToken::new()).await;
        assert_eq!(record.status, DispatchStatus::Failed);
        assert_eq!(record.attempts, 1);
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            record.error.as_deref(),
            Some("Droid reported an error: failure 0")
        );
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let remediator = flaky(2);
        let record = worker(unit(), &remediator, &policy(3), &CancellationToken::new()).await;
        assert_eq!(record.status, DispatchStatus::Remediated);
        assert_eq!(record.attempts, 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let remediator = flaky(10);
        let record = worker(unit(), &remediator, &policy(2), &CancellationToken::new()).await;
        assert_eq!(record.status, DispatchStatus::Failed);
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_after_shutdown() {
        let remediator = flaky(10);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let record = worker(unit(), &remediator, &policy(5), &shutdown).await;
        assert_eq!(record.status, DispatchStatus::Failed);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_failure() {
        let policy = RetryPolicy {
            retries: 0,
            backoff_base: Duration::from_millis(1),
            timeout: Duration::from_secs(30),
        };
        let record = worker(unit(), &Hangs, &policy, &CancellationToken::new()).await;
        assert_eq!(record.status, DispatchStatus::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("Droid timed out after 30 seconds")
        );
    }
}
