use std::{future::Future, time::Duration};

use tracing::debug;
use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

/// How long to wait for one attempt of a call, and how many attempts to make.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TypedBuilder)]
pub struct RetryPolicy {
    #[builder(default = 3)]
    pub attempts: u32,
    #[builder(default = Duration::from_secs(5))]
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// The longest the whole policy can take.
    pub fn deadline(&self) -> Duration {
        self.timeout * self.attempts.max(1)
    }
}

/// Runs `op` until it finishes within the per-attempt timeout, making at most
/// `policy.attempts` attempts.
///
/// Only timeouts are retried. An attempt that fails outright returns its
/// error immediately: a dead peer should fail the caller rather than stall
/// it. Exhausting every attempt yields [`Error::Timeout`].
pub async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => return result,
            Err(_) => {
                debug!(attempt, attempts, "{} timed out, retrying", what)
            }
        }
    }
    Err(Error::Timeout(format!(
        "{} after {} attempt(s) of {:?}",
        what, attempts, policy.timeout
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .attempts(attempts)
            .timeout(Duration::from_millis(20))
            .build()
    }

    #[tokio::test]
    async fn retries_until_an_attempt_beats_the_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retries(quick(3), "slow call", || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_with_a_timeout() {
        let result: Result<()> = with_retries(quick(2), "stuck call", || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(quick(3), "failing call", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Connection("gone".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_policy_is_three_by_five_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.deadline(), Duration::from_secs(15));
    }
}
