//! Timeouts and bounded retries for model calls

use crate::config::RetryPolicy;
use crate::model::ModelTier;
use formsight_core::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Run `op` under the policy's per-attempt timeout, retrying transient failures
///
/// A timeout counts as a transient failure. Non-transient errors return
/// immediately.
pub async fn call_with_retry<T, F, Fut>(policy: &RetryPolicy, tier: ModelTier, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let start = Instant::now();

        let outcome = match tokio::time::timeout(policy.timeout(), op()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        metrics::histogram!("formsight_model_latency_us", "tier" => tier.as_str())
            .record(start.elapsed().as_micros() as f64);

        match outcome {
            Ok(value) => {
                metrics::counter!("formsight_model_calls_total", "tier" => tier.as_str(), "outcome" => "ok")
                    .increment(1);
                if attempt > 1 {
                    debug!(tier = tier.as_str(), attempt, "model call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                metrics::counter!("formsight_model_calls_total", "tier" => tier.as_str(), "outcome" => "retry")
                    .increment(1);
                let delay = with_jitter(policy.backoff(attempt));
                warn!(
                    tier = tier.as_str(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient model failure, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                metrics::counter!("formsight_model_calls_total", "tier" => tier.as_str(), "outcome" => e.kind())
                    .increment(1);
                warn!(tier = tier.as_str(), attempt, "model call failed: {}", e);
                return Err(e);
            }
        }
    }
}

/// Add up to 25% random jitter
fn with_jitter(base: Duration) -> Duration {
    let ms = base.as_millis() as u64;
    if ms == 0 {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=ms / 4);
    Duration::from_millis(ms + extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            timeout_ms: 100,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = call_with_retry(&fast_policy(), ModelTier::Primary, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Error::transient("rate limited"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_then_reported() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = call_with_retry(&fast_policy(), ModelTier::Specialist, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = call_with_retry(&fast_policy(), ModelTier::Primary, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::service("invalid api key"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Service(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(400);
        for _ in 0..20 {
            let jittered = with_jitter(base);
            assert!(jittered >= base && jittered <= Duration::from_millis(500));
        }
    }
}
