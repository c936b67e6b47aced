//! Load retry policy: bounded attempts with a fixed delay, or a single
//! attempt after a fixed pre-read delay.

use std::future::Future;

use crate::cancel::CancelSignal;
use crate::config::LoadStrategy;
use crate::error::{BuilderError, LoadAttemptError};
use crate::output::OutputSink;
use crate::Result;

/// Run `attempt` under `strategy`.
///
/// Attempt failures are absorbed until the strategy's bound is reached, then
/// the last one is reported as [`BuilderError::LoadExhausted`]. A success on
/// a later attempt looks exactly like a first-try success to the caller.
/// Cancellation is honoured during attempts and during every sleep.
pub async fn load_with_strategy<T, F, Fut>(
    strategy: &LoadStrategy,
    cancel: &CancelSignal,
    sink: &dyn OutputSink,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, LoadAttemptError>>,
{
    let max_attempts = strategy.max_attempts();
    let delay = strategy.delay();

    if let LoadStrategy::PreDelay { .. } = strategy {
        cancel.sleep(delay).await?;
    }

    let mut current = 1;
    loop {
        cancel.check()?;

        match cancel.guard(attempt(current)).await? {
            Ok(value) => {
                if current > 1 {
                    sink.info("image archive loaded", &[("attempt", &current)]);
                }
                return Ok(value);
            }
            Err(err) if current < max_attempts => {
                sink.warn(
                    "image archive load failed, retrying",
                    &[
                        ("attempt", &current),
                        ("max_attempts", &max_attempts),
                        ("delay_ms", &delay.as_millis()),
                        ("error", &err),
                    ],
                );
                cancel.sleep(delay).await?;
                current += 1;
            }
            Err(err) => {
                return Err(BuilderError::LoadExhausted {
                    attempts: current,
                    last_error: err,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingSink;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn retry(attempts: u32) -> LoadStrategy {
        LoadStrategy::Retry {
            attempts,
            delay_ms: 10,
        }
    }

    fn transient() -> LoadAttemptError {
        LoadAttemptError::UnrecognisedResponse(String::new())
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let sink = RecordingSink::new();
        let value = load_with_strategy(&retry(2), &CancelSignal::new(), &sink, |_| async {
            Ok::<_, LoadAttemptError>("tag".to_string())
        })
        .await
        .unwrap();

        assert_eq!(value, "tag");
        assert!(sink.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let sink = RecordingSink::new();
        let counter = Arc::new(AtomicU32::new(0));

        let value = load_with_strategy(&retry(3), &CancelSignal::new(), &sink, {
            let counter = counter.clone();
            move |n| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    if n < 3 {
                        Err(transient())
                    } else {
                        Ok(n)
                    }
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
        assert_eq!(sink.warnings().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let err = load_with_strategy(&retry(2), &CancelSignal::new(), &RecordingSink::new(), {
            let counter = counter.clone();
            move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                async { Err::<(), _>(transient()) }
            }
        })
        .await
        .unwrap_err();

        assert_eq!(counter.load(Ordering::Relaxed), 2);
        match err {
            BuilderError::LoadExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected LoadExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let counter = AtomicU32::new(0);
        let result = load_with_strategy(&retry(0), &CancelSignal::new(), &RecordingSink::new(), |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            async { Err::<(), _>(transient()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_pre_delay_waits_then_tries_once() {
        let strategy = LoadStrategy::PreDelay { delay_ms: 50 };
        let counter = AtomicU32::new(0);
        let started = Instant::now();

        let err = load_with_strategy(&strategy, &CancelSignal::new(), &RecordingSink::new(), |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            async { Err::<(), _>(transient()) }
        })
        .await
        .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(matches!(err, BuilderError::LoadExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let strategy = LoadStrategy::Retry {
            attempts: 5,
            delay_ms: 60_000,
        };
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = load_with_strategy(&strategy, &cancel, &RecordingSink::new(), |_| async {
            Err::<(), _>(transient())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, BuilderError::Cancelled));
    }
}
