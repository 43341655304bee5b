//! Integration tests for the retry and hedge policies.
//!
//! The policies are generic; these tests drive them with plain counting attempts and a
//! small error type, with Tokio's clock paused so timings are exact.

use gateway_core::resilience::{
    attempt_fn, Delay, Executor, HedgeConfig, HedgePolicy, PolicyError, RetryConfig, RetryPolicy,
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
enum TestError {
    Flaky,
    Fatal,
    Cancelled,
    Exceeded(u32),
}

impl PolicyError<u32> for TestError {
    fn cancelled() -> Self {
        Self::Cancelled
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn exceeded(attempts: u32, _last: Result<u32, Self>) -> Self {
        Self::Exceeded(attempts)
    }
}

fn retry(max_attempts: u32) -> RetryPolicy<u32, TestError> {
    RetryPolicy::new(RetryConfig { max_attempts, ..RetryConfig::default() })
        .handle_if(|outcome: &Result<u32, TestError>| matches!(outcome, Err(TestError::Flaky)))
}

#[tokio::test(start_paused = true)]
async fn test_retry_makes_exactly_k_attempts() {
    for k in 1..=5 {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let attempt = attempt_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(TestError::Flaky) }
        });

        let executor = Executor::<u32, TestError>::new().with(Arc::new(retry(k)));
        let outcome = executor.execute(CancellationToken::new(), attempt).await;

        assert_eq!(outcome, Err(TestError::Exceeded(k)));
        assert_eq!(calls.load(Ordering::SeqCst), k, "max_attempts = {k}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_on_success_and_unhandled_errors() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let attempt = attempt_fn(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { if ctx.attempt < 2 { Err(TestError::Flaky) } else { Ok(ctx.attempt) } }
    });
    let outcome = Executor::<u32, TestError>::new().with(Arc::new(retry(5))).execute(CancellationToken::new(), attempt).await;
    assert_eq!(outcome, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let fatal_calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&fatal_calls);
    let attempt = attempt_fn(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(TestError::Fatal) }
    });
    let outcome = Executor::<u32, TestError>::new().with(Arc::new(retry(5))).execute(CancellationToken::new(), attempt).await;
    assert_eq!(outcome, Err(TestError::Fatal));
    assert_eq!(fatal_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_fixed_delay_between_attempts() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&starts);
    let attempt = attempt_fn(move |_| {
        recorder.lock().push(Instant::now());
        async { Err::<u32, _>(TestError::Flaky) }
    });
    let policy = RetryPolicy::new(RetryConfig { max_attempts: 3, delay: Delay::Fixed { ms: 100 }, ..RetryConfig::default() });

    let _ = Executor::<u32, TestError>::new().with(Arc::new(policy)).execute(CancellationToken::new(), attempt).await;

    let starts = starts.lock();
    assert_eq!(starts.len(), 3);
    assert_eq!(starts[1] - starts[0], Duration::from_millis(100));
    assert_eq!(starts[2] - starts[1], Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_retry_sleep() {
    let cancel = CancellationToken::new();
    let attempt = attempt_fn(|_| async { Err::<u32, _>(TestError::Flaky) });
    let policy = RetryPolicy::new(RetryConfig { max_attempts: 10, delay: Delay::Fixed { ms: 10_000 }, ..RetryConfig::default() });
    let executor = Executor::<u32, TestError>::new().with(Arc::new(policy));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    assert_eq!(executor.execute(cancel, attempt).await, Err(TestError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_two_hedges_launch_together_after_delay() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&starts);
    let attempt = attempt_fn(move |ctx| {
        recorder.lock().push((ctx.hedge, Instant::now()));
        async move {
            // the primary is slow, hedges answer after 20ms
            let latency = if ctx.hedge == 0 { 1_000 } else { 20 + u64::from(ctx.hedge) };
            tokio::select! {
                () = ctx.cancel.cancelled() => Err(TestError::Cancelled),
                () = tokio::time::sleep(Duration::from_millis(latency)) => Ok(ctx.hedge),
            }
        }
    });

    let origin = Instant::now();
    let policy: HedgePolicy<u32, TestError> = HedgePolicy::new(Duration::from_millis(50), 2);
    let outcome = Executor::<u32, TestError>::new().with(Arc::new(policy)).execute(CancellationToken::new(), attempt).await;

    assert_eq!(outcome, Ok(1), "the fastest hedge wins");
    assert!(origin.elapsed() < Duration::from_millis(1_000), "the slow primary is not awaited");

    let starts = starts.lock().clone();
    assert_eq!(starts.len(), 3, "primary plus two hedges");
    let at = |hedge: u32| starts.iter().find(|(h, _)| *h == hedge).map(|(_, t)| *t - origin).unwrap();
    assert_eq!(at(0), Duration::ZERO);
    assert_eq!(at(1), Duration::from_millis(50));
    assert_eq!(at(2), Duration::from_millis(50), "hedges launch simultaneously");
}

#[tokio::test(start_paused = true)]
async fn test_fast_primary_launches_no_hedges() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let attempt = attempt_fn(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, TestError>(ctx.hedge)
        }
    });

    let hedged = Arc::new(AtomicU32::new(0));
    let listener = Arc::clone(&hedged);
    let policy = HedgePolicy::new(Duration::from_millis(50), 2).on_hedge(move |n| {
        listener.fetch_add(n, Ordering::SeqCst);
    });
    let outcome = Executor::<u32, TestError>::new().with(Arc::new(policy)).execute(CancellationToken::new(), attempt).await;

    assert_eq!(outcome, Ok(0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(hedged.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_primary_triggers_hedges_early() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&starts);
    let attempt = attempt_fn(move |ctx| {
        recorder.lock().push((ctx.hedge, Instant::now()));
        async move {
            if ctx.hedge == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(TestError::Fatal)
            } else {
                Ok(ctx.hedge)
            }
        }
    });

    let origin = Instant::now();
    let policy: HedgePolicy<u32, TestError> = HedgePolicy::new(Duration::from_millis(500), 1);
    let outcome = Executor::<u32, TestError>::new().with(Arc::new(policy)).execute(CancellationToken::new(), attempt).await;

    assert_eq!(outcome, Ok(1));
    let hedge_start = starts.lock().iter().find(|(h, _)| *h == 1).map(|(_, t)| *t - origin).unwrap();
    assert_eq!(hedge_start, Duration::from_millis(5), "no waiting for the hedge delay after a failure");
}

#[tokio::test(start_paused = true)]
async fn test_retry_wraps_hedge_race() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let attempt = attempt_fn(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { if ctx.attempt == 0 { Err(TestError::Flaky) } else { Ok(ctx.attempt * 10 + ctx.hedge) } }
    });

    let executor = Executor::<u32, TestError>::new()
        .with(Arc::new(retry(3)))
        .with(Arc::new(HedgePolicy::new(Duration::from_millis(50), 1)));
    let outcome = executor.execute(CancellationToken::new(), attempt).await;

    assert!(matches!(outcome, Ok(10 | 11)), "{outcome:?}");
    assert!(calls.load(Ordering::SeqCst) >= 3, "both branches of the first race ran");
}

#[test]
fn test_hedge_delay_bounds() {
    let config = HedgeConfig { enabled: true, min_delay_ms: 20, max_delay_ms: 300, ..HedgeConfig::default() };
    assert_eq!(config.delay_for(None), Duration::from_millis(300));
    assert_eq!(config.delay_for(Some(5)), Duration::from_millis(20));
    assert_eq!(config.delay_for(Some(120)), Duration::from_millis(120));
    assert_eq!(config.delay_for(Some(9_000)), Duration::from_millis(300));
}
