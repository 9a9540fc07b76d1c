//! Integration tests for the scheduler
//!
//! These exercise the public API end to end, mostly on tokio's paused clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use reqsched::scheduler::{
    BoxError, QueueState, RequestDescriptor, ScheduleResult, Scheduler, SchedulerConfig, SchedulerError,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

fn quiet(config: SchedulerConfig) -> SchedulerConfig {
    SchedulerConfig {
        jitter_min_ms: 0,
        jitter_max_ms: 0,
        ..config
    }
}

/// Tracks how many actions are running at once
#[derive(Default, Clone)]
struct Concurrency {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ceiling_holds_under_retries() {
    let scheduler = Scheduler::new(SchedulerConfig {
        max_concurrent: 3,
        ..Default::default()
    })
    .unwrap();
    let tracker = Concurrency::default();

    let mut handles = Vec::new();
    for i in 0..30u64 {
        let tracker = tracker.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let descriptor = RequestDescriptor::new(format!("symbol-{i}"), move || {
            let tracker = tracker.clone();
            let calls = Arc::clone(&calls);
            async move {
                tracker.enter();
                tokio::time::sleep(Duration::from_millis(50 + i * 7)).await;
                tracker.exit();
                // Every third target fails its first attempt
                if i % 3 == 0 && calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("rate limited upstream")
                } else {
                    Ok(i)
                }
            }
        });
        handles.push(scheduler.submit(descriptor).unwrap());
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), i as u64);
    }

    assert!(tracker.peak() <= 3);
    let stats = scheduler.stats();
    assert_eq!(stats.total_submitted, 30);
    assert_eq!(stats.total_succeeded, 30);
    assert_eq!(stats.total_retries, 10);
    assert_eq!(stats.total_attempts, 40);
    assert_eq!(stats.peak_concurrent, 3);
}

#[tokio::test(start_paused = true)]
async fn test_every_request_resolves_exactly_once() {
    let scheduler = Scheduler::new(SchedulerConfig {
        max_concurrent: 2,
        max_retries: 2,
        ..Default::default()
    })
    .unwrap();

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let descriptor = RequestDescriptor::new(format!("t{}", i % 4), move || async move {
                if i % 4 == 0 { Err("broken target") } else { Ok(i) }
            });
            scheduler.submit(descriptor).unwrap()
        })
        .collect();

    let mut ok = 0;
    let mut failed = 0;
    for handle in handles {
        match tokio::time::timeout(Duration::from_secs(3600), handle).await {
            Ok(Ok(_)) => ok += 1,
            Ok(Err(err)) => {
                assert!(err.is_retries_exhausted());
                failed += 1;
            }
            Err(_) => panic!("request never resolved"),
        }
    }

    assert_eq!(ok, 9);
    assert_eq!(failed, 3);
    let state = scheduler.queue_state();
    assert_eq!(state.in_flight, 0);
    assert_eq!(state.queued, 0);
    assert_eq!(state.awaiting_backoff, 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_attempts_dispatch_in_submission_order() {
    let scheduler = Scheduler::new(quiet(SchedulerConfig {
        max_concurrent: 1,
        ..Default::default()
    }))
    .unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let order = Arc::clone(&order);
            let descriptor = RequestDescriptor::new(format!("t{i}"), move || {
                let order = Arc::clone(&order);
                async move {
                    order.lock().await.push(i);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, BoxError>(())
                }
            });
            scheduler.submit(descriptor).unwrap()
        })
        .collect();

    assert_eq!(handles[5].admission(), &ScheduleResult::Queued { position: 5 });
    let queued: Vec<_> = scheduler.queue_details().into_iter().map(|e| e.target_id).collect();
    assert_eq!(queued, vec!["t1", "t2", "t3", "t4", "t5"]);

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_parallel_submitters_share_one_ceiling() {
    let scheduler = Scheduler::new(quiet(SchedulerConfig {
        max_concurrent: 3,
        max_retries: 5,
        base_delay_ms: 1,
        ..Default::default()
    }))
    .unwrap();
    let tracker = Concurrency::default();
    let successful_runs = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..8u32)
        .map(|batch| {
            let scheduler = scheduler.clone();
            let tracker = tracker.clone();
            let successful_runs = Arc::clone(&successful_runs);
            tokio::spawn(async move {
                (0..50u32)
                    .map(|i| {
                        let tracker = tracker.clone();
                        let successful_runs = Arc::clone(&successful_runs);
                        let calls = Arc::new(AtomicU32::new(0));
                        let target = format!("symbol-{}", (batch * 50 + i) % 7);
                        let descriptor = RequestDescriptor::new(target, move || {
                            let tracker = tracker.clone();
                            let successful_runs = Arc::clone(&successful_runs);
                            let call = calls.fetch_add(1, Ordering::SeqCst);
                            async move {
                                tracker.enter();
                                tokio::time::sleep(Duration::from_millis(1)).await;
                                tracker.exit();
                                // Every other attempt fails
                                if call % 2 == 0 {
                                    Err("upstream busy")
                                } else {
                                    successful_runs.fetch_add(1, Ordering::SeqCst);
                                    Ok(batch * 50 + i)
                                }
                            }
                        });
                        scheduler.submit(descriptor).unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut handles = Vec::new();
    for submitter in submitters {
        handles.extend(submitter.await.unwrap());
    }
    assert_eq!(handles.len(), 400);

    let mut succeeded = 0;
    for handle in handles {
        match tokio::time::timeout(Duration::from_secs(30), handle).await {
            Ok(Ok(_)) => succeeded += 1,
            Ok(Err(err)) => assert!(err.is_retries_exhausted(), "unexpected error: {err}"),
            Err(_) => panic!("request never resolved"),
        }
    }

    assert!(tracker.peak() <= 3, "peak {}", tracker.peak());
    let state = settled(&scheduler).await;
    assert_eq!(state.in_flight, 0);
    assert_eq!(state.queued, 0);
    assert_eq!(state.awaiting_backoff, 0);
    assert!(state.stats.peak_concurrent <= 3);
    assert_eq!(state.stats.total_submitted, 400);
    assert_eq!(state.stats.total_succeeded + state.stats.total_failed, 400);

    // A double dispatch would run some action to success twice
    assert_eq!(successful_runs.load(Ordering::SeqCst), succeeded);
    assert_eq!(state.stats.total_succeeded, succeeded as u64);
}

/// Wait for the last permits to drop after their replies were sent
async fn settled(scheduler: &Scheduler) -> QueueState {
    for _ in 0..200 {
        let state = scheduler.queue_state();
        if state.in_flight == 0 && state.queued == 0 && state.awaiting_backoff == 0 {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    scheduler.queue_state()
}

// =============================================================================
// Retry / backoff
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_backoff_timing_with_jitter() {
    let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    let stamps = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&stamps);
    let descriptor = RequestDescriptor::new("quotes/TSLA", move || {
        let recorded = Arc::clone(&recorded);
        async move {
            recorded.lock().await.push(Instant::now());
            Err::<(), _>("503 Service Unavailable")
        }
    });

    let err = scheduler.submit(descriptor).unwrap().await.unwrap_err();
    assert_eq!(err.attempts(), Some(4));

    let stamps = stamps.lock().await;
    assert_eq!(stamps.len(), 4);
    for (pair, backoff_ms) in stamps.windows(2).zip([2000u64, 4000, 8000]) {
        let gap = pair[1] - pair[0];
        // Each retry also waits a fresh dispatch jitter of 100..500ms
        assert!(gap >= Duration::from_millis(backoff_ms + 100), "gap {gap:?}");
        assert!(gap < Duration::from_millis(backoff_ms + 505), "gap {gap:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_success_on_last_allowed_attempt() {
    let scheduler = Scheduler::new(quiet(SchedulerConfig::default())).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let descriptor = RequestDescriptor::new("history/MSFT", move || {
        let counter = Arc::clone(&counter);
        async move {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= 3 { Err("flaky") } else { Ok("prices") }
        }
    });

    assert_eq!(scheduler.submit(descriptor).unwrap().await.unwrap(), "prices");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(scheduler.retry_attempts("history/MSFT"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_target_recovers_after_success() {
    let scheduler = Scheduler::new(quiet(SchedulerConfig {
        max_retries: 1,
        ..Default::default()
    }))
    .unwrap();

    let failing = RequestDescriptor::new("search", || async { Err::<u32, _>("down") });
    assert!(scheduler.submit(failing).unwrap().await.is_err());
    assert_eq!(scheduler.retry_attempts("search"), 1);

    // Exhausted targets fail on their next failure without further retries
    let failing_again = RequestDescriptor::new("search", || async { Err::<u32, _>("still down") });
    let err = scheduler.submit(failing_again).unwrap().await.unwrap_err();
    assert_eq!(err.attempts(), Some(1));

    let healthy = RequestDescriptor::new("search", || async { Ok::<_, BoxError>(1u32) });
    assert_eq!(scheduler.submit(healthy).unwrap().await.unwrap(), 1);
    assert_eq!(scheduler.retry_attempts("search"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_state_bounded_to_failing_targets() {
    let scheduler = Scheduler::new(quiet(SchedulerConfig {
        max_concurrent: 8,
        max_retries: 0,
        ..Default::default()
    }))
    .unwrap();

    let healthy: Vec<_> = (0..200)
        .map(|i| {
            scheduler
                .submit(RequestDescriptor::new(format!("https://api.example.com/{i}"), || async {
                    Ok::<_, BoxError>(())
                }))
                .unwrap()
        })
        .collect();
    for handle in healthy {
        handle.await.unwrap();
    }
    assert_eq!(scheduler.queue_state().tracked_targets, 0);

    for target in ["down-1", "down-2", "down-3"] {
        let handle = scheduler
            .submit(RequestDescriptor::new(target, || async { Err::<(), _>("gone") }))
            .unwrap();
        assert!(handle.await.is_err());
    }
    assert_eq!(scheduler.queue_state().tracked_targets, 0);
}

// =============================================================================
// Construction and isolation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_independent_schedulers_do_not_share_state() {
    let first = Scheduler::new(quiet(SchedulerConfig::default())).unwrap();
    let second = Scheduler::new(quiet(SchedulerConfig::default())).unwrap();

    let failing = first
        .submit(RequestDescriptor::new("shared-name", || async { Err::<(), _>("nope") }))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(first.retry_attempts("shared-name"), 1);
    assert_eq!(second.retry_attempts("shared-name"), 0);

    failing.await.unwrap_err();
    assert_eq!(second.stats().total_submitted, 0);
}

#[tokio::test]
async fn test_submit_from_blocking_thread() {
    let scheduler = Scheduler::new(quiet(SchedulerConfig::default())).unwrap();

    let submitter = scheduler.clone();
    let handle = tokio::task::spawn_blocking(move || {
        submitter.submit(RequestDescriptor::new("blocking", || async { Ok::<_, BoxError>("done") }))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(handle.await.unwrap(), "done");
}

#[tokio::test]
async fn test_malformed_descriptor_fails_fast() {
    let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    let err = scheduler
        .submit(RequestDescriptor::new("", || async { Ok::<_, BoxError>(()) }))
        .unwrap_err();

    assert!(matches!(err, SchedulerError::InvalidDescriptor(_)));
    assert!(err.is_contract_error());
    assert_eq!(scheduler.queue_state().stats.total_submitted, 0);
}
