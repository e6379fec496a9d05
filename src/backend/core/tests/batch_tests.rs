//! Batch processor pipeline tests.
//!
//! Tests cover:
//! - Chunking completeness and output ordering
//! - Sliding-window concurrency bound
//! - before_process / after_process / on_success / on_error hooks
//! - Circuit breaker gating
//! - Timeouts
//! - Events and progress reporting

use jobflow_core::error::ErrorCode;
use jobflow_core::jobs::{
    BatchProcessor, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, JobConfig,
    JobError, JobHandle, JobHandlers,
};
use jobflow_core::telemetry::events::names;
use jobflow_core::telemetry::RecordingEventSink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn processor_with_events() -> (BatchProcessor, Arc<RecordingEventSink>) {
    let events = Arc::new(RecordingEventSink::new());
    let processor =
        BatchProcessor::new(Arc::new(CircuitBreakerRegistry::new())).with_events(events.clone());
    (processor, events)
}

fn handle(name: &str) -> JobHandle {
    JobHandle::new(name, "1.0.0")
}

// ============================================================================
// Chunking
// ============================================================================

#[tokio::test]
async fn test_23_items_batch_5_gives_5_calls_in_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let sizes = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (call_count, chunk_sizes) = (calls.clone(), sizes.clone());

    let config = JobConfig::new(
        "chunked",
        "1.0.0",
        JobHandlers::new(move |items: Vec<u32>, _h| {
            call_count.fetch_add(1, Ordering::SeqCst);
            chunk_sizes.lock().push(items.len());
            async move {
                // Later chunks finish first.
                let delay = 30u64.saturating_sub(u64::from(items[0]));
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(items)
            }
        }),
    )
    .with_batch_size(5)
    .with_process_size(5);

    let (processor, _) = processor_with_events();
    let input: Vec<u32> = (0..23).collect();
    let output = processor.execute(&config, Some(input.clone()), handle("chunked")).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(output, input);
    let mut sizes = sizes.lock().clone();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![3, 5, 5, 5, 5]);
}

#[tokio::test]
async fn test_empty_input_runs_no_chunks() {
    let calls = Arc::new(AtomicUsize::new(0));
    let call_count = calls.clone();
    let config = JobConfig::new(
        "empty",
        "1.0.0",
        JobHandlers::new(move |items: Vec<u32>, _h| {
            call_count.fetch_add(1, Ordering::SeqCst);
            async move { Ok(items) }
        }),
    );

    let output = BatchProcessor::default().execute(&config, None, handle("empty")).await.unwrap();
    assert!(output.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_max_items_truncates_input() {
    let config = JobConfig::new(
        "capped",
        "1.0.0",
        JobHandlers::new(|items: Vec<u32>, _h| async move { Ok(items) }),
    )
    .with_batch_size(2)
    .with_max_items(3);

    let output = BatchProcessor::default()
        .execute(&config, Some((0..10).collect()), handle("capped"))
        .await
        .unwrap();
    assert_eq!(output, vec![0, 1, 2]);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_process_size_bounds_in_flight_chunks() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (current, max_seen) = (in_flight.clone(), peak.clone());

    let config = JobConfig::new(
        "bounded",
        "1.0.0",
        JobHandlers::new(move |items: Vec<u32>, _h| {
            let current = current.clone();
            let max_seen = max_seen.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(items)
            }
        }),
    )
    .with_batch_size(1)
    .with_process_size(2);

    let output = BatchProcessor::default()
        .execute(&config, Some((0..8).collect()), handle("bounded"))
        .await
        .unwrap();

    assert_eq!(output.len(), 8);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_freed_slot_admits_next_chunk_without_waiting_for_the_wave() {
    // Chunk 0 is slow; with two slots, chunks 1..=4 must cycle through the
    // other slot while chunk 0 is still running.
    let started = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let finished = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (start_log, finish_log) = (started.clone(), finished.clone());
    let origin = std::time::Instant::now();

    let config = JobConfig::new(
        "sliding",
        "1.0.0",
        JobHandlers::new(move |items: Vec<u64>, _h| {
            let start_log = start_log.clone();
            let finish_log = finish_log.clone();
            async move {
                start_log.lock().push((items[0], origin.elapsed()));
                let delay = if items[0] == 0 { 300 } else { 20 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finish_log.lock().push(items[0]);
                Ok(items)
            }
        }),
    )
    .with_batch_size(1)
    .with_process_size(2);

    let output = BatchProcessor::default()
        .execute(&config, Some((0..5).collect()), handle("sliding"))
        .await
        .unwrap();

    let started = started.lock().clone();
    assert_eq!(started.len(), 5);
    let last_start = started.iter().find(|(chunk, _)| *chunk == 4).map(|(_, at)| *at).unwrap();
    assert!(
        last_start < Duration::from_millis(250),
        "chunk 4 waited for the slow chunk: started at {:?}",
        last_start
    );

    // The slow first chunk finishes last, yet output keeps chunk order.
    assert_eq!(finished.lock().last(), Some(&0));
    assert_eq!(output, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_output_follows_chunk_order_not_completion_order() {
    let completion = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = completion.clone();

    let config = JobConfig::new(
        "scrambled",
        "1.0.0",
        JobHandlers::new(move |items: Vec<u64>, _h| {
            let log = log.clone();
            async move {
                // Chunk delays: 40, 10, 30, 0, 20 ms.
                let delay = [40, 10, 30, 0, 20][(items[0] / 2) as usize];
                tokio::time::sleep(Duration::from_millis(delay)).await;
                log.lock().push(items[0] / 2);
                Ok(items.into_iter().map(|i| i * 10).collect::<Vec<_>>())
            }
        }),
    )
    .with_batch_size(2)
    .with_process_size(5);

    let output = BatchProcessor::default()
        .execute(&config, Some((0..10).collect()), handle("scrambled"))
        .await
        .unwrap();

    assert_ne!(*completion.lock(), vec![0, 1, 2, 3, 4]);
    assert_eq!(output, (0..10).map(|i| i * 10).collect::<Vec<u64>>());
}

// ============================================================================
// Handler Pipeline
// ============================================================================

#[tokio::test]
async fn test_before_and_after_process() {
    let successes = Arc::new(AtomicUsize::new(0));
    let success_count = successes.clone();

    let handlers = JobHandlers::new(|items: Vec<String>, _h| async move {
        Ok(items.into_iter().map(|s| s.len()).collect::<Vec<usize>>())
    })
    .with_before_process(|handle: JobHandle| async move {
        assert_eq!(handle.batch().batch_size, 2);
        Ok(vec!["a".to_string(), "bb".to_string(), "ccc".to_string()])
    })
    .with_after_process(|lengths: Vec<usize>, _h| async move {
        Ok(vec![lengths.iter().sum::<usize>()])
    })
    .on_success(move |output: &[usize]| {
        assert_eq!(output, &[6]);
        success_count.fetch_add(1, Ordering::SeqCst);
    });

    let config = JobConfig::new("lengths", "1.0.0", handlers).with_batch_size(2);
    let output = BatchProcessor::default().run(&config, handle("lengths")).await.unwrap();

    assert_eq!(output, vec![6]);
    assert_eq!(successes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_after_process_failure_is_processing_error() {
    let handlers = JobHandlers::new(|items: Vec<u32>, _h| async move { Ok(items) })
        .with_after_process(|_items: Vec<u32>, _h| async move {
            Err::<Vec<u32>, _>(JobError::fatal("aggregation failed"))
        });
    let config = JobConfig::new("after", "1.0.0", handlers);

    let err = BatchProcessor::default()
        .execute(&config, Some(vec![1, 2]), handle("after"))
        .await
        .unwrap_err();
    assert!(err.is_processing_error());
}

// ============================================================================
// Scenario: news_links
// ============================================================================

fn news_links(calls: Arc<AtomicUsize>, errors: Arc<AtomicUsize>) -> JobConfig<u32> {
    JobConfig::new(
        "news_links",
        "1.0.0",
        JobHandlers::new(move |items: Vec<u32>, _h| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                // Rows 10..20 form chunk #2.
                if items.first() == Some(&10) {
                    Err(JobError::retryable("upstream rejected chunk"))
                } else {
                    Ok(items)
                }
            }
        })
        .on_error(move |_err| {
            errors.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .with_batch_size(10)
    .with_circuit_breaker(CircuitBreakerConfig::enabled(2, Duration::from_secs(60)))
}

#[tokio::test]
async fn test_news_links_failing_chunk() {
    let calls = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    let config = news_links(calls.clone(), errors.clone());
    let (processor, events) = processor_with_events();

    let err = processor
        .execute(&config, Some((0..25).collect()), handle("news_links"))
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.code(), ErrorCode::ProcessingFailed);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(events.count(names::JOB_CHUNK_COMPLETED), 3);
    assert_eq!(events.count(names::JOB_FAILED), 1);

    let breaker = processor.breakers().get("news_links").unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);

    // A second consecutive failure opens the breaker.
    processor
        .execute(&config, Some((0..25).collect()), handle("news_links"))
        .await
        .unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Now runs are refused without touching the handler.
    let rejected = processor
        .execute(&config, Some((0..25).collect()), handle("news_links"))
        .await
        .unwrap_err();
    assert!(rejected.is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(errors.load(Ordering::SeqCst), 2);
    assert_eq!(events.count(names::JOB_REJECTED), 1);
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test]
async fn test_timeout_fails_run_and_counts_against_breaker() {
    let errors = Arc::new(AtomicUsize::new(0));
    let error_count = errors.clone();
    let config = JobConfig::new(
        "slow",
        "1.0.0",
        JobHandlers::new(|items: Vec<u32>, _h| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(items)
        })
        .on_error(move |err| {
            assert!(err.is_timeout());
            error_count.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .with_timeout(Duration::from_millis(30))
    .with_circuit_breaker(CircuitBreakerConfig::enabled(1, Duration::from_secs(60)));

    let (processor, events) = processor_with_events();
    let run_handle = handle("slow");
    let err = processor
        .execute(&config, Some(vec![1]), run_handle.clone())
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::JobTimeout);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(run_handle.is_cancelled());
    assert_eq!(events.count(names::JOB_TIMED_OUT), 1);
    assert_eq!(
        processor.breakers().get("slow").unwrap().state(),
        CircuitState::Open
    );
}

// ============================================================================
// Progress
// ============================================================================

#[tokio::test]
async fn test_progress_reported_per_chunk() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let config = JobConfig::new(
        "progress",
        "1.0.0",
        JobHandlers::new(|items: Vec<u32>, _h| async move { Ok(items) }),
    )
    .with_batch_size(4);

    BatchProcessor::default()
        .execute(&config, Some((0..10).collect()), handle("progress").with_progress_sender(tx))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(progress) = rx.try_recv() {
        assert_eq!(progress.chunks_total, 3);
        seen.push(progress.chunk_index);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_small_progress_channel_never_stalls_the_run() {
    // Nobody drains the channel until the run is over.
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    let config = JobConfig::new(
        "chatty",
        "1.0.0",
        JobHandlers::new(|items: Vec<u32>, _h| async move { Ok(items) }),
    )
    .with_batch_size(1)
    .with_process_size(1);

    let processor = BatchProcessor::default();
    let run = processor.execute(
        &config,
        Some((0..5).collect()),
        handle("chatty").with_progress_sender(tx),
    );
    let output = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run stalled on a full progress channel")
        .unwrap();
    assert_eq!(output, vec![0, 1, 2, 3, 4]);

    // Updates beyond the channel capacity are dropped.
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

// ============================================================================
// Panicking Handlers
// ============================================================================

#[tokio::test]
async fn test_panicking_process_is_a_processing_failure() {
    let errors = Arc::new(AtomicUsize::new(0));
    let error_count = errors.clone();
    let config = JobConfig::new(
        "panicky",
        "1.0.0",
        JobHandlers::new(|items: Vec<u32>, _h| async move {
            if items[0] == 1 {
                panic!("handler bug");
            }
            Ok(items)
        })
        .on_error(move |err| {
            assert!(err.is_processing_error());
            error_count.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .with_batch_size(1)
    .with_circuit_breaker(CircuitBreakerConfig::enabled(1, Duration::from_secs(60)));

    let (processor, events) = processor_with_events();
    let err = processor
        .execute(&config, Some(vec![0, 1, 2]), handle("panicky"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::ProcessingFailed);
    assert!(err.internal_message().unwrap_or_default().contains("handler bug"));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(events.count(names::JOB_FAILED), 1);
    assert_eq!(processor.breakers().get("panicky").unwrap().state(), CircuitState::Open);
}

#[tokio::test]
async fn test_panicking_before_process_is_a_processing_failure() {
    let config = JobConfig::new(
        "panicky_fetch",
        "1.0.0",
        JobHandlers::new(|items: Vec<u32>, _h| async move { Ok(items) }).with_before_process(
            |_h| async move {
                if true {
                    panic!("fetch bug");
                }
                Ok(Vec::new())
            },
        ),
    );

    let err = BatchProcessor::default()
        .execute(&config, None, handle("panicky_fetch"))
        .await
        .unwrap_err();
    assert!(err.is_processing_error());
}

#[tokio::test]
async fn test_panicking_success_hook_does_not_fail_the_run() {
    let config = JobConfig::new(
        "loud_hook",
        "1.0.0",
        JobHandlers::new(|items: Vec<u32>, _h| async move { Ok(items) })
            .on_success(|_out| panic!("hook bug")),
    );

    let output = BatchProcessor::default()
        .execute(&config, Some(vec![1, 2]), handle("loud_hook"))
        .await
        .unwrap();
    assert_eq!(output, vec![1, 2]);
}
