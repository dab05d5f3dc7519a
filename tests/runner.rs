#![allow(missing_docs)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use claims::{assert_err, assert_none, assert_ok, assert_some};
use rabbit_workers::{
    Broker, DEFAULT_QUEUE, Envelope, Job, MemoryBroker, Queue, Runner, Subscription, WorkerError,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::time::Instant;

/// Test utilities and common setup
mod test_utils {
    use super::*;

    /// A queue client publishing to the shared in-memory broker
    pub(super) fn queue(broker: &MemoryBroker) -> Queue {
        Queue::new(Arc::new(broker.clone()), DEFAULT_QUEUE)
    }

    /// Create a test runner with a short idle interval
    pub(super) fn runner<Context: Clone + Send + Sync + 'static>(
        broker: &MemoryBroker,
        context: Context,
    ) -> Runner<Context> {
        Runner::new(Arc::new(broker.clone()), context)
            .idle_interval(Duration::from_millis(50))
    }

    /// Wait until `condition` holds, failing the test after 60 virtual seconds
    pub(super) async fn wait_until(condition: impl Fn() -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(60), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert_ok!(waited, "condition not reached in time");
    }
}

#[tokio::test(start_paused = true)]
async fn jobs_are_acknowledged_when_successfully_run() {
    #[derive(Clone)]
    struct TestContext {
        runs: Arc<AtomicU8>,
    }

    #[derive(Serialize, Deserialize)]
    struct TestJob;

    impl Job for TestJob {
        const JOB_NAME: &'static str = "test";
        type Context = TestContext;

        async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
            ctx.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let broker = MemoryBroker::new();
    let context = TestContext {
        runs: Arc::new(AtomicU8::new(0)),
    };
    let queue = test_utils::queue(&broker);

    let uuid = assert_ok!(TestJob.enqueue(&queue).await);
    assert_eq!(uuid.len(), 24);
    assert_eq!(broker.queued(), 1);

    let handle = test_utils::runner(&broker, context.clone())
        .register_job_type::<TestJob>()
        .start();

    let runs = context.runs.clone();
    test_utils::wait_until(move || runs.load(Ordering::SeqCst) == 1).await;

    handle.shutdown();
    assert_ok!(handle.wait().await);
    assert_eq!(context.runs.load(Ordering::SeqCst), 1);
    assert_eq!(broker.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_jobs_are_retried_then_escalated_exactly_once() {
    #[derive(Clone)]
    struct TestContext {
        runs: Arc<AtomicU8>,
        failed: Arc<AtomicU8>,
        last_error: Arc<Mutex<String>>,
    }

    #[derive(Serialize, Deserialize)]
    struct FailingJob;

    impl Job for FailingJob {
        const JOB_NAME: &'static str = "failing";
        const RETRY_AFTER: Duration = Duration::from_secs(5);
        type Context = TestContext;

        async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
            ctx.runs.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("boom");
        }

        async fn failed(&self, ctx: Self::Context, error: &anyhow::Error) {
            ctx.failed.fetch_add(1, Ordering::SeqCst);
            *ctx.last_error.lock().unwrap() = error.to_string();
        }
    }

    let broker = MemoryBroker::new();
    let context = TestContext {
        runs: Arc::new(AtomicU8::new(0)),
        failed: Arc::new(AtomicU8::new(0)),
        last_error: Arc::new(Mutex::new(String::new())),
    };
    let queue = test_utils::queue(&broker);

    assert_ok!(FailingJob.enqueue(&queue).await);
    let started = Instant::now();

    let handle = test_utils::runner(&broker, context.clone())
        .register_job_type::<FailingJob>()
        .start();

    let failed = context.failed.clone();
    test_utils::wait_until(move || failed.load(Ordering::SeqCst) == 1).await;

    handle.shutdown();
    assert_ok!(handle.wait().await);

    // Three delivery attempts, one terminal escalation, and the two retries
    // spent at least 2 × 5s in the delay exchange.
    assert_eq!(context.runs.load(Ordering::SeqCst), 3);
    assert_eq!(context.failed.load(Ordering::SeqCst), 1);
    assert_eq!(*context.last_error.lock().unwrap(), "boom");
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(broker.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn retried_jobs_carry_incremented_attempts() {
    #[derive(Clone)]
    struct TestContext {
        runs: Arc<AtomicU8>,
    }

    #[derive(Serialize, Deserialize)]
    struct FailingJob;

    impl Job for FailingJob {
        const JOB_NAME: &'static str = "failing";
        const RETRY_AFTER: Duration = Duration::from_secs(5);
        type Context = TestContext;

        async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
            ctx.runs.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("boom");
        }
    }

    let broker = MemoryBroker::new();
    let context = TestContext {
        runs: Arc::new(AtomicU8::new(0)),
    };
    let queue = test_utils::queue(&broker);
    let uuid = assert_ok!(FailingJob.enqueue(&queue).await);

    let handle = test_utils::runner(&broker, context.clone())
        .register_job_type::<FailingJob>()
        .start();
    let runs = context.runs.clone();
    test_utils::wait_until(move || runs.load(Ordering::SeqCst) == 1).await;
    handle.shutdown();
    assert_ok!(handle.wait().await);

    // The retry is not visible before its redelivery delay has elapsed.
    let mut subscription = assert_ok!(broker.subscribe().await);
    assert_none!(assert_ok!(subscription.recv(Duration::from_secs(4)).await));
    let delivery = assert_some!(assert_ok!(
        subscription.recv(Duration::from_secs(10)).await
    ));

    let envelope = assert_ok!(Envelope::from_bytes(&delivery.body));
    assert_eq!(envelope.uuid, uuid);
    assert_eq!(envelope.attempts, 1);
    assert_eq!(envelope.retry_after, 5);
    assert_eq!(envelope.job_type, "failing");
    assert_ok!(subscription.ack(delivery).await);
}

#[tokio::test(start_paused = true)]
async fn scheduled_jobs_wait_for_their_delay() {
    #[derive(Serialize, Deserialize)]
    struct TestJob;

    impl Job for TestJob {
        const JOB_NAME: &'static str = "test";
        type Context = ();

        async fn run(&self, _ctx: Self::Context) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let broker = MemoryBroker::new();
    let queue = test_utils::queue(&broker);
    assert_ok!(
        TestJob
            .enqueue_scheduled(&queue, Duration::from_secs(7))
            .await
    );

    let mut subscription = assert_ok!(broker.subscribe().await);
    assert_none!(assert_ok!(subscription.recv(Duration::from_secs(6)).await));
    let delivery = assert_some!(assert_ok!(
        subscription.recv(Duration::from_secs(2)).await
    ));

    let envelope = assert_ok!(Envelope::from_bytes(&delivery.body));
    assert_eq!(envelope.delay, 7);
    assert_eq!(envelope.attempts, 0);
    assert_eq!(envelope.queue, DEFAULT_QUEUE);
}

#[tokio::test(start_paused = true)]
async fn invalid_messages_are_discarded_without_crashing_the_worker() {
    #[derive(Clone)]
    struct TestContext {
        runs: Arc<AtomicU8>,
    }

    #[derive(Serialize, Deserialize)]
    struct TestJob;

    impl Job for TestJob {
        const JOB_NAME: &'static str = "test";
        type Context = TestContext;

        async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
            ctx.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let broker = MemoryBroker::new();
    let context = TestContext {
        runs: Arc::new(AtomicU8::new(0)),
    };

    // Garbage first, then a valid job: the worker must discard the former
    // and still process the latter.
    assert_ok!(broker.publish(b"not a job".to_vec(), Duration::ZERO).await);
    let queue = test_utils::queue(&broker);
    assert_ok!(TestJob.enqueue(&queue).await);

    let handle = test_utils::runner(&broker, context.clone())
        .register_job_type::<TestJob>()
        .start();

    let runs = context.runs.clone();
    test_utils::wait_until(move || runs.load(Ordering::SeqCst) == 1).await;

    handle.shutdown();
    assert_ok!(handle.wait().await);
    assert_eq!(broker.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_jobs_abort_the_worker() {
    #[derive(Clone)]
    struct TestContext {
        completed: Arc<AtomicU8>,
    }

    #[derive(Serialize, Deserialize)]
    struct SlowJob;

    impl Job for SlowJob {
        const JOB_NAME: &'static str = "slow";
        const TIMEOUT: Duration = Duration::from_secs(2);
        type Context = TestContext;

        async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            ctx.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let broker = MemoryBroker::new();
    let context = TestContext {
        completed: Arc::new(AtomicU8::new(0)),
    };
    let queue = test_utils::queue(&broker);
    assert_ok!(SlowJob.enqueue(&queue).await);
    let started = Instant::now();

    let handle = test_utils::runner(&broker, context.clone())
        .register_job_type::<SlowJob>()
        .start();

    let error = assert_err!(handle.wait().await);
    let WorkerError::Timeout(timeout) = error else {
        panic!("expected a timeout abort, got {error}");
    };
    assert_eq!(timeout.job_type, "slow");
    assert_eq!(timeout.timeout, Duration::from_secs(2));

    // Aborted at the deadline, not after the handler's 10s sleep, and the
    // failed attempt was republished for retry before the worker stopped.
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(context.completed.load(Ordering::SeqCst), 0);
    assert_eq!(broker.queued(), 1);
}

#[tokio::test]
async fn two_consumers_process_jobs_in_parallel() {
    #[derive(Clone)]
    struct TestContext {
        both_running: Arc<Barrier>,
        runs: Arc<AtomicU8>,
    }

    #[derive(Serialize, Deserialize)]
    struct BlockingJob;

    impl Job for BlockingJob {
        const JOB_NAME: &'static str = "blocking";
        type Context = TestContext;

        async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
            ctx.runs.fetch_add(1, Ordering::SeqCst);
            // Only releases once both consumers are inside a handler.
            ctx.both_running.wait().await;
            Ok(())
        }
    }

    let broker = MemoryBroker::new();
    let context = TestContext {
        both_running: Arc::new(Barrier::new(3)),
        runs: Arc::new(AtomicU8::new(0)),
    };
    let queue = test_utils::queue(&broker);
    assert_ok!(BlockingJob.enqueue(&queue).await);
    assert_ok!(BlockingJob.enqueue(&queue).await);

    let first = test_utils::runner(&broker, context.clone())
        .register_job_type::<BlockingJob>()
        .start();
    let second = test_utils::runner(&broker, context.clone())
        .register_job_type::<BlockingJob>()
        .start();

    // Each consumer prefetches a single message, so the only way past this
    // barrier is one job running in each consumer concurrently.
    let released = tokio::time::timeout(Duration::from_secs(5), context.both_running.wait()).await;
    assert_ok!(released, "the two jobs did not run in parallel");

    first.shutdown();
    second.shutdown();
    assert_ok!(first.wait().await);
    assert_ok!(second.wait().await);
    assert_eq!(context.runs.load(Ordering::SeqCst), 2);
    assert_eq!(broker.queued(), 0);
}

#[tokio::test]
async fn dispatch_runs_non_queueable_jobs_inline() {
    #[derive(Clone)]
    struct TestContext {
        runs: Arc<AtomicU8>,
    }

    #[derive(Serialize, Deserialize)]
    struct InlineJob;

    impl Job for InlineJob {
        const JOB_NAME: &'static str = "inline";
        const QUEUEABLE: bool = false;
        type Context = TestContext;

        async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
            ctx.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Serialize, Deserialize)]
    struct QueuedJob;

    impl Job for QueuedJob {
        const JOB_NAME: &'static str = "queued";
        type Context = TestContext;

        async fn run(&self, _ctx: Self::Context) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let broker = MemoryBroker::new();
    let context = TestContext {
        runs: Arc::new(AtomicU8::new(0)),
    };
    let queue = test_utils::queue(&broker);

    // Not queueable: runs in the caller's context, nothing is published.
    let uuid = assert_ok!(InlineJob.dispatch(&queue, context.clone()).await);
    assert_none!(uuid);
    assert_eq!(context.runs.load(Ordering::SeqCst), 1);
    assert_eq!(broker.queued(), 0);

    // Queueable: published with a fresh uuid, nothing runs inline.
    let uuid = assert_ok!(QueuedJob.dispatch(&queue, context.clone()).await);
    assert_eq!(assert_some!(uuid).len(), 24);
    assert_eq!(context.runs.load(Ordering::SeqCst), 1);
    assert_eq!(broker.queued(), 1);
}

#[tokio::test(start_paused = true)]
async fn workers_stop_cleanly_on_shutdown() {
    #[derive(Serialize, Deserialize)]
    struct TestJob;

    impl Job for TestJob {
        const JOB_NAME: &'static str = "test";
        type Context = ();

        async fn run(&self, _ctx: Self::Context) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let broker = MemoryBroker::new();
    let handle = test_utils::runner(&broker, ())
        .register_job_type::<TestJob>()
        .start();

    tokio::time::sleep(Duration::from_secs(10)).await;
    handle.shutdown();
    assert_ok!(handle.wait().await);
}
