//! Self-contained tour of the crate on the in-process broker: enqueue a few
//! jobs, watch one retried with backoff, and see a permanently failing one
//! escalate to its `failed()` hook.
//!
//! Runs without any external services:
//!
//! ```bash
//! cargo run --example quickstart
//! ```

use anyhow::Result;
use rabbit_workers::{DEFAULT_QUEUE, Job, MemoryBroker, Queue, Runner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state handed to every job.
#[derive(Clone)]
struct AppContext {
    flaky_attempts: Arc<AtomicU8>,
}

/// A job that succeeds on the first try.
#[derive(Serialize, Deserialize)]
struct SendWelcomeEmail {
    email: String,
}

impl Job for SendWelcomeEmail {
    const JOB_NAME: &'static str = "send_welcome_email";
    type Context = AppContext;

    async fn run(&self, _ctx: Self::Context) -> Result<()> {
        info!("Sending welcome email to {}", self.email);
        Ok(())
    }
}

/// A job that fails once and succeeds on the retry.
#[derive(Serialize, Deserialize)]
struct SyncInventory {
    warehouse: String,
}

impl Job for SyncInventory {
    const JOB_NAME: &'static str = "sync_inventory";
    const RETRY_AFTER: Duration = Duration::from_secs(2);
    type Context = AppContext;

    async fn run(&self, ctx: Self::Context) -> Result<()> {
        if ctx.flaky_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("warehouse {} unreachable", self.warehouse);
        }
        info!("Inventory synced for {}", self.warehouse);
        Ok(())
    }
}

/// A job that never succeeds and ends up escalated.
#[derive(Serialize, Deserialize)]
struct DoomedImport {
    source: String,
}

impl Job for DoomedImport {
    const JOB_NAME: &'static str = "doomed_import";
    const MAX_TRIES: u32 = 2;
    const RETRY_AFTER: Duration = Duration::from_secs(1);
    type Context = AppContext;

    async fn run(&self, _ctx: Self::Context) -> Result<()> {
        anyhow::bail!("{} keeps timing out", self.source)
    }

    async fn failed(&self, _ctx: Self::Context, error: &anyhow::Error) {
        warn!("Import from {} gave up for good: {error}", self.source);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();

    let broker = MemoryBroker::new();
    let context = AppContext {
        flaky_attempts: Arc::new(AtomicU8::new(0)),
    };

    let queue = Queue::new(Arc::new(broker.clone()), DEFAULT_QUEUE);

    let job = SendWelcomeEmail {
        email: "user@example.com".into(),
    };
    // Delivered after a 2 second delay.
    job.enqueue_scheduled(&queue, Duration::from_secs(2)).await?;

    SyncInventory {
        warehouse: "eu-central".into(),
    }
    .enqueue(&queue)
    .await?;

    DoomedImport {
        source: "legacy-crm".into(),
    }
    .enqueue(&queue)
    .await?;

    info!("Enqueued 3 jobs, starting the worker…");
    let handle = Runner::new(Arc::new(broker.clone()), context)
        .register_job_type::<SendWelcomeEmail>()
        .register_job_type::<SyncInventory>()
        .register_job_type::<DoomedImport>()
        .idle_interval(Duration::from_millis(200))
        .start();

    // Long enough for the delayed delivery and every retry to play out.
    tokio::time::sleep(Duration::from_secs(6)).await;

    handle.shutdown();
    handle.wait().await?;
    info!("Queue drained, bye");
    Ok(())
}
