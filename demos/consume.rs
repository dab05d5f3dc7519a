//! The consumer process: connects to RabbitMQ using the `RABBITMQ_*`
//! environment variables and consumes jobs until SIGINT/SIGTERM.
//!
//! Exits 0 on a clean shutdown and 1 when a job timeout aborted the worker,
//! so a supervisor can restart it.
//!
//! ```bash
//! cargo run --example consume -- --sleep 3 --enqueue 5
//! ```

use anyhow::Result;
use clap::Parser;
use rabbit_workers::{Job, Queue, RabbitBroker, RabbitConfig, Runner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seconds an idle worker sleeps between polls of the broker
    #[arg(long, default_value_t = 3)]
    sleep: u64,

    /// Number of demo jobs to enqueue before consuming
    #[arg(long, default_value_t = 0)]
    enqueue: u32,
}

#[derive(Serialize, Deserialize)]
struct SendNewsletter {
    issue: u32,
}

impl Job for SendNewsletter {
    const JOB_NAME: &'static str = "send_newsletter";
    type Context = ();

    async fn run(&self, _ctx: Self::Context) -> Result<()> {
        info!("Sending newsletter issue #{}", self.issue);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rabbit_workers=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    let args = Args::parse();
    let config = RabbitConfig::from_env();
    let broker = Arc::new(RabbitBroker::connect(&config).await?);

    if args.enqueue > 0 {
        let queue = Queue::new(broker.clone(), config.queue_name());
        for issue in 1..=args.enqueue {
            let uuid = SendNewsletter { issue }.enqueue(&queue).await?;
            info!("Enqueued issue #{issue} as {uuid}");
        }
    }

    let outcome = Runner::new(broker, ())
        .register_job_type::<SendNewsletter>()
        .idle_interval(Duration::from_secs(args.sleep))
        .run()
        .await;

    if let Err(error) = outcome {
        error!("Worker aborted: {error}");
        std::process::exit(1);
    }
    Ok(())
}
