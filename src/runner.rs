use crate::broker::Broker;
use crate::errors::WorkerError;
use crate::job::Job;
use crate::job_registry::JobRegistry;
use crate::model::{ModelStore, NullStore};
use crate::worker::{ProcessOutcome, Worker};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

/// How long an idle worker waits on the broker before checking the shutdown
/// flag again.
const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(3);

/// The consumer loop: pulls jobs one at a time, executes them under the
/// timeout watchdog, and drives the retry/escalation bookkeeping.
///
/// One `Runner` serializes execution within its process (prefetch 1);
/// parallelism is achieved by running multiple consumer processes.
pub struct Runner<Context> {
    broker: Arc<dyn Broker>,
    registry: JobRegistry<Context>,
    store: Arc<dyn ModelStore>,
    context: Context,
    idle_interval: Duration,
}

impl<Context: Clone + Send + Sync + 'static> fmt::Debug for Runner<Context> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("job_types", &self.registry.job_types())
            .field("idle_interval", &self.idle_interval)
            .finish()
    }
}

impl<Context: Clone + Send + Sync + 'static> Runner<Context> {
    /// Create a new runner with the given broker and context.
    pub fn new(broker: Arc<dyn Broker>, context: Context) -> Self {
        Self {
            broker,
            registry: JobRegistry::default(),
            store: Arc::new(NullStore),
            context,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }

    /// Configure a job to be processed by this runner.
    pub fn register_job_type<J: Job<Context = Context>>(mut self) -> Self {
        self.registry.register::<J>();
        self
    }

    /// Set the store used to resolve model references in decoded jobs.
    pub fn model_store(mut self, store: impl ModelStore + 'static) -> Self {
        self.store = Arc::new(store);
        self
    }

    /// Set how long an idle worker waits between polls of the broker.
    pub fn idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// Run the consume loop on the current task.
    ///
    /// Installs SIGINT/SIGTERM handlers; a signal lets the in-flight job
    /// finish and then stops the loop cleanly (`Ok`). A timed-out job stops
    /// the loop with [`WorkerError::Timeout`]; the process should exit
    /// non-zero and let a supervisor restart it.
    pub async fn run(self) -> Result<(), WorkerError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received…");
            let _ = shutdown_tx.send(true);
        });
        self.run_loop(shutdown_rx).await
    }

    /// Spawn the consume loop onto a background task.
    ///
    /// Unlike [`Runner::run`] this installs no signal handlers; shutdown is
    /// requested through the returned handle. Meant for embedding the worker
    /// in a larger process and for tests.
    pub fn start(self) -> RunHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run_loop(shutdown_rx));
        RunHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }

    async fn run_loop(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let Self {
            broker,
            registry,
            store,
            context,
            idle_interval,
        } = self;

        broker.declare().await?;
        let mut subscription = broker.subscribe().await?;

        let worker = Worker {
            broker: Arc::clone(&broker),
            context,
            job_registry: Arc::new(registry),
            model_store: store,
        };
        info!(job_types = ?worker.job_registry.job_types(), "Starting worker…");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped controller counts as a shutdown request.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = subscription.recv(idle_interval) => received?,
            };

            let Some(delivery) = received else {
                trace!("No pending jobs…");
                continue;
            };

            match worker.process(&mut *subscription, delivery).await? {
                ProcessOutcome::Handled => {}
                ProcessOutcome::Abort(timeout) => {
                    error!("Job timed out, shutting the worker down…");
                    if let Err(error) = broker.close().await {
                        warn!(%error, "Broker teardown failed");
                    }
                    return Err(WorkerError::Timeout(timeout));
                }
            }
        }

        info!("Shutting down…");
        broker.close().await?;
        Ok(())
    }
}

/// Handle to a running consumer loop started with [`Runner::start`].
#[derive(Debug)]
pub struct RunHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), WorkerError>>,
}

impl RunHandle {
    /// Request a clean shutdown. The in-flight job, if any, finishes first.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for the consumer loop to stop and return its outcome.
    pub async fn wait(self) -> Result<(), WorkerError> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(%error, "Worker task panicked");
                Ok(())
            }
        }
    }
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(error) => {
                error!(%error, "Failed to install the SIGTERM handler");
                return std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
