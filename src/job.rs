use crate::errors::EnqueueError;
use crate::model::AnyModelRef;
use crate::queue::{Queue, Schedule};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::instrument;

/// The default queue name used when no specific queue is configured.
pub const DEFAULT_QUEUE: &str = "queue.default";

/// Trait for defining background jobs that can be enqueued and executed
/// asynchronously.
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name of the job.
    ///
    /// This MUST be unique for the whole application.
    const JOB_NAME: &'static str;

    /// Whether [`Self::dispatch`] publishes the job to the broker.
    ///
    /// When `false`, dispatching runs the job immediately in the caller's
    /// context instead.
    const QUEUEABLE: bool = true;

    /// Number of delivery attempts after which the job is escalated to
    /// [`Self::failed`] instead of being retried. Values below one are
    /// treated as one.
    const MAX_TRIES: u32 = 3;

    /// Delay before a failed attempt is redelivered.
    const RETRY_AFTER: Duration = Duration::from_secs(60);

    /// Execution deadline per attempt. `Duration::ZERO` disables the
    /// watchdog.
    const TIMEOUT: Duration = Duration::from_secs(120);

    /// The application data provided to this job at runtime.
    type Context: Clone + Send + 'static;

    /// Execute the job. This method should define its logic.
    ///
    /// Errors are not swallowed here: the consumer loop catches them and
    /// drives the retry/escalation bookkeeping.
    fn run(&self, ctx: Self::Context) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Called exactly once, with the terminal error, when the job has
    /// exhausted all of its delivery attempts. The default does nothing.
    fn failed(
        &self,
        _ctx: Self::Context,
        _error: &anyhow::Error,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// The fields of this job that hold model references and must be
    /// re-loaded when the job is decoded on a consumer.
    fn model_refs(&mut self) -> Vec<&mut dyn AnyModelRef> {
        Vec::new()
    }

    /// Enqueue this job for background execution.
    ///
    /// Returns the uuid assigned to the job.
    #[instrument(name = "workers.enqueue", skip(self, queue), fields(message = Self::JOB_NAME))]
    fn enqueue<'a>(&'a self, queue: &'a Queue) -> BoxFuture<'a, Result<String, EnqueueError>> {
        queue.push(self).boxed()
    }

    /// Enqueue this job with an explicit delivery schedule.
    #[instrument(name = "workers.enqueue", skip(self, queue, schedule), fields(message = Self::JOB_NAME))]
    fn enqueue_scheduled<'a>(
        &'a self,
        queue: &'a Queue,
        schedule: impl Into<Schedule>,
    ) -> BoxFuture<'a, Result<String, EnqueueError>> {
        let schedule = schedule.into();
        async move { queue.push_scheduled(self, schedule).await }.boxed()
    }

    /// Run the job according to its type: queueable jobs are published to
    /// the broker, everything else executes immediately in the caller's
    /// context. This is decided by [`Self::QUEUEABLE`], not by runtime data.
    ///
    /// Returns the assigned uuid, or `None` when the job ran inline.
    fn dispatch<'a>(
        &'a self,
        queue: &'a Queue,
        ctx: Self::Context,
    ) -> BoxFuture<'a, Result<Option<String>, EnqueueError>> {
        if Self::QUEUEABLE {
            async move { Ok(Some(self.enqueue(queue).await?)) }.boxed()
        } else {
            async move {
                self.run(ctx).await.map_err(EnqueueError::JobError)?;
                Ok(None)
            }
            .boxed()
        }
    }
}
