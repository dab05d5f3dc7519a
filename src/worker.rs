use crate::broker::{Broker, Delivery, Subscription};
use crate::codec::{self, DecodedJob};
use crate::envelope::Envelope;
use crate::errors::{JobTimeout, WorkerError};
use crate::job_registry::{JobRegistry, RunnableJob};
use crate::model::ModelStore;
use crate::util::{try_to_extract_panic_info, with_sentry_transaction};
use futures_util::FutureExt;
use sentry_core::{Hub, SentryFutureExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span, warn};

/// What the consumer loop should do after a delivery has been handled.
pub(crate) enum ProcessOutcome {
    /// Keep consuming.
    Handled,
    /// A handler had to be aborted; the worker must stop consuming.
    Abort(JobTimeout),
}

pub(crate) struct Worker<Context> {
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) context: Context,
    pub(crate) job_registry: Arc<JobRegistry<Context>>,
    pub(crate) model_store: Arc<dyn ModelStore>,
}

impl<Context: Clone + Send + Sync + 'static> Worker<Context> {
    /// Handle one delivery end to end: decode, execute under the timeout
    /// watchdog, apply the retry/escalation bookkeeping, and acknowledge.
    ///
    /// The delivery is acknowledged on every path. Messages that fail to
    /// decode carry no usable retry state and are discarded; failed jobs are
    /// acknowledged only after the failure path has recorded the attempt.
    pub(crate) async fn process(
        &self,
        subscription: &mut dyn Subscription,
        delivery: Delivery,
    ) -> Result<ProcessOutcome, WorkerError> {
        let decoded = match codec::decode(
            &delivery.body,
            &self.job_registry,
            self.model_store.as_ref(),
        )
        .await
        {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!(
                    %error,
                    body = %String::from_utf8_lossy(&delivery.body),
                    "Discarding invalid job message…"
                );
                subscription.ack(delivery).await?;
                return Ok(ProcessOutcome::Handled);
            }
        };
        let DecodedJob { mut envelope, job } = decoded;

        let span = info_span!("job", job.uuid = %envelope.uuid, job.name = %envelope.job_type);
        async {
            info!("Processing job…");

            let context = self.context.clone();
            let job_future = with_sentry_transaction(&envelope.job_type, async || {
                AssertUnwindSafe(job.run(context))
                    .catch_unwind()
                    .await
                    .map_err(|panic| try_to_extract_panic_info(&*panic))
                    // TODO: Replace with flatten() once that stabilizes
                    .and_then(std::convert::identity)
            });
            let job_future = job_future.bind_hub(Hub::current());

            let result = match envelope.handler_timeout() {
                Some(limit) => tokio::time::timeout(limit, job_future).await,
                None => Ok(job_future.await),
            };

            match result {
                Ok(Ok(())) => {
                    info!("Processed job…");
                    subscription.ack(delivery).await?;
                    Ok(ProcessOutcome::Handled)
                }
                Ok(Err(error)) => {
                    warn!("Failed to run job: {error}");
                    self.retry_or_escalate(&mut envelope, job.as_ref(), &error)
                        .await?;
                    subscription.ack(delivery).await?;
                    Ok(ProcessOutcome::Handled)
                }
                Err(_elapsed) => {
                    let timeout = JobTimeout {
                        uuid: envelope.uuid.clone(),
                        job_type: envelope.job_type.clone(),
                        timeout: Duration::from_secs(envelope.timeout),
                    };
                    warn!("Failed to run job: {timeout}");
                    let error = anyhow::Error::new(timeout.clone());
                    self.retry_or_escalate(&mut envelope, job.as_ref(), &error)
                        .await?;
                    subscription.ack(delivery).await?;
                    Ok(ProcessOutcome::Abort(timeout))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Record the failed attempt, then either escalate the job to its
    /// `failed()` hook or republish it through the delay exchange.
    ///
    /// Retry is "ack the old delivery, publish a new delayed one", never a
    /// broker requeue, so a retried job can be picked up by any consumer.
    async fn retry_or_escalate(
        &self,
        envelope: &mut Envelope,
        job: &dyn RunnableJob<Context>,
        error: &anyhow::Error,
    ) -> Result<(), WorkerError> {
        envelope.hit_attempts();

        if envelope.attempts >= envelope.max_tries {
            warn!(attempts = envelope.attempts, "Job exhausted its attempts, escalating…");
            job.failed(self.context.clone(), error).await;
        } else {
            debug!(
                attempts = envelope.attempts,
                retry_after = envelope.retry_after,
                "Scheduling job retry…"
            );
            envelope.payload = job.payload().map_err(WorkerError::EncodeError)?;
            let body = envelope.to_bytes().map_err(WorkerError::EncodeError)?;
            self.broker.publish(body, envelope.publish_delay()).await?;
        }

        Ok(())
    }
}
