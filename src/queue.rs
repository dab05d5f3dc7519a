use crate::broker::Broker;
use crate::envelope::Envelope;
use crate::errors::EnqueueError;
use crate::job::Job;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// When a pushed job should first become visible to consumers.
#[derive(Debug, Clone, Copy, Default)]
pub enum Schedule {
    /// Deliver as soon as possible.
    #[default]
    Now,
    /// Deliver once the given duration has elapsed.
    After(Duration),
    /// Deliver at the given point in time. Instants in the past collapse to
    /// immediate delivery.
    At(DateTime<Utc>),
}

impl Schedule {
    /// Seconds to withhold the message from consumers, clamped at zero.
    pub(crate) fn delay(&self) -> Duration {
        match self {
            Self::Now => Duration::ZERO,
            Self::After(delay) => *delay,
            Self::At(instant) => instant
                .signed_duration_since(Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        }
    }
}

impl From<Duration> for Schedule {
    fn from(delay: Duration) -> Self {
        Self::After(delay)
    }
}

impl From<DateTime<Utc>> for Schedule {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::At(instant)
    }
}

/// Producer-side client for one broker queue.
///
/// Builds the delivery envelope for a job (assigning its uuid and target
/// queue) and publishes it through the broker. Publish failures propagate to
/// the caller; there is no internal retry of the publish itself.
#[derive(Clone)]
pub struct Queue {
    broker: Arc<dyn Broker>,
    name: String,
}

impl Queue {
    /// Create a client publishing to the named queue.
    pub fn new(broker: Arc<dyn Broker>, name: impl Into<String>) -> Self {
        Self {
            broker,
            name: name.into(),
        }
    }

    /// The queue name jobs are routed to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a job for immediate delivery. Returns the assigned uuid.
    pub async fn push<J: Job>(&self, job: &J) -> Result<String, EnqueueError> {
        self.push_scheduled(job, Schedule::Now).await
    }

    /// Publish a job with an explicit delivery schedule. Returns the
    /// assigned uuid.
    pub async fn push_scheduled<J: Job>(
        &self,
        job: &J,
        schedule: impl Into<Schedule>,
    ) -> Result<String, EnqueueError> {
        let envelope = Envelope::new(job, &self.name, schedule.into())?;
        debug!(
            job.uuid = %envelope.uuid,
            job.name = %envelope.job_type,
            delay = envelope.delay,
            "Publishing job…"
        );
        let body = envelope.to_bytes()?;
        self.broker.publish(body, envelope.publish_delay()).await?;
        Ok(envelope.uuid)
    }
}
