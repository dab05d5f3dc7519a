use crate::job::Job;
use crate::queue::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Wire representation of a queued job.
///
/// The envelope is JSON-encoded into the message body, so it is
/// self-describing: a consumer can recover the concrete job type and all
/// scheduling state from the bytes alone. The delivery delay itself travels
/// in a broker header, not in the body (see [`Envelope::publish_delay`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id: 24 lowercase hex characters, assigned once at first
    /// enqueue. Used for observability, not deduplication; delivery is
    /// at-least-once.
    pub uuid: String,
    /// Registered name of the concrete job type.
    pub job_type: String,
    /// Broker queue the job was published to. Set by the producer, read-only
    /// afterwards.
    pub queue: String,
    /// Initial delivery delay in seconds. Only honored while `attempts` is
    /// zero; retries use `retry_after` instead.
    pub delay: u64,
    /// Delivery attempts performed so far. Incremented exclusively by the
    /// consumer's failure path.
    pub attempts: u32,
    /// Number of attempts after which the job is escalated instead of
    /// retried. Always at least one.
    pub max_tries: u32,
    /// Redelivery delay in seconds applied to failed attempts.
    pub retry_after: u64,
    /// Seconds a handler may run before the worker aborts it. Zero disables
    /// the watchdog.
    pub timeout: u64,
    /// The job's own serialized fields.
    pub payload: Value,
}

impl Envelope {
    /// Build the envelope for a job's first publish, assigning a fresh uuid.
    pub(crate) fn new<J: Job>(
        job: &J,
        queue: &str,
        schedule: Schedule,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            uuid: new_uuid(),
            job_type: J::JOB_NAME.to_string(),
            queue: queue.to_string(),
            delay: schedule.delay().as_secs(),
            attempts: 0,
            max_tries: J::MAX_TRIES.max(1),
            retry_after: J::RETRY_AFTER.as_secs(),
            timeout: J::TIMEOUT.as_secs(),
            payload: serde_json::to_value(job)?,
        })
    }

    /// Delay to apply on the next publish: `retry_after` once the job has
    /// failed at least once, the initial `delay` otherwise.
    pub fn publish_delay(&self) -> Duration {
        if self.attempts > 0 {
            Duration::from_secs(self.retry_after)
        } else {
            Duration::from_secs(self.delay)
        }
    }

    /// Per-attempt execution deadline, or `None` when the watchdog is
    /// disabled.
    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// Record one more delivery attempt.
    pub(crate) fn hit_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Encode the envelope into a message body.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode an envelope from a message body.
    pub fn from_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Generate a fresh 96-bit job id, hex encoded.
fn new_uuid() -> String {
    let bytes: [u8; 12] = rand::random();
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
