use std::time::Duration;

/// An error occurred while queueing a job.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// An error occurred serializing the job.
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),

    /// An error occurred publishing the job to the broker.
    #[error(transparent)]
    TransportError(#[from] TransportError),

    /// A non-queueable job dispatched inline returned an error.
    #[error(transparent)]
    JobError(anyhow::Error),
}

/// An error raised by the broker transport layer.
///
/// Transport errors are never retried internally; they surface to the caller
/// on the producer path and stop the consumer loop on the worker path.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying AMQP client reported a protocol or I/O failure.
    #[error(transparent)]
    Amqp(#[from] lapin::Error),

    /// The broker closed the channel or connection.
    #[error("broker channel closed")]
    Closed,
}

/// A delivered message could not be turned back into a runnable job.
///
/// Messages failing to decode are unrecoverable: without a valid job type the
/// retry bookkeeping cannot be applied, so the consumer acknowledges and
/// discards them.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The message body was not a valid job envelope or payload.
    #[error("malformed job message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The encoded job type is not registered with this worker.
    #[error("unknown job type {0:?}")]
    UnknownType(String),

    /// A referenced model no longer exists in the store.
    #[error("model {model} with key {key} no longer exists")]
    ModelNotFound {
        /// Registered name of the missing model.
        model: &'static str,
        /// Primary key the lookup was performed with.
        key: serde_json::Value,
    },

    /// The model store failed while resolving a reference.
    #[error("model lookup failed: {0}")]
    Lookup(#[source] anyhow::Error),
}

/// Synthetic failure recorded when a job handler exceeds its timeout.
///
/// Fed through the normal retry bookkeeping like any handler error, but it
/// additionally stops the worker: a handler that had to be aborted leaves the
/// process state unknown, so the safest action is to let a supervisor restart
/// a fresh process.
#[derive(Debug, Clone, thiserror::Error)]
#[error("job {uuid} ({job_type}) timed out after {timeout:?}")]
pub struct JobTimeout {
    /// Correlation id of the timed-out job.
    pub uuid: String,
    /// Registered name of the job type.
    pub job_type: String,
    /// The exceeded per-attempt deadline.
    pub timeout: Duration,
}

/// A fatal error that stopped the consumer loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The broker transport failed.
    #[error(transparent)]
    TransportError(#[from] TransportError),

    /// A job handler timed out and the worker aborted itself.
    #[error(transparent)]
    Timeout(#[from] JobTimeout),

    /// A job could not be re-encoded for redelivery.
    #[error("failed to encode job for retry: {0}")]
    EncodeError(#[source] serde_json::Error),
}
