#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod broker;
mod codec;
mod envelope;
mod errors;
mod job;
mod job_registry;
mod memory;
mod model;
mod queue;
mod rabbit;
mod runner;
mod util;
mod worker;

/// The broker transport abstraction and its delivery types.
pub use self::broker::{Broker, Delivery, Subscription};
/// The wire representation of a queued job.
pub use self::envelope::Envelope;
/// Error types for enqueueing, decoding, transport, and worker operation.
pub use self::errors::{DecodeError, EnqueueError, JobTimeout, TransportError, WorkerError};
/// The main trait for defining background jobs.
pub use self::job::{DEFAULT_QUEUE, Job};
/// In-process broker with delayed-delivery semantics, for development and tests.
pub use self::memory::MemoryBroker;
/// Model references carried inside jobs and the storage lookup contract.
pub use self::model::{AnyModelRef, Model, ModelRef, ModelStore, NullStore};
/// The producer-side queue client and delivery scheduling.
pub use self::queue::{Queue, Schedule};
/// The RabbitMQ transport implementation.
pub use self::rabbit::{RabbitBroker, RabbitConfig};
/// The consumer loop that pulls, executes, retries, and escalates jobs.
pub use self::runner::{RunHandle, Runner};
