use crate::broker::{Broker, Delivery, Subscription};
use crate::errors::TransportError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// In-process [`Broker`] with the same delayed-delivery semantics as the
/// RabbitMQ transport, for development and tests.
///
/// Runs on the tokio clock, so tests using `start_paused` can observe delay
/// behavior deterministically. Clones share the same queue. Unacknowledged
/// deliveries return to the front of the queue when their subscription is
/// dropped, mirroring the broker's at-least-once redelivery.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    ready: VecDeque<(u64, Vec<u8>)>,
    scheduled: Vec<ScheduledMessage>,
    next_tag: u64,
}

struct ScheduledMessage {
    due: Instant,
    tag: u64,
    body: Vec<u8>,
}

impl State {
    fn next_tag(&mut self) -> u64 {
        self.next_tag += 1;
        self.next_tag
    }

    /// Move every scheduled message whose delay has elapsed into the ready
    /// queue, earliest due first.
    fn promote(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) = self
            .scheduled
            .drain(..)
            .partition(|message| message.due <= now);
        self.scheduled = pending;

        let mut due = due;
        due.sort_by_key(|message| message.due);
        for message in due {
            self.ready.push_back((message.tag, message.body));
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.scheduled.iter().map(|message| message.due).min()
    }
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages currently queued (ready or still delayed),
    /// excluding unacknowledged in-flight deliveries.
    pub fn queued(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.ready.len() + state.scheduled.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare(&self) -> Result<(), TransportError> {
        // No topology to set up in-process.
        Ok(())
    }

    async fn publish(&self, body: Vec<u8>, delay: Duration) -> Result<(), TransportError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            let tag = state.next_tag();
            if delay.is_zero() {
                state.ready.push_back((tag, body));
            } else {
                state.scheduled.push(ScheduledMessage {
                    due: Instant::now() + delay,
                    tag,
                    body,
                });
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn Subscription>, TransportError> {
        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            in_flight: None,
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Nothing to tear down in-process.
        Ok(())
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    in_flight: Option<(u64, Vec<u8>)>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self, wait: Duration) -> Result<Option<Delivery>, TransportError> {
        // Prefetch 1: nothing is delivered while a message is unacknowledged.
        if self.in_flight.is_some() {
            tokio::time::sleep(wait).await;
            return Ok(None);
        }

        let deadline = Instant::now() + wait;
        loop {
            // A publish racing with the queue check below can slip past this
            // wakeup; the bounded sleep keeps that from stalling the consumer
            // beyond the wait window.
            let notified = self.inner.notify.notified();

            let next_due = {
                let mut state = self.inner.state.lock().unwrap();
                state.promote(Instant::now());
                if let Some((tag, body)) = state.ready.pop_front() {
                    self.in_flight = Some((tag, body.clone()));
                    return Ok(Some(Delivery { body, tag }));
                }
                state.next_due()
            };

            let wake = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake) => {
                    if wake >= deadline {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), TransportError> {
        if let Some((tag, _)) = &self.in_flight
            && *tag == delivery.tag
        {
            self.in_flight = None;
        }
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if let Some((tag, body)) = self.in_flight.take() {
            self.inner.state.lock().unwrap().ready.push_front((tag, body));
            self.inner.notify.notify_waiters();
        }
    }
}
