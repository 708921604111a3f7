//! Event bus abstraction for in-process domain events.
//!
//! Services publish an event only after the state change it describes has been
//! committed. Subscribers (the notification dispatcher, metrics, audit consumers)
//! receive their own copy of every event and run independently of the publisher,
//! so a slow or failing subscriber can never roll back or delay a committed
//! transition.
//!
//! ```text
//! ┌─────────────┐   commit   ┌─────────┐  publish  ┌───────────┐
//! │   Service   │──────────▶│  Store  │─────────▶│ Event Bus │
//! └─────────────┘            └─────────┘           └─────┬─────┘
//!                                                  ┌─────┴─────┐
//!                                                  ▼           ▼
//!                                             Dispatcher    Others
//! ```
//!
//! # Example
//!
//! ```rust
//! use circulation_core::event_bus::{BroadcastEventBus, EventBus};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = BroadcastEventBus::<String>::new(16);
//! let mut stream = bus.subscribe();
//!
//! bus.publish("loan-approved".to_string()).await?;
//!
//! let received = stream.next().await;
//! assert_eq!(received.and_then(Result::ok).as_deref(), Some("loan-approved"));
//! # Ok(())
//! # }
//! ```

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to publish an event
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The subscriber fell behind and `skipped` events were dropped for it
    #[error("Subscriber lagged, {skipped} events skipped")]
    Lagged {
        /// Number of events the subscriber missed
        skipped: u64,
    },
}

/// Stream of events delivered to one subscriber.
pub type EventStream<E> = Pin<Box<dyn Stream<Item = Result<E, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// `publish` returns an explicit `Pin<Box<dyn Future>>` instead of being an
/// `async fn` so the bus can be shared as `Arc<dyn EventBus<E>>`.
pub trait EventBus<E>: Send + Sync
where
    E: Clone + Send + 'static,
{
    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers the event was handed to. Publishing
    /// with no subscribers is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the transport rejects the event.
    fn publish(&self, event: E) -> Pin<Box<dyn Future<Output = Result<usize, EventBusError>> + Send + '_>>;

    /// Subscribe to all events published from now on.
    fn subscribe(&self) -> EventStream<E>;
}

/// In-process event bus backed by a `tokio::sync::broadcast` channel.
///
/// Each subscriber has a bounded buffer of `capacity` events. A subscriber that
/// falls further behind sees an [`EventBusError::Lagged`] item and then resumes
/// with the oldest event still buffered.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E> BroadcastEventBus<E>
where
    E: Clone + Send + 'static,
{
    /// Create a bus whose subscribers buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E> EventBus<E> for BroadcastEventBus<E>
where
    E: Clone + Send + 'static,
{
    fn publish(&self, event: E) -> Pin<Box<dyn Future<Output = Result<usize, EventBusError>> + Send + '_>> {
        // broadcast::send only fails when nobody is listening.
        let delivered = self.sender.send(event).unwrap_or(0);
        Box::pin(async move { Ok(delivered) })
    }

    fn subscribe(&self) -> EventStream<E> {
        let receiver = self.sender.subscribe();
        Box::pin(futures::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((Ok(event), receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    Some((Err(EventBusError::Lagged { skipped }), receiver))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = BroadcastEventBus::<u32>::new(4);
        assert_eq!(bus.publish(1).await, Ok(0));
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let bus = BroadcastEventBus::<u32>::new(4);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(7).await, Ok(2));
        assert_eq!(first.next().await, Some(Ok(7)));
        assert_eq!(second.next().await, Some(Ok(7)));
    }

    #[tokio::test]
    async fn slow_subscriber_reports_lag() {
        let bus = BroadcastEventBus::<u32>::new(2);
        let mut stream = bus.subscribe();

        for n in 0..5 {
            let _ = bus.publish(n).await;
        }

        assert_eq!(stream.next().await, Some(Err(EventBusError::Lagged { skipped: 3 })));
        assert_eq!(stream.next().await, Some(Ok(3)));
        assert_eq!(stream.next().await, Some(Ok(4)));
    }

    #[tokio::test]
    async fn stream_ends_when_bus_is_dropped() {
        let bus = BroadcastEventBus::<u32>::new(2);
        let mut stream = bus.subscribe();
        drop(bus);
        assert_eq!(stream.next().await, None);
    }
}
