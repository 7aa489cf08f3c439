//! In-process publish/subscribe for live dashboard updates.
//!
//! Every listener owns a bounded queue, so delivery to one listener is FIFO
//! and a slow or gone listener never holds up the others or the publisher.
//! Dropping a [`Listener`] unsubscribes it.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::Event;

/// Default per-listener queue capacity.
const DEFAULT_LISTENER_CAPACITY: usize = 256;

/// Interval between heartbeat events.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Identifier of a registered listener.
pub type ListenerId = u64;

struct BusInner {
    listeners: RwLock<HashMap<ListenerId, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl BusInner {
    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.remove(&id).is_some()
    }
}

/// Cloneable handle to the bus. All clones share one listener registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LISTENER_CAPACITY)
    }

    /// Create a bus whose listeners buffer at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a new listener. Its first event is always `connected`.
    pub fn subscribe(&self) -> Listener {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        // Fresh queue, cannot be full.
        let _ = tx.try_send(Event::connected());

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut listeners = self.inner.listeners.write().unwrap_or_else(|e| e.into_inner());
            listeners.insert(id, tx);
        }
        info!(listener_id = id, "Event listener subscribed");

        Listener {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a listener. Returns whether it was still registered; calling
    /// this again for the same id is a no-op.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            info!(listener_id = id, "Event listener unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every registered listener. Returns how many
    /// listeners accepted it.
    ///
    /// Never fails: a full queue drops the event for that listener only, and
    /// a closed queue unregisters its listener.
    pub fn publish(&self, event: Event) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let listeners = self.inner.listeners.read().unwrap_or_else(|e| e.into_inner());
            for (id, tx) in listeners.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(listener_id = id, kind = %event.kind, "Listener queue full, event dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        for id in closed {
            if self.inner.remove(id) {
                debug!(listener_id = id, "Pruned closed listener");
            }
        }

        debug!(kind = %event.kind, delivered, "Event published");
        delivered
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a subscription. Also a [`Stream`] of events.
pub struct Listener {
    id: ListenerId,
    rx: mpsc::Receiver<Event>,
    bus: Weak<BusInner>,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the next event. `None` once the listener was unsubscribed
    /// and its queue drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next already-queued event, if any.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Listener {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(self.id) {
                debug!(listener_id = self.id, "Listener dropped, unsubscribed");
            }
        }
    }
}

/// Spawn the heartbeat ticker. Stops when `cancel` fires.
pub fn spawn_heartbeat(
    bus: EventBus,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    bus.publish(Event::heartbeat());
                }
            }
        }
        debug!("Heartbeat ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::events::model::EventType;

    #[tokio::test]
    async fn subscribe_delivers_connected_first() {
        let bus = EventBus::new();
        let mut listener = bus.subscribe();
        let first = listener.recv().await.unwrap();
        assert_eq!(first.kind, EventType::Connected);
        assert_eq!(bus.listener_count(), 1);
    }

    #[tokio::test]
    async fn publish_without_listeners_is_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Event::new(EventType::ContactUpdated)), 0);
    }

    #[tokio::test]
    async fn fifo_per_listener() {
        let bus = EventBus::new();
        let mut listener = bus.subscribe();
        let _ = listener.recv().await;

        for kind in [EventType::NewMessage, EventType::ContactUpdated, EventType::MessageSent] {
            bus.publish(Event::new(kind));
        }

        assert_eq!(listener.recv().await.unwrap().kind, EventType::NewMessage);
        assert_eq!(listener.recv().await.unwrap().kind, EventType::ContactUpdated);
        assert_eq!(listener.recv().await.unwrap().kind, EventType::MessageSent);
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_others() {
        let bus = EventBus::with_capacity(2);

        // Listener whose queue is already full (connected + one event).
        let mut stuck = bus.subscribe();
        bus.publish(Event::new(EventType::NewMessage));

        let mut healthy = bus.subscribe();
        let _ = healthy.recv().await;

        let delivered = bus.publish(Event::new(EventType::ContactUpdated));
        assert_eq!(delivered, 1);
        assert_eq!(healthy.recv().await.unwrap().kind, EventType::ContactUpdated);

        // The stuck listener kept its earlier events and missed the new one.
        assert_eq!(stuck.try_recv().unwrap().kind, EventType::Connected);
        assert_eq!(stuck.try_recv().unwrap().kind, EventType::NewMessage);
        assert!(stuck.try_recv().is_none());
    }

    #[tokio::test]
    async fn closed_listener_is_pruned() {
        let bus = EventBus::new();
        let mut healthy = bus.subscribe();
        let _ = healthy.recv().await;

        // A registered queue whose receiver is gone without unsubscribing.
        let gone_id = u64::MAX;
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        bus.inner.listeners.write().unwrap().insert(gone_id, tx);
        assert_eq!(bus.listener_count(), 2);

        let delivered = bus.publish(Event::new(EventType::AiResponse));
        assert_eq!(delivered, 1);
        assert_eq!(bus.listener_count(), 1);
        assert!(!bus.inner.listeners.read().unwrap().contains_key(&gone_id));
        assert_eq!(healthy.recv().await.unwrap().kind, EventType::AiResponse);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let listener = bus.subscribe();
        let id = listener.id();

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.listener_count(), 0);

        // Dropping after explicit unsubscribe is also fine.
        drop(listener);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let bus = EventBus::new();
        let listener = bus.subscribe();
        assert_eq!(bus.listener_count(), 1);
        drop(listener);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribed_listener_stream_ends() {
        let bus = EventBus::new();
        let mut listener = bus.subscribe();
        bus.unsubscribe(listener.id());

        assert_eq!(listener.next().await.unwrap().kind, EventType::Connected);
        assert!(listener.next().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_subscribe_and_publish() {
        let bus = EventBus::new();
        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    bus.publish(Event::new(EventType::NewMessage));
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut listeners = Vec::new();
        for _ in 0..20 {
            listeners.push(bus.subscribe());
            tokio::task::yield_now().await;
            if listeners.len() % 3 == 0 {
                let l = listeners.remove(0);
                bus.unsubscribe(l.id());
            }
        }
        publisher.await.unwrap();

        for mut l in listeners {
            assert_eq!(l.recv().await.unwrap().kind, EventType::Connected);
        }
    }

    #[tokio::test]
    async fn heartbeat_reaches_listeners() {
        let bus = EventBus::new();
        let mut listener = bus.subscribe();
        let _ = listener.recv().await;

        let cancel = CancellationToken::new();
        let handle = spawn_heartbeat(bus.clone(), Duration::from_millis(20), cancel.clone());

        let event = tokio::time::timeout(Duration::from_secs(2), listener.recv())
            .await
            .expect("heartbeat not received")
            .unwrap();
        assert_eq!(event.kind, EventType::Heartbeat);

        cancel.cancel();
        handle.await.unwrap();
    }
}
