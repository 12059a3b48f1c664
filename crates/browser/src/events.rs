//! Event Bus - fan-out of protocol events to independent subscribers
//!
//! Design: one unbounded queue per subscriber, kept in a registry.
//! Publishing pushes into every queue and returns; it never waits on a
//! consumer, and a stalled consumer only grows its own queue.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{BrowserError, Result};
use crate::scope::Scope;

type Registry<T> = DashMap<u64, mpsc::UnboundedSender<T>>;

pub struct EventBus<T> {
    next_id: AtomicU64,
    subscribers: Arc<Registry<T>>,
    closed: AtomicBool,
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    registry: Arc<Registry<T>>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Publish an item to every current subscriber
    pub fn publish(&self, item: T) {
        // Senders whose receiver is gone get pruned on the next pass
        self.subscribers
            .retain(|_, tx| tx.send(item.clone()).is_ok());
    }

    /// Subscribe to all items published from now on
    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        // A close that raced the insert may have cleared the registry
        // before our entry landed
        if self.closed.load(Ordering::SeqCst) {
            self.subscribers.remove(&id);
        }
        Subscription {
            id,
            rx,
            registry: self.subscribers.clone(),
        }
    }

    /// Wait for the first item matching `predicate`, or for the scope to fire.
    pub async fn until<P>(&self, scope: &Scope, mut predicate: P) -> Result<T>
    where
        P: FnMut(&T) -> bool + Send,
    {
        let mut sub = self.subscribe();
        scope
            .run(async move {
                while let Some(item) = sub.recv().await {
                    if predicate(&item) {
                        return Ok(item);
                    }
                }
                Err(BrowserError::Closed)
            })
            .await
    }

    /// Drop every subscriber queue. Pending receivers drain what they
    /// already have and then see the end of the stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscription<T> {
    /// Next item, or `None` once the bus is closed and the queue drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
