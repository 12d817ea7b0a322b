//! Hand-off point between the network thread and the host's consumer thread.
//!
//! Two pieces of state live here, both behind the single [`Inbox`] mutex:
//!
//! * a [`CoalescingQueue`] of decoded messages waiting for delivery, holding
//!   at most one entry per topic;
//! * the [`PendingServiceResult`] slot, which keeps only the most recent
//!   unconsumed service response.
//!
//! The network thread produces, the host drains one task per
//! [`poll`][crate::RosbridgeClient::poll].  When the host is slower than the
//! producer, newer messages replace older ones in place instead of piling up.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::registry::DynSubscriber;

/// Anything that can sit in a [`CoalescingQueue`].
pub trait Keyed {
    fn key(&self) -> &str;
}

/// What [`CoalescingQueue::offer`] did with the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offered {
    /// No entry for the key existed; the item went to the back.
    Appended,
    /// An entry for the key was overwritten at its existing position.
    Replaced,
}

/// FIFO queue that keeps at most one item per key.
///
/// Replacement is a linear scan.  Topic counts per connection are small and
/// static, so the scan stays cheaper than maintaining a side index.
#[derive(Debug)]
pub struct CoalescingQueue<T> {
    items: VecDeque<T>,
}

impl<T: Keyed> CoalescingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Replace the queued item with the same key in place, or append.
    pub fn offer(&mut self, item: T) -> Offered {
        match self.items.iter_mut().find(|queued| queued.key() == item.key()) {
            Some(slot) => {
                *slot = item;
                Offered::Replaced
            }
            None => {
                self.items.push_back(item);
                Offered::Appended
            }
        }
    }

    /// Remove and return the front item.
    pub fn drain(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys in queue order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(Keyed::key)
    }
}

impl<T: Keyed> Default for CoalescingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded message waiting for its binding's `deliver` callback.
pub(crate) struct DeliveryTask<C> {
    pub(crate) topic: String,
    pub(crate) binding: Arc<dyn DynSubscriber<C>>,
    pub(crate) message: Box<dyn Any + Send>,
    pub(crate) received_at: DateTime<Utc>,
}

impl<C> Keyed for DeliveryTask<C> {
    fn key(&self) -> &str {
        &self.topic
    }
}

impl<C> std::fmt::Debug for DeliveryTask<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTask")
            .field("topic", &self.topic)
            .field("received_at", &self.received_at)
            .finish_non_exhaustive()
    }
}

/// The latest `service_response` not yet handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingServiceResult {
    pub service: String,
    /// JSON text of the response's `values`, empty when absent.
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

struct InboxState<C> {
    queue: CoalescingQueue<DeliveryTask<C>>,
    pending_service: Option<PendingServiceResult>,
}

/// The one lock shared by the network thread and the host thread.
///
/// No method calls back into host code; callers take what they need and
/// release the lock before invoking any binding.
pub(crate) struct Inbox<C> {
    state: Mutex<InboxState<C>>,
}

impl<C> Inbox<C> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(InboxState {
                queue: CoalescingQueue::new(),
                pending_service: None,
            }),
        }
    }

    // A panic while holding the lock cannot leave either field half-written,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, InboxState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn offer(&self, task: DeliveryTask<C>) -> Offered {
        self.lock().queue.offer(task)
    }

    pub(crate) fn drain(&self) -> Option<DeliveryTask<C>> {
        self.lock().queue.drain()
    }

    /// Store a service result, returning the unconsumed one it replaced.
    pub(crate) fn store_service_result(
        &self,
        result: PendingServiceResult,
    ) -> Option<PendingServiceResult> {
        self.lock().pending_service.replace(result)
    }

    pub(crate) fn take_service_result(&self) -> Option<PendingServiceResult> {
        self.lock().pending_service.take()
    }

    pub(crate) fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    #[cfg(test)]
    pub(crate) fn queued_topics(&self) -> Vec<String> {
        self.lock().queue.keys().map(str::to_string).collect()
    }

    #[cfg(test)]
    pub(crate) fn peek_service_result(&self) -> Option<PendingServiceResult> {
        self.lock().pending_service.clone()
    }
}
