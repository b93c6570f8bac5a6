//! Subscription registry
//!
//! Owns three kinds of buckets:
//!
//! - typed buckets, one per event type
//! - the wildcard bucket, invoked for every event
//! - the state bucket, invoked for [`StateChange`] notifications
//!
//! Dispatch runs the wildcard bucket first and then the typed bucket for the
//! event's type. Both are always attempted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::client::state::StateChange;
use crate::error::{Error, Result};
use crate::protocol::SseEvent;

use super::bag::{CallbackBag, Delivery, Invoker, OnCancelled};
use super::owner::{owner_addr, OwnerRef, SubscriptionId};

/// Weak-owner aware callback registry
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    typed: Arc<DashMap<String, CallbackBag<SseEvent>>>,
    all: CallbackBag<SseEvent>,
    state: CallbackBag<StateChange>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            typed: Arc::new(DashMap::new()),
            all: CallbackBag::new(),
            state: CallbackBag::new(),
        }
    }

    /// Subscribe to events of one type
    ///
    /// Fails with [`Error::InvalidArgument`] when `event_type` is blank.
    pub fn subscribe<F>(&self, event_type: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&SseEvent) + Send + Sync + 'static,
    {
        self.insert_typed(event_type, None, plain(callback), None)
    }

    /// Subscribe to events of one type until `cancel` fires
    pub fn subscribe_with_cancel<F>(
        &self,
        event_type: &str,
        callback: F,
        cancel: CancellationToken,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&SseEvent) + Send + Sync + 'static,
    {
        self.insert_typed(event_type, None, plain(callback), Some(cancel))
    }

    /// Subscribe on behalf of `owner`
    ///
    /// Only a weak reference to `owner` is kept. Once the owner is dropped
    /// the callback is no longer invoked and the entry is pruned on the next
    /// dispatch.
    pub fn subscribe_owned<O, F>(
        &self,
        owner: &Arc<O>,
        event_type: &str,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        O: ?Sized + Send + Sync + 'static,
        F: Fn(&O, &SseEvent) + Send + Sync + 'static,
    {
        let (owner_ref, invoke) = owned(owner, callback);
        self.insert_typed(event_type, Some(owner_ref), invoke, None)
    }

    /// Subscribe to every event regardless of type
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SseEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.all.insert(id, None, plain(callback));
        tracing::trace!(subscription_id = %id, "Subscribed all-events listener");
        id
    }

    /// Subscribe to every event on behalf of `owner`
    pub fn subscribe_all_owned<O, F>(&self, owner: &Arc<O>, callback: F) -> SubscriptionId
    where
        O: ?Sized + Send + Sync + 'static,
        F: Fn(&O, &SseEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let (owner_ref, invoke) = owned(owner, callback);
        self.all.insert(id, Some(owner_ref), invoke);
        tracing::trace!(subscription_id = %id, "Subscribed all-events listener");
        id
    }

    /// Subscribe to run/connection state notifications
    pub fn subscribe_state<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.state.insert(id, None, plain(callback));
        id
    }

    /// Subscribe to state notifications on behalf of `owner`
    pub fn subscribe_state_owned<O, F>(&self, owner: &Arc<O>, callback: F) -> SubscriptionId
    where
        O: ?Sized + Send + Sync + 'static,
        F: Fn(&O, &StateChange) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let (owner_ref, invoke) = owned(owner, callback);
        self.state.insert(id, Some(owner_ref), invoke);
        id
    }

    /// Remove a typed subscription; a no-op if it is already gone
    ///
    /// When the callback is running on another thread this waits for it to
    /// return. It is never invoked once this returns.
    pub fn unsubscribe(&self, event_type: &str, id: SubscriptionId) -> bool {
        let removed = self
            .bucket(event_type)
            .map(|bag| bag.remove(id))
            .unwrap_or(false);

        self.typed.remove_if(event_type, |_, bag| bag.is_empty());

        if removed {
            tracing::trace!(subscription_id = %id, event_type, "Unsubscribed typed listener");
        }
        removed
    }

    /// Remove an all-events subscription; a no-op if it is already gone
    pub fn unsubscribe_all(&self, id: SubscriptionId) -> bool {
        let removed = self.all.remove(id);
        if removed {
            tracing::trace!(subscription_id = %id, "Unsubscribed all-events listener");
        }
        removed
    }

    /// Remove a state subscription; a no-op if it is already gone
    pub fn unsubscribe_state(&self, id: SubscriptionId) -> bool {
        self.state.remove(id)
    }

    /// Remove every subscription registered on behalf of `owner`
    ///
    /// Returns the number of entries removed.
    pub fn unsubscribe_owner<O>(&self, owner: &Arc<O>) -> usize
    where
        O: ?Sized,
    {
        let addr = owner_addr(owner);

        let mut removed = self.all.remove_owner(addr) + self.state.remove_owner(addr);
        for bag in self.buckets() {
            removed += bag.remove_owner(addr);
        }
        self.typed.retain(|_, bag| !bag.is_empty());

        tracing::trace!(removed, "Unsubscribed owner");
        removed
    }

    /// Deliver an event to the wildcard bucket, then to its typed bucket
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, event: &SseEvent) -> usize {
        let mut delivered = self.all.dispatch(event);

        if let Some(bag) = self.bucket(&event.event_type) {
            delivered += bag.dispatch(event);
            if bag.is_empty() {
                self.typed.remove_if(&event.event_type, |_, bag| bag.is_empty());
            }
        }

        tracing::trace!(
            event_type = %event.event_type,
            id = event.id.as_deref().unwrap_or("null"),
            data = event.preview(),
            delivered,
            "Dispatched event"
        );
        delivered
    }

    /// Deliver a state notification
    pub fn dispatch_state(&self, change: &StateChange) -> usize {
        self.state.dispatch(change)
    }

    /// Total number of registered callbacks
    pub fn len(&self) -> usize {
        let typed: usize = self.typed.iter().map(|bag| bag.len()).sum();
        typed + self.all.len() + self.state.len()
    }

    /// Whether no callbacks are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of event types with at least one typed subscription
    pub fn event_type_count(&self) -> usize {
        self.typed.len()
    }

    /// Remove every subscription
    ///
    /// A dispatch already in progress skips every callback it has not yet
    /// started.
    pub fn clear(&self) {
        let buckets = self.buckets();
        self.typed.clear();
        for bag in buckets {
            bag.clear();
        }
        self.all.clear();
        self.state.clear();
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Handle to one typed bucket, cloned so no map lock is held while its
    /// callbacks run or its gates are closed
    fn bucket(&self, event_type: &str) -> Option<CallbackBag<SseEvent>> {
        self.typed.get(event_type).map(|bag| bag.value().clone())
    }

    fn buckets(&self) -> Vec<CallbackBag<SseEvent>> {
        self.typed.iter().map(|bag| bag.value().clone()).collect()
    }

    fn insert_typed(
        &self,
        event_type: &str,
        owner: Option<OwnerRef>,
        invoke: Invoker<SseEvent>,
        cancel: Option<CancellationToken>,
    ) -> Result<SubscriptionId> {
        if event_type.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "event type must be non-empty".into(),
            ));
        }

        let id = self.next_id();
        {
            // Holding the entry guard keeps `remove_if` from dropping the
            // bucket between lookup and insert
            let bag = self.typed.entry(event_type.to_string()).or_default();
            match cancel.clone() {
                Some(token) => bag.insert_until(
                    id,
                    owner,
                    invoke,
                    token,
                    prune_when_empty(&self.typed, event_type),
                ),
                None => bag.insert(id, owner, invoke),
            }
        }

        if cancel.is_some_and(|token| token.is_cancelled()) {
            self.typed.remove_if(event_type, |_, bag| bag.is_empty());
        }

        tracing::trace!(subscription_id = %id, event_type, "Subscribed typed listener");
        Ok(id)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drops the bucket for `event_type` once a cancelled entry leaves it empty
fn prune_when_empty(
    typed: &Arc<DashMap<String, CallbackBag<SseEvent>>>,
    event_type: &str,
) -> OnCancelled {
    let typed = Arc::downgrade(typed);
    let event_type = event_type.to_string();
    Box::new(move || {
        if let Some(typed) = typed.upgrade() {
            typed.remove_if(&event_type, |_, bag| bag.is_empty());
        }
    })
}

fn plain<T, F>(callback: F) -> Invoker<T>
where
    T: 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(move |value: &T| {
        callback(value);
        Delivery::Delivered
    })
}

fn owned<O, T, F>(owner: &Arc<O>, callback: F) -> (OwnerRef, Invoker<T>)
where
    O: ?Sized + Send + Sync + 'static,
    T: 'static,
    F: Fn(&O, &T) + Send + Sync + 'static,
{
    let weak = Arc::downgrade(owner);
    let invoke: Invoker<T> = Arc::new(move |value: &T| match weak.upgrade() {
        Some(owner) => {
            callback(&owner, value);
            Delivery::Delivered
        }
        None => Delivery::OwnerGone,
    });

    (OwnerRef::of(owner), invoke)
}
