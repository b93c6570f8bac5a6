//! Concurrent callback bucket
//!
//! A bag stores callbacks keyed by [`SubscriptionId`]. Dispatch takes a
//! snapshot of the live entries, releases every map lock and only then runs
//! the callbacks, so a callback may freely subscribe or unsubscribe.
//!
//! Each entry carries a [`Gate`]. Dispatch passes the gate before invoking,
//! and removal closes it and waits for invocations running on other threads.
//! Once a removal returns, the callback never starts again.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::owner::{OwnerRef, SubscriptionId};

/// Outcome of a single callback invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The callback ran
    Delivered,
    /// The owner was gone when the callback tried to reach it
    OwnerGone,
}

pub(crate) type Invoker<T> = Arc<dyn Fn(&T) -> Delivery + Send + Sync>;

/// Runs after a cancellation watcher removed its entry
pub(crate) type OnCancelled = Box<dyn FnOnce() + Send>;

/// Admission control for one entry's invocations
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    idle: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    /// One slot per invocation in progress
    running: Vec<ThreadId>,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an invocation on this thread; false once closed
    fn enter(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.running.push(thread::current().id());
        true
    }

    fn exit(&self) {
        let me = thread::current().id();
        let mut state = self.lock();
        if let Some(pos) = state.running.iter().position(|id| *id == me) {
            state.running.swap_remove(pos);
        }
        drop(state);
        self.idle.notify_all();
    }

    /// Refuse new invocations and wait out those on other threads
    ///
    /// An invocation on the calling thread (a callback removing itself) is
    /// left to finish.
    fn close(&self) {
        let me = thread::current().id();
        let mut state = self.lock();
        state.closed = true;
        while state.running.iter().any(|id| *id != me) {
            state = self.idle.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }
}

struct Entry<T> {
    owner: Option<OwnerRef>,
    cancel: Option<CancellationToken>,
    invoke: Invoker<T>,
    gate: Arc<Gate>,
    /// Stops the cancellation watcher once the entry leaves the map
    _watch: Option<DropGuard>,
}

impl<T> Entry<T> {
    fn is_stale(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
            || self.owner.as_ref().is_some_and(|o| !o.is_alive())
    }
}

/// Set of callbacks sharing one dispatch target
pub(crate) struct CallbackBag<T> {
    entries: Arc<DashMap<SubscriptionId, Entry<T>>>,
}

impl<T: 'static> CallbackBag<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Add a callback
    pub(crate) fn insert(&self, id: SubscriptionId, owner: Option<OwnerRef>, invoke: Invoker<T>) {
        self.entries.insert(
            id,
            Entry {
                owner,
                cancel: None,
                invoke,
                gate: Arc::default(),
                _watch: None,
            },
        );
    }

    /// Add a callback that lives until `token` fires
    ///
    /// A watcher task (spawned if a Tokio runtime is available) removes the
    /// entry as soon as the token fires and then runs `on_cancelled`.
    /// Without a runtime the entry is pruned on the next dispatch. A
    /// cancelled entry is never invoked.
    pub(crate) fn insert_until(
        &self,
        id: SubscriptionId,
        owner: Option<OwnerRef>,
        invoke: Invoker<T>,
        token: CancellationToken,
        on_cancelled: OnCancelled,
    ) {
        if token.is_cancelled() {
            return;
        }

        let watch = self.watch_cancel(id, token.clone(), on_cancelled);
        self.entries.insert(
            id,
            Entry {
                owner,
                cancel: Some(token.clone()),
                invoke,
                gate: Arc::default(),
                _watch: watch,
            },
        );

        // The token may have fired before the entry was visible to the watcher
        if token.is_cancelled() {
            self.remove(id);
        }
    }

    fn watch_cancel(
        &self,
        id: SubscriptionId,
        token: CancellationToken,
        on_cancelled: OnCancelled,
    ) -> Option<DropGuard> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let entries = Arc::downgrade(&self.entries);
        let removed = CancellationToken::new();
        let guard = removed.clone().drop_guard();

        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Some(entries) = entries.upgrade() {
                        if let Some((_, entry)) = entries.remove(&id) {
                            entry.gate.close();
                            tracing::trace!(subscription_id = %id, "Subscription cancelled");
                        }
                    }
                    on_cancelled();
                }
                _ = removed.cancelled() => {}
            }
        });

        Some(guard)
    }

    /// Remove a callback; returns whether it was present
    ///
    /// Waits for invocations of it running on other threads to return.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        // The map lock is released before waiting on the gate
        let Some((_, entry)) = self.entries.remove(&id) else {
            return false;
        };
        entry.gate.close();
        true
    }

    /// Remove every callback whose live owner sits at `addr`
    pub(crate) fn remove_owner(&self, addr: usize) -> usize {
        let owned: Vec<SubscriptionId> = self
            .entries
            .iter()
            .filter(|entry| entry.owner.as_ref().is_some_and(|o| o.is(addr)))
            .map(|entry| *entry.key())
            .collect();

        owned.into_iter().filter(|id| self.remove(*id)).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&self) {
        let ids: Vec<SubscriptionId> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.remove(id);
        }
    }

    /// Invoke every live callback with `value`
    ///
    /// Callbacks run in subscription order. Entries whose owner is gone or
    /// whose token fired are pruned. A panicking callback is logged and does
    /// not affect its siblings. Returns the number of callbacks that ran.
    pub(crate) fn dispatch(&self, value: &T) -> usize {
        if self.entries.is_empty() {
            return 0;
        }

        let mut live = Vec::with_capacity(self.entries.len());
        let mut stale = Vec::new();

        for entry in self.entries.iter() {
            if entry.is_stale() {
                stale.push(*entry.key());
            } else {
                live.push((
                    *entry.key(),
                    Arc::clone(&entry.invoke),
                    Arc::clone(&entry.gate),
                ));
            }
        }

        for id in stale {
            if self.remove(id) {
                tracing::debug!(subscription_id = %id, "Pruned stale subscription");
            }
        }

        live.sort_unstable_by_key(|(id, _, _)| *id);

        let mut delivered = 0;
        for (id, invoke, gate) in live {
            // Removed while earlier callbacks were running
            if !gate.enter() {
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| invoke(value)));
            gate.exit();

            match outcome {
                Ok(Delivery::Delivered) => delivered += 1,
                Ok(Delivery::OwnerGone) => {
                    self.remove(id);
                    tracing::debug!(subscription_id = %id, "Pruned subscription with dropped owner");
                }
                Err(panic) => {
                    tracing::warn!(
                        subscription_id = %id,
                        panic = panic_message(panic.as_ref()),
                        "Subscriber callback panicked"
                    );
                }
            }
        }

        delivered
    }
}

impl<T> Clone for CallbackBag<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: 'static> Default for CallbackBag<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}
