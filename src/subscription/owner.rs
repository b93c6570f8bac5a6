//! Subscription handles and owner liveness

use std::fmt;
use std::sync::Arc;

/// Opaque handle returned by every `subscribe*` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value (unique per registry)
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Back-reference from a subscription to the object that registered it
///
/// Holds only a weak reference, so a subscription never keeps its owner
/// alive. The address is kept separately for identity comparison in
/// `unsubscribe_owner`.
pub(crate) struct OwnerRef {
    addr: usize,
    alive: Box<dyn Fn() -> bool + Send + Sync>,
}

impl OwnerRef {
    pub(crate) fn of<O>(owner: &Arc<O>) -> Self
    where
        O: ?Sized + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(owner);
        Self {
            addr: owner_addr(owner),
            alive: Box::new(move || weak.strong_count() > 0),
        }
    }

    /// Whether the owner is still reachable
    pub(crate) fn is_alive(&self) -> bool {
        (self.alive)()
    }

    /// Whether this reference points at the live owner at `addr`
    pub(crate) fn is(&self, addr: usize) -> bool {
        self.addr == addr && self.is_alive()
    }
}

impl fmt::Debug for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerRef")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Identity of an `Arc` allocation
pub(crate) fn owner_addr<O: ?Sized>(owner: &Arc<O>) -> usize {
    Arc::as_ptr(owner).cast::<()>() as usize
}
