//! Change notification channel.
//!
//! A synchronous, in-process broadcast that tells mounted display components
//! the cart changed. Delivery is pull-based: no payload is carried, each
//! handler re-reads the current snapshot. Cross-surface delivery (another
//! tab, a websocket bridge) is just one more subscriber that forwards to its
//! own transport.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

/// A subscribed notification handler.
pub type Handler = Box<dyn Fn() + Send>;

/// Token returned by [`ChangeChannel::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Broadcast channel for cart-change notifications.
///
/// No ordering is guaranteed between independently-subscribed handlers. A
/// handler that panics does not prevent delivery to the remaining handlers.
#[derive(Default)]
pub struct ChangeChannel {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler)>,
}

impl std::fmt::Debug for ChangeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeChannel")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl ChangeChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; it stays registered until unsubscribed.
    pub fn subscribe(&mut self, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, handler));

        id
    }

    /// Deregister a handler. Returns `false` if the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);

        self.handlers.len() != before
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    /// Notify every subscribed handler that the cart changed.
    ///
    /// Handler failures are isolated: a panicking handler is logged and the
    /// remaining handlers are still invoked. This never propagates an error.
    pub fn publish(&self) {
        for (id, handler) in &self.handlers {
            if catch_unwind(AssertUnwindSafe(handler)).is_err() {
                warn!(subscription = id.0, "cart change handler panicked");
            }
        }
    }
}
