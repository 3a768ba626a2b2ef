//! Subscription handles and source cleanup.

use std::rc::{Rc, Weak};

use crate::subscriber::Cancel;

/// Cleanup returned by a stream's activation function.
///
/// Runs at most once: when the subscription terminates or is unsubscribed.
#[must_use = "a teardown releases the resources of a subscription"]
pub struct Teardown(Option<Box<dyn FnOnce()>>);

impl Teardown {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// Nothing to release.
    pub fn noop() -> Self {
        Self(None)
    }

    pub(crate) fn run(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl From<Subscription> for Teardown {
    fn from(subscription: Subscription) -> Self {
        Teardown::new(move || subscription.unsubscribe())
    }
}

impl core::fmt::Debug for Teardown {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Teardown").field(&self.0.is_some()).finish()
    }
}

/// An active delivery relationship.
///
/// `unsubscribe` is idempotent and safe to call from inside the
/// subscription's own callbacks. It delivers a final `complete` to the
/// subscriber (unless the stream already terminated) and releases the
/// source. Dropping the handle does *not* unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<dyn Cancel>,
}

impl Subscription {
    pub(crate) fn new(inner: Rc<dyn Cancel>) -> Self {
        Self { inner }
    }

    pub fn unsubscribe(&self) {
        self.inner.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// A handle that does not keep the subscription alive.
    pub(crate) fn downgrade(&self) -> WeakSubscription {
        WeakSubscription(Rc::downgrade(&self.inner))
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Non-owning subscription handle. Lets callbacks cancel their own
/// subscription and lets a downstream sink cancel the upstreams feeding it.
#[derive(Clone)]
pub(crate) struct WeakSubscription(Weak<dyn Cancel>);

impl WeakSubscription {
    pub(crate) fn unsubscribe(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.cancel();
        }
    }
}
