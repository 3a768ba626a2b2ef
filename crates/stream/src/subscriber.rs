//! Subscriber callbacks and the delivery proxy handed to stream sources.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use statekit_core::StreamError;

use crate::subscription::{Subscription, Teardown, WeakSubscription};

/// The three callbacks a stream delivers to.
///
/// Missing callbacks are no-ops. A plain closure converts into a subscriber
/// that only listens to `next`:
///
/// ```ignore
/// stream.subscribe(|value| println!("{value}"));
/// stream.subscribe(Subscriber::new().on_next(..).on_complete(..));
/// ```
pub struct Subscriber<T> {
    pub(crate) next: Rc<dyn Fn(T)>,
    pub(crate) error: Rc<dyn Fn(StreamError)>,
    pub(crate) complete: Rc<dyn Fn()>,
}

impl<T: 'static> Subscriber<T> {
    pub fn new() -> Self {
        Self {
            next: Rc::new(|_| {}),
            error: Rc::new(|_| {}),
            complete: Rc::new(|| {}),
        }
    }

    pub fn on_next(mut self, f: impl Fn(T) + 'static) -> Self {
        self.next = Rc::new(f);
        self
    }

    pub fn on_error(mut self, f: impl Fn(StreamError) + 'static) -> Self {
        self.error = Rc::new(f);
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + 'static) -> Self {
        self.complete = Rc::new(f);
        self
    }
}

impl<T: 'static> Default for Subscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, F> From<F> for Subscriber<T>
where
    T: 'static,
    F: Fn(T) + 'static,
{
    fn from(f: F) -> Self {
        Subscriber::new().on_next(f)
    }
}

impl<T> core::fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscriber").finish_non_exhaustive()
    }
}

/// Per-subscription delivery state.
///
/// Owns the subscriber until the subscription terminates (complete, error or
/// unsubscribe), then drops it so nothing more can be delivered.
///
/// `upstreams` are subscriptions an operator opened to feed this sink; they
/// are cancelled together with it, even while a source is still activating.
pub(crate) struct Sink<T> {
    subscriber: RefCell<Option<Subscriber<T>>>,
    teardown: RefCell<Option<Teardown>>,
    upstreams: RefCell<Vec<WeakSubscription>>,
    closed: Cell<bool>,
}

impl<T: 'static> Sink<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscriber: RefCell::new(None),
            teardown: RefCell::new(None),
            upstreams: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        }
    }

    pub(crate) fn set_subscriber(&self, subscriber: Subscriber<T>) {
        if !self.closed.get() {
            *self.subscriber.borrow_mut() = Some(subscriber);
        }
    }

    /// Store the source's cleanup handle, or run it right away when the
    /// subscription was closed while the source was still activating.
    pub(crate) fn attach(&self, teardown: Teardown) {
        if self.closed.get() {
            teardown.run();
        } else {
            *self.teardown.borrow_mut() = Some(teardown);
        }
    }

    fn link(&self, upstream: WeakSubscription) {
        if self.closed.get() {
            upstream.unsubscribe();
        } else {
            self.upstreams.borrow_mut().push(upstream);
        }
    }

    fn next(&self, value: T) {
        // Clone the callback out so no borrow is held while user code runs.
        let next = self.subscriber.borrow().as_ref().map(|s| Rc::clone(&s.next));
        if let Some(next) = next {
            next(value);
        }
    }

    fn terminate(&self, signal: impl FnOnce(&Subscriber<T>)) {
        if self.closed.replace(true) {
            return;
        }
        let subscriber = self.subscriber.borrow_mut().take();
        if let Some(subscriber) = subscriber {
            signal(&subscriber);
        }
        let teardown = self.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown.run();
        }
        let upstreams = std::mem::take(&mut *self.upstreams.borrow_mut());
        for upstream in upstreams {
            upstream.unsubscribe();
        }
    }

    fn error(&self, err: StreamError) {
        self.terminate(|s| (s.error)(err));
    }

    fn complete(&self) {
        self.terminate(|s| (s.complete)());
    }
}

/// Cancellation side of a [`Sink`], independent of the item type.
pub(crate) trait Cancel {
    fn cancel(&self);
    fn is_closed(&self) -> bool;
}

impl<T: 'static> Cancel for Sink<T> {
    fn cancel(&self) {
        self.complete();
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// Delivery handle passed to a stream's activation function.
///
/// Calls after `complete` or `error` (or after the consumer unsubscribed)
/// are silently dropped.
pub struct Observer<T> {
    sink: Rc<Sink<T>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            sink: Rc::clone(&self.sink),
        }
    }
}

impl<T: 'static> Observer<T> {
    pub(crate) fn new(sink: Rc<Sink<T>>) -> Self {
        Self { sink }
    }

    pub fn next(&self, value: T) {
        self.sink.next(value);
    }

    pub fn error(&self, err: StreamError) {
        self.sink.error(err);
    }

    pub fn complete(&self) {
        self.sink.complete();
    }

    /// Whether delivery has stopped for good.
    pub fn is_closed(&self) -> bool {
        self.sink.closed.get()
    }

    /// Identity comparison (same underlying subscription).
    pub fn ptr_eq(&self, other: &Observer<T>) -> bool {
        Rc::ptr_eq(&self.sink, &other.sink)
    }

    /// A handle that cancels this delivery relationship.
    pub fn subscription(&self) -> Subscription {
        Subscription::new(Rc::clone(&self.sink) as Rc<dyn Cancel>)
    }

    /// Cancel `upstream` as soon as this observer closes.
    pub(crate) fn link(&self, upstream: WeakSubscription) {
        self.sink.link(upstream);
    }
}

impl<T> core::fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Observer")
            .field("closed", &self.sink.closed.get())
            .finish_non_exhaustive()
    }
}
