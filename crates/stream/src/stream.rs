//! The push-based [`EventStream`] and its constructors.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;

use statekit_core::StreamError;

use crate::subscriber::{Observer, Sink, Subscriber};
use crate::subscription::{Subscription, Teardown, WeakSubscription};

type Activation<T> = dyn Fn(Observer<T>) -> Teardown;

/// A lazy sequence of values pushed to subscribers.
///
/// A stream is just its activation function: every `subscribe` runs it
/// once with a fresh [`Observer`]. Streams are cold (each subscriber sees
/// its own run) unless the activation function forwards to a shared source
/// such as an [`EventSubject`](crate::EventSubject).
///
/// Cloning a stream is cheap and yields the same stream.
pub struct EventStream<T> {
    on_subscribe: Rc<Activation<T>>,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            on_subscribe: Rc::clone(&self.on_subscribe),
        }
    }
}

impl<T> core::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

impl<T: 'static> EventStream<T> {
    /// Build a stream from its activation function.
    ///
    /// The function receives the delivery proxy and returns the cleanup to
    /// run when the subscription ends.
    pub fn new(on_subscribe: impl Fn(Observer<T>) -> Teardown + 'static) -> Self {
        Self {
            on_subscribe: Rc::new(on_subscribe),
        }
    }

    /// Subscribe with a closure (`next` only) or a full [`Subscriber`].
    pub fn subscribe(&self, subscriber: impl Into<Subscriber<T>>) -> Subscription {
        let subscriber = subscriber.into();
        self.subscribe_with(move |_| subscriber)
    }

    /// Subscribe with callbacks that may need to cancel their own
    /// subscription, possibly before the source has finished activating.
    pub(crate) fn subscribe_with(
        &self,
        build: impl FnOnce(WeakSubscription) -> Subscriber<T>,
    ) -> Subscription {
        let sink = Rc::new(Sink::new());
        let subscription = Observer::new(Rc::clone(&sink)).subscription();
        sink.set_subscriber(build(subscription.downgrade()));

        let teardown = (self.on_subscribe)(Observer::new(Rc::clone(&sink)));
        sink.attach(teardown);
        subscription
    }

    /// Subscribe on behalf of an operator's `downstream`: once that closes,
    /// this subscription is cancelled too, without waiting for the source's
    /// activation to return its teardown.
    pub(crate) fn subscribe_for<U: 'static>(
        &self,
        downstream: &Observer<U>,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        self.subscribe_with(|upstream| {
            downstream.link(upstream);
            subscriber
        })
    }

    /// Whether both handles refer to the same stream.
    pub fn ptr_eq(&self, other: &EventStream<T>) -> bool {
        Rc::ptr_eq(&self.on_subscribe, &other.on_subscribe)
    }

    /// A stream that completes immediately.
    pub fn empty() -> Self {
        EventStream::new(|observer: Observer<T>| {
            observer.complete();
            Teardown::noop()
        })
    }

    /// Accept anything that converts into a stream: streams (unchanged),
    /// subjects, vectors and arrays.
    pub fn from_source(source: impl IntoEventStream<T>) -> Self {
        source.into_event_stream()
    }

    /// Invoke `f(value, index)` for each event.
    ///
    /// Resolves with the number of events once the stream completes. Fails
    /// with the stream's error, or with `f`'s error after unsubscribing.
    pub fn for_each(
        &self,
        f: impl Fn(T, usize) -> anyhow::Result<()> + 'static,
    ) -> LocalBoxFuture<'static, Result<usize, StreamError>> {
        let (tx, rx) = oneshot::channel();
        let tx = Rc::new(RefCell::new(Some(tx)));
        let count = Rc::new(Cell::new(0usize));

        let settle = move |result: Result<usize, StreamError>| {
            if let Some(tx) = tx.borrow_mut().take() {
                let _ = tx.send(result);
            }
        };
        let settle = Rc::new(settle);

        self.subscribe_with(|upstream| {
            let on_next_settle = Rc::clone(&settle);
            let on_error_settle = Rc::clone(&settle);
            let on_next_count = Rc::clone(&count);
            Subscriber::new()
                .on_next(move |value| {
                    let index = on_next_count.get();
                    match f(value, index) {
                        Ok(()) => on_next_count.set(index + 1),
                        Err(err) => {
                            on_next_settle(Err(StreamError::failed(err)));
                            upstream.unsubscribe();
                        }
                    }
                })
                .on_error(move |err| on_error_settle(Err(err)))
                .on_complete(move || settle(Ok(count.get())))
        });

        async move { rx.await.unwrap_or(Err(StreamError::Aborted)) }.boxed_local()
    }
}

impl<T: Clone + 'static> EventStream<T> {
    /// A stream that synchronously delivers `values`, then completes.
    pub fn of(values: impl IntoIterator<Item = T>) -> Self {
        let values: Rc<[T]> = values.into_iter().collect();
        EventStream::new(move |observer: Observer<T>| {
            for value in values.iter() {
                if observer.is_closed() {
                    break;
                }
                observer.next(value.clone());
            }
            observer.complete();
            Teardown::noop()
        })
    }
}

impl<T: Clone + 'static> FromIterator<T> for EventStream<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        EventStream::of(iter)
    }
}

impl EventStream<Value> {
    /// Dynamic counterpart of [`EventStream::from_source`]: a JSON array
    /// becomes a stream of its elements. Any other value is rejected.
    pub fn from_json(value: Value) -> Result<Self, StreamError> {
        match value {
            Value::Array(items) => Ok(EventStream::of(items)),
            other => Err(StreamError::invalid_argument(format!(
                "cannot build an event stream from {}",
                json_kind(&other)
            ))),
        }
    }

    /// Whether [`EventStream::from_json`] accepts `value`.
    pub fn is_streamable(value: &Value) -> bool {
        value.is_array()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Values usable wherever a stream is expected (`concat`, `merge`,
/// `combine_latest`, `from_source`).
///
/// Synchronous sequences become streams that deliver every element and
/// then complete.
pub trait IntoEventStream<T> {
    fn into_event_stream(self) -> EventStream<T>;
}

impl<T> IntoEventStream<T> for EventStream<T> {
    fn into_event_stream(self) -> EventStream<T> {
        self
    }
}

impl<T> IntoEventStream<T> for &EventStream<T> {
    fn into_event_stream(self) -> EventStream<T> {
        self.clone()
    }
}

impl<T: Clone + 'static> IntoEventStream<T> for Vec<T> {
    fn into_event_stream(self) -> EventStream<T> {
        EventStream::of(self)
    }
}

impl<T: Clone + 'static, const N: usize> IntoEventStream<T> for [T; N] {
    fn into_event_stream(self) -> EventStream<T> {
        EventStream::of(self)
    }
}
