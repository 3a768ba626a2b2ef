//! Multicast subject: a hot stream driven by explicit `next` / `error` /
//! `complete` calls.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use statekit_core::StreamError;

use crate::stream::{EventStream, IntoEventStream};
use crate::subscriber::{Observer, Subscriber};
use crate::subscription::{Subscription, Teardown};

#[derive(Debug, Clone)]
enum Terminal {
    Completed,
    Failed(StreamError),
}

struct Registry<T> {
    observers: RefCell<Vec<Observer<T>>>,
    terminal: RefCell<Option<Terminal>>,
}

impl<T: 'static> Registry<T> {
    fn register(&self, observer: Observer<T>) -> bool {
        let terminal = self.terminal.borrow().clone();
        match terminal {
            Some(Terminal::Completed) => {
                observer.complete();
                false
            }
            Some(Terminal::Failed(err)) => {
                observer.error(err);
                false
            }
            None => {
                self.observers.borrow_mut().push(observer);
                true
            }
        }
    }

    fn remove(&self, observer: &Observer<T>) {
        let mut observers = self.observers.borrow_mut();
        if let Some(pos) = observers.iter().position(|o| o.ptr_eq(observer)) {
            observers.remove(pos);
        }
    }

    fn stop(&self, terminal: Terminal) -> Option<Vec<Observer<T>>> {
        if self.terminal.borrow().is_some() {
            return None;
        }
        *self.terminal.borrow_mut() = Some(terminal);
        Some(std::mem::take(&mut *self.observers.borrow_mut()))
    }
}

/// Hot, multicast event source.
///
/// Every registered subscriber sees the events pushed after it subscribed,
/// in subscription order. After `complete` or `error` the subject is
/// stopped: further events are dropped and late subscribers receive the
/// terminal signal right away.
///
/// Cloning yields another handle to the same subject.
pub struct EventSubject<T> {
    registry: Rc<Registry<T>>,
    stream: EventStream<T>,
}

impl<T> Clone for EventSubject<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Rc::clone(&self.registry),
            stream: self.stream.clone(),
        }
    }
}

impl<T: Clone + 'static> EventSubject<T> {
    pub fn new() -> Self {
        let registry = Rc::new(Registry {
            observers: RefCell::new(Vec::new()),
            terminal: RefCell::new(None),
        });

        let weak: Weak<Registry<T>> = Rc::downgrade(&registry);
        let stream = EventStream::new(move |observer: Observer<T>| {
            let Some(registry) = weak.upgrade() else {
                observer.complete();
                return Teardown::noop();
            };
            if !registry.register(observer.clone()) {
                return Teardown::noop();
            }
            let weak = Rc::downgrade(&registry);
            Teardown::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.remove(&observer);
                }
            })
        });

        Self { registry, stream }
    }

    /// Deliver `value` to the subscribers registered right now.
    pub fn next(&self, value: T) {
        if self.is_stopped() {
            return;
        }
        let snapshot = self.registry.observers.borrow().clone();
        tracing::trace!(subscribers = snapshot.len(), "subject delivering event");
        for observer in &snapshot {
            observer.next(value.clone());
        }
        self.registry.observers.borrow_mut().retain(|o| !o.is_closed());
    }

    pub fn error(&self, err: StreamError) {
        let Some(observers) = self.registry.stop(Terminal::Failed(err.clone())) else {
            return;
        };
        tracing::debug!(subscribers = observers.len(), error = %err, "subject failed");
        for observer in observers {
            observer.error(err.clone());
        }
    }

    pub fn complete(&self) {
        let Some(observers) = self.registry.stop(Terminal::Completed) else {
            return;
        };
        tracing::debug!(subscribers = observers.len(), "subject completed");
        for observer in observers {
            observer.complete();
        }
    }

    pub fn subscribe(&self, subscriber: impl Into<Subscriber<T>>) -> Subscription {
        self.stream.subscribe(subscriber)
    }

    /// Read-only view; the same stream is returned on every call.
    pub fn as_event_stream(&self) -> EventStream<T> {
        self.stream.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.observers.borrow().len()
    }

    pub fn is_stopped(&self) -> bool {
        self.registry.terminal.borrow().is_some()
    }
}

impl<T: Clone + 'static> Default for EventSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for EventSubject<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventSubject")
            .field("subscribers", &self.registry.observers.borrow().len())
            .field("stopped", &self.registry.terminal.borrow().is_some())
            .finish()
    }
}

impl<T> IntoEventStream<T> for &EventSubject<T> {
    fn into_event_stream(self) -> EventStream<T> {
        self.stream.clone()
    }
}
