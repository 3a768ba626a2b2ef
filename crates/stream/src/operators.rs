//! Combinators. Each returns a new stream whose activation subscribes to
//! its sources; per-subscription state (indices, accumulators) lives inside
//! the activation so every subscriber gets a fresh run.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use statekit_core::StreamError;

use crate::stream::{EventStream, IntoEventStream};
use crate::subscriber::{Observer, Subscriber};
use crate::subscription::{Subscription, Teardown};

/// Subscriber that handles `next` itself and passes termination through.
fn relay<T: 'static, U: 'static>(
    observer: &Observer<U>,
    on_next: impl Fn(T) + 'static,
) -> Subscriber<T> {
    let on_error = observer.clone();
    let on_complete = observer.clone();
    Subscriber::new()
        .on_next(on_next)
        .on_error(move |err| on_error.error(err))
        .on_complete(move || on_complete.complete())
}

fn next_index(counter: &Cell<usize>) -> usize {
    let idx = counter.get();
    counter.set(idx + 1);
    idx
}

impl<T: 'static> EventStream<T> {
    /// Transform every value; `f` also receives the zero-based event index.
    pub fn map<U: 'static>(&self, f: impl Fn(T, usize) -> U + 'static) -> EventStream<U> {
        let source = self.clone();
        let f = Rc::new(f);
        EventStream::new(move |observer: Observer<U>| {
            let f = Rc::clone(&f);
            let out = observer.clone();
            let index = Cell::new(0);
            source
                .subscribe_for(&observer, relay(&observer, move |value| {
                    out.next(f(value, next_index(&index)))
                }))
                .into()
        })
    }

    /// Like [`map`](Self::map), but an `Err` from `f` is delivered on the
    /// error channel, which also cancels the upstream subscription.
    pub fn try_map<U: 'static>(
        &self,
        f: impl Fn(T, usize) -> anyhow::Result<U> + 'static,
    ) -> EventStream<U> {
        let source = self.clone();
        let f = Rc::new(f);
        EventStream::new(move |observer: Observer<U>| {
            let f = Rc::clone(&f);
            let out = observer.clone();
            let index = Cell::new(0);
            source
                .subscribe_for(&observer, relay(&observer, move |value| {
                    match f(value, next_index(&index)) {
                        Ok(mapped) => out.next(mapped),
                        Err(err) => out.error(StreamError::failed(err)),
                    }
                }))
                .into()
        })
    }

    /// Forward only values for which `pred(value, index)` holds.
    pub fn filter(&self, pred: impl Fn(&T, usize) -> bool + 'static) -> EventStream<T> {
        let source = self.clone();
        let pred = Rc::new(pred);
        EventStream::new(move |observer: Observer<T>| {
            let pred = Rc::clone(&pred);
            let out = observer.clone();
            let index = Cell::new(0);
            source
                .subscribe_for(&observer, relay(&observer, move |value| {
                    if pred(&value, next_index(&index)) {
                        out.next(value);
                    }
                }))
                .into()
        })
    }

    /// Fallible [`filter`](Self::filter).
    pub fn try_filter(
        &self,
        pred: impl Fn(&T, usize) -> anyhow::Result<bool> + 'static,
    ) -> EventStream<T> {
        let source = self.clone();
        let pred = Rc::new(pred);
        EventStream::new(move |observer: Observer<T>| {
            let pred = Rc::clone(&pred);
            let out = observer.clone();
            let index = Cell::new(0);
            source
                .subscribe_for(&observer, relay(&observer, move |value| {
                    match pred(&value, next_index(&index)) {
                        Ok(true) => out.next(value),
                        Ok(false) => {}
                        Err(err) => out.error(StreamError::failed(err)),
                    }
                }))
                .into()
        })
    }

    /// Forward the first `n` values, then complete and cancel upstream.
    pub fn take(&self, n: usize) -> EventStream<T> {
        if n == 0 {
            return EventStream::empty();
        }
        let source = self.clone();
        EventStream::new(move |observer: Observer<T>| {
            let out = observer.clone();
            let taken = Cell::new(0);
            source
                .subscribe_for(&observer, relay(&observer, move |value| {
                    if taken.get() < n {
                        taken.set(taken.get() + 1);
                        out.next(value);
                        if taken.get() == n {
                            out.complete();
                        }
                    }
                }))
                .into()
        })
    }

    /// Drop the first `n` values.
    pub fn skip(&self, n: usize) -> EventStream<T> {
        let source = self.clone();
        EventStream::new(move |observer: Observer<T>| {
            let out = observer.clone();
            let skipped = Cell::new(0);
            source
                .subscribe_for(&observer, relay(&observer, move |value| {
                    if skipped.get() < n {
                        skipped.set(skipped.get() + 1);
                    } else {
                        out.next(value);
                    }
                }))
                .into()
        })
    }

    /// Emit `f(latest_self, latest_other)` whenever either side emits, once
    /// both have emitted. Completes when both sources have completed.
    pub fn combine_latest<U, R>(
        &self,
        other: impl IntoEventStream<U>,
        f: impl Fn(&T, &U) -> R + 'static,
    ) -> EventStream<R>
    where
        U: 'static,
        R: 'static,
    {
        let left_source = self.clone();
        let right_source = other.into_event_stream();
        let f = Rc::new(f);

        EventStream::new(move |observer: Observer<R>| {
            let left: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
            let right: Rc<RefCell<Option<U>>> = Rc::new(RefCell::new(None));
            let completed = Rc::new(Cell::new(0u8));

            let emit = {
                let (left, right) = (Rc::clone(&left), Rc::clone(&right));
                let (f, out) = (Rc::clone(&f), observer.clone());
                Rc::new(move || {
                    let combined = match (&*left.borrow(), &*right.borrow()) {
                        (Some(l), Some(r)) => Some(f(l, r)),
                        _ => None,
                    };
                    if let Some(combined) = combined {
                        out.next(combined);
                    }
                })
            };
            let on_complete = {
                let (completed, out) = (Rc::clone(&completed), observer.clone());
                move || {
                    completed.set(completed.get() + 1);
                    if completed.get() == 2 {
                        out.complete();
                    }
                }
            };
            let on_complete = Rc::new(on_complete);

            let left_sub = {
                let (emit, on_complete) = (Rc::clone(&emit), Rc::clone(&on_complete));
                let out = observer.clone();
                left_source.subscribe_for(
                    &observer,
                    Subscriber::new()
                        .on_next(move |value| {
                            *left.borrow_mut() = Some(value);
                            emit();
                        })
                        .on_error(move |err| out.error(err))
                        .on_complete(move || on_complete()),
                )
            };
            if observer.is_closed() {
                return Teardown::from(left_sub);
            }
            let right_sub = {
                let out = observer.clone();
                right_source.subscribe_for(
                    &observer,
                    Subscriber::new()
                        .on_next(move |value| {
                            *right.borrow_mut() = Some(value);
                            emit();
                        })
                        .on_error(move |err| out.error(err))
                        .on_complete(move || on_complete()),
                )
            };

            Teardown::new(move || {
                left_sub.unsubscribe();
                right_sub.unsubscribe();
            })
        })
    }

    /// Subscribe to each source in turn, the next one only after the
    /// previous one completed. Any error ends the whole chain.
    pub fn concat_all<I, S>(sources: I) -> EventStream<T>
    where
        I: IntoIterator<Item = S>,
        S: IntoEventStream<T>,
    {
        let sources: Rc<[EventStream<T>]> = sources
            .into_iter()
            .map(IntoEventStream::into_event_stream)
            .collect();

        EventStream::new(move |observer: Observer<T>| {
            let current: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
            subscribe_in_sequence(Rc::clone(&sources), 0, observer, Rc::clone(&current));

            Teardown::new(move || {
                let active = current.borrow_mut().take();
                if let Some(active) = active {
                    active.unsubscribe();
                }
            })
        })
    }

    /// This stream followed by `others`.
    pub fn concat<I, S>(&self, others: I) -> EventStream<T>
    where
        I: IntoIterator<Item = S>,
        S: IntoEventStream<T>,
    {
        let others = others.into_iter().map(IntoEventStream::into_event_stream);
        let all = std::iter::once(self.clone()).chain(others);
        EventStream::concat_all(all)
    }

    /// Subscribe to all sources at once and interleave their values.
    /// Completes after every source completed; any error ends all of them.
    pub fn merge_all<I, S>(sources: I) -> EventStream<T>
    where
        I: IntoIterator<Item = S>,
        S: IntoEventStream<T>,
    {
        let sources: Rc<[EventStream<T>]> = sources
            .into_iter()
            .map(IntoEventStream::into_event_stream)
            .collect();

        EventStream::new(move |observer: Observer<T>| {
            if sources.is_empty() {
                observer.complete();
                return Teardown::noop();
            }

            let remaining = Rc::new(Cell::new(sources.len()));
            let mut subscriptions = Vec::with_capacity(sources.len());

            for source in sources.iter() {
                if observer.is_closed() {
                    break;
                }
                let out = observer.clone();
                let remaining = Rc::clone(&remaining);
                let on_complete = {
                    let out = observer.clone();
                    move || {
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            out.complete();
                        }
                    }
                };
                let subscriber =
                    relay(&observer, move |value| out.next(value)).on_complete(on_complete);
                subscriptions.push(source.subscribe_for(&observer, subscriber));
            }

            Teardown::new(move || {
                for subscription in subscriptions {
                    subscription.unsubscribe();
                }
            })
        })
    }

    /// This stream merged with `others`.
    pub fn merge<I, S>(&self, others: I) -> EventStream<T>
    where
        I: IntoIterator<Item = S>,
        S: IntoEventStream<T>,
    {
        let others = others.into_iter().map(IntoEventStream::into_event_stream);
        let all = std::iter::once(self.clone()).chain(others);
        EventStream::merge_all(all)
    }
}

fn subscribe_in_sequence<T: 'static>(
    sources: Rc<[EventStream<T>]>,
    position: usize,
    observer: Observer<T>,
    current: Rc<RefCell<Option<Subscription>>>,
) {
    if observer.is_closed() {
        return;
    }
    let Some(source) = sources.get(position).cloned() else {
        observer.complete();
        return;
    };

    let subscriber = {
        let (sources, current) = (Rc::clone(&sources), Rc::clone(&current));
        let observer = observer.clone();
        relay(&observer, {
            let out = observer.clone();
            move |value| out.next(value)
        })
        .on_complete(move || {
            let next = position + 1;
            subscribe_in_sequence(Rc::clone(&sources), next, observer.clone(), Rc::clone(&current))
        })
    };

    let subscription = source.subscribe_for(&observer, subscriber);
    // A synchronous source has already completed and handed over to its
    // successor; only an open subscription is the current one.
    if !subscription.is_closed() {
        *current.borrow_mut() = Some(subscription);
    }
}

impl<T: Clone + 'static> EventStream<T> {
    /// Running accumulation. Without a seed the first value is emitted as
    /// is; with one, the first emission is `f(seed, first, 0)`.
    pub fn scan(&self, f: impl Fn(T, T, usize) -> T + 'static, seed: Option<T>) -> EventStream<T> {
        let source = self.clone();
        let f = Rc::new(f);
        EventStream::new(move |observer: Observer<T>| {
            let f = Rc::clone(&f);
            let out = observer.clone();
            let acc: RefCell<Option<T>> = RefCell::new(seed.clone());
            let index = Cell::new(0);
            source
                .subscribe_for(&observer, relay(&observer, move |value| {
                    let idx = next_index(&index);
                    let previous = acc.borrow_mut().take();
                    let next = match previous {
                        Some(previous) => f(previous, value, idx),
                        None => value,
                    };
                    *acc.borrow_mut() = Some(next.clone());
                    out.next(next);
                }))
                .into()
        })
    }

    /// Accumulation into a different type, always starting from `seed`.
    pub fn scan_from<A: Clone + 'static>(
        &self,
        seed: A,
        f: impl Fn(A, T, usize) -> A + 'static,
    ) -> EventStream<A> {
        let source = self.clone();
        let f = Rc::new(f);
        EventStream::new(move |observer: Observer<A>| {
            let f = Rc::clone(&f);
            let out = observer.clone();
            let acc = RefCell::new(seed.clone());
            let index = Cell::new(0);
            source
                .subscribe_for(&observer, relay(&observer, move |value| {
                    let current = acc.borrow().clone();
                    let next = f(current, value, next_index(&index));
                    *acc.borrow_mut() = next.clone();
                    out.next(next);
                }))
                .into()
        })
    }

    /// `value` followed by this stream.
    pub fn start_with(&self, value: T) -> EventStream<T> {
        EventStream::of([value]).concat([self.clone()])
    }
}
