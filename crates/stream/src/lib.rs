//! `statekit-stream`: push-based event streams.
//!
//! - [`EventStream`]: cold, lazily activated sequence with combinators
//! - [`EventSubject`]: hot multicast source driven by `next` / `error` / `complete`
//! - [`Subscription`]: cancellable delivery relationship
//!
//! Everything here is single-threaded (`Rc` based). Delivery is synchronous;
//! deferring work to a later turn is the caller's business (see the store
//! crate).

mod operators;
pub mod stream;
pub mod subject;
pub mod subscriber;
pub mod subscription;

pub use statekit_core::StreamError;
pub use stream::{EventStream, IntoEventStream};
pub use subject::EventSubject;
pub use subscriber::{Observer, Subscriber};
pub use subscription::{Subscription, Teardown};
