//! `statekit-store`: a small unidirectional state container.
//!
//! A store type is described by a [`StoreSpec`] (initial state, default
//! params, named getters and actions) and validated into a
//! [`StoreFactory`]. Each instance hands out two capabilities over the same
//! state:
//!
//! - [`Store`]: getters, params, update and notification streams
//! - [`Controller`]: everything a `Store` offers, plus running actions
//!
//! State only changes through actions. Event delivery is deferred onto the
//! `futures` local spawner given at creation, so subscribers never run
//! inside the call that changed the state.

pub mod error;
pub mod factory;
pub mod params;
pub mod scope;
pub mod spec;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use factory::{StoreFactory, StoreInstance};
pub use params::Params;
pub use scope::Scope;
pub use spec::{ActionFn, GetterFn, StoreSpec};
pub use store::{Controller, Snapshot, StateUpdate, Store};
