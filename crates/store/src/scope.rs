//! What getter and action bodies can see.

use std::rc::Rc;

use serde_json::Value;
use statekit_core::StoreId;

use crate::params::Params;
use crate::store::StoreCore;

/// Capability handle passed to getter and action bodies: current state,
/// params and `notify`. Event streams and other actions are out of reach.
///
/// A scope taken from a [`Snapshot`](crate::Snapshot) is pinned to the
/// snapshot's state and its `notify` does nothing.
pub struct Scope<S> {
    core: Rc<StoreCore<S>>,
    pinned: Option<Rc<S>>,
}

impl<S> Clone for Scope<S> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            pinned: self.pinned.clone(),
        }
    }
}

impl<S: 'static> Scope<S> {
    pub(crate) fn live(core: Rc<StoreCore<S>>) -> Self {
        Self { core, pinned: None }
    }

    pub(crate) fn pinned(core: Rc<StoreCore<S>>, state: Rc<S>) -> Self {
        Self {
            core,
            pinned: Some(state),
        }
    }

    /// The state as of now. For async actions this may differ before and
    /// after an `.await`.
    pub fn state(&self) -> Rc<S> {
        match &self.pinned {
            Some(state) => Rc::clone(state),
            None => self.core.state(),
        }
    }

    pub fn params(&self) -> &Params {
        self.core.params()
    }

    pub fn store_id(&self) -> StoreId {
        self.core.id()
    }

    /// Publish `payload` on the store's notification stream on a later
    /// turn. `Value::Null` is ignored.
    pub fn notify(&self, payload: Value) {
        if self.pinned.is_none() {
            self.core.notify(payload);
        }
    }
}

impl<S> core::fmt::Debug for Scope<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scope")
            .field("pinned", &self.pinned.is_some())
            .finish_non_exhaustive()
    }
}
