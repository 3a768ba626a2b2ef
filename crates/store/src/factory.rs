//! Turning a [`StoreSpec`] into store instances.

use std::rc::Rc;

use futures::task::LocalSpawn;
use serde_json::{Map, Value};
use statekit_core::shallow_merge;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::params::Params;
use crate::spec::{self, InitialState, Members, StoreSpec};
use crate::store::{Controller, Store, StoreCore};

/// Validated store type; creates any number of independent instances.
pub struct StoreFactory<S> {
    default_params: Map<String, Value>,
    initial_state: InitialState<S>,
    members: Rc<Members<S>>,
}

impl<S> Clone for StoreFactory<S> {
    fn clone(&self) -> Self {
        Self {
            default_params: self.default_params.clone(),
            initial_state: self.initial_state.clone(),
            members: Rc::clone(&self.members),
        }
    }
}

impl<S: 'static> StoreFactory<S> {
    /// Validate `spec`: member names must look like `getCount` (lower-case
    /// first letter, then letters and digits), must not clash with the
    /// store's own members and must be unique; default params must be an
    /// object.
    pub fn new(spec: StoreSpec<S>) -> StoreResult<Self> {
        let default_params = spec::default_params(&spec.default_params)?;
        let members = Members::validate(spec.getters, spec.actions)?;

        Ok(Self {
            default_params,
            initial_state: spec.initial_state,
            members: Rc::new(members),
        })
    }

    /// Create an instance. `params` (an object, or `None`/null) override the
    /// defaults key by key. Deferred events are spawned on `spawner`.
    pub fn create(
        &self,
        params: Option<Value>,
        spawner: impl LocalSpawn + 'static,
    ) -> StoreResult<StoreInstance<S>> {
        let overrides = match params {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(StoreError::invalid_argument(
                    "store parameters must be provided as an object",
                ));
            }
        };
        let params = Params::new(shallow_merge(&self.default_params, &overrides));
        let initial_state = self.initial_state.resolve(&params);

        let members = Rc::clone(&self.members);
        let core = StoreCore::new(params, members, initial_state, Rc::new(spawner));
        debug!(
            store_id = %core.id(),
            getters = self.members.getters.len(),
            actions = self.members.actions.len(),
            "store created"
        );

        Ok(StoreInstance {
            store: Store::new(Rc::clone(&core)),
            controller: Controller::new(Rc::clone(&core)),
            core,
        })
    }
}

impl<S> core::fmt::Debug for StoreFactory<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreFactory")
            .field("default_params", &self.default_params)
            .field("getters", &self.members.getters.keys().collect::<Vec<_>>())
            .field("actions", &self.members.actions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<S: 'static> Store<S> {
    /// One-off store with default params.
    pub fn create(
        spec: StoreSpec<S>,
        spawner: impl LocalSpawn + 'static,
    ) -> StoreResult<StoreInstance<S>> {
        StoreFactory::new(spec)?.create(None, spawner)
    }
}

/// A created store: its read-only handle, its controller, and lifecycle
/// operations.
pub struct StoreInstance<S> {
    pub store: Store<S>,
    pub controller: Controller<S>,
    core: Rc<StoreCore<S>>,
}

impl<S: 'static> StoreInstance<S> {
    /// Fire-and-forget action by name. A name with no action of its own
    /// falls back to its handler (`"reset"` runs `onReset`).
    ///
    /// Only name resolution errors are returned; the action runs on the
    /// spawner and its failure is logged.
    pub fn dispatch(&self, action: &str, payload: Value) -> StoreResult<()> {
        let resolved = self.core.resolve_action(action)?;
        let pending = self.core.invoke(&resolved, payload);
        let store_id = self.core.id();

        self.core
            .spawn_local(async move {
                if let Err(err) = pending.await {
                    warn!(
                        store_id = %store_id,
                        action = %resolved,
                        error = %err,
                        "dispatched action failed"
                    );
                }
            })
            .map_err(|err| {
                StoreError::invalid_argument(format!("cannot dispatch '{action}': {err}"))
            })
    }

    /// Complete the update and notification streams. Later action calls fail
    /// with [`StoreError::Disposed`]; getters keep working.
    pub fn dispose(&self) {
        self.core.dispose();
    }
}

impl<S> core::fmt::Debug for StoreInstance<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreInstance")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
