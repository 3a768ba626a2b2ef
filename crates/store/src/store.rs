//! Store runtime: the shared core and the read-only / controlling handles
//! over it.

use std::cell::{Cell, RefCell};
use std::ops::Deref;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::{LocalSpawn, LocalSpawnExt};
use serde_json::Value;
use tracing::{debug, trace, warn};

use statekit_core::StoreId;
use statekit_stream::{EventStream, EventSubject};

use crate::error::{StoreError, StoreResult};
use crate::params::Params;
use crate::scope::Scope;
use crate::spec::Members;

/// Emitted on [`Store::update_events`] after state changed.
///
/// `old_state` is the state carried by the previous update (or the initial
/// state), `new_state` the state at emission time. Several commits within
/// one turn are coalesced into a single update.
#[derive(Debug)]
pub struct StateUpdate<S> {
    pub revision: u64,
    pub old_state: Rc<S>,
    pub new_state: Rc<S>,
}

impl<S> Clone for StateUpdate<S> {
    fn clone(&self) -> Self {
        Self {
            revision: self.revision,
            old_state: Rc::clone(&self.old_state),
            new_state: Rc::clone(&self.new_state),
        }
    }
}

pub(crate) struct StoreCore<S> {
    id: StoreId,
    params: Params,
    members: Rc<Members<S>>,
    state: RefCell<Rc<S>>,
    published: RefCell<Rc<S>>,
    revision: Cell<u64>,
    update_pending: Cell<bool>,
    updates: EventSubject<StateUpdate<S>>,
    notifications: EventSubject<Value>,
    spawner: Rc<dyn LocalSpawn>,
    disposed: Cell<bool>,
}

impl<S: 'static> StoreCore<S> {
    pub(crate) fn new(
        params: Params,
        members: Rc<Members<S>>,
        initial_state: Rc<S>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Rc<Self> {
        Rc::new(Self {
            id: StoreId::new(),
            params,
            members,
            published: RefCell::new(Rc::clone(&initial_state)),
            state: RefCell::new(initial_state),
            revision: Cell::new(0),
            update_pending: Cell::new(false),
            updates: EventSubject::new(),
            notifications: EventSubject::new(),
            spawner,
            disposed: Cell::new(false),
        })
    }

    pub(crate) fn id(&self) -> StoreId {
        self.id
    }

    pub(crate) fn params(&self) -> &Params {
        &self.params
    }

    pub(crate) fn state(&self) -> Rc<S> {
        Rc::clone(&self.state.borrow())
    }

    /// Run `task` on a later turn of the spawner, if the store still exists.
    fn defer(self: &Rc<Self>, what: &'static str, task: impl FnOnce(&StoreCore<S>) + 'static) {
        let core = Rc::downgrade(self);
        let spawned = self.spawner.spawn_local(async move {
            if let Some(core) = core.upgrade() {
                task(&core);
            }
        });
        if let Err(err) = spawned {
            warn!(store_id = %self.id, error = %err, "dropped deferred {what}");
        }
    }

    pub(crate) fn notify(self: &Rc<Self>, payload: Value) {
        if payload.is_null() || self.disposed.get() {
            return;
        }
        self.defer("notification", move |core| core.notifications.next(payload));
    }

    fn schedule_update(self: &Rc<Self>) {
        if self.update_pending.replace(true) {
            return;
        }
        self.defer("state update", |core| core.publish_update());
    }

    fn publish_update(&self) {
        self.update_pending.set(false);
        if self.disposed.get() {
            return;
        }
        let new_state = self.state();
        let old_state = self.published.replace(Rc::clone(&new_state));
        let revision = self.revision.get();
        trace!(store_id = %self.id, revision, "publishing state update");
        self.updates.next(StateUpdate {
            revision,
            old_state,
            new_state,
        });
    }

    fn commit(self: &Rc<Self>, action: &str, proposed: Rc<S>) -> StoreResult<bool> {
        if self.disposed.get() {
            return Err(StoreError::Disposed);
        }
        if Rc::ptr_eq(&self.state.borrow(), &proposed) {
            trace!(store_id = %self.id, action, "action left state unchanged");
            return Ok(false);
        }

        *self.state.borrow_mut() = proposed;
        let revision = self.revision.get() + 1;
        self.revision.set(revision);
        debug!(store_id = %self.id, action, revision, "state committed");

        self.schedule_update();
        Ok(true)
    }

    pub(crate) fn invoke(
        self: &Rc<Self>,
        name: &str,
        payload: Value,
    ) -> LocalBoxFuture<'static, StoreResult<bool>> {
        if self.disposed.get() {
            return future::ready(Err(StoreError::Disposed)).boxed_local();
        }
        let Some(action) = self.members.actions.get(name) else {
            let err = StoreError::UnknownAction(name.to_string());
            return future::ready(Err(err)).boxed_local();
        };

        let mut proposed = action(Scope::live(Rc::clone(self)), payload);
        let name = name.to_string();

        // Synchronous bodies are already done: apply them right away.
        if let Some(result) = (&mut proposed).now_or_never() {
            return future::ready(self.settle(&name, result)).boxed_local();
        }

        // The rest of the body runs on the spawner, awaited or not.
        let (tx, rx) = oneshot::channel();
        let core = Rc::clone(self);
        let task_name = name.clone();
        let spawned = self.spawner.spawn_local(async move {
            let result = proposed.await;
            let _ = tx.send(core.settle(&task_name, result));
        });
        if let Err(err) = spawned {
            warn!(store_id = %self.id, action = %name, error = %err, "cannot run action");
            return future::ready(Err(StoreError::Aborted(name))).boxed_local();
        }

        rx.map(move |settled| settled.unwrap_or_else(|_| Err(StoreError::Aborted(name))))
            .boxed_local()
    }

    fn settle(self: &Rc<Self>, action: &str, result: anyhow::Result<Rc<S>>) -> StoreResult<bool> {
        match result {
            Ok(state) => self.commit(action, state),
            Err(err) => {
                debug!(store_id = %self.id, action, error = %err, "action failed");
                Err(StoreError::Action(err))
            }
        }
    }

    /// Map a dispatched name onto an action: the name itself, else
    /// `on` + capitalised name.
    pub(crate) fn resolve_action(&self, name: &str) -> StoreResult<String> {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return Err(StoreError::invalid_argument("action name must be a non-empty string"));
        };
        if self.members.actions.contains_key(name) {
            return Ok(name.to_string());
        }

        let handler = format!("on{}{}", first.to_uppercase(), chars.as_str());
        if self.members.actions.contains_key(&handler) {
            Ok(handler)
        } else {
            Err(StoreError::UnknownAction(name.to_string()))
        }
    }

    fn get(&self, scope: &Scope<S>, name: &str, args: &Value) -> StoreResult<Value> {
        let getter = self
            .members
            .getters
            .get(name)
            .ok_or_else(|| StoreError::UnknownGetter(name.to_string()))?;
        getter(scope, args).map_err(StoreError::Getter)
    }

    pub(crate) fn spawn_local(
        &self,
        task: impl std::future::Future<Output = ()> + 'static,
    ) -> Result<(), futures::task::SpawnError> {
        self.spawner.spawn_local(task)
    }

    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        debug!(
            store_id = %self.id,
            update_subscribers = self.updates.subscriber_count(),
            notification_subscribers = self.notifications.subscriber_count(),
            "store disposed"
        );
        self.updates.complete();
        self.notifications.complete();
    }
}

/// Read-only handle: getters, params and event streams.
pub struct Store<S> {
    core: Rc<StoreCore<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<S: 'static> Store<S> {
    pub(crate) fn new(core: Rc<StoreCore<S>>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> StoreId {
        self.core.id
    }

    /// Same `Params` (by identity) for the whole lifetime of the store.
    pub fn params(&self) -> &Params {
        &self.core.params
    }

    /// Evaluate a getter without arguments.
    pub fn get(&self, getter: &str) -> StoreResult<Value> {
        self.get_with(getter, &Value::Null)
    }

    /// Evaluate a getter. Errors of the getter body are returned as
    /// [`StoreError::Getter`].
    pub fn get_with(&self, getter: &str, args: &Value) -> StoreResult<Value> {
        self.core.get(&Scope::live(Rc::clone(&self.core)), getter, args)
    }

    pub fn getter_names(&self) -> impl Iterator<Item = &str> {
        self.core.members.getters.keys().map(String::as_str)
    }

    pub fn update_events(&self) -> EventStream<StateUpdate<S>> {
        self.core.updates.as_event_stream()
    }

    pub fn notification_events(&self) -> EventStream<Value> {
        self.core.notifications.as_event_stream()
    }

    /// Freeze the current state; the snapshot's getters keep reading it no
    /// matter what the live store does afterwards.
    pub fn create_snapshot(&self) -> Snapshot<S> {
        Snapshot {
            core: Rc::clone(&self.core),
            state: self.core.state(),
            revision: self.core.revision.get(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.core.disposed.get()
    }
}

impl<S> core::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.core.id)
            .field("revision", &self.core.revision.get())
            .finish_non_exhaustive()
    }
}

/// Store handle that may also run actions.
pub struct Controller<S> {
    store: Store<S>,
}

impl<S> Clone for Controller<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: 'static> Controller<S> {
    pub(crate) fn new(core: Rc<StoreCore<S>>) -> Self {
        Self { store: Store::new(core) }
    }

    /// Run an action. Resolves to `true` when the state changed and `false`
    /// when the action returned the current state. A failing action leaves
    /// the state untouched and resolves to [`StoreError::Action`].
    ///
    /// A synchronous action is applied before this returns. An async one
    /// keeps running on the store's spawner and is applied when its body
    /// resolves, even if the returned future is dropped. Update events
    /// follow on a later turn of the spawner either way.
    pub fn invoke(
        &self,
        action: &str,
        payload: Value,
    ) -> LocalBoxFuture<'static, StoreResult<bool>> {
        self.store.core.invoke(action, payload)
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.store.core.members.actions.keys().map(String::as_str)
    }

    /// Read-only view of the same store.
    pub fn store(&self) -> &Store<S> {
        &self.store
    }
}

impl<S> Deref for Controller<S> {
    type Target = Store<S>;

    fn deref(&self) -> &Store<S> {
        &self.store
    }
}

impl<S> core::fmt::Debug for Controller<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Controller").field(&self.store).finish()
    }
}

/// Point-in-time, read-only copy of a store.
///
/// State is held by reference: since committed states are never mutated
/// in place, the snapshot is as good as a deep copy.
pub struct Snapshot<S> {
    core: Rc<StoreCore<S>>,
    state: Rc<S>,
    revision: u64,
}

impl<S: 'static> Snapshot<S> {
    pub fn state(&self) -> Rc<S> {
        Rc::clone(&self.state)
    }

    /// Revision of the store when the snapshot was taken.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn params(&self) -> &Params {
        &self.core.params
    }

    pub fn get(&self, getter: &str) -> StoreResult<Value> {
        self.get_with(getter, &Value::Null)
    }

    pub fn get_with(&self, getter: &str, args: &Value) -> StoreResult<Value> {
        let scope = Scope::pinned(Rc::clone(&self.core), Rc::clone(&self.state));
        self.core.get(&scope, getter, args)
    }
}

impl<S> core::fmt::Debug for Snapshot<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Snapshot")
            .field("store_id", &self.core.id)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}
