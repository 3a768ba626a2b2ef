use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use proptest::prelude::*;
use serde_json::{Value, json};

use statekit_core::{shallow_merge, transform_rc};
use statekit_store::{Store, StoreError, StoreFactory, StoreInstance, StoreSpec};
use statekit_stream::{EventStream, Subscriber};

fn record<T: Clone + 'static>(stream: &EventStream<T>) -> Rc<RefCell<Vec<T>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    stream.subscribe(move |v| sink.borrow_mut().push(v));
    seen
}

fn params_spec() -> StoreSpec<Value> {
    StoreSpec::new(json!({"param1": 111, "param2": 222}))
        .getter("getParam1", |scope, _| Ok(scope.state()["param1"].clone()))
        .getter("getParam2", |scope, _| Ok(scope.state()["param2"].clone()))
        .getter("getParam", |scope, args| {
            let key = args.as_str().ok_or_else(|| anyhow::anyhow!("parameter name expected"))?;
            Ok(scope.state()[key].clone())
        })
        .action("setParam1", |scope, value| {
            anyhow::ensure!(value.is_number(), "param1 must be numeric");
            let state = scope.state();
            let mut patch = serde_json::Map::new();
            patch.insert("param1".to_string(), value);
            let base = state.as_object().cloned().unwrap_or_default();
            Ok(Rc::new(Value::Object(shallow_merge(&base, &patch))))
        })
        .action("assignParam1", |scope, value| {
            Ok(transform_rc(&scope.state(), &json!({"param1": {"$set": value}}))?)
        })
        .action("touch", |scope, _| Ok(scope.state()))
        .action("announce", |scope, payload| {
            scope.notify(payload);
            Ok(scope.state())
        })
}

fn create(pool: &LocalPool) -> StoreInstance<Value> {
    statekit_observability::init_for_tests();
    Store::create(params_spec(), pool.spawner()).unwrap()
}

#[test]
fn changing_action_resolves_true_and_emits_once() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let updates = record(&instance.store.update_events());

    let changed = pool.run_until(instance.controller.invoke("setParam1", json!(333)));
    assert!(changed.unwrap());
    pool.run_until_stalled();

    assert_eq!(updates.borrow().len(), 1);
    assert_eq!(instance.store.get("getParam1").unwrap(), json!(333));
    assert_eq!(instance.store.get("getParam2").unwrap(), json!(222));

    let update = updates.borrow()[0].clone();
    assert_eq!(update.revision, 1);
    assert_eq!(*update.old_state, json!({"param1": 111, "param2": 222}));
    assert_eq!(*update.new_state, json!({"param1": 333, "param2": 222}));
}

#[test]
fn unchanged_state_resolves_false_without_event() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let updates = record(&instance.store.update_events());

    let changed = pool.run_until(instance.controller.invoke("touch", Value::Null));
    assert!(!changed.unwrap());
    pool.run_until_stalled();

    assert!(updates.borrow().is_empty());
}

#[test]
fn failing_action_rejects_and_keeps_state() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let updates = record(&instance.store.update_events());
    let before = instance.store.create_snapshot().state();

    let err = pool
        .run_until(instance.controller.invoke("setParam1", json!("not a number")))
        .unwrap_err();
    pool.run_until_stalled();

    assert!(matches!(err, StoreError::Action(_)));
    assert_eq!(err.to_string(), "param1 must be numeric");
    assert!(Rc::ptr_eq(&before, &instance.store.create_snapshot().state()));
    assert!(updates.borrow().is_empty());
}

#[test]
fn updates_are_emitted_after_the_triggering_call() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let updates = record(&instance.store.update_events());

    let pending = instance.controller.invoke("setParam1", json!(1));
    assert_eq!(instance.store.get("getParam1").unwrap(), json!(1));
    assert!(updates.borrow().is_empty());

    assert!(pool.run_until(pending).unwrap());
    assert!(updates.borrow().is_empty());
    pool.run_until_stalled();
    assert_eq!(updates.borrow().len(), 1);
}

#[test]
fn commits_within_one_turn_coalesce_into_one_update() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let updates = record(&instance.store.update_events());

    for value in [1, 2, 3] {
        let _ = instance.controller.invoke("setParam1", json!(value));
    }
    pool.run_until_stalled();

    let updates = updates.borrow();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].revision, 3);
    assert_eq!(updates[0].old_state["param1"], json!(111));
    assert_eq!(updates[0].new_state["param1"], json!(3));
}

#[test]
fn old_state_follows_the_previous_update() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let updates = record(&instance.store.update_events());

    for value in [1, 2] {
        let _ = instance.controller.invoke("setParam1", json!(value));
        pool.run_until_stalled();
    }

    let updates = updates.borrow();
    assert_eq!(updates.len(), 2);
    assert!(Rc::ptr_eq(&updates[0].new_state, &updates[1].old_state));
}

#[test]
fn async_actions_commit_when_resolved() {
    let mut pool = LocalPool::new();
    statekit_observability::init_for_tests();

    let (tx, rx) = oneshot::channel::<Value>();
    let rx = Rc::new(RefCell::new(Some(rx)));
    let spec = params_spec().async_action("loadParam2", move |scope, _| {
        let rx = rx.borrow_mut().take();
        async move {
            let value = rx.ok_or_else(|| anyhow::anyhow!("already loaded"))?.await?;
            let plan = json!({"param2": {"$set": value}});
            Ok::<_, anyhow::Error>(transform_rc(&scope.state(), &plan)?)
        }
    });
    let instance = Store::create(spec, pool.spawner()).unwrap();
    let updates = record(&instance.store.update_events());

    let pending = instance.controller.invoke("loadParam2", Value::Null);
    pool.run_until_stalled();
    assert_eq!(instance.store.get("getParam2").unwrap(), json!(222));

    // State changed while the action was in flight; the action sees it.
    let _ = instance.controller.invoke("setParam1", json!(5));
    tx.send(json!(999)).unwrap();
    assert!(pool.run_until(pending).unwrap());
    pool.run_until_stalled();

    assert_eq!(instance.store.get("getParam1").unwrap(), json!(5));
    assert_eq!(instance.store.get("getParam2").unwrap(), json!(999));
    assert!(!updates.borrow().is_empty());

    let again = pool.run_until(instance.controller.invoke("loadParam2", Value::Null));
    assert_eq!(again.unwrap_err().to_string(), "already loaded");
}

fn awaiting_spec() -> (StoreSpec<Value>, oneshot::Sender<Value>) {
    let (tx, rx) = oneshot::channel::<Value>();
    let rx = Rc::new(RefCell::new(Some(rx)));
    let spec = params_spec().async_action("loadParam1", move |scope, _| {
        let rx = rx.borrow_mut().take();
        async move {
            let value = rx.ok_or_else(|| anyhow::anyhow!("already loaded"))?.await?;
            Ok::<_, anyhow::Error>(transform_rc(
                &scope.state(),
                &json!({"param1": {"$set": value}}),
            )?)
        }
    });
    (spec, tx)
}

#[test]
fn async_actions_commit_without_being_awaited() {
    let mut pool = LocalPool::new();
    statekit_observability::init_for_tests();

    let (spec, tx) = awaiting_spec();
    let instance = Store::create(spec, pool.spawner()).unwrap();
    let updates = record(&instance.store.update_events());

    drop(instance.controller.invoke("loadParam1", Value::Null));
    pool.run_until_stalled();
    assert_eq!(instance.store.get("getParam1").unwrap(), json!(111));

    assert!(tx.send(json!(2)).is_ok());
    pool.run_until_stalled();

    assert_eq!(instance.store.get("getParam1").unwrap(), json!(2));
    assert_eq!(updates.borrow().len(), 1);
    assert_eq!(updates.borrow()[0].new_state["param1"], json!(2));
}

#[test]
fn async_actions_started_by_a_subscriber_complete() {
    let mut pool = LocalPool::new();
    statekit_observability::init_for_tests();

    let (spec, tx) = awaiting_spec();
    let instance = Store::create(spec, pool.spawner()).unwrap();
    let updates = record(&instance.store.update_events());

    let controller = instance.controller.clone();
    instance
        .store
        .update_events()
        .subscribe(move |update: statekit_store::StateUpdate<Value>| {
            if update.revision == 1 {
                let _ = controller.invoke("loadParam1", Value::Null);
            }
        });

    let _ = instance.controller.invoke("setParam1", json!(1));
    pool.run_until_stalled();
    assert!(tx.send(json!(7)).is_ok());
    pool.run_until_stalled();

    let revisions: Vec<u64> = updates.borrow().iter().map(|u| u.revision).collect();
    assert_eq!(revisions, vec![1, 2]);
    assert_eq!(instance.store.get("getParam1").unwrap(), json!(7));
}

#[test]
fn pending_actions_abort_when_the_executor_goes_away() {
    let pool = LocalPool::new();
    statekit_observability::init_for_tests();

    let (spec, _tx) = awaiting_spec();
    let instance = Store::create(spec, pool.spawner()).unwrap();

    let pending = instance.controller.invoke("loadParam1", Value::Null);
    drop(pool);

    let err = futures::executor::block_on(pending).unwrap_err();
    assert!(matches!(err, StoreError::Aborted(name) if name == "loadParam1"));
    assert_eq!(instance.store.get("getParam1").unwrap(), json!(111));
}

#[test]
fn notifications_are_deferred_and_skip_null() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let notes = record(&instance.store.notification_events());

    let _ = instance.controller.invoke("announce", json!({"kind": "saved"}));
    let _ = instance.controller.invoke("announce", Value::Null);
    assert!(notes.borrow().is_empty());

    pool.run_until_stalled();
    assert_eq!(*notes.borrow(), vec![json!({"kind": "saved"})]);
}

#[test]
fn getters_take_arguments_and_report_errors() {
    let pool = LocalPool::new();
    let instance = create(&pool);

    assert_eq!(instance.store.get_with("getParam", &json!("param2")).unwrap(), json!(222));
    assert!(matches!(instance.store.get("getParam"), Err(StoreError::Getter(_))));
    assert!(matches!(
        instance.store.get("getParam3"),
        Err(StoreError::UnknownGetter(name)) if name == "getParam3"
    ));
    assert_eq!(
        instance.store.getter_names().collect::<Vec<_>>(),
        vec!["getParam", "getParam1", "getParam2"]
    );
    assert!(instance.controller.action_names().any(|name| name == "setParam1"));
}

#[test]
fn unknown_actions_are_rejected() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let err = pool
        .run_until(instance.controller.invoke("explode", Value::Null))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownAction(_)));
}

#[test]
fn snapshot_is_detached_from_later_changes() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let notes = record(&instance.store.notification_events());

    let snapshot = instance.store.create_snapshot();
    let _ = instance.controller.invoke("setParam1", json!(444));
    pool.run_until_stalled();

    assert_eq!(snapshot.get("getParam1").unwrap(), json!(111));
    assert_eq!(snapshot.revision(), 0);
    assert_eq!(instance.store.get("getParam1").unwrap(), json!(444));
    assert!(snapshot.params().ptr_eq(instance.store.params()));
    assert!(notes.borrow().is_empty());
}

#[test]
fn initial_state_can_be_derived_from_params() {
    let pool = LocalPool::new();
    statekit_observability::init_for_tests();

    let factory = StoreFactory::new(
        StoreSpec::from_fn(|params| {
            let size = params.config().get_integer_or("pageSize", 10).unwrap_or(10);
            json!({"pageSize": size, "rows": []})
        })
        .default_params(json!({"pageSize": 25}))
        .getter("getPageSize", |scope, _| Ok(scope.state()["pageSize"].clone())),
    )
    .unwrap();

    let defaults = factory.create(None, pool.spawner()).unwrap();
    let custom = factory.create(Some(json!({"pageSize": 50})), pool.spawner()).unwrap();
    assert_eq!(defaults.store.get("getPageSize").unwrap(), json!(25));
    assert_eq!(custom.store.get("getPageSize").unwrap(), json!(50));
}

#[test]
fn dispose_completes_streams_and_rejects_actions() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);

    let completed = Rc::new(Cell::new(0));
    for _ in 0..2 {
        let counter = Rc::clone(&completed);
        instance
            .store
            .update_events()
            .subscribe(Subscriber::new().on_complete(move || counter.set(counter.get() + 1)));
    }
    let notes_done = Rc::new(Cell::new(false));
    let done = Rc::clone(&notes_done);
    instance
        .store
        .notification_events()
        .subscribe(Subscriber::new().on_complete(move || done.set(true)));

    instance.dispose();
    instance.dispose();

    assert!(instance.store.is_disposed());
    assert_eq!(completed.get(), 2);
    assert!(notes_done.get());

    let err = pool
        .run_until(instance.controller.invoke("setParam1", json!(1)))
        .unwrap_err();
    assert!(matches!(err, StoreError::Disposed));
    assert_eq!(instance.store.get("getParam1").unwrap(), json!(111));

    let late = Rc::new(Cell::new(false));
    let flag = Rc::clone(&late);
    instance
        .store
        .update_events()
        .subscribe(Subscriber::new().on_complete(move || flag.set(true)));
    assert!(late.get());
}

#[test]
fn subscribers_may_run_actions_while_an_update_is_delivered() {
    let mut pool = LocalPool::new();
    let instance = create(&pool);
    let updates = record(&instance.store.update_events());

    let controller = instance.controller.clone();
    instance.store.update_events().subscribe(move |update: statekit_store::StateUpdate<Value>| {
        if update.revision == 1 {
            let _ = controller.invoke("setParam1", json!(2));
        }
    });

    let _ = instance.controller.invoke("setParam1", json!(1));
    pool.run_until_stalled();

    let revisions: Vec<u64> = updates.borrow().iter().map(|u| u.revision).collect();
    assert_eq!(revisions, vec![1, 2]);
    assert_eq!(instance.store.get("getParam1").unwrap(), json!(2));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Property: one update event per action that reported a change, and
    /// the getter always reflects the last value.
    #[test]
    fn one_update_per_effective_change(values in prop::collection::vec(0i64..4, 1..20)) {
        let mut pool = LocalPool::new();
        let instance = create(&pool);
        let updates = record(&instance.store.update_events());

        let mut changes = 0;
        for value in &values {
            if pool.run_until(instance.controller.invoke("assignParam1", json!(value))).unwrap() {
                changes += 1;
            }
            pool.run_until_stalled();
        }

        prop_assert_eq!(updates.borrow().len(), changes);
        prop_assert_eq!(instance.store.get("getParam1").unwrap(), json!(values[values.len() - 1]));
    }
}
