//! Declarative store description: initial state, default params, getters and
//! actions, registered by name.

use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use std::sync::LazyLock;

use futures::future::{FutureExt, LocalBoxFuture};
use regex::Regex;
use serde_json::{Map, Value};
use statekit_core::{Config, ConfigError, ConfigResult};

use crate::params::Params;
use crate::scope::Scope;

/// Getter body: reads state and params, returns a JSON value.
pub type GetterFn<S> = Rc<dyn Fn(&Scope<S>, &Value) -> anyhow::Result<Value>>;

/// Action body: proposes the next state. Returning the current `Rc`
/// means "no change".
pub type ActionFn<S> =
    Rc<dyn Fn(Scope<S>, Value) -> LocalBoxFuture<'static, anyhow::Result<Rc<S>>>>;

static MEMBER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-zA-Z0-9]*$").expect("member name pattern is valid"));

/// Names taken by the store, controller and scope surfaces.
const RESERVED: &[&str] = &[
    "actionNames",
    "constructor",
    "createSnapshot",
    "dispatch",
    "dispose",
    "get",
    "getterNames",
    "getWith",
    "id",
    "invoke",
    "isDisposed",
    "notificationEvents",
    "notify",
    "params",
    "state",
    "updateEvents",
];

pub(crate) enum InitialState<S> {
    Value(Rc<S>),
    Factory(Rc<dyn Fn(&Params) -> S>),
}

impl<S> Clone for InitialState<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(state) => Self::Value(Rc::clone(state)),
            Self::Factory(f) => Self::Factory(Rc::clone(f)),
        }
    }
}

impl<S> InitialState<S> {
    pub(crate) fn resolve(&self, params: &Params) -> Rc<S> {
        match self {
            Self::Value(state) => Rc::clone(state),
            Self::Factory(f) => Rc::new(f(params)),
        }
    }
}

/// Builder for a store type.
///
/// ```ignore
/// let spec = StoreSpec::new(json!({"count": 0}))
///     .getter("getCount", |scope, _| Ok(scope.state()["count"].clone()))
///     .action("increment", |scope, _| {
///         Ok(transform_rc(&scope.state(), &json!({"count": {"$set": 1}}))?)
///     });
/// ```
///
/// Nothing is validated until the spec is turned into a
/// [`StoreFactory`](crate::StoreFactory).
pub struct StoreSpec<S> {
    pub(crate) initial_state: InitialState<S>,
    pub(crate) default_params: Value,
    pub(crate) getters: Vec<(String, GetterFn<S>)>,
    pub(crate) actions: Vec<(String, ActionFn<S>)>,
}

impl<S: 'static> StoreSpec<S> {
    /// Every instance starts from this very value (shared, not copied).
    pub fn new(initial_state: S) -> Self {
        Self::with_initial(InitialState::Value(Rc::new(initial_state)))
    }

    /// Compute the initial state per instance from its params.
    pub fn from_fn(initial_state: impl Fn(&Params) -> S + 'static) -> Self {
        Self::with_initial(InitialState::Factory(Rc::new(initial_state)))
    }

    fn with_initial(initial_state: InitialState<S>) -> Self {
        Self {
            initial_state,
            default_params: Value::Null,
            getters: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Must be a JSON object (or null for none).
    pub fn default_params(mut self, params: Value) -> Self {
        self.default_params = params;
        self
    }

    pub fn getter<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Scope<S>, &Value) -> anyhow::Result<Value> + 'static,
    {
        self.getters.push((name.into(), Rc::new(f)));
        self
    }

    /// Synchronous action. The body runs as soon as the action is invoked.
    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Scope<S>, Value) -> anyhow::Result<Rc<S>> + 'static,
    {
        let action: ActionFn<S> = Rc::new(move |scope, payload| {
            let result = f(&scope, payload);
            async move { result }.boxed_local()
        });
        self.actions.push((name.into(), action));
        self
    }

    /// Action whose next state is only known later. The current state is
    /// compared against the proposed one when the future resolves.
    pub fn async_action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Scope<S>, Value) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Rc<S>>> + 'static,
    {
        let action: ActionFn<S> = Rc::new(move |scope, payload| f(scope, payload).boxed_local());
        self.actions.push((name.into(), action));
        self
    }
}

impl<S> core::fmt::Debug for StoreSpec<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreSpec")
            .field("default_params", &self.default_params)
            .field("getters", &self.getters.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("actions", &self.actions.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Validated getters and actions of a store type.
pub(crate) struct Members<S> {
    pub(crate) getters: BTreeMap<String, GetterFn<S>>,
    pub(crate) actions: BTreeMap<String, ActionFn<S>>,
}

impl<S> Members<S> {
    pub(crate) fn validate(
        getters: Vec<(String, GetterFn<S>)>,
        actions: Vec<(String, ActionFn<S>)>,
    ) -> ConfigResult<Self> {
        let mut members = Members {
            getters: BTreeMap::new(),
            actions: BTreeMap::new(),
        };

        for (name, getter) in getters {
            check_name(&name)?;
            if members.getters.insert(name.clone(), getter).is_some() {
                return Err(ConfigError::DuplicateMember(name));
            }
        }
        for (name, action) in actions {
            check_name(&name)?;
            let clashes = members.getters.contains_key(&name);
            if clashes || members.actions.insert(name.clone(), action).is_some() {
                return Err(ConfigError::DuplicateMember(name));
            }
        }

        Ok(members)
    }
}

fn check_name(name: &str) -> ConfigResult<()> {
    if !MEMBER_NAME.is_match(name) {
        return Err(ConfigError::invalid_key(
            name,
            format!("does not match regular expression /{}/", MEMBER_NAME.as_str()),
        ));
    }
    if RESERVED.contains(&name) {
        return Err(ConfigError::illegal_member(name));
    }
    Ok(())
}

/// Defaults merged under every instance's params.
pub(crate) fn default_params(value: &Value) -> ConfigResult<Map<String, Value>> {
    let mut holder = Map::new();
    holder.insert("defaultParams".to_string(), value.clone());
    Ok(Config::from_map(holder)
        .get_object_opt("defaultParams")?
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn getter() -> GetterFn<()> {
        Rc::new(|_, _| Ok(Value::Null))
    }

    fn action() -> ActionFn<()> {
        Rc::new(|scope, _| {
            let state = scope.state();
            async move { Ok(state) }.boxed_local()
        })
    }

    #[test]
    fn accepts_camel_case_names() {
        let members = Members::validate(
            vec![("getCount".into(), getter()), ("items2".into(), getter())],
            vec![("setCount".into(), action())],
        )
        .unwrap();
        assert_eq!(members.getters.keys().collect::<Vec<_>>(), vec!["getCount", "items2"]);
        assert_eq!(members.actions.len(), 1);
    }

    #[test]
    fn rejects_names_not_matching_the_pattern() {
        for bad in ["", "GetCount", "get_count", "1st", "get-count"] {
            let err = Members::validate(vec![(bad.into(), getter())], vec![]).err().unwrap();
            assert!(matches!(err, ConfigError::InvalidKey { .. }), "{bad}: {err}");
        }

        let err = Members::validate(vec![], vec![("Reset".into(), action())]).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Key 'Reset' does not match regular expression /^[a-z][a-zA-Z0-9]*$/"
        );
    }

    #[test]
    fn rejects_reserved_names() {
        let err = Members::validate(vec![("state".into(), getter())], vec![]).err().unwrap();
        assert_eq!(err, ConfigError::IllegalMemberName("state".into()));

        let err = Members::validate(vec![], vec![("notify".into(), action())]).err().unwrap();
        assert_eq!(err, ConfigError::IllegalMemberName("notify".into()));
    }

    #[test]
    fn rejects_duplicates_across_getters_and_actions() {
        let getters = vec![("count".into(), getter())];
        let err = Members::validate(getters, vec![("count".into(), action())]).err().unwrap();
        assert_eq!(err, ConfigError::DuplicateMember("count".into()));

        let err = Members::validate(vec![("a".into(), getter()), ("a".into(), getter())], vec![])
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::DuplicateMember("a".into()));
    }

    #[test]
    fn default_params_must_be_an_object_or_null() {
        assert!(default_params(&Value::Null).unwrap().is_empty());
        assert_eq!(default_params(&json!({"a": 1})).unwrap().len(), 1);
        assert_eq!(
            default_params(&json!([1])).unwrap_err().to_string(),
            "Erroneous attribute 'defaultParams' (Invalid value - must be an object or null!)"
        );
    }
}
