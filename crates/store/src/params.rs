//! Frozen store parameters.

use std::rc::Rc;

use serde_json::{Map, Value};
use statekit_core::Config;

/// Initialization parameters of a store instance.
///
/// The shallow merge of the declared defaults and the caller's overrides,
/// fixed for the lifetime of the store. Clones share the same map, so
/// [`Params::ptr_eq`] tells whether two handles come from the same store.
#[derive(Debug, Clone, PartialEq)]
pub struct Params(Rc<Map<String, Value>>);

impl Params {
    pub(crate) fn new(map: Map<String, Value>) -> Self {
        Self(Rc::new(map))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Typed, validating access (`params.config().get_integer("pageSize")`).
    pub fn config(&self) -> Config {
        Config::from_map((*self.0).clone())
    }

    pub fn ptr_eq(&self, other: &Params) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
