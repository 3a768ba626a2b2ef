//! Read-only, validating access to JSON configuration data.
//!
//! Every typed lookup comes in three flavours:
//!
//! - `get_x(path)`: the value is mandatory.
//! - `get_x_or(path, default)`: a missing value yields `default`.
//! - `get_x_opt(path)`: a missing or `null` value yields `None`.
//!
//! Present values that violate the lookup's rule always fail with
//! [`ConfigError::InvalidValue`].

use std::fmt;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{ConfigError, ConfigResult};

/// Location of a value inside a [`Config`].
///
/// A single key addresses a top-level attribute, a list of keys walks nested
/// objects. The empty list addresses the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigPath {
    Key(String),
    Nested(Vec<String>),
}

impl ConfigPath {
    fn segments(&self) -> &[String] {
        match self {
            ConfigPath::Key(key) => std::slice::from_ref(key),
            ConfigPath::Nested(keys) => keys,
        }
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escaped: Vec<String> = self
            .segments()
            .iter()
            .map(|s| s.replace('\\', "\\\\").replace('|', "\\|").replace('\'', "\\'"))
            .collect();
        f.write_str(&escaped.join("|"))
    }
}

impl From<&str> for ConfigPath {
    fn from(value: &str) -> Self {
        ConfigPath::Key(value.to_string())
    }
}

impl From<String> for ConfigPath {
    fn from(value: String) -> Self {
        ConfigPath::Key(value)
    }
}

impl From<&[&str]> for ConfigPath {
    fn from(value: &[&str]) -> Self {
        ConfigPath::Nested(value.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ConfigPath {
    fn from(value: [&str; N]) -> Self {
        ConfigPath::Nested(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<String>> for ConfigPath {
    fn from(value: Vec<String>) -> Self {
        ConfigPath::Nested(value)
    }
}

/// What a lookup does when the value is missing.
enum Fallback<T> {
    Required,
    Default(T),
    Null,
}

/// Read-only view over a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    data: Value,
}

macro_rules! typed_lookups {
    ($get:ident, $get_or:ident, $get_opt:ident, $t:ty, $rule:literal, $convert:path) => {
        pub fn $get(&self, path: impl Into<ConfigPath>) -> ConfigResult<$t> {
            let path = path.into();
            let missing = ConfigError::missing(path.to_string());
            self.constrained(path, Fallback::Required, $rule, $convert)?
                .ok_or(missing)
        }

        pub fn $get_or(&self, path: impl Into<ConfigPath>, default: $t) -> ConfigResult<$t> {
            let path = path.into();
            let missing = ConfigError::missing(path.to_string());
            self.constrained(path, Fallback::Default(default), $rule, $convert)?
                .ok_or(missing)
        }

        pub fn $get_opt(&self, path: impl Into<ConfigPath>) -> ConfigResult<Option<$t>> {
            self.constrained(path.into(), Fallback::Null, $rule, $convert)
        }
    };
}

impl Config {
    /// Wrap a JSON object. Any other JSON value is rejected.
    pub fn new(data: Value) -> ConfigResult<Self> {
        if data.is_object() {
            Ok(Self { data })
        } else {
            Err(ConfigError::NotAnObject)
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            data: Value::Object(map),
        }
    }

    /// The underlying JSON object.
    pub fn as_value(&self) -> &Value {
        &self.data
    }

    fn lookup(&self, path: &ConfigPath) -> Option<&Value> {
        let mut current = &self.data;
        for key in path.segments() {
            current = current.as_object()?.get(key)?;
        }
        Some(current)
    }

    fn constrained<T>(
        &self,
        path: ConfigPath,
        fallback: Fallback<T>,
        rule: &str,
        convert: impl FnOnce(&Value) -> Option<T>,
    ) -> ConfigResult<Option<T>> {
        match (self.lookup(&path), fallback) {
            (None, Fallback::Required) => Err(ConfigError::missing(path.to_string())),
            (None, Fallback::Default(default)) => Ok(Some(default)),
            (None, Fallback::Null) | (Some(Value::Null), Fallback::Null) => Ok(None),
            (Some(value), fallback) => {
                let rule = match fallback {
                    Fallback::Null => format!("{rule} or null"),
                    _ => rule.to_string(),
                };
                convert(value)
                    .map(Some)
                    .ok_or_else(|| ConfigError::invalid(path.to_string(), rule))
            }
        }
    }

    /// Raw lookup. A missing value yields `default`, or fails if there is none.
    pub fn get(&self, path: impl Into<ConfigPath>, default: Option<Value>) -> ConfigResult<Value> {
        let path = path.into();
        match (self.lookup(&path), default) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(ConfigError::missing(path.to_string())),
        }
    }

    typed_lookups!(
        get_boolean,
        get_boolean_or,
        get_boolean_opt,
        bool,
        "must be a boolean value or string 'true' or string 'false'",
        convert::boolean
    );

    typed_lookups!(
        get_number,
        get_number_or,
        get_number_opt,
        f64,
        "must be numeric",
        convert::number
    );

    typed_lookups!(
        get_integer,
        get_integer_or,
        get_integer_opt,
        i64,
        "must be an integer number",
        convert::integer
    );

    typed_lookups!(
        get_string,
        get_string_or,
        get_string_opt,
        String,
        "must be a string",
        convert::string
    );

    typed_lookups!(
        get_object,
        get_object_or,
        get_object_opt,
        Map<String, Value>,
        "must be an object",
        convert::object
    );

    typed_lookups!(
        get_array,
        get_array_or,
        get_array_opt,
        Vec<Value>,
        "must be an array",
        convert::array
    );

    typed_lookups!(
        get_config,
        get_config_or,
        get_config_opt,
        Config,
        "must be an object",
        convert::config
    );

    pub fn get_non_empty_string(&self, path: impl Into<ConfigPath>) -> ConfigResult<String> {
        let path = path.into();
        let missing = ConfigError::missing(path.to_string());
        self.constrained(path, Fallback::Required, "must be a non-empty string", |v| {
            convert::string(v).filter(|s| !s.is_empty())
        })?
        .ok_or(missing)
    }

    pub fn get_non_blank_string(&self, path: impl Into<ConfigPath>) -> ConfigResult<String> {
        let path = path.into();
        let missing = ConfigError::missing(path.to_string());
        self.constrained(path, Fallback::Required, "must be a non-blank string", |v| {
            convert::string(v).filter(|s| !s.trim().is_empty())
        })?
        .ok_or(missing)
    }

    /// Trimmed string, `None` when missing, null or blank.
    pub fn get_trimmed_string_opt(
        &self,
        path: impl Into<ConfigPath>,
    ) -> ConfigResult<Option<String>> {
        Ok(self
            .get_string_opt(path)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub fn get_string_matching(
        &self,
        path: impl Into<ConfigPath>,
        regex: &Regex,
        default: Option<String>,
    ) -> ConfigResult<String> {
        let rule = format!("must be a string matching regex /{}/", regex.as_str());
        let fallback = match default {
            Some(d) => Fallback::Default(d),
            None => Fallback::Required,
        };
        let path = path.into();
        let missing = ConfigError::missing(path.to_string());
        self.constrained(path, fallback, &rule, |v| {
            v.as_str().filter(|s| regex.is_match(s)).map(str::to_string)
        })?
        .ok_or(missing)
    }

    pub fn is_defined(&self, path: impl Into<ConfigPath>) -> bool {
        self.lookup(&path.into()).is_some()
    }

    pub fn is_undefined(&self, path: impl Into<ConfigPath>) -> bool {
        !self.is_defined(path)
    }

    /// Defined and not `null`.
    pub fn is_something(&self, path: impl Into<ConfigPath>) -> bool {
        !matches!(self.lookup(&path.into()), None | Some(Value::Null))
    }

    pub fn is_nothing(&self, path: impl Into<ConfigPath>) -> bool {
        !self.is_something(path)
    }

    pub fn is_object(&self, path: impl Into<ConfigPath>) -> bool {
        matches!(self.lookup(&path.into()), Some(Value::Object(_)))
    }

    pub fn is_array(&self, path: impl Into<ConfigPath>) -> bool {
        matches!(self.lookup(&path.into()), Some(Value::Array(_)))
    }

    /// String, number or boolean.
    pub fn is_scalar(&self, path: impl Into<ConfigPath>) -> bool {
        matches!(
            self.lookup(&path.into()),
            Some(Value::String(_) | Value::Number(_) | Value::Bool(_))
        )
    }

    /// Top-level keys, each checked against `pattern` if one is given.
    pub fn keys(&self, pattern: Option<&Regex>) -> ConfigResult<Vec<String>> {
        let map = self.data.as_object().ok_or(ConfigError::NotAnObject)?;
        let mut keys = Vec::with_capacity(map.len());
        for key in map.keys() {
            if let Some(re) = pattern {
                if !re.is_match(key) {
                    return Err(ConfigError::invalid_key(
                        key.clone(),
                        format!("does not match regular expression /{}/", re.as_str()),
                    ));
                }
            }
            keys.push(key.clone());
        }
        Ok(keys)
    }
}

mod convert {
    use serde_json::{Map, Value};

    use super::Config;

    pub(super) fn boolean(v: &Value) -> Option<bool> {
        match v {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s == "true" => Some(true),
            Value::String(s) if s == "false" => Some(false),
            _ => None,
        }
    }

    pub(super) fn number(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub(super) fn integer(v: &Value) -> Option<i64> {
        match v {
            Value::Number(n) if n.is_i64() => n.as_i64(),
            _ => number(v).map(|n| n.floor() as i64),
        }
    }

    pub(super) fn string(v: &Value) -> Option<String> {
        match v {
            Value::Null => Some(String::new()),
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub(super) fn object(v: &Value) -> Option<Map<String, Value>> {
        v.as_object().cloned()
    }

    pub(super) fn array(v: &Value) -> Option<Vec<Value>> {
        v.as_array().cloned()
    }

    pub(super) fn config(v: &Value) -> Option<Config> {
        v.is_object().then(|| Config { data: v.clone() })
    }
}
