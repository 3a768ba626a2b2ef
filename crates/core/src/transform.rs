//! Immutable updates of JSON values driven by a transformation plan.
//!
//! A plan mirrors the shape of the value it updates. Plain keys descend into
//! objects (or arrays, for numeric keys); keys starting with `$` are
//! modifiers applied at the current node and must be the only key of their
//! plan object.
//!
//! ```ignore
//! let next = transform(&state, &json!({ "todos": { "$append": "write docs" } }))?;
//! ```

use std::collections::BTreeSet;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::TransformError;

/// Apply `plan` to `value`, returning the updated copy.
///
/// Parts of the value the plan does not touch are copied unchanged.
pub fn transform(value: &Value, plan: &Value) -> Result<Value, TransformError> {
    let plan = plan
        .as_object()
        .ok_or_else(|| {
            TransformError::illegal_plan(format!("plan must be an object, got {plan}"))
        })?;

    if let Some(modifier) = plan.keys().find(|k| k.starts_with('$')) {
        if plan.len() > 1 {
            return Err(TransformError::IllegalModifier(format!(
                "{modifier} (mixed with other keys)"
            )));
        }
        return apply_modifier(value, modifier, &plan[modifier]);
    }

    let mut result = value.clone();
    for (key, sub_plan) in plan {
        if !sub_plan.is_object() {
            return Err(TransformError::illegal_plan(format!(
                "plan for key '{key}' must be an object, got {sub_plan}"
            )));
        }
        match &mut result {
            Value::Object(map) => {
                let current = map.get(key).cloned().unwrap_or(Value::Null);
                let updated = transform(&current, sub_plan)?;
                if updated != current {
                    map.insert(key.clone(), updated);
                }
            }
            Value::Array(items) => {
                let idx = parse_index(key, items.len())?;
                let updated = transform(&items[idx], sub_plan)?;
                items[idx] = updated;
            }
            _ => {
                return Err(TransformError::TypeMismatch {
                    modifier: "a nested key",
                    expected: "an object or an array",
                });
            }
        }
    }
    Ok(result)
}

/// Like [`transform`], but hands back `state` itself when the plan does not
/// change anything, so reference comparisons keep working.
pub fn transform_rc(state: &Rc<Value>, plan: &Value) -> Result<Rc<Value>, TransformError> {
    let updated = transform(state, plan)?;
    if updated == **state {
        Ok(Rc::clone(state))
    } else {
        Ok(Rc::new(updated))
    }
}

fn parse_index(key: &str, len: usize) -> Result<usize, TransformError> {
    key.parse::<usize>()
        .ok()
        .filter(|idx| idx.to_string() == key && *idx < len)
        .ok_or_else(|| TransformError::illegal_plan(format!("illegal array key: {key}")))
}

fn apply_modifier(value: &Value, modifier: &str, arg: &Value) -> Result<Value, TransformError> {
    match modifier {
        "$set" => Ok(arg.clone()),
        "$update" => transform(value, arg),
        "$append" => {
            let mut items = array_of(value, "$append")?.clone();
            items.push(arg.clone());
            Ok(Value::Array(items))
        }
        "$appendMany" => {
            let mut items = array_of(value, "$appendMany")?.clone();
            match arg {
                Value::Array(more) => items.extend(more.iter().cloned()),
                other => items.push(other.clone()),
            }
            Ok(Value::Array(items))
        }
        "$prepend" => {
            let mut items = array_of(value, "$prepend")?.clone();
            items.insert(0, arg.clone());
            Ok(Value::Array(items))
        }
        "$prependMany" => {
            let items = array_of(value, "$prependMany")?;
            let mut result = match arg {
                Value::Array(more) => more.clone(),
                other => vec![other.clone()],
            };
            result.extend(items.iter().cloned());
            Ok(Value::Array(result))
        }
        "$slice" => {
            let items = array_of(value, "$slice")?;
            let (start, end) = match arg {
                Value::Number(_) => (integer_arg(arg, "$slice")?, None),
                Value::Array(bounds) if !bounds.is_empty() && bounds.len() <= 2 => (
                    integer_arg(&bounds[0], "$slice")?,
                    bounds.get(1).map(|b| integer_arg(b, "$slice")).transpose()?,
                ),
                _ => {
                    return Err(TransformError::illegal_plan(format!(
                        "illegal argument for modifier $slice: {arg}"
                    )));
                }
            };
            let len = items.len();
            let start = relative_index(start, len);
            let end = end.map_or(len, |e| relative_index(e, len));
            Ok(Value::Array(items[start..end.max(start)].to_vec()))
        }
        "$splice" => {
            let mut items = array_of(value, "$splice")?.clone();
            let calls: Vec<&Vec<Value>> = match arg {
                Value::Array(list) if list.iter().all(Value::is_array) && !list.is_empty() => {
                    list.iter().filter_map(Value::as_array).collect()
                }
                Value::Array(single) => vec![single],
                _ => {
                    return Err(TransformError::illegal_plan(format!(
                        "illegal argument for modifier $splice: {arg}"
                    )));
                }
            };
            for call in calls {
                splice(&mut items, call)?;
            }
            Ok(Value::Array(items))
        }
        "$filter" | "$remove" => {
            let name = if modifier == "$filter" { "$filter" } else { "$remove" };
            let items = array_of(value, name)?;
            let indices = index_set(arg, items.len(), name)?;
            let keep = modifier == "$filter";
            Ok(Value::Array(
                items
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| indices.contains(idx) == keep)
                    .map(|(_, item)| item.clone())
                    .collect(),
            ))
        }
        "$map" => {
            let items = array_of(value, "$map")?;
            if !arg.is_object() {
                return Err(TransformError::illegal_plan(
                    "argument of $map must be a transformation plan",
                ));
            }
            items
                .iter()
                .map(|item| transform(item, arg))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        other => Err(TransformError::IllegalModifier(other.to_string())),
    }
}

fn array_of<'a>(
    value: &'a Value,
    modifier: &'static str,
) -> Result<&'a Vec<Value>, TransformError> {
    value.as_array().ok_or(TransformError::TypeMismatch {
        modifier,
        expected: "an array",
    })
}

fn integer_arg(value: &Value, modifier: &str) -> Result<i64, TransformError> {
    value.as_i64().ok_or_else(|| {
        TransformError::illegal_plan(format!("illegal argument for modifier {modifier}: {value}"))
    })
}

/// Array position semantics shared by `$slice` and `$splice`: negative
/// positions count from the end, everything is clamped to `0..=len`.
fn relative_index(pos: i64, len: usize) -> usize {
    if pos < 0 {
        len.saturating_sub(pos.unsigned_abs() as usize)
    } else {
        (pos as usize).min(len)
    }
}

fn splice(items: &mut Vec<Value>, call: &[Value]) -> Result<(), TransformError> {
    let Some(start) = call.first() else {
        return Err(TransformError::illegal_plan("$splice needs at least a start index"));
    };
    let start = relative_index(integer_arg(start, "$splice")?, items.len());
    let delete = match call.get(1) {
        Some(count) => integer_arg(count, "$splice")?.max(0) as usize,
        None => items.len() - start,
    };
    let end = (start + delete).min(items.len());
    let inserted = call.iter().skip(2).cloned();
    items.splice(start..end, inserted);
    Ok(())
}

fn index_set(arg: &Value, len: usize, modifier: &str) -> Result<BTreeSet<usize>, TransformError> {
    let raw: Vec<i64> = match arg {
        Value::Number(_) => vec![integer_arg(arg, modifier)?],
        Value::Array(list) => list
            .iter()
            .map(|v| integer_arg(v, modifier))
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(TransformError::illegal_plan(format!(
                "illegal arguments for modifier {modifier}: {arg}"
            )));
        }
    };
    Ok(raw
        .into_iter()
        .filter_map(|idx| {
            if idx < 0 {
                len.checked_sub(idx.unsigned_abs() as usize)
            } else {
                Some(idx as usize).filter(|i| *i < len)
            }
        })
        .collect())
}

/// Shallow merge of `overrides` over `base`; keys of `overrides` win.
pub fn shallow_merge(
    base: &Map<String, Value>,
    overrides: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn set_replaces_a_nested_value_and_keeps_siblings() {
        let state = json!({"param1": 111, "param2": 222});
        let next = transform(&state, &json!({"param1": {"$set": 333}})).unwrap();
        assert_eq!(next, json!({"param1": 333, "param2": 222}));
        assert_eq!(state, json!({"param1": 111, "param2": 222}));
    }

    #[test]
    fn transform_rc_keeps_the_reference_when_nothing_changes() {
        let state = Rc::new(json!({"a": 1}));
        let same = transform_rc(&state, &json!({"a": {"$set": 1}})).unwrap();
        assert!(Rc::ptr_eq(&state, &same));

        let changed = transform_rc(&state, &json!({"a": {"$set": 2}})).unwrap();
        assert!(!Rc::ptr_eq(&state, &changed));
    }

    #[test]
    fn array_modifiers() {
        let list = json!([1, 2, 3, 4]);
        let apply = |plan: Value| transform(&list, &plan).unwrap();

        assert_eq!(apply(json!({"$append": 5})), json!([1, 2, 3, 4, 5]));
        assert_eq!(apply(json!({"$appendMany": [5, 6]})), json!([1, 2, 3, 4, 5, 6]));
        assert_eq!(apply(json!({"$prepend": 0})), json!([0, 1, 2, 3, 4]));
        assert_eq!(apply(json!({"$prependMany": [-1, 0]})), json!([-1, 0, 1, 2, 3, 4]));
        assert_eq!(apply(json!({"$slice": 2})), json!([3, 4]));
        assert_eq!(apply(json!({"$slice": [1, -1]})), json!([2, 3]));
        assert_eq!(apply(json!({"$splice": [1, 2, "x"]})), json!([1, "x", 4]));
        assert_eq!(apply(json!({"$splice": [[0, 1], [-1, 1]]})), json!([2, 3]));
        assert_eq!(apply(json!({"$filter": [0, -1]})), json!([1, 4]));
        assert_eq!(apply(json!({"$remove": [0, -1]})), json!([2, 3]));
        assert_eq!(apply(json!({"$remove": 1})), json!([1, 3, 4]));
    }

    #[test]
    fn map_and_update_apply_nested_plans() {
        let value = json!({"items": [{"n": 1}, {"n": 2}]});
        let next = transform(&value, &json!({"items": {"$map": {"n": {"$set": 0}}}})).unwrap();
        assert_eq!(next, json!({"items": [{"n": 0}, {"n": 0}]}));

        let plan = json!({"$update": {"items": {"1": {"n": {"$set": 9}}}}});
        let next = transform(&value, &plan).unwrap();
        assert_eq!(next, json!({"items": [{"n": 1}, {"n": 9}]}));
    }

    #[test]
    fn illegal_plans_are_rejected() {
        let value = json!({"a": [1]});
        assert!(matches!(
            transform(&value, &json!({"$nope": 1})),
            Err(TransformError::IllegalModifier(_))
        ));
        assert!(matches!(
            transform(&value, &json!({"$set": 1, "b": {}})),
            Err(TransformError::IllegalModifier(_))
        ));
        assert!(matches!(
            transform(&value, &json!({"a": 5})),
            Err(TransformError::IllegalPlan(_))
        ));
        assert!(matches!(
            transform(&value, &json!({"a": {"$append": 1}, "b": {"$append": 1}})),
            Err(TransformError::TypeMismatch { modifier: "$append", .. })
        ));
        assert!(matches!(
            transform(&value, &json!({"a": {"7": {"$set": 1}}})),
            Err(TransformError::IllegalPlan(_))
        ));
    }

    #[test]
    fn shallow_merge_prefers_overrides() {
        let base = json!({"a": 1, "b": 2});
        let overrides = json!({"b": 3, "c": 4});
        let merged = shallow_merge(base.as_object().unwrap(), overrides.as_object().unwrap());
        assert_eq!(Value::Object(merged), json!({"a": 1, "b": 3, "c": 4}));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: `$filter` and `$remove` with the same indices split an
        /// array into two parts that together hold every element once.
        #[test]
        fn filter_and_remove_partition_the_array(
            items in prop::collection::vec(any::<i32>(), 0..20),
            indices in prop::collection::vec(-25i64..25, 0..10),
        ) {
            let value = json!({"items": items});
            let kept = transform(&value, &json!({"items": {"$filter": indices}})).unwrap();
            let dropped = transform(&value, &json!({"items": {"$remove": indices}})).unwrap();

            let kept = kept["items"].as_array().unwrap().len();
            let dropped = dropped["items"].as_array().unwrap().len();
            prop_assert_eq!(kept + dropped, items.len());
        }

        /// Property: a plan that sets a value to what it already is keeps the
        /// original reference.
        #[test]
        fn setting_the_same_value_keeps_the_reference(n in any::<i64>(), other in any::<i64>()) {
            let state = Rc::new(json!({"n": n, "other": other}));
            let same = transform_rc(&state, &json!({"n": {"$set": n}})).unwrap();
            prop_assert!(Rc::ptr_eq(&state, &same));
        }
    }
}
