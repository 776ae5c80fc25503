//! Built-in filters shared by clients and servers.
//!
//! - `query(q)`: field constraints in the usual `{field: value}` /
//!   `{field: {$op: value}}` shape, with a top-level `$or`
//! - `all()`: every record
//! - `ids(list)`: records whose `id` (or `_id`) is in `list`

use crate::error::FilterError;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::compiler::{FilterModule, Predicate};

/// Keys that shape result sets rather than select records.
const PAGING_KEYS: &[&str] = &["$limit", "$skip", "$sort", "$select"];

/// The built-in filter module.
pub fn common() -> FilterModule {
    FilterModule::builder()
        .filter("query", |params| {
            let query = match params.first() {
                None | Some(Value::Null) => return Ok(Predicate::always()),
                Some(Value::Object(map)) => Query::compile(map)?,
                Some(other) => {
                    return Err(FilterError::invalid_params(format!(
                        "query must be an object, got {}",
                        type_name(other)
                    )))
                }
            };
            Ok(Predicate::from_fn(move |record| query.matches(record)))
        })
        .filter("all", |_| Ok(Predicate::always()))
        .filter("ids", |params| {
            let ids: Vec<Value> = match params.first() {
                Some(Value::Array(ids)) => ids.clone(),
                Some(Value::Null) | None => Vec::new(),
                Some(id) => vec![id.clone()],
            };
            Ok(Predicate::from_fn(move |record| {
                record
                    .get("id")
                    .or_else(|| record.get("_id"))
                    .map(|id| ids.iter().any(|candidate| loose_eq(candidate, id)))
                    .unwrap_or(false)
            }))
        })
        .build()
}

#[derive(Debug)]
struct Query {
    fields: Vec<(Vec<String>, Vec<Condition>)>,
    any_of: Option<Vec<Query>>,
}

#[derive(Debug)]
enum Condition {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Cmp(Ordering, bool, Value),
}

impl Query {
    fn compile(map: &Map<String, Value>) -> Result<Self, FilterError> {
        let mut fields = Vec::new();
        let mut any_of = None;

        for (key, value) in map {
            if key == "$or" {
                let branches = value
                    .as_array()
                    .ok_or_else(|| FilterError::invalid_params("$or expects an array"))?;
                let compiled = branches
                    .iter()
                    .map(|branch| match branch {
                        Value::Object(map) => Query::compile(map),
                        _ => Err(FilterError::invalid_params("$or entries must be objects")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                any_of = Some(compiled);
                continue;
            }
            if PAGING_KEYS.contains(&key.as_str()) {
                continue;
            }
            if key.starts_with('$') {
                return Err(FilterError::invalid_params(format!("unsupported operator {}", key)));
            }

            let path = key.split('.').map(str::to_string).collect();
            fields.push((path, Condition::compile_all(value)?));
        }

        Ok(Self { fields, any_of })
    }

    fn matches(&self, record: &Value) -> bool {
        let fields_hold = self.fields.iter().all(|(path, conditions)| {
            let value = lookup(record, path);
            conditions.iter().all(|c| c.holds(value))
        });
        if !fields_hold {
            return false;
        }
        match &self.any_of {
            Some(branches) => branches.iter().any(|q| q.matches(record)),
            None => true,
        }
    }
}

impl Condition {
    fn compile_all(value: &Value) -> Result<Vec<Condition>, FilterError> {
        let ops = match value {
            Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
                return Err(FilterError::invalid_params(
                    "operators cannot be mixed with plain fields",
                ))
            }
            literal => return Ok(vec![Condition::Eq(literal.clone())]),
        };

        ops.iter()
            .map(|(op, operand)| {
                let condition = match op.as_str() {
                    "$ne" => Condition::Ne(operand.clone()),
                    "$in" => Condition::In(list_operand(op, operand)?),
                    "$nin" => Condition::Nin(list_operand(op, operand)?),
                    "$lt" => Condition::Cmp(Ordering::Less, false, operand.clone()),
                    "$lte" => Condition::Cmp(Ordering::Less, true, operand.clone()),
                    "$gt" => Condition::Cmp(Ordering::Greater, false, operand.clone()),
                    "$gte" => Condition::Cmp(Ordering::Greater, true, operand.clone()),
                    other => {
                        return Err(FilterError::invalid_params(format!(
                            "unsupported operator {}",
                            other
                        )))
                    }
                };
                Ok(condition)
            })
            .collect()
    }

    fn holds(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => value.is_some_and(|v| loose_eq(v, expected)),
            Condition::Ne(expected) => !value.is_some_and(|v| loose_eq(v, expected)),
            Condition::In(list) => value.is_some_and(|v| list.iter().any(|e| loose_eq(v, e))),
            Condition::Nin(list) => !value.is_some_and(|v| list.iter().any(|e| loose_eq(v, e))),
            Condition::Cmp(direction, or_equal, operand) => {
                match value.and_then(|v| compare(v, operand)) {
                    Some(Ordering::Equal) => *or_equal,
                    Some(ordering) => ordering == *direction,
                    None => false,
                }
            }
        }
    }
}

fn list_operand(op: &str, operand: &Value) -> Result<Vec<Value>, FilterError> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| FilterError::invalid_params(format!("{} expects an array", op)))
}

fn lookup<'a>(record: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(record, |current, segment| current.get(segment.as_str()))
}

/// Equality that treats `1` and `1.0` as the same number.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
