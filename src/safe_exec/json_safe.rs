//! The JSON-safe projection of a globals dictionary.
//!
//! A value survives when it belongs to the safe union (None, bool, int,
//! float, str, list, tuple, dict) and also survives a JSON round trip.
//! Strings with unpaired surrogates and non-finite floats fail the round
//! trip and are dropped silently, along with any container holding them.
//! Values outside the union cannot be sent at all and are an error.
//! `__builtins__` never crosses.

use super::value::{Globals, PyStr, PyValue};
use crate::config::types::SafeExecError;
use log::debug;
use serde_json::{Map, Number, Value};

pub const BUILTINS: &str = "__builtins__";

/// Why a value was left out.
#[derive(Debug, PartialEq)]
enum Rejection {
    /// Fails the JSON round trip: skip silently.
    NotJsonable,
    /// Outside the safe union: refuse.
    Unsupported(String),
}

fn to_json(value: &PyValue) -> Result<Value, Rejection> {
    Ok(match value {
        PyValue::None => Value::Null,
        PyValue::Bool(b) => Value::Bool(*b),
        PyValue::Int(i) => Value::Number(Number::from(*i)),
        PyValue::Float(f) => Value::Number(Number::from_f64(*f).ok_or(Rejection::NotJsonable)?),
        PyValue::Str(s) => Value::String(s.to_str().ok_or(Rejection::NotJsonable)?),
        PyValue::List(items) | PyValue::Tuple(items) => {
            Value::Array(items.iter().map(to_json).collect::<Result<_, _>>()?)
        }
        PyValue::Dict(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), to_json(v)?);
            }
            Value::Object(map)
        }
        PyValue::Bytes(_) | PyValue::Set(_) | PyValue::Object(_) => {
            return Err(Rejection::Unsupported(format!(
                "values of type {} cannot be serialized",
                value.type_name()
            )))
        }
    })
}

/// Project `globals` onto what may be sent into the sandbox.
pub fn json_safe(globals: &Globals) -> Result<Map<String, Value>, SafeExecError> {
    let mut safe = Map::new();
    for (key, value) in globals {
        if key == BUILTINS {
            continue;
        }
        match to_json(value) {
            Ok(json) => {
                safe.insert(key.clone(), json);
            }
            Err(Rejection::NotJsonable) => {
                debug!("Dropping global {:?}: not representable in JSON", key)
            }
            Err(Rejection::Unsupported(reason)) => {
                return Err(SafeExecError::UnsafeValue {
                    key: key.clone(),
                    reason,
                })
            }
        }
    }
    Ok(safe)
}

/// Convert a JSON value coming back from the sandbox into a host value.
///
/// Arrays come back as lists (JSON has no tuples). Integers beyond the i64
/// range come back as floats.
pub fn from_json(value: Value) -> PyValue {
    match value {
        Value::Null => PyValue::None,
        Value::Bool(b) => PyValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => PyValue::Int(i),
            None => PyValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => PyValue::Str(PyStr::from(s)),
        Value::Array(items) => PyValue::List(items.into_iter().map(from_json).collect()),
        Value::Object(map) => {
            PyValue::Dict(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

/// Merge sandbox output into the caller's globals, overwriting same-named keys.
pub fn merge(globals: &mut Globals, returned: Map<String, Value>) {
    for (key, value) in returned {
        if key == BUILTINS {
            continue;
        }
        globals.insert(key, from_json(value));
    }
}
