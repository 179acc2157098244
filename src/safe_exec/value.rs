//! Host-side model of the Python values a caller can hand to `safe_exec`.

use std::collections::BTreeMap;
use std::fmt;

/// Globals dictionary passed into and updated by `safe_exec`.
pub type Globals = BTreeMap<String, PyValue>;

/// A Python `str`, kept as UTF-16 code units so that unpaired surrogates,
/// which Python strings may hold and JSON text may not, are representable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PyStr(Vec<u16>);

impl PyStr {
    pub fn from_utf16_units(units: Vec<u16>) -> Self {
        Self(units)
    }

    pub fn units(&self) -> &[u16] {
        &self.0
    }

    /// The string, if it contains no unpaired surrogates.
    pub fn to_str(&self) -> Option<String> {
        String::from_utf16(&self.0).ok()
    }

    pub fn is_well_formed(&self) -> bool {
        char::decode_utf16(self.0.iter().copied()).all(|c| c.is_ok())
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }
}

impl From<&str> for PyStr {
    fn from(s: &str) -> Self {
        Self(s.encode_utf16().collect())
    }
}

impl From<String> for PyStr {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for PyStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// A Python value on the host side of the jail.
///
/// `None` through `Dict` can cross the boundary; `Bytes`, `Set` and `Object`
/// cannot and are rejected when globals are serialized.
#[derive(Clone, Debug, PartialEq)]
pub enum PyValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(PyStr),
    List(Vec<PyValue>),
    Tuple(Vec<PyValue>),
    Dict(BTreeMap<String, PyValue>),
    Bytes(Vec<u8>),
    Set(Vec<PyValue>),
    /// Anything else, by Python type name
    Object(String),
}

impl PyValue {
    /// The Python type name, as `type(v).__name__` would report it.
    pub fn type_name(&self) -> &str {
        match self {
            PyValue::None => "NoneType",
            PyValue::Bool(_) => "bool",
            PyValue::Int(_) => "int",
            PyValue::Float(_) => "float",
            PyValue::Str(_) => "str",
            PyValue::List(_) => "list",
            PyValue::Tuple(_) => "tuple",
            PyValue::Dict(_) => "dict",
            PyValue::Bytes(_) => "bytes",
            PyValue::Set(_) => "set",
            PyValue::Object(name) => name,
        }
    }

    pub fn str(s: &str) -> Self {
        PyValue::Str(PyStr::from(s))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PyValue::Float(f) => Some(*f),
            PyValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            PyValue::Str(s) => s.to_str(),
            _ => None,
        }
    }
}

impl From<bool> for PyValue {
    fn from(b: bool) -> Self {
        PyValue::Bool(b)
    }
}

impl From<i64> for PyValue {
    fn from(i: i64) -> Self {
        PyValue::Int(i)
    }
}

impl From<i32> for PyValue {
    fn from(i: i32) -> Self {
        PyValue::Int(i64::from(i))
    }
}

impl From<f64> for PyValue {
    fn from(f: f64) -> Self {
        PyValue::Float(f)
    }
}

impl From<&str> for PyValue {
    fn from(s: &str) -> Self {
        PyValue::str(s)
    }
}

impl From<String> for PyValue {
    fn from(s: String) -> Self {
        PyValue::Str(PyStr::from(s))
    }
}

impl From<Vec<PyValue>> for PyValue {
    fn from(items: Vec<PyValue>) -> Self {
        PyValue::List(items)
    }
}
