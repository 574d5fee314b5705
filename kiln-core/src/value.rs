//! Result trees decoded from evaluator output.
//!
//! A document is decoded once into a [`ResultTree`] and read from there on.
//! Key order follows the document, which matters for display and iteration
//! but not for lookup.

use std::ops::Index;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::cast::{self, Castable};
use crate::error::{CastResult, DecodeError};

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    /// Non-integral numbers, and integers beyond the `i64` range.
    Float(f64),
    String(String),
}

impl Scalar {
    /// Short name of the scalar kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "boolean",
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "float",
            Scalar::String(_) => "string",
        }
    }

    /// Convert back into a plain JSON value.
    pub fn to_json(&self) -> Json {
        match self {
            Scalar::Null => Json::Null,
            Scalar::Bool(b) => Json::Bool(*b),
            Scalar::Int(i) => Json::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Scalar::String(s) => Json::String(s.clone()),
        }
    }
}

/// A node of a result tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    List(Vec<Value>),
    Tree(ResultTree),
}

impl Value {
    /// Convert a decoded JSON value.
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::Scalar(Scalar::Null),
            Json::Bool(b) => Value::Scalar(Scalar::Bool(*b)),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Scalar(Scalar::Int(i)),
                None => Value::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Json::String(s) => Value::Scalar(Scalar::String(s.clone())),
            Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Tree(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Short name of the node kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(s) => s.kind(),
            Value::List(_) => "list",
            Value::Tree(_) => "tree",
        }
    }

    /// Recursively flatten into plain JSON, dropping tree identity.
    pub fn to_plain(&self) -> Json {
        match self {
            Value::Scalar(s) => s.to_json(),
            Value::List(items) => Json::Array(items.iter().map(Value::to_plain).collect()),
            Value::Tree(tree) => tree.to_plain(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&ResultTree> {
        match self {
            Value::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Numbers as `f64`; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Scalar(Scalar::Float(f)) => Some(*f),
            Value::Scalar(Scalar::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Null))
    }
}

/// Ordered mapping from member name to [`Value`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultTree {
    fields: IndexMap<String, Value>,
}

impl ResultTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a JSON document whose top level is an object.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let json: Json = serde_json::from_str(text).map_err(|e| DecodeError {
            reason: e.to_string(),
        })?;
        Self::from_document(&json)
    }

    /// Wrap an already decoded JSON document whose top level is an object.
    pub fn from_document(json: &Json) -> Result<Self, DecodeError> {
        match Value::from_json(json) {
            Value::Tree(tree) => Ok(tree),
            other => Err(DecodeError {
                reason: format!("expected an object at the top level, got {}", other.kind()),
            }),
        }
    }

    /// Insert or replace a member. A replaced member keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Look up a member. Absent members yield `None`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Top-level member names in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Recursively flatten into a plain JSON object, preserving member order.
    pub fn to_plain(&self) -> Json {
        Json::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_plain()))
                .collect(),
        )
    }

    /// Cast this tree onto a destination type.
    pub fn cast<T: Castable>(&self) -> CastResult<T> {
        cast::cast_into(self)
    }
}

impl Index<&str> for ResultTree {
    type Output = Value;

    /// Panics if the member is absent.
    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Some(v) => v,
            None => panic!("no member named {:?} in result tree", name),
        }
    }
}

impl FromIterator<(String, Value)> for ResultTree {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        ResultTree {
            fields: iter.into_iter().collect(),
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<ResultTree> for Value {
    fn from(t: ResultTree) -> Self {
        Value::Tree(t)
    }
}
