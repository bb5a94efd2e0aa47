//! Typed per-node settings storage.
//!
//! Node types keep their instance settings (math operation, blur radius,
//! output path, ...) in a `PropertyMap` keyed by property name, instead of an
//! untyped blob with hand-rolled copy/free pairs.

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct Vec3 {
    pub x: OrderedFloat<f64>,
    pub y: OrderedFloat<f64>,
    pub z: OrderedFloat<f64>,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: OrderedFloat(x),
            y: OrderedFloat(y),
            z: OrderedFloat(z),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(OrderedFloat<f64>),
    Integer(i64),
    String(String),
    Boolean(bool),
    Vec3(Vec3),
    Color([OrderedFloat<f64>; 4]),
    Array(Vec<PropertyValue>),
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(OrderedFloat(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl PropertyValue {
    /// Extract as number, accepting integers; `default` if neither.
    pub fn as_number(&self, default: f64) -> f64 {
        match self {
            PropertyValue::Number(n) => n.into_inner(),
            PropertyValue::Integer(i) => *i as f64,
            _ => default,
        }
    }

    pub fn as_integer(&self, default: i64) -> i64 {
        match self {
            PropertyValue::Integer(i) => *i,
            PropertyValue::Number(n) => n.into_inner() as i64,
            _ => default,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_boolean(&self, default: bool) -> bool {
        match self {
            PropertyValue::Boolean(b) => *b,
            _ => default,
        }
    }

    pub fn as_color(&self, default: [f64; 4]) -> [f64; 4] {
        match self {
            PropertyValue::Color(c) => [
                c[0].into_inner(),
                c[1].into_inner(),
                c[2].into_inner(),
                c[3].into_inner(),
            ],
            _ => default,
        }
    }
}

/// Ordered bag of named properties for one node instance.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct PropertyMap {
    #[serde(flatten)]
    values: HashMap<String, PropertyValue>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    pub fn number(&self, name: &str, default: f64) -> f64 {
        self.get(name).map(|v| v.as_number(default)).unwrap_or(default)
    }

    pub fn integer(&self, name: &str, default: i64) -> i64 {
        self.get(name).map(|v| v.as_integer(default)).unwrap_or(default)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_string())
    }

    pub fn boolean(&self, name: &str, default: bool) -> bool {
        self.get(name).map(|v| v.as_boolean(default)).unwrap_or(default)
    }

    pub fn color(&self, name: &str, default: [f64; 4]) -> [f64; 4] {
        self.get(name).map(|v| v.as_color(default)).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
