//! Core types for spark-fiber.
//!
//! These types define the foundation that everything builds on.
//! They flow through the reconciliation pipeline and define what a host
//! binding understands: dynamic property values and precomputed update
//! payloads.

use std::collections::BTreeMap;

use smallvec::SmallVec;

// =============================================================================
// Value
// =============================================================================

/// A dynamically typed property/state value.
///
/// Props, hook state and effect dependencies are all `Value`s, so the engine
/// can diff and fold them without knowing anything about the host's schema.
/// Comparison is structural (`PartialEq`), which is what the effect-dependency
/// shallow compare and the eager-state bail-out rely on.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent / removed. Used as the removal sentinel for non-style props
    /// in an [`UpdatePayload`].
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Check for the removal sentinel.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow as a string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow as a map, if this is a map value.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Integer accessor, coercing floats with integral values.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

// =============================================================================
// Update Payload
// =============================================================================

/// Prop key under which a style sub-map travels in props and payloads.
pub const STYLE: &str = "style";

/// Prop key used when a host element's single text child is applied as
/// text content instead of a child node (see
/// [`should_set_text_content`](crate::host::HostConfig::should_set_text_content)).
pub const CHILDREN: &str = "children";

/// A precomputed, ordered list of prop mutations for one host instance.
///
/// Produced by [`diff_props`](crate::host::diff_props) (or a host's own
/// `prepare_update`) during the render phase, applied verbatim by the host's
/// `commit_update` during the commit phase.
///
/// Conventions:
/// - a removed prop appears as `(key, Value::Null)`;
/// - style changes are collected into a single `(STYLE, Value::Map)` pair
///   where a removed style property maps to the empty string.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdatePayload {
    pub pairs: SmallVec<[(String, Value); 8]>,
}

impl UpdatePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: Value) {
        self.pairs.push((key.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Look up the value recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

// =============================================================================
// Tests
// =============================================================================
