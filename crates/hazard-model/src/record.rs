//! Field-bag records and field-level patches
//!
//! A [`Record`] is the untyped form of an entity: a JSON object of semantic
//! fields. Patches operate on records at field granularity, which is what
//! makes remote application idempotent (re-setting a field to the same value
//! is a no-op).
//!
//! Null is never stored. Setting a field to `null` removes it, so "absent"
//! and "null" are one state and restoring an absent field is expressible as
//! a patch.

use crate::ids::EntityId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Semantic fields of one entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Empty record
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from a JSON object, dropping null fields
    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map.into_iter().filter(|(_, v)| !v.is_null()).collect())
    }

    /// Encode a typed value into a record
    ///
    /// # Errors
    /// Returns error if the value does not serialize to a JSON object
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, RecordError> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(RecordError::NotAnObject(type_name(&other))),
        }
    }

    /// Decode into a typed value
    ///
    /// # Errors
    /// Returns error if fields are missing or have the wrong shape
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RecordError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Field value
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field value as string
    #[inline]
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Set a field; `null` removes it. Returns whether the record changed.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> bool {
        let field = field.into();
        if value.is_null() {
            return self.0.remove(&field).is_some();
        }
        if self.0.get(&field) == Some(&value) {
            return false;
        }
        self.0.insert(field, value);
        true
    }

    /// Apply every field of a patch. Returns whether the record changed.
    pub fn apply(&mut self, patch: &FieldPatch) -> bool {
        let mut changed = false;
        for (field, value) in patch.iter() {
            changed |= self.set(field.clone(), value.clone());
        }
        changed
    }

    /// Iterate fields in key order
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if record has no fields
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entity ids referenced by a field
    ///
    /// Accepts a single string or an array of strings; anything else yields
    /// no references.
    #[must_use]
    pub fn references(&self, field: &str) -> Vec<EntityId> {
        match self.0.get(field) {
            Some(Value::String(id)) => vec![EntityId::new(id.clone())],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(EntityId::from)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Field-level patch: field name → new value (`null` unsets)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPatch(Map<String, Value>);

impl FieldPatch {
    /// Empty patch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Patch touching a single field
    #[inline]
    #[must_use]
    pub fn single(field: impl Into<String>, value: Value) -> Self {
        Self::new().set(field, value)
    }

    /// Set a field
    #[inline]
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    /// Unset a field
    #[inline]
    #[must_use]
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into(), Value::Null);
        self
    }

    /// Iterate touched fields
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Names of touched fields
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Check if patch touches nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Errors converting between typed entities and records
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Typed value did not serialize to an object
    #[error("entity must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Field shape mismatch
    #[error("record conversion failed: {0}")]
    Json(#[from] serde_json::Error),
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
