//! Raw feature records.
//!
//! A [`Features`] value is one example as it comes out of the input pipeline:
//! a mapping from field name to a raw, not yet encoded, [`FeatureValue`].
//! Feature columns in [`crate::feature_column`] turn these into ids.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A raw field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Integer valued field, e.g. an id or an age bracket.
    Int(i64),
    /// Single string token.
    Str(String),
    /// Multi-valued string field, e.g. the genres of a movie.
    StrList(Vec<String>),
}

impl FeatureValue {
    /// Returns the string tokens of this value.
    ///
    /// Integers are rendered in decimal so that vocabulary and hash lookups
    /// treat `Int(18)` and `Str("18")` the same way.
    pub fn tokens(&self) -> Vec<String> {
        match self {
            FeatureValue::Int(v) => vec![v.to_string()],
            FeatureValue::Str(s) => vec![s.clone()],
            FeatureValue::StrList(values) => values.clone(),
        }
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Int(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Str(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::Str(v)
    }
}

impl From<Vec<String>> for FeatureValue {
    fn from(v: Vec<String>) -> Self {
        FeatureValue::StrList(v)
    }
}

/// One example: field name to raw value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    fields: BTreeMap<String, FeatureValue>,
}

impl Features {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FeatureValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Returns the value of a field, if present.
    pub fn get(&self, key: &str) -> Option<&FeatureValue> {
        self.fields.get(key)
    }

    /// Returns the value of a field or [`CoreError::MissingFeature`].
    pub fn require(&self, key: &str) -> Result<&FeatureValue> {
        self.fields.get(key).ok_or_else(|| CoreError::MissingFeature {
            key: key.to_string(),
        })
    }

    /// Field names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
