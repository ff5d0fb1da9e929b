//! Scalar field values and source rows.
//!
//! Source data is heterogeneous (text, numbers, booleans, nulls) while the
//! remote platform stores every property as text. All comparisons go through
//! [`FieldValue::as_text`], the canonical textual form of a value.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// A scalar value supplied by the caller for one field of a source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
}

impl FieldValue {
    /// Returns true for [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Canonical textual form used to compare against remote values.
    ///
    /// Integral floats keep a trailing `.0`, so `2000.0` renders as
    /// `"2000.0"` and is not equal to a stored `"2000"`. Very large and very
    /// small floats use exponent notation (`1e+16`, `1e-07`). Null has no
    /// textual form.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            FieldValue::Text(s) => Some(Cow::Borrowed(s)),
            FieldValue::Integer(i) => Some(Cow::Owned(i.to_string())),
            FieldValue::Float(f) => Some(Cow::Owned(float_text(*f))),
            FieldValue::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
            FieldValue::Null => None,
        }
    }

    /// Whether this value's textual form equals the remote value.
    ///
    /// A null value matches an empty remote value.
    pub fn matches_text(&self, remote: Option<&str>) -> bool {
        self.as_text().as_deref() == remote
    }
}

/// Shortest round-trip digits, positional for decimal exponents in
/// `-4..16` and `1e-07` / `1.5e+16` style outside that range.
fn float_text(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let scientific = format!("{f:e}");
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if (-4..16).contains(&exponent) {
        if f.fract() == 0.0 {
            format!("{f:.1}")
        } else {
            f.to_string()
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("null"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Outcome of looking a field up on a row.
///
/// Keeps "the row has no such field" apart from "the row carries the field
/// with a null value", which the diff treats differently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldSlot<'a> {
    /// The field is present with a non-null value.
    Present(&'a FieldValue),
    /// The field is present and explicitly null.
    PresentNull,
    /// The field does not exist on the row.
    Absent,
}

impl<'a> FieldSlot<'a> {
    /// Classifies an optional map lookup.
    pub fn from_lookup(value: Option<&'a FieldValue>) -> Self {
        match value {
            None => FieldSlot::Absent,
            Some(FieldValue::Null) => FieldSlot::PresentNull,
            Some(v) => FieldSlot::Present(v),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldSlot::Absent)
    }
}

/// One caller-supplied row: field name to scalar value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRow(BTreeMap<String, FieldValue>);

impl SourceRow {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, returning the previous value if any.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.0.insert(name.into(), value.into())
    }

    /// Builder-style [`SourceRow::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Raw access to a field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    /// Three-state lookup of a field.
    pub fn lookup(&self, name: &str) -> FieldSlot<'_> {
        FieldSlot::from_lookup(self.0.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the row, returning the underlying map.
    pub fn into_inner(self) -> BTreeMap<String, FieldValue> {
        self.0
    }
}

impl From<BTreeMap<String, FieldValue>> for SourceRow {
    fn from(map: BTreeMap<String, FieldValue>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for SourceRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for SourceRow {
    type Item = (String, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
