//! Match keys and composite row identity.

use crate::row::LABEL_FIELD;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sorted, de-duplicated field names that define row identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct MatchKeys(Vec<String>);

impl MatchKeys {
    /// Builds match keys from any order of field names.
    ///
    /// Fails when no field name is given.
    pub fn new<I, S>(keys: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        if keys.is_empty() {
            return Err(Error::EmptyMatchKeys);
        }
        Ok(Self(keys))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|k| k == name)
    }
}

impl Default for MatchKeys {
    fn default() -> Self {
        Self(vec![LABEL_FIELD.to_string()])
    }
}

impl TryFrom<Vec<String>> for MatchKeys {
    type Error = Error;

    fn try_from(keys: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(keys)
    }
}

impl From<MatchKeys> for Vec<String> {
    fn from(keys: MatchKeys) -> Self {
        keys.0
    }
}

impl fmt::Display for MatchKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

/// A row's match-key values, in match-key order, as text.
///
/// `None` components stand for null (or, on the remote side, unset) values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeKey(Vec<Option<String>>);

impl CompositeKey {
    pub fn new(parts: Vec<Option<String>>) -> Self {
        Self(parts)
    }

    /// Builds a key whose components are all non-null.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(|v| Some(v.into())).collect())
    }

    pub fn parts(&self) -> &[Option<String>] {
        &self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match part {
                Some(v) => write!(f, "{v:?}")?,
                None => f.write_str("null")?,
            }
        }
        f.write_str(")")
    }
}
