//! Label matchers.
//!
//! A [`Matcher`] tests one label of an alert, either for equality or against a
//! fully anchored regular expression. A missing label matches as the empty
//! string. [`Matchers`] is a conjunction.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};
use crate::types::LabelSet;

static LABEL_NAME: Lazy<Option<Regex>> = Lazy::new(|| Regex::new("^[a-zA-Z_][a-zA-Z0-9_]*$").ok());

/// Returns true if `name` is a well-formed label name.
#[must_use]
pub fn is_valid_label_name(name: &str) -> bool {
    LABEL_NAME.as_ref().is_some_and(|re| re.is_match(name))
}

/// How a matcher compares the label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// Exact string equality.
    Equal,
    /// Anchored regular expression.
    Regexp,
}

/// A single label predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MatcherSpec", into = "MatcherSpec")]
pub struct Matcher {
    name: String,
    value: String,
    kind: MatchType,
    re: Option<Regex>,
}

impl Matcher {
    /// Creates a matcher, compiling the pattern for [`MatchType::Regexp`].
    pub fn new(kind: MatchType, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        if !is_valid_label_name(&name) {
            return Err(AlertError::InvalidLabelName { name });
        }
        let re = match kind {
            MatchType::Equal => None,
            MatchType::Regexp => Some(Regex::new(&format!("^(?:{value})$")).map_err(|e| {
                AlertError::InvalidMatcher {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?),
        };
        Ok(Self {
            name,
            value,
            kind,
            re,
        })
    }

    /// Creates an equality matcher.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        Self::new(MatchType::Equal, name, value)
    }

    /// Creates a regex matcher.
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        Self::new(MatchType::Regexp, name, pattern)
    }

    /// The label name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The literal value or pattern.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The comparison kind.
    #[must_use]
    pub const fn kind(&self) -> MatchType {
        self.kind
    }

    /// Tests a label value.
    #[must_use]
    pub fn matches_value(&self, value: &str) -> bool {
        match &self.re {
            Some(re) => re.is_match(value),
            None => self.value == value,
        }
    }

    /// Tests the matcher's label within a label set.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.matches_value(labels.get(&self.name).map_or("", String::as_str))
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.kind == other.kind
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.kind {
            MatchType::Equal => "=",
            MatchType::Regexp => "=~",
        };
        write!(f, "{}{op}{:?}", self.name, self.value)
    }
}

/// Serialized form of a [`Matcher`], as written in routing resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherSpec {
    /// The label name.
    pub name: String,
    /// The value or pattern.
    pub value: String,
    /// Whether `value` is a regular expression.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub regex: bool,
}

impl TryFrom<MatcherSpec> for Matcher {
    type Error = AlertError;

    fn try_from(spec: MatcherSpec) -> Result<Self> {
        let kind = if spec.regex {
            MatchType::Regexp
        } else {
            MatchType::Equal
        };
        Self::new(kind, spec.name, spec.value)
    }
}

impl From<Matcher> for MatcherSpec {
    fn from(m: Matcher) -> Self {
        Self {
            regex: m.kind == MatchType::Regexp,
            name: m.name,
            value: m.value,
        }
    }
}

/// A conjunction of matchers. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matchers(Vec<Matcher>);

impl Matchers {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns true if every matcher accepts the label set.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.0.iter().all(|m| m.matches(labels))
    }

    /// Appends a matcher.
    pub fn push(&mut self, matcher: Matcher) {
        self.0.push(matcher);
    }

    /// Iterates the matchers.
    pub fn iter(&self) -> std::slice::Iter<'_, Matcher> {
        self.0.iter()
    }

    /// Number of matchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no matchers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Matcher> for Matchers {
    fn from_iter<I: IntoIterator<Item = Matcher>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Matchers {
    type Item = &'a Matcher;
    type IntoIter = std::slice::Iter<'a, Matcher>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Matchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, m) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{m}")?;
        }
        write!(f, "}}")
    }
}
