//! Property filters for scoped fetches and deletes.
//!
//! Filters are opaque to the session: they are carried unchanged inside
//! fetch-by-filter and delete-by-filter statements and interpreted by the
//! pipeline.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison applied between a stored property and a filter operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonOperator {
    Equals,
    GreaterThan,
    LessThan,
}

impl ComparisonOperator {
    /// The operator token used in query text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ComparisonOperator::Equals => "=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `property <op> value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub property: String,
    pub operator: ComparisonOperator,
    pub value: Value,
}

impl Filter {
    pub fn new(
        property: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, ComparisonOperator::Equals, value)
    }

    pub fn greater_than(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, ComparisonOperator::GreaterThan, value)
    }

    pub fn less_than(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, ComparisonOperator::LessThan, value)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.property, self.operator, self.value)
    }
}

/// A conjunction of filters. An empty set matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(Vec<Filter>);

impl Filters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition (builder pattern).
    #[must_use]
    pub fn and(mut self, filter: Filter) -> Self {
        self.0.push(filter);
        self
    }

    pub fn push(&mut self, filter: Filter) {
        self.0.push(filter);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Filter> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Filter> for Filters {
    fn from(filter: Filter) -> Self {
        Filters(vec![filter])
    }
}

impl FromIterator<Filter> for Filters {
    fn from_iter<I: IntoIterator<Item = Filter>>(iter: I) -> Self {
        Filters(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Filters {
    type Item = &'a Filter;
    type IntoIter = std::slice::Iter<'a, Filter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
