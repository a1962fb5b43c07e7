//! # Record Predicates
//!
//! Typed field predicates evaluated against container records during a full
//! scan. Fields may be dotted paths into nested objects
//! (`_system.createdBy`).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `%` matches any run, `_` a single character
    Like,
    /// Field value is one of the listed values
    In,
    /// `true`: field present and non-null. `false`: absent or null.
    Exists,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Like => "like",
            FilterOperator::In => "in",
            FilterOperator::Exists => "exists",
        }
    }
}

/// One field predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl FilterExpr {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Eq, value.into())
    }

    pub fn neq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Neq, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Gt, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Lt, value.into())
    }

    pub fn like(field: impl Into<String>, pattern: &str) -> Self {
        Self::new(field, FilterOperator::Like, Value::String(pattern.to_string()))
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOperator::In, Value::Array(values))
    }

    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Self::new(field, FilterOperator::Exists, Value::Bool(present))
    }

    /// Evaluate against one record
    pub fn matches(&self, record: &Value) -> bool {
        let found = lookup(record, &self.field).filter(|v| !v.is_null());

        if self.operator == FilterOperator::Exists {
            let want = self.value.as_bool().unwrap_or(true);
            return found.is_some() == want;
        }

        let Some(actual) = found else {
            // Absent fields only satisfy "not equal"
            return self.operator == FilterOperator::Neq;
        };

        match self.operator {
            FilterOperator::Eq => actual == &self.value,
            FilterOperator::Neq => actual != &self.value,
            FilterOperator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOperator::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOperator::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Like => match (actual.as_str(), self.value.as_str()) {
                (Some(text), Some(pattern)) => like(text, pattern),
                _ => false,
            },
            FilterOperator::In => self
                .value
                .as_array()
                .map(|options| options.contains(actual))
                .unwrap_or(false),
            FilterOperator::Exists => self.value.as_bool().unwrap_or(true),
        }
    }
}

/// Conjunction of predicates. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    pub filters: Vec<FilterExpr>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, filter: FilterExpr) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }
}

impl From<FilterExpr> for FilterSet {
    fn from(filter: FilterExpr) -> Self {
        FilterSet::new().and(filter)
    }
}

/// Resolve a dotted path inside a JSON value
pub fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// SQL-style LIKE over chars, iterative with single-star backtracking
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star_p, star_t)) => {
                    backtrack = Some((star_p, star_t + 1));
                    p = star_p + 1;
                    t = star_t + 1;
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}
