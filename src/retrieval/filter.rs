//! Metadata filters and the index-side `WhereClause` grammar

use crate::retrieval::DocumentMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key for the lower date bound (epoch seconds, inclusive)
pub const DATE_GTE: &str = "date_gte";
/// Key for the upper date bound (epoch seconds, inclusive)
pub const DATE_LTE: &str = "date_lte";
/// Key for sender/participant constraints
pub const PARTICIPANTS: &str = "participants";

/// Comparable scalar inside a filter clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterScalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FilterScalar {
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FilterScalar::Text(expected), Value::String(actual)) => expected == actual,
            (FilterScalar::Number(expected), Value::Number(actual)) => {
                actual.as_f64().is_some_and(|a| a == *expected)
            }
            (FilterScalar::Bool(expected), Value::Bool(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl From<&str> for FilterScalar {
    fn from(value: &str) -> Self {
        FilterScalar::Text(value.to_string())
    }
}

impl From<String> for FilterScalar {
    fn from(value: String) -> Self {
        FilterScalar::Text(value)
    }
}

impl From<f64> for FilterScalar {
    fn from(value: f64) -> Self {
        FilterScalar::Number(value)
    }
}

impl From<i64> for FilterScalar {
    fn from(value: i64) -> Self {
        FilterScalar::Number(value as f64)
    }
}

impl From<bool> for FilterScalar {
    fn from(value: bool) -> Self {
        FilterScalar::Bool(value)
    }
}

/// Filter grammar understood by the vector and lexical indexes
///
/// Exact match, "in" list, numeric range, conjunction and disjunction.
/// Disjunctions are never built with a single member: `any_of` emits a
/// plain `Eq` instead, since some engines reject one-item `$or` lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhereClause {
    Eq { field: String, value: FilterScalar },
    In { field: String, values: Vec<FilterScalar> },
    Gte { field: String, value: f64 },
    Lte { field: String, value: f64 },
    And(Vec<WhereClause>),
    Or(Vec<WhereClause>),
}

impl WhereClause {
    pub fn eq(field: impl Into<String>, value: impl Into<FilterScalar>) -> Self {
        WhereClause::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<S: Into<FilterScalar>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        WhereClause::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Disjunction of equality checks on one field
    pub fn any_of<S: Into<FilterScalar>>(
        field: &str,
        values: impl IntoIterator<Item = S>,
    ) -> Option<Self> {
        let mut clauses: Vec<WhereClause> = values
            .into_iter()
            .map(|v| WhereClause::eq(field, v))
            .collect();

        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(WhereClause::Or(clauses)),
        }
    }

    /// Conjunction of clauses, collapsing trivial cases
    pub fn all_of(clauses: Vec<WhereClause>) -> Option<Self> {
        let mut flattened = Vec::with_capacity(clauses.len());
        for clause in clauses {
            match clause {
                WhereClause::And(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }

        match flattened.len() {
            0 => None,
            1 => flattened.pop(),
            _ => Some(WhereClause::And(flattened)),
        }
    }

    /// Evaluate the clause against document metadata
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        match self {
            WhereClause::Eq { field, value } => metadata
                .field(field)
                .is_some_and(|actual| value.matches(&actual)),
            WhereClause::In { field, values } => metadata
                .field(field)
                .is_some_and(|actual| values.iter().any(|v| v.matches(&actual))),
            WhereClause::Gte { field, value } => metadata
                .field(field)
                .and_then(|actual| actual.as_f64())
                .is_some_and(|actual| actual >= *value),
            WhereClause::Lte { field, value } => metadata
                .field(field)
                .and_then(|actual| actual.as_f64())
                .is_some_and(|actual| actual <= *value),
            WhereClause::And(clauses) => clauses.iter().all(|c| c.matches(metadata)),
            WhereClause::Or(clauses) => clauses.iter().any(|c| c.matches(metadata)),
        }
    }

    /// Names of every metadata field this clause constrains
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            WhereClause::Eq { field, .. }
            | WhereClause::In { field, .. }
            | WhereClause::Gte { field, .. }
            | WhereClause::Lte { field, .. } => out.push(field.as_str()),
            WhereClause::And(clauses) | WhereClause::Or(clauses) => {
                for clause in clauses {
                    clause.collect_fields(out);
                }
            }
        }
    }
}

/// Opaque scope constraint, conjoined verbatim with every index query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeFilter(WhereClause);

impl ScopeFilter {
    pub fn new(clause: WhereClause) -> Self {
        Self(clause)
    }

    /// Restrict to a set of ingested sources
    pub fn sources<S: AsRef<str>>(source_ids: &[S]) -> Option<Self> {
        if source_ids.is_empty() {
            return None;
        }
        Some(Self(WhereClause::is_in(
            "source_id",
            source_ids.iter().map(|s| s.as_ref().to_string()),
        )))
    }

    pub fn clause(&self) -> &WhereClause {
        &self.0
    }
}

/// One value in a metadata filter map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

/// Key/value metadata filters; an absent key means unconstrained
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilters(BTreeMap<String, FilterValue>);

impl MetadataFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FilterValue) {
        self.0.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: FilterValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.0.iter()
    }

    /// Overlay `other` on top of `self`, key by key
    pub fn merge(&mut self, other: &MetadataFilters) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Compile into the index filter grammar
    pub fn to_where_clause(&self) -> Option<WhereClause> {
        let mut clauses = Vec::new();

        for (key, value) in &self.0 {
            let clause = match (key.as_str(), value) {
                (PARTICIPANTS, FilterValue::List(people)) => {
                    WhereClause::any_of("sender", people.iter().cloned())
                }
                (PARTICIPANTS, FilterValue::Text(person)) => {
                    Some(WhereClause::eq("sender", person.as_str()))
                }
                (DATE_GTE, FilterValue::Number(ts)) => Some(WhereClause::Gte {
                    field: "date".to_string(),
                    value: *ts,
                }),
                (DATE_LTE, FilterValue::Number(ts)) => Some(WhereClause::Lte {
                    field: "date".to_string(),
                    value: *ts,
                }),
                (_, FilterValue::Text(text)) => Some(WhereClause::eq(key.as_str(), text.as_str())),
                (_, FilterValue::Number(n)) => Some(WhereClause::eq(key.as_str(), *n)),
                (_, FilterValue::List(items)) if items.is_empty() => None,
                (_, FilterValue::List(items)) => {
                    Some(WhereClause::is_in(key.as_str(), items.iter().cloned()))
                }
            };

            if let Some(clause) = clause {
                clauses.push(clause);
            }
        }

        WhereClause::all_of(clauses)
    }
}

/// Conjoin compiled filters with an optional scope filter
pub fn combine(filters: Option<WhereClause>, scope: Option<&ScopeFilter>) -> Option<WhereClause> {
    let mut clauses = Vec::new();
    if let Some(clause) = filters {
        clauses.push(clause);
    }
    if let Some(scope) = scope {
        clauses.push(scope.clause().clone());
    }
    WhereClause::all_of(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(sender: &str, date: i64) -> DocumentMetadata {
        DocumentMetadata {
            sender: Some(sender.to_string()),
            date: Some(date),
            source_id: Some("pst-1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_participant_is_plain_equality() {
        let filters = MetadataFilters::new().with(
            PARTICIPANTS,
            FilterValue::List(vec!["a@example.com".to_string()]),
        );

        let clause = filters.to_where_clause().unwrap();
        assert_eq!(clause, WhereClause::eq("sender", "a@example.com"));
    }

    #[test]
    fn test_multiple_participants_become_disjunction() {
        let filters = MetadataFilters::new().with(
            PARTICIPANTS,
            FilterValue::List(vec!["a@example.com".to_string(), "b@example.com".to_string()]),
        );

        match filters.to_where_clause().unwrap() {
            WhereClause::Or(members) => assert_eq!(members.len(), 2),
            other => panic!("expected disjunction, got {:?}", other),
        }
    }

    #[test]
    fn test_date_range_and_participants_conjoined() {
        let filters = MetadataFilters::new()
            .with(DATE_GTE, FilterValue::Number(100.0))
            .with(DATE_LTE, FilterValue::Number(200.0))
            .with(
                PARTICIPANTS,
                FilterValue::List(vec!["a@example.com".to_string()]),
            );

        let clause = filters.to_where_clause().unwrap();
        assert!(matches!(clause, WhereClause::And(ref c) if c.len() == 3));
        assert_eq!(clause.fields(), vec!["date", "sender"]);

        assert!(clause.matches(&metadata("a@example.com", 150)));
        assert!(!clause.matches(&metadata("a@example.com", 250)));
        assert!(!clause.matches(&metadata("c@example.com", 150)));
    }

    #[test]
    fn test_merge_overrides_keys() {
        let mut base = MetadataFilters::new().with("folder", FilterValue::Text("Inbox".into()));
        let extra = MetadataFilters::new().with("folder", FilterValue::Text("Sent".into()));
        base.merge(&extra);
        assert_eq!(base.get("folder"), Some(&FilterValue::Text("Sent".into())));
    }

    #[test]
    fn test_scope_filter_applied_verbatim() {
        let scope = ScopeFilter::sources(&["pst-1", "pst-2"]).unwrap();
        let combined = combine(None, Some(&scope)).unwrap();
        assert_eq!(&combined, scope.clause());
        assert!(combined.matches(&metadata("x@example.com", 1)));

        assert!(ScopeFilter::sources::<&str>(&[]).is_none());
    }

    #[test]
    fn test_missing_field_never_matches_range() {
        let clause = WhereClause::Gte {
            field: "date".to_string(),
            value: 0.0,
        };
        assert!(!clause.matches(&DocumentMetadata::default()));
    }
}
