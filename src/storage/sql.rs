//! SQL rendering of filters against the `emails` table

use super::{AggregateFilter, SearchFilters, StoreError};
use crate::retrieval::{FilterScalar, WhereClause};
use rusqlite::types::Value;

/// Filter field name to column
fn column(field: &str) -> Result<&'static str, StoreError> {
    Ok(match field {
        "email_id" | "id" => "id",
        "subject" => "subject",
        "sender" => "sender",
        "sender_name" => "sender_name",
        "date" => "date",
        "source_id" => "source_id",
        "folder" => "folder",
        "has_attachments" => "has_attachments",
        other => return Err(StoreError::UnsupportedFilter(other.to_string())),
    })
}

fn scalar(value: &FilterScalar) -> Value {
    match value {
        FilterScalar::Bool(b) => Value::Integer(i64::from(*b)),
        FilterScalar::Number(n) if n.fract() == 0.0 => Value::Integer(*n as i64),
        FilterScalar::Number(n) => Value::Real(*n),
        FilterScalar::Text(s) => Value::Text(s.clone()),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Accumulates `AND`-ed conditions and their positional parameters
#[derive(Debug, Default)]
pub(crate) struct Conditions {
    parts: Vec<String>,
    pub params: Vec<Value>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sql: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.parts.push(sql.into());
        self.params.extend(params);
    }

    pub fn clause(&mut self, clause: &WhereClause) -> Result<(), StoreError> {
        let sql = render(clause, &mut self.params)?;
        self.parts.push(sql);
        Ok(())
    }

    pub fn in_list(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        self.push(
            format!("{} IN ({})", column, placeholders(values.len())),
            values.iter().cloned().map(Value::Text),
        );
    }

    /// ` WHERE ...` or the empty string
    pub fn where_sql(&self) -> String {
        if self.parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.parts.join(" AND "))
        }
    }

    pub fn aggregate(filter: &AggregateFilter) -> Result<Self, StoreError> {
        let mut conditions = Self::new();
        conditions.in_list("sender", &filter.senders);
        if let Some(gte) = filter.date_gte {
            conditions.push("date >= ?", [Value::Integer(gte)]);
        }
        if let Some(lte) = filter.date_lte {
            conditions.push("date <= ?", [Value::Integer(lte)]);
        }
        if let Some(scope) = &filter.scope {
            conditions.clause(scope.clause())?;
        }
        Ok(conditions)
    }

    pub fn search(filters: &SearchFilters) -> Self {
        let mut conditions = Self::new();
        conditions.in_list("source_id", &filters.source_ids);
        conditions.in_list("sender", &filters.senders);
        if let Some(from) = filters.date_from {
            conditions.push("date >= ?", [Value::Integer(from)]);
        }
        if let Some(to) = filters.date_to {
            conditions.push("date <= ?", [Value::Integer(to)]);
        }
        if let Some(flag) = filters.has_attachments {
            conditions.push("has_attachments = ?", [Value::Integer(i64::from(flag))]);
        }
        if !filters.folders.is_empty() {
            let ors = vec!["folder LIKE ? ESCAPE '\\'"; filters.folders.len()].join(" OR ");
            conditions.push(
                format!("({})", ors),
                filters
                    .folders
                    .iter()
                    .map(|f| Value::Text(format!("{}%", escape_like(f)))),
            );
        }
        conditions
    }
}

fn render(clause: &WhereClause, params: &mut Vec<Value>) -> Result<String, StoreError> {
    Ok(match clause {
        WhereClause::Eq { field, value } => {
            params.push(scalar(value));
            format!("{} = ?", column(field)?)
        }
        WhereClause::In { field, values } if values.is_empty() => {
            column(field)?;
            "0".to_string()
        }
        WhereClause::In { field, values } => {
            params.extend(values.iter().map(scalar));
            format!("{} IN ({})", column(field)?, placeholders(values.len()))
        }
        WhereClause::Gte { field, value } => {
            params.push(Value::Real(*value));
            format!("{} >= ?", column(field)?)
        }
        WhereClause::Lte { field, value } => {
            params.push(Value::Real(*value));
            format!("{} <= ?", column(field)?)
        }
        WhereClause::And(clauses) | WhereClause::Or(clauses) if clauses.is_empty() => {
            "1".to_string()
        }
        WhereClause::And(clauses) => join(clauses, " AND ", params)?,
        WhereClause::Or(clauses) => join(clauses, " OR ", params)?,
    })
}

fn join(clauses: &[WhereClause], op: &str, params: &mut Vec<Value>) -> Result<String, StoreError> {
    let parts = clauses
        .iter()
        .map(|c| render(c, params))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", parts.join(op)))
}

/// Escape `%`, `_` and the escape character for `LIKE ... ESCAPE '\'`
pub(crate) fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
