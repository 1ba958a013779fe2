// SQL generation and parameter binding for the relational wrapper
// Builds parameterised INSERT/UPDATE/SELECT text from caller-named columns; all
// identifiers are caller-supplied, values always travel as parameters.

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

use crate::batch::CellValue;

/// Parameterised INSERT for explicitly named columns, one placeholder per
/// column: `INSERT INTO t (a, b) VALUES ($1, $2)`.
pub fn insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Parameterised UPDATE: SET columns first, then equality conditions, in
/// placeholder order. With no condition columns the statement has no WHERE
/// clause and touches every row; callers gate that themselves.
pub fn update_sql(table: &str, columns: &[&str], condition_columns: &[&str]) -> String {
    let mut idx = 0;
    let sets: Vec<String> = columns
        .iter()
        .map(|c| {
            idx += 1;
            format!("{} = ${}", c, idx)
        })
        .collect();
    let conditions: Vec<String> = condition_columns
        .iter()
        .map(|c| {
            idx += 1;
            format!("{} = ${}", c, idx)
        })
        .collect();
    let mut sql = format!("UPDATE {} SET {}", table, sets.join(", "));
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql
}

/// One predicate on a single column
#[derive(Debug, Clone, PartialEq)]
pub enum SqlPredicate {
    /// Scalar equality
    Eq(CellValue),
    /// Inclusive range
    Between(CellValue, CellValue),
    /// Membership test; an empty list matches nothing
    In(Vec<CellValue>),
}

/// Render a simplified filter into a parameterised predicate. Placeholders
/// start at `$start`; returns the clause text (no WHERE keyword) and the
/// parameter values in placeholder order. Clauses combine conjunctively.
pub fn where_clause(
    filter: &[(String, SqlPredicate)],
    start: usize,
) -> (String, Vec<CellValue>) {
    let mut parts = Vec::new();
    let mut params = Vec::new();
    let mut idx = start;
    for (column, predicate) in filter {
        match predicate {
            SqlPredicate::Eq(value) => {
                parts.push(format!("{} = ${}", column, idx));
                params.push(value.clone());
                idx += 1;
            }
            SqlPredicate::Between(low, high) => {
                parts.push(format!("{} BETWEEN ${} AND ${}", column, idx, idx + 1));
                params.push(low.clone());
                params.push(high.clone());
                idx += 2;
            }
            SqlPredicate::In(values) => {
                if values.is_empty() {
                    parts.push("FALSE".to_string());
                    continue;
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|_| {
                        let p = format!("${}", idx);
                        idx += 1;
                        p
                    })
                    .collect();
                parts.push(format!("{} IN ({})", column, placeholders.join(", ")));
                params.extend(values.iter().cloned());
            }
        }
    }
    (parts.join(" AND "), params)
}

/// Two-table join query built from caller-supplied parts
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub table_primary: String,
    pub table_secondary: String,
    pub alias_primary: String,
    pub alias_secondary: String,
    /// Join condition over the aliases, e.g. `m.id_meta = s.id_meta`
    pub join_condition: String,
    /// Alias-qualified columns to select; empty selects `*`
    pub columns: Vec<String>,
    pub where_clause: Option<String>,
    pub limit: Option<i64>,
}

impl JoinSpec {
    pub fn to_sql(&self) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        let mut sql = format!(
            "SELECT {} FROM {} AS {} JOIN {} AS {} ON {}",
            columns,
            self.table_primary,
            self.alias_primary,
            self.table_secondary,
            self.alias_secondary,
            self.join_condition
        );
        if let Some(where_) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(where_);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }
}

impl ToSql for CellValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            CellValue::Null => Ok(IsNull::Yes),
            CellValue::Bool(v) => v.to_sql(ty, out),
            CellValue::Int(v) => match ty.name() {
                "int2" => (*v as i16).to_sql(ty, out),
                "int4" => (*v as i32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            CellValue::Float(v) => match ty.name() {
                "float4" => (*v as f32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            CellValue::Text(v) => v.to_sql(ty, out),
            CellValue::Date(v) => v.to_sql(ty, out),
            CellValue::DateTime(v) => match ty.name() {
                "timestamptz" => {
                    DateTime::<Utc>::from_naive_utc_and_offset(*v, Utc).to_sql(ty, out)
                }
                _ => v.to_sql(ty, out),
            },
            CellValue::Binary(v) => v.as_slice().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // cells are dynamically typed; mismatches surface as execution errors
        true
    }

    to_sql_checked!();
}

/// The documented tokio-postgres adapter for passing a parameter slice to
/// `query_raw`.
pub(crate) fn slice_iter<'a>(
    s: &'a [&'a (dyn ToSql + Sync)],
) -> impl ExactSizeIterator<Item = &'a dyn ToSql> + 'a {
    s.iter().map(|s| *s as _)
}
