// One-shot relational helpers
// Map-based insert/update and schema lookups that build a throwaway engine from
// the supplied config, mirroring the document-store utility functions.

use std::collections::HashMap;

use crate::batch::CellValue;
use crate::error::StoreError;
use crate::postgres::engine::{PgConfig, PgEngine};
use crate::postgres::sql::{insert_sql, update_sql};

/// Values for one column: a scalar applies to every row (broadcast), a
/// sequence contributes one value per row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    One(CellValue),
    Many(Vec<CellValue>),
}

/// Column names for a table.
pub async fn table_column_names(
    config: &PgConfig,
    database: &str,
    table: &str,
) -> Result<Vec<String>, StoreError> {
    let engine = PgEngine::new(config.clone())?;
    Ok(engine
        .describe_table(database, table)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect())
}

/// Primary-key column names for a table.
pub async fn table_primary_keys(
    config: &PgConfig,
    database: &str,
    table: &str,
) -> Result<Vec<String>, StoreError> {
    let engine = PgEngine::new(config.clone())?;
    engine.primary_keys(database, table).await
}

/// Insert rows assembled from a column -> values map. Only the explicitly
/// named `keys` columns are written; there is no implicit column discovery.
/// Returns the inserted-row count.
pub async fn insert_records_from_map(
    config: &PgConfig,
    database: &str,
    table: &str,
    data: &HashMap<String, ColumnValues>,
    keys: &[&str],
) -> Result<u64, StoreError> {
    if keys.is_empty() {
        return Err(StoreError::ShapeMismatch(
            "no columns named for insert".to_string(),
        ));
    }
    let rows = rows_from_map(data, keys)?;
    let engine = PgEngine::new(config.clone())?;
    engine
        .insert_rows(database, &insert_sql(table, keys), &rows)
        .await
}

/// Update rows assembled from a column -> values map: `keys` name the columns
/// written, `condition_keys` the equality conditions, both drawn from `data`
/// position by position. Returns the affected-row count.
pub async fn update_records_from_map(
    config: &PgConfig,
    database: &str,
    table: &str,
    data: &HashMap<String, ColumnValues>,
    keys: &[&str],
    condition_keys: &[&str],
) -> Result<u64, StoreError> {
    if keys.is_empty() {
        return Err(StoreError::ShapeMismatch(
            "no columns named for update".to_string(),
        ));
    }
    if condition_keys.is_empty() {
        return Err(StoreError::ShapeMismatch(
            "no condition columns named for update".to_string(),
        ));
    }
    let all_keys: Vec<&str> = keys.iter().chain(condition_keys.iter()).copied().collect();
    let rows = rows_from_map(data, &all_keys)?;
    let engine = PgEngine::new(config.clone())?;
    engine
        .execute_many(database, &update_sql(table, keys, condition_keys), &rows)
        .await
}

/// Assemble value rows for the listed columns. Every listed column must be
/// present; all sequences must agree on length; scalars broadcast.
fn rows_from_map(
    data: &HashMap<String, ColumnValues>,
    keys: &[&str],
) -> Result<Vec<Vec<CellValue>>, StoreError> {
    let per_key: Vec<&ColumnValues> = keys
        .iter()
        .map(|key| {
            data.get(*key).ok_or_else(|| {
                StoreError::ShapeMismatch(format!("column {} missing from data", key))
            })
        })
        .collect::<Result<_, _>>()?;

    let mut n_rows = None;
    for (key, values) in keys.iter().zip(&per_key) {
        if let ColumnValues::Many(v) = values {
            match n_rows {
                None => n_rows = Some(v.len()),
                Some(n) if n != v.len() => {
                    return Err(StoreError::ShapeMismatch(format!(
                        "column {} has {} values, expected {}",
                        key,
                        v.len(),
                        n
                    )));
                }
                _ => {}
            }
        }
    }
    let n = n_rows.unwrap_or(1);

    Ok((0..n)
        .map(|i| {
            per_key
                .iter()
                .map(|values| match values {
                    ColumnValues::One(v) => v.clone(),
                    ColumnValues::Many(vs) => vs[i].clone(),
                })
                .collect()
        })
        .collect())
}
