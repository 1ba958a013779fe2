// Tabular batch model and chunked pagination
// Bulk reads never materialize a full result set: a server-side cursor is drained
// in chunks of at most FIND_MANY_MAX_COUNT rows, each chunk packaged as one
// RecordBatch and handed to the consumer through the BatchSource contract.

use chrono::{NaiveDate, NaiveDateTime};
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Upper bound on the number of rows in one produced batch.
pub const FIND_MANY_MAX_COUNT: usize = 1000;

/// A single cell value in a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Binary(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// A bounded, in-memory table of rows materialized from one chunk of a cursor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl RecordBatch {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build from pre-aligned parts. Callers guarantee every row matches the
    /// column count.
    pub(crate) fn from_parts(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<CellValue>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one row. The row must have one value per column.
    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<(), StoreError> {
        if row.len() != self.columns.len() {
            return Err(StoreError::ShapeMismatch(format!(
                "row has {} values but batch has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.column_index(from) {
            self.columns[idx] = to.to_string();
        }
    }

    /// Append another batch, aligning columns by name. Columns missing on either
    /// side are backfilled with nulls; new columns keep their first-seen order.
    pub fn append(&mut self, other: RecordBatch) {
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }
        let mut index_map = Vec::with_capacity(other.columns.len());
        for name in &other.columns {
            let idx = match self.column_index(name) {
                Some(i) => i,
                None => {
                    self.columns.push(name.clone());
                    for row in &mut self.rows {
                        row.push(CellValue::Null);
                    }
                    self.columns.len() - 1
                }
            };
            index_map.push(idx);
        }
        for row in other.rows {
            let mut aligned = vec![CellValue::Null; self.columns.len()];
            for (value, &dst) in row.into_iter().zip(&index_map) {
                aligned[dst] = value;
            }
            self.rows.push(aligned);
        }
    }
}

/// A finite, forward-only, single-pass producer of bounded batches.
///
/// `Ok(None)` is the terminal signal; after it the source is exhausted and must
/// not be polled again. Re-running the originating operation opens a fresh
/// cursor; an exhausted source cannot be rewound.
#[async_trait::async_trait]
pub trait BatchSource: Send {
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, StoreError>;
}

/// Drain a batch source to completion and concatenate everything into a single
/// in-memory table. The one-shot "load everything" path for small results.
pub async fn drain<S: BatchSource + ?Sized>(source: &mut S) -> Result<RecordBatch, StoreError> {
    let mut all = RecordBatch::default();
    while let Some(batch) = source.next_batch().await? {
        all.append(batch);
    }
    Ok(all)
}

/// Pull up to `max` items from a fallible stream. An empty result means the
/// stream is exhausted; a short (non-empty) result is the final chunk.
pub(crate) async fn next_chunk<S, T, E>(stream: &mut S, max: usize) -> Result<Vec<T>, E>
where
    S: Stream<Item = Result<T, E>> + Unpin,
{
    let mut items = Vec::new();
    while items.len() < max {
        match stream.try_next().await? {
            Some(item) => items.push(item),
            None => break,
        }
    }
    Ok(items)
}
