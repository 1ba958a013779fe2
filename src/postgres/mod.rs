// Relational wrapper: engine, SQL generation, and one-shot map-based helpers.

pub mod engine;
pub mod sql;
pub mod util;

pub use engine::{ColumnDescription, PgConfig, PgEngine, PgPool, RowBatches};
pub use sql::{insert_sql, update_sql, where_clause, JoinSpec, SqlPredicate};
pub use util::{
    insert_records_from_map, table_column_names, table_primary_keys, update_records_from_map,
    ColumnValues,
};
