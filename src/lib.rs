//! Convenience wrappers around a document store (MongoDB) and a relational
//! database (PostgreSQL): simplified CRUD, query generation, and chunked
//! tabular batch reads for large result sets.

// Module declarations
pub mod batch;
pub mod error;
pub mod mongo;
pub mod postgres;

pub use batch::{drain, BatchSource, CellValue, RecordBatch, FIND_MANY_MAX_COUNT};
pub use error::StoreError;
