// Document-store wrapper: engine, simplified-filter translation, and one-shot
// query helpers.

pub mod engine;
pub mod filter;
pub mod util;

pub use engine::{
    BulkInsertOutcome, DocumentBatches, MongoConfig, MongoEngine, DEFAULT_MAX_PIPELINE_LEN,
    DELETE_ALL_CONFIRM,
};
pub use filter::{FieldPredicate, RecordFilter};
pub use util::{load_all, load_all_distinct, record_batches, DistinctSpec, QueryOpts};
