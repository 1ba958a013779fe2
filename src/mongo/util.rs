// One-shot document-store helpers
// Each call builds a throwaway engine from the supplied config, runs a single
// query, and either hands back the lazy batch sequence or concatenates it.

use mongodb::bson::Document;

use crate::batch::{drain, RecordBatch};
use crate::error::StoreError;
use crate::mongo::engine::{DocumentBatches, MongoConfig, MongoEngine};
use crate::mongo::filter::RecordFilter;

/// Distinct-values request: a field plus an optional pipeline stage injected
/// ahead of the grouping stage (e.g. a `$match`).
#[derive(Debug, Clone)]
pub struct DistinctSpec {
    pub field: String,
    pub pre_stage: Option<Document>,
}

/// Options for [`record_batches`]. `distinct` takes precedence; when it is set
/// the filter and projection are ignored and the pre-stage governs filtering.
#[derive(Debug, Clone, Default)]
pub struct QueryOpts {
    pub filter: Option<RecordFilter>,
    pub projection: Option<Document>,
    pub distinct: Option<DistinctSpec>,
}

/// Lazy batch sequence over a collection, addressed explicitly rather than
/// through engine selector state.
pub async fn record_batches(
    config: &MongoConfig,
    database: &str,
    collection: &str,
    opts: QueryOpts,
) -> Result<DocumentBatches, StoreError> {
    let engine = MongoEngine::with_target(config, Some(database), Some(collection))?;
    if let Some(distinct) = opts.distinct {
        return engine
            .distinct_batches(&distinct.field, distinct.pre_stage)
            .await;
    }
    let filter = opts.filter.map(|f| f.to_document());
    engine.find_batches(filter, opts.projection).await
}

/// Drain [`record_batches`] into a single in-memory table.
pub async fn load_all(
    config: &MongoConfig,
    database: &str,
    collection: &str,
    opts: QueryOpts,
) -> Result<RecordBatch, StoreError> {
    let mut batches = record_batches(config, database, collection, opts).await?;
    drain(&mut batches).await
}

/// All distinct values of a field as one table with a single column named
/// after the field.
pub async fn load_all_distinct(
    config: &MongoConfig,
    database: &str,
    collection: &str,
    field: &str,
    pre_stage: Option<Document>,
) -> Result<RecordBatch, StoreError> {
    let opts = QueryOpts {
        distinct: Some(DistinctSpec {
            field: field.to_string(),
            pre_stage,
        }),
        ..Default::default()
    };
    load_all(config, database, collection, opts).await
}
