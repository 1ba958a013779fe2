// MongoDB engine
// Convenience wrapper around one persistent client: a mutable database/collection
// selector plus CRUD and batched read operations. Multi-record reads drain the
// server-side cursor in bounded chunks (see crate::batch).

use std::collections::HashMap;

use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{
    ClientOptions, FindOneOptions, FindOptions, InsertManyOptions, ServerAddress, UpdateOptions,
};
use mongodb::{Client, Cursor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::{next_chunk, BatchSource, CellValue, RecordBatch, FIND_MANY_MAX_COUNT};
use crate::error::StoreError;

/// Confirmation token required by the delete-all operations.
pub const DELETE_ALL_CONFIRM: &str = "yes";

/// Default cap on the number of pipeline stages per update_many driver call.
pub const DEFAULT_MAX_PIPELINE_LEN: usize = 1000;

/// Connection configuration for the document store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
}

impl MongoConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Outcome of a best-effort bulk insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkInsertOutcome {
    pub attempted: usize,
    pub failed: usize,
}

impl BulkInsertOutcome {
    pub fn inserted(&self) -> usize {
        self.attempted - self.failed
    }
}

/// Convenience wrapper for interactions with a MongoDB deployment
pub struct MongoEngine {
    config: MongoConfig,
    client: Client,
    database: Option<String>,
    collection: Option<String>,
}

impl MongoEngine {
    /// Create an engine with no target selected. The client connects lazily on
    /// first use and is released when the engine is dropped.
    pub fn connect(config: &MongoConfig) -> Result<Self, StoreError> {
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: config.host.clone(),
                port: Some(config.port),
            }])
            .build();
        let client = Client::with_options(options)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            config: config.clone(),
            client,
            database: None,
            collection: None,
        })
    }

    /// Create an engine with an initial database/collection selection.
    pub fn with_target(
        config: &MongoConfig,
        database: Option<&str>,
        collection: Option<&str>,
    ) -> Result<Self, StoreError> {
        let mut engine = Self::connect(config)?;
        engine.set_target(database, collection);
        Ok(engine)
    }

    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    /// Set the database and collection used by subsequent data operations.
    /// `None` leaves the corresponding half of the selector unchanged.
    pub fn set_target(&mut self, database: Option<&str>, collection: Option<&str>) {
        if let Some(database) = database {
            self.database = Some(database.to_string());
        }
        if let Some(collection) = collection {
            self.collection = Some(collection.to_string());
        }
    }

    pub fn target(&self) -> (Option<&str>, Option<&str>) {
        (self.database.as_deref(), self.collection.as_deref())
    }

    /// Handle to the selected collection. Both halves of the selector must be set.
    fn collection(&self) -> Result<mongodb::Collection<Document>, StoreError> {
        let database = self
            .database
            .as_deref()
            .ok_or(StoreError::TargetNotSet("database"))?;
        let collection = self
            .collection
            .as_deref()
            .ok_or(StoreError::TargetNotSet("collection"))?;
        Ok(self.client.database(database).collection(collection))
    }

    // --- Namespace inspection ---

    pub async fn list_databases(&self) -> Result<Vec<String>, StoreError> {
        self.client
            .list_database_names(None, None)
            .await
            .map_err(StoreError::query)
    }

    /// Collection names per database, for one database or for all of them.
    pub async fn list_collections(
        &self,
        database: Option<&str>,
    ) -> Result<HashMap<String, Vec<String>>, StoreError> {
        let databases = match database {
            Some(db) => vec![db.to_string()],
            None => self.list_databases().await?,
        };
        let mut out = HashMap::new();
        for db in databases {
            let names = self
                .client
                .database(&db)
                .list_collection_names(None)
                .await
                .map_err(StoreError::query)?;
            out.insert(db, names);
        }
        Ok(out)
    }

    /// All ids in the selected collection.
    ///
    /// Tries a distinct query first; if the server rejects it (distinct results
    /// are capped at a single response), falls back to a full chunked scan with
    /// an id-only projection. The fallback is slower but unbounded.
    pub async fn ids(&self) -> Result<Vec<String>, StoreError> {
        let cn = self.collection()?;
        match cn.distinct("_id", None, None).await {
            Ok(values) => Ok(values.iter().map(bson_id_string).collect()),
            Err(err) => {
                warn!("distinct on _id failed ({}), falling back to a full scan", err);
                let mut batches = self.find_batches(None, Some(doc! { "_id": 1 })).await?;
                let mut ids = Vec::new();
                while let Some(batch) = batches.next_batch().await? {
                    if let Some(column) = batch.column("_id") {
                        ids.extend(column.into_iter().map(cell_id_string));
                    }
                }
                Ok(ids)
            }
        }
    }

    // --- Writes ---

    /// Insert one record. Fails with [`StoreError::DuplicateId`] if the record
    /// carries an explicit `_id` that already exists. The duplicate check is a
    /// lookup-then-insert sequence and is not atomic under concurrent writers.
    pub async fn insert_one(&self, record: Document) -> Result<(), StoreError> {
        let cn = self.collection()?;
        if let Some(id) = record.get("_id") {
            let existing = cn
                .find_one(doc! { "_id": id.clone() }, None)
                .await
                .map_err(StoreError::query)?;
            if existing.is_some() {
                return Err(StoreError::DuplicateId(bson_id_string(id)));
            }
        }
        let res = cn.insert_one(record, None).await.map_err(StoreError::query)?;
        debug!(
            "inserted 1 record with id {} into {}.{}",
            res.inserted_id,
            self.database.as_deref().unwrap_or(""),
            self.collection.as_deref().unwrap_or("")
        );
        Ok(())
    }

    /// Insert many records in one unordered batch. Duplicate-id collisions drop
    /// only the colliding records; the rest are persisted and the outcome
    /// reports how many failed. Any other driver error is fatal to the call.
    pub async fn insert_many(
        &self,
        records: Vec<Document>,
    ) -> Result<BulkInsertOutcome, StoreError> {
        let cn = self.collection()?;
        let attempted = records.len();
        let mut options = InsertManyOptions::default();
        options.ordered = Some(false);
        match cn.insert_many(records, options).await {
            Ok(_) => Ok(BulkInsertOutcome {
                attempted,
                failed: 0,
            }),
            Err(err) => match *err.kind {
                ErrorKind::BulkWrite(ref failure) => {
                    let failed = failure.write_errors.as_ref().map_or(0, |w| w.len());
                    warn!("failed to write {} out of {} records", failed, attempted);
                    Ok(BulkInsertOutcome { attempted, failed })
                }
                _ => Err(StoreError::query(err)),
            },
        }
    }

    /// Apply an update document to all records matching the filter.
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<(), StoreError> {
        let cn = self.collection()?;
        let mut options = UpdateOptions::default();
        options.upsert = Some(upsert);
        cn.update_one(filter, update, options)
            .await
            .map_err(StoreError::query)?;
        Ok(())
    }

    /// Apply a pipeline-style update, split into sub-batches of at most
    /// `max_pipeline_len` stages (default [`DEFAULT_MAX_PIPELINE_LEN`]), one
    /// driver call each. Not transactional: a failure partway through leaves
    /// earlier sub-batches applied.
    pub async fn update_many(
        &self,
        filter: Document,
        stages: Vec<Document>,
        upsert: bool,
        max_pipeline_len: Option<usize>,
    ) -> Result<(), StoreError> {
        let cn = self.collection()?;
        let max = max_pipeline_len.unwrap_or(DEFAULT_MAX_PIPELINE_LEN).max(1);
        for chunk in stages.chunks(max) {
            debug!("updating with {} pipeline stages", chunk.len());
            let mut options = UpdateOptions::default();
            options.upsert = Some(upsert);
            cn.update_many(filter.clone(), chunk.to_vec(), options)
                .await
                .map_err(StoreError::query)?;
        }
        Ok(())
    }

    // --- Reads ---

    /// Find a single record by id. Tries the id as given first, then retried as
    /// a converted ObjectId. Fails with [`StoreError::NotFound`] if neither
    /// lookup succeeds.
    pub async fn find_one_by_id(&self, id: &str) -> Result<Document, StoreError> {
        let cn = self.collection()?;
        if let Some(rec) = cn
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(StoreError::query)?
        {
            return Ok(rec);
        }
        if let Ok(oid) = ObjectId::parse_str(id) {
            if let Some(rec) = cn
                .find_one(doc! { "_id": oid }, None)
                .await
                .map_err(StoreError::query)?
            {
                return Ok(rec);
            }
        }
        Err(StoreError::NotFound(format!("record with _id {}", id)))
    }

    /// Same as [`find_batches`](Self::find_batches) but for a single record.
    pub async fn find_one(
        &self,
        filter: Option<Document>,
        projection: Option<Document>,
    ) -> Result<Option<Document>, StoreError> {
        let cn = self.collection()?;
        let mut options = FindOneOptions::default();
        options.projection = projection;
        cn.find_one(filter.unwrap_or_default(), options)
            .await
            .map_err(StoreError::query)
    }

    /// Find records by explicit ids, optionally limited and further filtered.
    /// `None` ids means no id constraint.
    pub async fn find_many_by_ids(
        &self,
        ids: Option<&[Bson]>,
        limit: Option<i64>,
        filter_other: Option<Document>,
    ) -> Result<Vec<Document>, StoreError> {
        let cn = self.collection()?;
        let mut filter = match ids {
            Some(ids) => doc! { "_id": { "$in": ids.to_vec() } },
            None => Document::new(),
        };
        if let Some(extra) = filter_other {
            filter.extend(extra);
        }
        let mut options = FindOptions::default();
        options.limit = limit;
        let mut cursor = cn.find(filter, options).await.map_err(StoreError::query)?;
        let mut out = Vec::new();
        while let Some(rec) = cursor.try_next().await.map_err(StoreError::query)? {
            out.push(rec);
        }
        Ok(out)
    }

    /// Lazy sequence of tabular batches over a filtered, projected scan.
    ///
    /// Batches arrive in cursor order, each holding at most
    /// [`FIND_MANY_MAX_COUNT`] rows. The sequence is single-pass; re-invoking
    /// this method opens a fresh cursor.
    pub async fn find_batches(
        &self,
        filter: Option<Document>,
        projection: Option<Document>,
    ) -> Result<DocumentBatches, StoreError> {
        let cn = self.collection()?;
        let mut options = FindOptions::default();
        options.projection = projection;
        let cursor = cn
            .find(filter.unwrap_or_default(), options)
            .await
            .map_err(StoreError::query)?;
        Ok(DocumentBatches::new(cursor))
    }

    /// Batched results of an aggregation pipeline: an optional injected
    /// pre-stage followed by `{"$group": group}`.
    pub async fn group_batches(
        &self,
        group: Document,
        pre_stage: Option<Document>,
    ) -> Result<DocumentBatches, StoreError> {
        let cn = self.collection()?;
        let mut pipeline = Vec::new();
        if let Some(stage) = pre_stage {
            pipeline.push(stage);
        }
        pipeline.push(doc! { "$group": group });
        let cursor = cn.aggregate(pipeline, None).await.map_err(StoreError::query)?;
        Ok(DocumentBatches::new(cursor))
    }

    /// Distinct values of a field via a single-field group. The group-key
    /// column is renamed back to the field name in every produced batch.
    pub async fn distinct_batches(
        &self,
        field: &str,
        pre_stage: Option<Document>,
    ) -> Result<DocumentBatches, StoreError> {
        let group = doc! { "_id": format!("${}", field) };
        let batches = self.group_batches(group, pre_stage).await?;
        Ok(batches.renaming("_id", field))
    }

    // --- Deletes ---

    /// Delete exactly the listed ids. An empty list deletes nothing; clearing a
    /// collection goes through [`delete_all_records`](Self::delete_all_records).
    pub async fn delete_many(&self, ids: &[Bson]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let cn = self.collection()?;
        let res = cn
            .delete_many(doc! { "_id": { "$in": ids.to_vec() } }, None)
            .await
            .map_err(StoreError::query)?;
        Ok(res.deleted_count)
    }

    /// Delete every record in the selected collection. No-ops (returning 0)
    /// unless `confirm_delete` is exactly [`DELETE_ALL_CONFIRM`].
    pub async fn delete_all_records(&self, confirm_delete: &str) -> Result<u64, StoreError> {
        if confirm_delete != DELETE_ALL_CONFIRM {
            return Ok(0);
        }
        let cn = self.collection()?;
        let res = cn
            .delete_many(doc! {}, None)
            .await
            .map_err(StoreError::query)?;
        Ok(res.deleted_count)
    }

    /// Delete every record in every collection of a database, same token rule
    /// as [`delete_all_records`](Self::delete_all_records).
    pub async fn delete_all_in_database(
        &self,
        database: &str,
        confirm_delete: &str,
    ) -> Result<u64, StoreError> {
        if confirm_delete != DELETE_ALL_CONFIRM {
            return Ok(0);
        }
        let db = self.client.database(database);
        let mut deleted = 0;
        let names = db
            .list_collection_names(None)
            .await
            .map_err(StoreError::query)?;
        for name in names {
            let res = db
                .collection::<Document>(&name)
                .delete_many(doc! {}, None)
                .await
                .map_err(StoreError::query)?;
            deleted += res.deleted_count;
        }
        Ok(deleted)
    }
}

/// Lazy, single-pass sequence of tabular batches over a document cursor
pub struct DocumentBatches {
    cursor: Cursor<Document>,
    rename: Option<(String, String)>,
    done: bool,
}

impl DocumentBatches {
    fn new(cursor: Cursor<Document>) -> Self {
        Self {
            cursor,
            rename: None,
            done: false,
        }
    }

    fn renaming(mut self, from: &str, to: &str) -> Self {
        self.rename = Some((from.to_string(), to.to_string()));
        self
    }
}

#[async_trait::async_trait]
impl BatchSource for DocumentBatches {
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, StoreError> {
        if self.done {
            return Ok(None);
        }
        let docs = next_chunk(&mut self.cursor, FIND_MANY_MAX_COUNT)
            .await
            .map_err(StoreError::query)?;
        if docs.is_empty() {
            self.done = true;
            return Ok(None);
        }
        let mut batch = batch_from_documents(&docs);
        if let Some((from, to)) = &self.rename {
            batch.rename_column(from, to);
        }
        Ok(Some(batch))
    }
}

/// Tabulate a chunk of documents: columns are the union of keys in first-seen
/// order, cells missing from a document become nulls.
pub(crate) fn batch_from_documents(docs: &[Document]) -> RecordBatch {
    let mut columns: Vec<String> = Vec::new();
    for doc in docs {
        for key in doc.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    let rows = docs
        .iter()
        .map(|doc| {
            columns
                .iter()
                .map(|c| doc.get(c).map(cell_from_bson).unwrap_or(CellValue::Null))
                .collect()
        })
        .collect();
    RecordBatch::from_parts(columns, rows)
}

/// Convert one BSON value to a cell. Object ids become their hex string;
/// nested arrays and documents are stringified as JSON.
pub(crate) fn cell_from_bson(value: &Bson) -> CellValue {
    match value {
        Bson::Null => CellValue::Null,
        Bson::Boolean(b) => CellValue::Bool(*b),
        Bson::Int32(i) => CellValue::Int(i64::from(*i)),
        Bson::Int64(i) => CellValue::Int(*i),
        Bson::Double(f) => CellValue::Float(*f),
        Bson::String(s) => CellValue::Text(s.clone()),
        Bson::ObjectId(oid) => CellValue::Text(oid.to_hex()),
        Bson::DateTime(dt) => chrono::DateTime::from_timestamp_millis(dt.timestamp_millis())
            .map(|d| CellValue::DateTime(d.naive_utc()))
            .unwrap_or(CellValue::Null),
        Bson::Binary(bin) => CellValue::Binary(bin.bytes.clone()),
        other => CellValue::Text(
            serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
        ),
    }
}

fn bson_id_string(value: &Bson) -> String {
    match value {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cell_id_string(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(s) => s.clone(),
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) => f.to_string(),
        CellValue::Bool(b) => b.to_string(),
        other => format!("{:?}", other),
    }
}
