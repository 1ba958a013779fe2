// Document-store integration tests. These exercise a live MongoDB instance and
// are ignored by default:
//
//   cargo test --test mongo_live -- --ignored
//
// Connection details come from MONGODB_HOST / MONGODB_PORT (localhost:27017
// when unset). The suite only touches databases named below, all prefixed
// duostore_test, and clears them between tests.

use mongodb::bson::{doc, Bson, Document};

use duostore::batch::{drain, BatchSource, CellValue, FIND_MANY_MAX_COUNT};
use duostore::mongo::{
    load_all_distinct, record_batches, DistinctSpec, MongoConfig, MongoEngine, QueryOpts,
    RecordFilter, DELETE_ALL_CONFIRM,
};
use duostore::StoreError;

const DATABASES: [&str; 2] = ["duostore_test1", "duostore_test2"];
const COLLECTIONS: [&str; 2] = ["coll_a", "coll_b"];

fn config() -> MongoConfig {
    let host = std::env::var("MONGODB_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("MONGODB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(27017);
    MongoConfig::new(host, port)
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn reset(engine: &MongoEngine) {
    for database in DATABASES {
        assert!(database.contains("test"));
        engine
            .delete_all_in_database(database, DELETE_ALL_CONFIRM)
            .await
            .unwrap();
    }
}

/// Unique records for one namespace, with explicit string ids.
fn make_data(database: &str, collection: &str, count: usize) -> Vec<Document> {
    (0..count)
        .map(|j| {
            doc! {
                "_id": format!("{}-{}-{}", database, collection, j),
                "text": format!("{}{}{}", database, collection, j),
                "number": j as i64,
                "text_nonunique": (j / 100).to_string(),
            }
        })
        .collect()
}

async fn setup_db_and_insert_records() -> (MongoEngine, Vec<Document>) {
    init_logging();
    let engine = MongoEngine::connect(&config()).unwrap();
    reset(&engine).await;

    let mut engine = engine;
    engine.set_target(Some(DATABASES[0]), Some(COLLECTIONS[0]));
    let data = make_data(DATABASES[0], COLLECTIONS[0], FIND_MANY_MAX_COUNT + 100);
    let outcome = engine.insert_many(data.clone()).await.unwrap();
    assert_eq!(outcome.failed, 0);
    (engine, data)
}

fn text_column(batch: &duostore::RecordBatch) -> Vec<String> {
    batch
        .column("text")
        .expect("text column")
        .into_iter()
        .map(|c| match c {
            CellValue::Text(s) => s.clone(),
            other => panic!("expected text cell, got {:?}", other),
        })
        .collect()
}

fn expected_texts(data: &[Document]) -> Vec<String> {
    data.iter()
        .map(|d| d.get_str("text").unwrap().to_string())
        .collect()
}

fn ids_of(data: &[Document]) -> Vec<Bson> {
    data.iter().map(|d| d.get("_id").unwrap().clone()).collect()
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn creation_and_insert_one_and_find_one_ops() {
    init_logging();
    let mut engine = MongoEngine::connect(&config()).unwrap();
    reset(&engine).await;

    // insert one record per namespace (implicitly creates databases/collections)
    for database in DATABASES {
        for collection in COLLECTIONS {
            engine.set_target(Some(database), Some(collection));
            let data = make_data(database, collection, 1);
            engine.insert_one(data[0].clone()).await.unwrap();
        }
    }

    let databases = engine.list_databases().await.unwrap();
    for database in DATABASES {
        assert!(databases.iter().any(|d| d == database));
        let collections = engine.list_collections(Some(database)).await.unwrap();
        let mut names = collections[database].clone();
        names.sort();
        assert_eq!(names, COLLECTIONS);
    }

    for database in DATABASES {
        for collection in COLLECTIONS {
            engine.set_target(Some(database), Some(collection));
            let expected = make_data(database, collection, 1).remove(0);
            let id = expected.get_str("_id").unwrap();
            let found = engine.find_one_by_id(id).await.unwrap();
            assert_eq!(found, expected);
        }
    }
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn insert_one_rejects_duplicate_ids() {
    let (engine, data) = setup_db_and_insert_records().await;
    let err = engine.insert_one(data[0].clone()).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId(_)));
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn bulk_insert_is_best_effort_on_duplicates() {
    let (engine, data) = setup_db_and_insert_records().await;
    let before = engine.ids().await.unwrap().len();

    // 3 colliding ids, 7 fresh records
    let mut batch: Vec<Document> = data[0..3].to_vec();
    for j in 0..7 {
        batch.push(doc! { "_id": format!("fresh-{}", j), "text": "x", "number": -1_i64 });
    }
    let outcome = engine.insert_many(batch).await.unwrap();
    assert_eq!(outcome.attempted, 10);
    assert_eq!(outcome.failed, 3);
    assert_eq!(outcome.inserted(), 7);

    let after = engine.ids().await.unwrap().len();
    assert_eq!(after, before + 7);
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn find_batches_chunks_and_concatenates() {
    let (engine, data) = setup_db_and_insert_records().await;

    // full scan: 1100 records -> exactly 2 batches of 1000 and 100, in order
    let mut batches = engine.find_batches(None, None).await.unwrap();
    let mut sizes = Vec::new();
    let mut texts = Vec::new();
    while let Some(batch) = batches.next_batch().await.unwrap() {
        sizes.push(batch.len());
        texts.extend(text_column(&batch));
    }
    assert_eq!(sizes, vec![FIND_MANY_MAX_COUNT, 100]);
    assert_eq!(texts, expected_texts(&data));

    // filter only
    let mut batches = engine
        .find_batches(Some(doc! { "number": { "$gt": 50 } }), None)
        .await
        .unwrap();
    let all = drain(&mut batches).await.unwrap();
    let expected: Vec<String> = data
        .iter()
        .filter(|d| d.get_i64("number").unwrap() > 50)
        .map(|d| d.get_str("text").unwrap().to_string())
        .collect();
    assert_eq!(text_column(&all), expected);

    // projection only: _id dropped, text kept
    let mut batches = engine
        .find_batches(None, Some(doc! { "_id": 0, "text": 1 }))
        .await
        .unwrap();
    let all = drain(&mut batches).await.unwrap();
    assert_eq!(all.columns(), &["text"]);
    assert_eq!(all.len(), data.len());

    // filter and projection
    let mut batches = engine
        .find_batches(
            Some(doc! { "number": { "$gt": 50 } }),
            Some(doc! { "_id": 0, "text": 1 }),
        )
        .await
        .unwrap();
    let all = drain(&mut batches).await.unwrap();
    assert_eq!(all.columns(), &["text"]);
    assert_eq!(text_column(&all), expected);
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn find_one_honors_filter_and_projection() {
    let (engine, data) = setup_db_and_insert_records().await;

    let rec = engine.find_one(None, None).await.unwrap().unwrap();
    assert!(data.contains(&rec));

    let rec = engine
        .find_one(Some(doc! { "number": { "$gt": 50 } }), None)
        .await
        .unwrap()
        .unwrap();
    assert!(rec.get_i64("number").unwrap() > 50);

    let rec = engine
        .find_one(None, Some(doc! { "_id": 0, "text": 1 }))
        .await
        .unwrap()
        .unwrap();
    assert!(rec.get("_id").is_none());
    assert!(rec.get_str("text").is_ok());
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn find_many_by_ids_limits_and_filters() {
    let (engine, data) = setup_db_and_insert_records().await;

    let subset = &data[100..105];
    let ids = ids_of(subset);

    let recs = engine
        .find_many_by_ids(Some(&ids), None, None)
        .await
        .unwrap();
    assert_eq!(recs.len(), 5);
    assert!(recs.iter().all(|r| subset.contains(r)));

    let recs = engine
        .find_many_by_ids(Some(&ids), Some(2), None)
        .await
        .unwrap();
    assert_eq!(recs.len(), 2);

    let numbers: Vec<i64> = subset[0..2]
        .iter()
        .map(|d| d.get_i64("number").unwrap())
        .collect();
    let recs = engine
        .find_many_by_ids(Some(&ids), None, Some(doc! { "number": { "$in": numbers } }))
        .await
        .unwrap();
    assert_eq!(recs.len(), 2);
    assert!(recs.iter().all(|r| subset[0..2].contains(r)));
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn find_one_by_id_falls_back_to_object_id() {
    init_logging();
    let mut engine = MongoEngine::connect(&config()).unwrap();
    reset(&engine).await;
    engine.set_target(Some(DATABASES[1]), Some(COLLECTIONS[1]));

    // no explicit _id: the server assigns an ObjectId
    engine
        .insert_one(doc! { "text": "native-id" })
        .await
        .unwrap();
    let rec = engine.find_one(None, None).await.unwrap().unwrap();
    let hex = rec.get_object_id("_id").unwrap().to_hex();

    let found = engine.find_one_by_id(&hex).await.unwrap();
    assert_eq!(found, rec);

    let err = engine.find_one_by_id("no-such-id").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn distinct_batches_rename_group_key() {
    let (engine, data) = setup_db_and_insert_records().await;

    // all distinct values of the field
    let mut batches = engine
        .distinct_batches("text_nonunique", None)
        .await
        .unwrap();
    let all = drain(&mut batches).await.unwrap();
    assert_eq!(all.columns(), &["text_nonunique"]);
    let mut values: Vec<String> = all
        .column("text_nonunique")
        .unwrap()
        .into_iter()
        .map(|c| match c {
            CellValue::Text(s) => s.clone(),
            other => panic!("expected text cell, got {:?}", other),
        })
        .collect();
    values.sort();
    let mut expected: Vec<String> = data
        .iter()
        .map(|d| d.get_str("text_nonunique").unwrap().to_string())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    expected.sort();
    assert_eq!(values, expected);

    // pre-filter to exactly 2 values, regardless of record count
    let pre = doc! { "$match": { "text_nonunique": { "$in": ["1", "2"] } } };
    let mut batches = engine
        .distinct_batches("text_nonunique", Some(pre))
        .await
        .unwrap();
    let all = drain(&mut batches).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn update_one_and_pipeline_update_many() {
    let (engine, data) = setup_db_and_insert_records().await;

    let id = data[0].get("_id").unwrap().clone();
    engine
        .update_one(
            doc! { "_id": id.clone() },
            doc! { "$set": { "number": 999_i64 } },
            false,
        )
        .await
        .unwrap();
    let rec = engine
        .find_one(Some(doc! { "_id": id }), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.get_i64("number").unwrap(), 999);

    // two stages, max pipeline length 1 -> two sub-batches, both applied
    let stages = vec![
        doc! { "$set": { "flag_a": true } },
        doc! { "$set": { "flag_b": true } },
    ];
    engine
        .update_many(doc! { "number": { "$lt": 5 } }, stages, false, Some(1))
        .await
        .unwrap();
    let rec = engine
        .find_one(Some(doc! { "number": 0_i64 }), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.get_bool("flag_a").unwrap(), true);
    assert_eq!(rec.get_bool("flag_b").unwrap(), true);
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn delete_many_is_exact_and_empty_list_is_a_noop() {
    let (engine, data) = setup_db_and_insert_records().await;

    let doomed = &data[500..520];
    let doomed_ids = ids_of(doomed);
    let deleted = engine.delete_many(&doomed_ids).await.unwrap();
    assert_eq!(deleted, 20);

    let mut remaining = engine.ids().await.unwrap();
    remaining.sort();
    let mut expected: Vec<String> = data
        .iter()
        .map(|d| d.get_str("_id").unwrap().to_string())
        .filter(|id| !doomed.iter().any(|d| d.get_str("_id").unwrap() == id))
        .collect();
    expected.sort();
    assert_eq!(remaining, expected);

    // empty list deletes nothing
    let deleted = engine.delete_many(&[]).await.unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(engine.ids().await.unwrap().len(), expected.len());

    // wrong token is a silent no-op, the right one clears the collection
    let deleted = engine.delete_all_records("nope").await.unwrap();
    assert_eq!(deleted, 0);
    let deleted = engine.delete_all_records(DELETE_ALL_CONFIRM).await.unwrap();
    assert_eq!(deleted as usize, expected.len());
    assert!(engine.ids().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a running MongoDB instance"]
async fn one_shot_helpers_translate_simplified_filters() {
    let (engine, data) = setup_db_and_insert_records().await;
    let (database, collection) = engine.target();
    let (database, collection) = (database.unwrap(), collection.unwrap());
    let config = config();

    // membership
    let opts = QueryOpts {
        filter: Some(RecordFilter::new().one_of("number", vec![2_i64, 3, 4])),
        ..Default::default()
    };
    let mut batches = record_batches(&config, database, collection, opts)
        .await
        .unwrap();
    let all = drain(&mut batches).await.unwrap();
    assert_eq!(all.len(), 3);

    // membership and equality combine conjunctively
    let opts = QueryOpts {
        filter: Some(
            RecordFilter::new()
                .one_of("number", vec![2_i64, 3, 4])
                .eq("text_nonunique", "0"),
        ),
        ..Default::default()
    };
    let mut batches = record_batches(&config, database, collection, opts)
        .await
        .unwrap();
    assert_eq!(drain(&mut batches).await.unwrap().len(), 3);

    // inclusive range
    let opts = QueryOpts {
        filter: Some(RecordFilter::new().between("number", 2_i64, 4_i64)),
        ..Default::default()
    };
    let mut batches = record_batches(&config, database, collection, opts)
        .await
        .unwrap();
    assert_eq!(drain(&mut batches).await.unwrap().len(), 3);

    // native predicate passthrough with projection
    let opts = QueryOpts {
        filter: Some(RecordFilter::new().raw("number", doc! { "$gt": 50 })),
        projection: Some(doc! { "_id": 0, "text": 1 }),
        ..Default::default()
    };
    let mut batches = record_batches(&config, database, collection, opts)
        .await
        .unwrap();
    let all = drain(&mut batches).await.unwrap();
    assert_eq!(all.columns(), &["text"]);
    let expected = data
        .iter()
        .filter(|d| d.get_i64("number").unwrap() > 50)
        .count();
    assert_eq!(all.len(), expected);

    // distinct via opts, pre-filter applied ahead of the grouping stage
    let pre = doc! { "$match": { "text_nonunique": { "$in": ["1", "2"] } } };
    let opts = QueryOpts {
        distinct: Some(DistinctSpec {
            field: "text_nonunique".to_string(),
            pre_stage: Some(pre.clone()),
        }),
        ..Default::default()
    };
    let mut batches = record_batches(&config, database, collection, opts)
        .await
        .unwrap();
    let all = drain(&mut batches).await.unwrap();
    assert_eq!(all.columns(), &["text_nonunique"]);
    assert_eq!(all.len(), 2);

    // one-shot distinct loader
    let all = load_all_distinct(&config, database, collection, "text_nonunique", Some(pre))
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}
