// Parallel callers against one engine: mutating operations serialize on the
// per-collection lock while full scans run lock-free alongside them.

use nanodb::{Database, Document, FindOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn doc(v: Value) -> Document {
    v.as_object().unwrap().clone()
}

#[test]
fn test_parallel_inserts_one_collection() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("parallel.db");
    let db = Arc::new(Database::open(db_path.to_str().unwrap()).unwrap());

    db.create_collection("events").unwrap();

    let mut handles = Vec::new();
    for t in 0..8 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            let events = db.collection("events").unwrap();
            let mut ids = Vec::new();
            for i in 0..50 {
                ids.push(events.insert(doc(json!({"thread": t, "seq": i}))).unwrap());
            }
            ids
        }));
    }

    let mut all_ids = Vec::new();
    for handle in handles {
        all_ids.extend(handle.join().unwrap());
    }
    assert_eq!(all_ids.len(), 400);

    let events = db.collection("events").unwrap();
    for id in &all_ids {
        assert!(events.find_by_id(*id).unwrap().is_some());
    }

    let (docs, _) = events.find(&Document::new(), &FindOptions::default()).unwrap();
    assert_eq!(docs.len(), 400);
}

#[test]
fn test_parallel_inserts_distinct_collections() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("parallel_multi.db");
    let db = Arc::new(Database::open(db_path.to_str().unwrap()).unwrap());

    for t in 0..4 {
        db.create_collection(&format!("shard_{}", t)).unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..4 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            let shard = db.collection(&format!("shard_{}", t)).unwrap();
            for i in 0..100 {
                shard.insert(doc(json!({"seq": i}))).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        let shard = db.collection(&format!("shard_{}", t)).unwrap();
        let (docs, _) = shard.find(&Document::new(), &FindOptions::default()).unwrap();
        assert_eq!(docs.len(), 100);
    }
}

#[test]
fn test_scans_run_alongside_writers() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scan_race.db");
    let db = Arc::new(Database::open(db_path.to_str().unwrap()).unwrap());

    db.create_collection("feed").unwrap();
    let feed = db.collection("feed").unwrap();
    for i in 0..100 {
        feed.insert(doc(json!({"seq": i, "phase": "seed"}))).unwrap();
    }

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            let feed = db.collection("feed").unwrap();
            for i in 0..200 {
                feed.insert(doc(json!({"seq": i, "phase": "live"}))).unwrap();
            }
        })
    };

    // Scans must not fail or block while the writer appends; they may see
    // any prefix of the live inserts.
    let reader = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            let feed = db.collection("feed").unwrap();
            for _ in 0..50 {
                let (docs, _) = feed.find(&Document::new(), &FindOptions::default()).unwrap();
                assert!(docs.len() >= 100);
                assert!(docs.len() <= 300);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    let (docs, _) = feed.find(&Document::new(), &FindOptions::default()).unwrap();
    assert_eq!(docs.len(), 300);
}
