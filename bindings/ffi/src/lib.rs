//! C ABI for the NanoDB engine.
//!
//! One process-wide engine handle lives behind a reader-writer lock.
//! `nanodb_init` is ref-counted: repeated calls bump a user count and the
//! file is closed only when `nanodb_close` brings it back to zero.
//!
//! Strings are NUL-terminated UTF-8; documents, queries, and patches are
//! JSON text. Returned strings are heap-allocated and must be released with
//! `nanodb_free_string`. Errors collapse to -1 / null.

use log::error;
use nanodb::{Database, Document, Error};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_longlong};
use std::ptr;
use std::sync::RwLock;

struct Engine {
    db: Database,
    active_users: usize,
}

static ENGINE: Lazy<RwLock<Option<Engine>>> = Lazy::new(|| RwLock::new(None));

unsafe fn c_str_to_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok().map(|s| s.to_string())
}

fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn parse_object(json: &str) -> Option<Document> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Runs `f` against the named collection under a read lock on the engine
/// slot. Returns `None` when the engine is not initialized, the collection
/// does not exist, or `f` fails.
fn with_collection<T>(
    name: *const c_char,
    f: impl FnOnce(&nanodb::Collection) -> Option<T>,
) -> Option<T> {
    let name = unsafe { c_str_to_string(name) }?;
    let engine = ENGINE.read().ok()?;
    let engine = engine.as_ref()?;
    let collection = engine.db.collection(&name).ok()?;
    f(&collection)
}

/// Opens the database at `path`, creating it if absent. Safe to call more
/// than once; each call must be paired with `nanodb_close`. A failed open
/// leaves the engine unset, so later calls report errors instead of
/// panicking across the ABI.
#[no_mangle]
pub extern "C" fn nanodb_init(path: *const c_char) {
    let path = match unsafe { c_str_to_string(path) } {
        Some(p) => p,
        None => return,
    };

    let mut slot = match ENGINE.write() {
        Ok(slot) => slot,
        Err(_) => return,
    };

    if let Some(engine) = slot.as_mut() {
        engine.active_users += 1;
        return;
    }

    match Database::open(&path) {
        Ok(db) => {
            *slot = Some(Engine {
                db,
                active_users: 1,
            });
        }
        Err(err) => error!("nanodb_init({}) failed: {}", path, err),
    }
}

/// Decrements the user count; closes the file on the transition to zero.
/// Returns 1 on success, -1 on I/O failure during the final close.
#[no_mangle]
pub extern "C" fn nanodb_close() -> c_longlong {
    let mut slot = match ENGINE.write() {
        Ok(slot) => slot,
        Err(_) => return -1,
    };

    let engine = match slot.as_mut() {
        Some(engine) => engine,
        None => return 1,
    };

    if engine.active_users > 1 {
        engine.active_users -= 1;
        return 1;
    }

    match slot.take() {
        Some(engine) => match engine.db.close() {
            Ok(()) => 1,
            Err(_) => -1,
        },
        None => 1,
    }
}

/// Returns 1 when the collection was created, 0 when it already exists,
/// -1 on error.
#[no_mangle]
pub extern "C" fn nanodb_create_collection(name: *const c_char) -> c_longlong {
    let name = match unsafe { c_str_to_string(name) } {
        Some(n) => n,
        None => return -1,
    };

    let engine = match ENGINE.read() {
        Ok(engine) => engine,
        Err(_) => return -1,
    };
    let engine = match engine.as_ref() {
        Some(engine) => engine,
        None => return -1,
    };

    match engine.db.create_collection(&name) {
        Ok(()) => 1,
        Err(Error::AlreadyExists { .. }) => 0,
        Err(_) => -1,
    }
}

/// JSON array of collection names, or null when uninitialized.
#[no_mangle]
pub extern "C" fn nanodb_get_collections() -> *mut c_char {
    let engine = match ENGINE.read() {
        Ok(engine) => engine,
        Err(_) => return ptr::null_mut(),
    };
    let engine = match engine.as_ref() {
        Some(engine) => engine,
        None => return ptr::null_mut(),
    };

    let names = engine.db.collection_names();
    match serde_json::to_string(&names) {
        Ok(json) => to_c_string(json),
        Err(_) => ptr::null_mut(),
    }
}

/// Inserts a JSON document and returns its id, or -1 on error.
#[no_mangle]
pub extern "C" fn nanodb_insert(name: *const c_char, json: *const c_char) -> c_longlong {
    let result = with_collection(name, |col| {
        let json = unsafe { c_str_to_string(json) }?;
        let doc = parse_object(&json)?;
        col.insert(doc).ok()
    });

    match result {
        Some(id) => id as c_longlong,
        None => -1,
    }
}

/// Inserts a JSON array of documents; returns a JSON array of ids, or null
/// on error.
#[no_mangle]
pub extern "C" fn nanodb_insert_many(name: *const c_char, json: *const c_char) -> *mut c_char {
    let result = with_collection(name, |col| {
        let json = unsafe { c_str_to_string(json) }?;
        let docs = match serde_json::from_str::<Value>(&json) {
            Ok(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect::<Option<Vec<Document>>>()?,
            _ => return None,
        };
        let ids = col.insert_many(docs).ok()?;
        serde_json::to_string(&ids).ok()
    });

    match result {
        Some(json) => to_c_string(json),
        None => ptr::null_mut(),
    }
}

/// Full-scan query; returns a JSON array of matching documents honoring
/// `skip` then `limit` (0 = unlimited), or null on error.
#[no_mangle]
pub extern "C" fn nanodb_find(
    name: *const c_char,
    query: *const c_char,
    limit: c_longlong,
    skip: c_longlong,
) -> *mut c_char {
    let result = with_collection(name, |col| {
        let query = unsafe { c_str_to_string(query) }?;
        let query = parse_object(&query)?;
        let opts = nanodb::FindOptions {
            limit: limit.max(0) as usize,
            skip: skip.max(0) as usize,
        };
        let (docs, _) = col.find(&query, &opts).ok()?;
        serde_json::to_string(&docs).ok()
    });

    match result {
        Some(json) => to_c_string(json),
        None => ptr::null_mut(),
    }
}

/// First document matching the query as JSON, or null when none matches.
#[no_mangle]
pub extern "C" fn nanodb_find_one(name: *const c_char, query: *const c_char) -> *mut c_char {
    let result = with_collection(name, |col| {
        let query = unsafe { c_str_to_string(query) }?;
        let query = parse_object(&query)?;
        let doc = col.find_one(&query).ok()??;
        serde_json::to_string(&doc).ok()
    });

    match result {
        Some(json) => to_c_string(json),
        None => ptr::null_mut(),
    }
}

/// Point lookup through the primary index; null when absent.
#[no_mangle]
pub extern "C" fn nanodb_find_by_id(name: *const c_char, doc_id: c_longlong) -> *mut c_char {
    let result = with_collection(name, |col| {
        let doc = col.find_by_id(doc_id as u64).ok()??;
        serde_json::to_string(&doc).ok()
    });

    match result {
        Some(json) => to_c_string(json),
        None => ptr::null_mut(),
    }
}

/// Merges the JSON patch into the document (top-level keys; `_id` in the
/// patch is ignored) and returns the updated document, or null on error.
#[no_mangle]
pub extern "C" fn nanodb_update_by_id(
    name: *const c_char,
    doc_id: c_longlong,
    patch: *const c_char,
) -> *mut c_char {
    let result = with_collection(name, |col| {
        let patch = unsafe { c_str_to_string(patch) }?;
        let patch = parse_object(&patch)?;

        let mut doc = col.find_by_id(doc_id as u64).ok()??;
        for (key, value) in &patch {
            if key == "_id" {
                continue;
            }
            doc.insert(key.clone(), value.clone());
        }

        col.update_by_id(doc_id as u64, doc.clone()).ok()?;
        serde_json::to_string(&doc).ok()
    });

    match result {
        Some(json) => to_c_string(json),
        None => ptr::null_mut(),
    }
}

/// Applies the patch to every matching document; returns the updated
/// documents as a JSON array, or null on error.
#[no_mangle]
pub extern "C" fn nanodb_update_many(
    name: *const c_char,
    query: *const c_char,
    patch: *const c_char,
) -> *mut c_char {
    let result = with_collection(name, |col| {
        let query = unsafe { c_str_to_string(query) }?;
        let query = parse_object(&query)?;
        let patch = unsafe { c_str_to_string(patch) }?;
        let patch = parse_object(&patch)?;

        let updated = col.update_many(&query, &patch).ok()?;
        serde_json::to_string(&updated).ok()
    });

    match result {
        Some(json) => to_c_string(json),
        None => ptr::null_mut(),
    }
}

/// Returns 1 on success, -1 when the id is absent or on error.
#[no_mangle]
pub extern "C" fn nanodb_delete_by_id(name: *const c_char, doc_id: c_longlong) -> c_longlong {
    let result = with_collection(name, |col| col.delete_by_id(doc_id as u64).ok());

    match result {
        Some(()) => 1,
        None => -1,
    }
}

/// Deletes every document matching the query. Returns 1, or -1 on error.
#[no_mangle]
pub extern "C" fn nanodb_delete_many(name: *const c_char, query: *const c_char) -> c_longlong {
    let result = with_collection(name, |col| {
        let query = unsafe { c_str_to_string(query) }?;
        let query = parse_object(&query)?;
        col.find_and_delete(&query).ok()
    });

    match result {
        Some(true) => 1,
        _ => -1,
    }
}

/// Approximate nearest-neighbor search. `query` is a JSON array of floats;
/// returns a JSON array of document ids in ascending distance, or null on
/// error.
#[no_mangle]
pub extern "C" fn nanodb_vector_search(
    name: *const c_char,
    query: *const c_char,
    top_k: c_longlong,
) -> *mut c_char {
    let result = with_collection(name, |col| {
        let query = unsafe { c_str_to_string(query) }?;
        let vec: Vec<f32> = serde_json::from_str(&query).ok()?;
        let ids = col.search_vector(&vec, top_k.max(0) as usize).ok()?;
        serde_json::to_string(&ids).ok()
    });

    match result {
        Some(json) => to_c_string(json),
        None => ptr::null_mut(),
    }
}

/// Releases a string returned by any of the query functions.
#[no_mangle]
pub extern "C" fn nanodb_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}
