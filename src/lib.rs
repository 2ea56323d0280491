//! # MineGuard Store
//!
//! Structured local storage for the MineGuard mine-operations dashboard.
//! Documents (JSON objects keyed by `id`) live in a fixed set of
//! collections inside one LMDB environment, with equality filters, sort and
//! limit, and a small aggregation pipeline (match, group-count, sort).
//!
//! ## Features
//!
//! - **LMDB-based storage**: one environment per store, one named database per
//!   collection plus secondary index databases
//! - **Versioned schema**: opening a store at a newer schema version creates
//!   the new collections and back-fills indexes, keeping existing data
//! - **Atomic updates**: the read-modify-write of an update runs inside one
//!   LMDB write transaction
//! - **Typed repositories** for scan sessions, the logbook, OCR history and
//!   QR-tracked coal batches
//! - **FFI surface**: C-compatible functions exchanging JSON strings
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mineguard_store::{LogbookRepo, NewLogEntry, Store, StoreConfig};
//!
//! let store = Arc::new(Store::open(StoreConfig::new("mineguard").in_directory("/var/lib/mineguard"))?);
//! let logbook = LogbookRepo::new(Arc::clone(&store));
//! logbook.record(NewLogEntry::new("inspection", "kim").with_note("roof bolts level B"))?;
//! let latest = logbook.recent(20);
//! # Ok::<(), mineguard_store::StoreError>(())
//! ```
//!
//! ## FFI Functions
//!
//! Every function returning `*const c_char` yields a JSON [`AppResponse`]
//! envelope such as `{"Ok":"..."}` or `{"ValidationError":"..."}`; free it
//! with [`store_free_string`].
//!
//! - [`store_open`] / [`store_free`] - create and destroy a store handle
//! - [`store_close`] / [`store_is_connected`] / [`store_health`] - connection state
//! - [`store_insert_one`] / [`store_insert_many`]
//! - [`store_find`] / [`store_find_one`] / [`store_count_documents`]
//! - [`store_update_one`] / [`store_update_many`]
//! - [`store_delete_one`] / [`store_delete_many`] / [`store_clear_collection`]
//! - [`store_aggregate`]

pub mod batch_repo;
pub mod config;
pub mod detection;
pub mod document;
pub mod error;
pub mod index;
pub mod logbook_repo;
pub mod models;
pub mod ocr_repo;
pub mod pipeline;
pub mod qr;
pub mod query;
pub mod scan_repo;
pub mod schema;
pub mod store;
mod app_response;
mod test;

pub use crate::app_response::AppResponse;
pub use crate::batch_repo::{BatchRepo, BatchStats, QrLookup};
pub use crate::config::StoreConfig;
pub use crate::document::{Document, Record};
pub use crate::error::StoreError;
pub use crate::logbook_repo::{LogbookRepo, NewLogEntry};
pub use crate::ocr_repo::OcrRepo;
pub use crate::pipeline::{GroupStage, Pipeline, Stage};
pub use crate::query::{Filter, FindOptions, SortDirection, SortSpec};
pub use crate::scan_repo::{EquipmentStats, ScanRepo, ScanStats};
pub use crate::schema::Collection;
pub use crate::store::{DeleteResult, Store, StoreHealth, UpdateResult};

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use log::{info, warn};
use serde_json::{json, Value};

use crate::store::BatchFailure;

/// Opens a store described by a JSON [`StoreConfig`].
///
/// The JSON may be partial (`{"name":"site_b","directory":"/data"}`); missing
/// fields take their defaults. The store is connected before returning.
///
/// # Returns
///
/// A pointer to the [`Store`], or null if the pointer is null, the text is
/// not valid UTF-8 or JSON, the configuration is invalid, or the environment
/// cannot be opened. Release it with [`store_free`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use mineguard_store::{store_free, store_open};
///
/// let config = CString::new(r#"{"name":"mineguard","directory":"/tmp"}"#).unwrap();
/// let store = store_open(config.as_ptr());
/// if !store.is_null() {
///     store_free(store);
/// }
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_open(config_json: *const c_char) -> *mut Store {
    if config_json.is_null() {
        warn!("Null config pointer passed to store_open");
        return std::ptr::null_mut();
    }

    let config_str = match unsafe { CStr::from_ptr(config_json).to_str() } {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid UTF-8 in config parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let config = match StoreConfig::from_json_str(config_str) {
        Ok(config) => config,
        Err(e) => {
            warn!("Rejected store configuration: {e}");
            return std::ptr::null_mut();
        }
    };

    info!("Opening store at {}", config.database_path().display());
    match Store::open(config) {
        Ok(store) => Box::into_raw(Box::new(store)),
        Err(e) => {
            warn!("Failed to open store: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Closes the store's environment. The handle stays valid; the next
/// operation reconnects.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_close(store: *mut Store) -> *const c_char {
    let store = match store_ref(store, "store_close") {
        Ok(store) => store,
        Err(err) => return err,
    };
    respond(store.close().map(|_| AppResponse::success("Store closed successfully")))
}

/// Whether the store currently holds an open environment. False for null.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_is_connected(store: *mut Store) -> bool {
    match unsafe { store.as_ref() } {
        Some(store) => store.is_connected(),
        None => false,
    }
}

/// Connection state and per-collection document counts as JSON.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_health(store: *mut Store) -> *const c_char {
    let store = match store_ref(store, "store_health") {
        Ok(store) => store,
        Err(err) => return err,
    };
    response_to_c_string(&AppResponse::json(&store.health()))
}

/// Inserts one document; responds with its id.
///
/// An `id` that already exists answers `Conflict`.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use mineguard_store::{store_insert_one, store_open};
///
/// let config = CString::new(r#"{"name":"mineguard"}"#).unwrap();
/// let store = store_open(config.as_ptr());
///
/// let collection = CString::new("logbook_entries").unwrap();
/// let doc = CString::new(r#"{"id":"log_1","type":"inspection","operator":"kim"}"#).unwrap();
/// let result = store_insert_one(store, collection.as_ptr(), doc.as_ptr());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_insert_one(
    store: *mut Store,
    collection: *const c_char,
    json_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_insert_one") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let doc = match c_ptr_to_document(json_ptr, "document") {
        Ok(doc) => doc,
        Err(err) => return err,
    };
    respond(store.insert_one(collection, doc).map(AppResponse::success))
}

/// Inserts a JSON array of documents. Responds with
/// `{"insertedIds":[...],"failures":[{"index","id","error"}]}`; individual
/// failures do not fail the call.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_insert_many(
    store: *mut Store,
    collection: *const c_char,
    json_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_insert_many") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let docs = match c_ptr_to_json(json_ptr, "documents") {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            let error = AppResponse::ValidationError(format!("Expected an array of documents, got {other}"));
            return response_to_c_string(&error);
        }
        Err(err) => return err,
    };
    let docs = match docs.into_iter().map(document::into_document).collect::<Result<Vec<_>, _>>() {
        Ok(docs) => docs,
        Err(e) => return response_to_c_string(&AppResponse::from(e)),
    };

    respond(store.insert_many(collection, docs).map(|result| {
        AppResponse::json(&json!({
            "insertedIds": result.inserted_ids,
            "failures": failures_json(&result.failures),
        }))
    }))
}

/// Finds documents matching an equality filter (`{}` or `null` for all),
/// with options `{"sort":{"field":1|-1},"limit":n}` (`null` for none).
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_find(
    store: *mut Store,
    collection: *const c_char,
    filter_ptr: *const c_char,
    options_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_find") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let filter = match c_ptr_to_filter(filter_ptr) {
        Ok(filter) => filter,
        Err(err) => return err,
    };
    let options = match c_ptr_to_json(options_ptr, "options") {
        Ok(value) => match FindOptions::from_json(&value) {
            Ok(options) => options,
            Err(e) => return response_to_c_string(&AppResponse::from(e)),
        },
        Err(err) => return err,
    };
    respond(store.find(collection, &filter, &options).map(|docs| AppResponse::json(&docs)))
}

/// First document matching the filter, or `NotFound`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_find_one(
    store: *mut Store,
    collection: *const c_char,
    filter_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_find_one") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let filter = match c_ptr_to_filter(filter_ptr) {
        Ok(filter) => filter,
        Err(err) => return err,
    };
    respond(store.find_one(collection, &filter).map(|found| match found {
        Some(doc) => AppResponse::json(&doc),
        None => AppResponse::NotFound(format!("No document in {collection} matches the filter")),
    }))
}

/// Merges the patch into the first match. Responds with
/// `{"matchedCount":n,"modifiedCount":n}`; no match is not an error.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_update_one(
    store: *mut Store,
    collection: *const c_char,
    filter_ptr: *const c_char,
    patch_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_update_one") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let filter = match c_ptr_to_filter(filter_ptr) {
        Ok(filter) => filter,
        Err(err) => return err,
    };
    let patch = match c_ptr_to_document(patch_ptr, "patch") {
        Ok(patch) => patch,
        Err(err) => return err,
    };
    respond(store.update_one(collection, &filter, &patch).map(|result| AppResponse::json(&result)))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_update_many(
    store: *mut Store,
    collection: *const c_char,
    filter_ptr: *const c_char,
    patch_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_update_many") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let filter = match c_ptr_to_filter(filter_ptr) {
        Ok(filter) => filter,
        Err(err) => return err,
    };
    let patch = match c_ptr_to_document(patch_ptr, "patch") {
        Ok(patch) => patch,
        Err(err) => return err,
    };
    respond(store.update_many(collection, &filter, &patch).map(|result| {
        AppResponse::json(&json!({
            "matchedCount": result.matched_count,
            "modifiedCount": result.modified_count,
            "failures": failures_json(&result.failures),
        }))
    }))
}

/// Deletes the first match. Responds with `{"deletedCount":0|1}`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_delete_one(
    store: *mut Store,
    collection: *const c_char,
    filter_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_delete_one") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let filter = match c_ptr_to_filter(filter_ptr) {
        Ok(filter) => filter,
        Err(err) => return err,
    };
    respond(store.delete_one(collection, &filter).map(|result| AppResponse::json(&result)))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_delete_many(
    store: *mut Store,
    collection: *const c_char,
    filter_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_delete_many") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let filter = match c_ptr_to_filter(filter_ptr) {
        Ok(filter) => filter,
        Err(err) => return err,
    };
    respond(store.delete_many(collection, &filter).map(|result| {
        AppResponse::json(&json!({
            "matchedCount": result.matched_count,
            "deletedCount": result.deleted_count,
            "failures": failures_json(&result.failures),
        }))
    }))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_count_documents(
    store: *mut Store,
    collection: *const c_char,
    filter_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_count_documents") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let filter = match c_ptr_to_filter(filter_ptr) {
        Ok(filter) => filter,
        Err(err) => return err,
    };
    respond(store.count_documents(collection, &filter).map(|count| AppResponse::success(count.to_string())))
}

/// Runs a pipeline given as a JSON array of stages. Both the plain shapes
/// (`{"match":{}}`, `{"group":{"by":"f","count":true}}`, `{"sort":{}}`) and
/// their `$match`/`$group`/`$sort` forms are accepted.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use mineguard_store::{store_aggregate, store_open};
///
/// let config = CString::new(r#"{"name":"mineguard"}"#).unwrap();
/// let store = store_open(config.as_ptr());
///
/// let collection = CString::new("scans").unwrap();
/// let pipeline = CString::new(
///     r#"[{"$match":{"overallPassed":true}},{"$group":{"_id":"$workerName","count":{"$sum":1}}},{"$sort":{"count":-1}}]"#,
/// )
/// .unwrap();
/// let result = store_aggregate(store, collection.as_ptr(), pipeline.as_ptr());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_aggregate(
    store: *mut Store,
    collection: *const c_char,
    pipeline_ptr: *const c_char,
) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_aggregate") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    let pipeline = match c_ptr_to_json(pipeline_ptr, "pipeline") {
        Ok(value) => match Pipeline::from_json(&value) {
            Ok(pipeline) => pipeline,
            Err(e) => return response_to_c_string(&AppResponse::from(e)),
        },
        Err(err) => return err,
    };
    respond(store.aggregate(collection, &pipeline).map(|docs| AppResponse::json(&docs)))
}

/// Removes every document of a collection; responds with how many there were.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_clear_collection(store: *mut Store, collection: *const c_char) -> *const c_char {
    let (store, collection) = match store_and_collection(store, collection, "store_clear_collection") {
        Ok(parts) => parts,
        Err(err) => return err,
    };
    respond(store.clear(collection).map(|count| AppResponse::success(count.to_string())))
}

/// Releases a string returned by any `store_*` function. Null is ignored.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_free_string(ptr: *const c_char) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(ptr as *mut c_char));
    }
}

/// Closes and releases a store returned by [`store_open`]. Null is ignored.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn store_free(store: *mut Store) {
    if store.is_null() {
        return;
    }
    let store = unsafe { Box::from_raw(store) };
    if let Err(e) = store.close() {
        warn!("Error closing store before release: {e}");
    }
}

/// Converts an [`AppResponse`] to a C string owned by the caller.
///
/// Returns null if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

fn respond(result: Result<AppResponse, StoreError>) -> *const c_char {
    match result {
        Ok(response) => response_to_c_string(&response),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Converts a C string pointer to a Rust String.
///
/// * `Err(*const c_char)` - a `BadRequest` response for a null pointer or
///   invalid UTF-8, ready to hand back to the caller
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}

fn c_ptr_to_json(ptr: *const c_char, field_name: &str) -> Result<Value, *const c_char> {
    let text = c_ptr_to_string(ptr, field_name)?;
    serde_json::from_str(&text).map_err(|e| {
        let error = AppResponse::SerializationError(format!("Invalid JSON in {field_name}: {e}"));
        response_to_c_string(&error)
    })
}

fn c_ptr_to_document(ptr: *const c_char, field_name: &str) -> Result<Document, *const c_char> {
    let value = c_ptr_to_json(ptr, field_name)?;
    document::into_document(value).map_err(|e| response_to_c_string(&AppResponse::from(e)))
}

fn c_ptr_to_filter(ptr: *const c_char) -> Result<Filter, *const c_char> {
    let value = c_ptr_to_json(ptr, "filter")?;
    Filter::from_json(&value).map_err(|e| response_to_c_string(&AppResponse::from(e)))
}

fn store_ref<'a>(store: *mut Store, caller: &str) -> Result<&'a Store, *const c_char> {
    match unsafe { store.as_ref() } {
        Some(store) => Ok(store),
        None => {
            let error = AppResponse::BadRequest(format!("Null store pointer passed to {caller}"));
            Err(response_to_c_string(&error))
        }
    }
}

fn store_and_collection<'a>(
    store: *mut Store,
    collection: *const c_char,
    caller: &str,
) -> Result<(&'a Store, Collection), *const c_char> {
    let store = store_ref(store, caller)?;
    let name = c_ptr_to_string(collection, "collection")?;
    let collection = name
        .parse::<Collection>()
        .map_err(|e| response_to_c_string(&AppResponse::from(e)))?;
    Ok((store, collection))
}

fn failures_json(failures: &[BatchFailure]) -> Value {
    failures
        .iter()
        .map(|f| json!({"index": f.index, "id": f.id, "error": f.error.to_string()}))
        .collect()
}
