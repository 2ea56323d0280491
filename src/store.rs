//! The structured local store.
//!
//! [`Store`] wraps one LMDB environment holding a named database per
//! collection plus its secondary index databases. It starts disconnected;
//! every operation (except [`Store::is_connected`] and [`Store::health`])
//! connects on demand and reuses the open environment afterwards.
//!
//! ```no_run
//! use mineguard_store::{Collection, Filter, FindOptions, SortSpec, Store, StoreConfig};
//! use serde_json::json;
//!
//! let store = Store::new(StoreConfig::new("mineguard").in_directory("/var/lib/mineguard"));
//! let doc = json!({"id": "log_1", "type": "inspection", "operator": "kim"});
//! store.insert_one(Collection::LogbookEntries, doc.as_object().unwrap().clone())?;
//!
//! let inspections = store.find(
//!     Collection::LogbookEntries,
//!     &Filter::all().equals("type", "inspection"),
//!     &FindOptions::sorted(SortSpec::descending("date")).limit(20),
//! )?;
//! # Ok::<(), mineguard_store::StoreError>(())
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, Weak};

use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::config::StoreConfig;
use crate::document::{self, Document, Record};
use crate::error::StoreError;
use crate::index::FieldIndex;
use crate::pipeline::Pipeline;
use crate::query::{Filter, FindOptions};
use crate::schema::{Collection, CollectionSchema, META_DB, SCHEMA, SCHEMA_VERSION_KEY};

/// Result of [`Store::update_one`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub matched_count: usize,
    pub modified_count: usize,
}

/// Result of [`Store::delete_one`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: usize,
}

/// One item of a batch operation that did not go through.
#[derive(Debug)]
pub struct BatchFailure {
    /// Position in the input (`insert_many`) or in the match list.
    pub index: usize,
    pub id: Option<String>,
    pub error: StoreError,
}

#[derive(Debug, Default)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<String>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Default)]
pub struct UpdateManyResult {
    pub matched_count: usize,
    pub modified_count: usize,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Default)]
pub struct DeleteManyResult {
    pub matched_count: usize,
    pub deleted_count: usize,
    pub failures: Vec<BatchFailure>,
}

/// Snapshot reported by [`Store::health`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub is_connected: bool,
    pub schema_version: Option<u32>,
    pub total_documents: BTreeMap<String, usize>,
}

struct CollectionHandle {
    db: Database,
    indexes: Vec<FieldIndex>,
}

/// An open LMDB environment with its resolved database handles.
struct Connection {
    env: Environment,
    schema_version: u32,
    collections: HashMap<Collection, CollectionHandle>,
}

impl Connection {
    fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let path = config.database_path();
        std::fs::create_dir_all(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        let env = Environment::new()
            .set_max_dbs(config.max_collections)
            .set_map_size(config.map_size)
            .open(&path)?;

        let meta = env.create_db(Some(META_DB), DatabaseFlags::empty())?;
        let requested = config.schema_version;
        let stored = read_schema_version(&env, meta)?;

        let collections = match stored {
            Some(stored) if stored > requested => {
                return Err(StoreError::VersionMismatch { stored, requested });
            }
            Some(stored) if stored == requested => open_existing(&env, requested)?,
            _ => {
                info!(
                    "Upgrading store '{}' schema from {:?} to version {}",
                    config.name, stored, requested
                );
                upgrade(&env, meta, requested)?
            }
        };

        info!("Store opened at {} (schema version {requested})", path.display());
        Ok(Self { env, schema_version: requested, collections })
    }

    fn handle(&self, collection: Collection) -> Result<&CollectionHandle, StoreError> {
        self.collections.get(&collection).ok_or_else(|| {
            StoreError::UnknownCollection(format!(
                "{collection} (not in schema version {})",
                self.schema_version
            ))
        })
    }
}

fn read_schema_version(env: &Environment, meta: Database) -> Result<Option<u32>, StoreError> {
    let txn = env.begin_ro_txn()?;
    let version = match txn.get(meta, &SCHEMA_VERSION_KEY) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            Some(text.parse::<u32>().map_err(|e| {
                StoreError::InvalidConfig(format!("stored schema version '{text}': {e}"))
            })?)
        }
        Err(lmdb::Error::NotFound) => None,
        Err(e) => return Err(e.into()),
    };
    Ok(version)
}

fn collections_in(version: u32) -> impl Iterator<Item = &'static CollectionSchema> {
    SCHEMA.iter().filter(move |schema| schema.available_in(version))
}

fn open_existing(env: &Environment, version: u32) -> Result<HashMap<Collection, CollectionHandle>, StoreError> {
    let mut collections = HashMap::new();
    for schema in collections_in(version) {
        let db = env.open_db(Some(schema.collection.name()))?;
        let indexes = schema
            .indexes
            .iter()
            .map(|field| {
                Ok(FieldIndex { field: *field, db: env.open_db(Some(&schema.index_db_name(field)))? })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        collections.insert(schema.collection, CollectionHandle { db, indexes });
    }
    Ok(collections)
}

/// Creates whatever the requested version declares and is missing, back-fills
/// new indexes from existing documents and records the version.
fn upgrade(env: &Environment, meta: Database, version: u32) -> Result<HashMap<Collection, CollectionHandle>, StoreError> {
    let mut collections = HashMap::new();
    let mut backfill: Vec<(Database, FieldIndex)> = Vec::new();

    for schema in collections_in(version) {
        let db = open_or_create(env, schema.collection.name())?.0;
        let mut indexes = Vec::with_capacity(schema.indexes.len());
        for &field in schema.indexes {
            let (index_db, created) = open_or_create(env, &schema.index_db_name(field))?;
            let index = FieldIndex { field, db: index_db };
            if created {
                backfill.push((db, index));
            }
            indexes.push(index);
        }
        collections.insert(schema.collection, CollectionHandle { db, indexes });
    }

    let mut txn = env.begin_rw_txn()?;
    for (db, index) in &backfill {
        let docs = scan(&txn, *db)?;
        for doc in &docs {
            index.insert(&mut txn, doc, document::primary_key(doc)?)?;
        }
        if !docs.is_empty() {
            info!("Back-filled index on '{}' with {} documents", index.field, docs.len());
        }
    }
    txn.put(meta, &SCHEMA_VERSION_KEY, &version.to_string(), WriteFlags::empty())?;
    txn.commit()?;

    Ok(collections)
}

fn open_or_create(env: &Environment, name: &str) -> Result<(Database, bool), StoreError> {
    match env.open_db(Some(name)) {
        Ok(db) => Ok((db, false)),
        Err(lmdb::Error::NotFound) => {
            debug!("Creating database '{name}'");
            Ok((env.create_db(Some(name), DatabaseFlags::empty())?, true))
        }
        Err(e) => Err(e.into()),
    }
}

fn decode(bytes: &[u8]) -> Result<Document, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Every document of `db` in key order.
fn scan<T: Transaction>(txn: &T, db: Database) -> Result<Vec<Document>, StoreError> {
    let mut cursor = txn.open_ro_cursor(db)?;
    let mut docs = Vec::new();
    for (_key, value) in cursor.iter() {
        docs.push(decode(value)?);
    }
    Ok(docs)
}

fn get<T: Transaction>(txn: &T, db: Database, id: &str) -> Result<Option<Document>, StoreError> {
    match txn.get(db, &id) {
        Ok(bytes) => Ok(Some(decode(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Documents matching `filter`, in key order.
fn matching<T: Transaction>(txn: &T, db: Database, filter: &Filter) -> Result<Vec<Document>, StoreError> {
    let candidates = match filter.id_hint() {
        Some(id) => get(txn, db, id)?.into_iter().collect(),
        None => scan(txn, db)?,
    };
    Ok(candidates.into_iter().filter(|doc| filter.matches(doc)).collect())
}

fn first_match<T: Transaction>(txn: &T, db: Database, filter: &Filter) -> Result<Option<Document>, StoreError> {
    if filter.id_hint().is_some() {
        return Ok(matching(txn, db, filter)?.into_iter().next());
    }
    let mut cursor = txn.open_ro_cursor(db)?;
    for (_key, value) in cursor.iter() {
        let doc = decode(value)?;
        if filter.matches(&doc) {
            return Ok(Some(doc));
        }
    }
    Ok(None)
}

fn write_merged(
    txn: &mut RwTransaction<'_>,
    handle: &CollectionHandle,
    existing: &Document,
    patch: &Document,
) -> Result<bool, StoreError> {
    let id = document::primary_key(existing)?;
    if let Some(new_id) = patch.get(crate::schema::PRIMARY_KEY) {
        if new_id.as_str() != Some(id) {
            return Err(StoreError::InvalidDocument(format!(
                "cannot change id of '{id}' to {new_id}"
            )));
        }
    }

    let merged = document::merge(existing, patch);
    if merged == *existing {
        return Ok(false);
    }

    txn.put(handle.db, &id, &serde_json::to_vec(&merged)?, WriteFlags::empty())?;
    for index in &handle.indexes {
        index.replace(txn, existing, &merged, id)?;
    }
    Ok(true)
}

fn remove(txn: &mut RwTransaction<'_>, handle: &CollectionHandle, existing: &Document) -> Result<(), StoreError> {
    let id = document::primary_key(existing)?;
    txn.del(handle.db, &id, None)?;
    for index in &handle.indexes {
        index.remove(txn, existing, id)?;
    }
    Ok(())
}

#[derive(Default)]
struct ConnectionSlot {
    open: Option<Arc<Connection>>,
    /// The environment most recently closed. Operations that started before
    /// the close may still hold it.
    closed: Weak<Connection>,
}

/// Document store over the fixed collection schema.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
///
/// LMDB allows one open environment per path in a process. Open each path
/// through a single `Store`; two `Store`s on the same directory in one
/// process corrupt each other's locks.
pub struct Store {
    config: StoreConfig,
    connection: RwLock<ConnectionSlot>,
}

impl Store {
    /// Creates a disconnected store.
    pub fn new(config: StoreConfig) -> Self {
        Self { config, connection: RwLock::new(ConnectionSlot::default()) }
    }

    /// Creates a store and connects it straight away.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let store = Self::new(config);
        store.connect()?;
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Opens the environment unless it is already open.
    pub fn connect(&self) -> Result<(), StoreError> {
        self.connection().map(|_| ())
    }

    /// Drops the environment handle. Operations already running keep their
    /// own reference and finish normally. The next call reconnects, reusing
    /// that environment if one of them still holds it.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut slot = self.connection.write().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(conn) = slot.open.take() {
            slot.closed = Arc::downgrade(&conn);
            info!("Store '{}' closed", self.config.name);
        }
        Ok(())
    }

    /// Whether an environment is currently open. Never connects.
    pub fn is_connected(&self) -> bool {
        self.connection.read().map(|slot| slot.open.is_some()).unwrap_or(false)
    }

    fn connection(&self) -> Result<Arc<Connection>, StoreError> {
        if let Some(conn) = self.connection.read().map_err(|_| StoreError::LockPoisoned)?.open.as_ref() {
            return Ok(Arc::clone(conn));
        }

        let mut slot = self.connection.write().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(conn) = slot.open.as_ref() {
            return Ok(Arc::clone(conn));
        }
        let conn = match slot.closed.upgrade() {
            Some(conn) => {
                debug!("Store '{}' reopened on an environment still in use", self.config.name);
                conn
            }
            None => Arc::new(Connection::open(&self.config)?),
        };
        slot.open = Some(Arc::clone(&conn));
        slot.closed = Weak::new();
        Ok(conn)
    }

    /// Inserts a document under its own `id`; fails with
    /// [`StoreError::DuplicateKey`] if that id is taken.
    pub fn insert_one(&self, collection: Collection, doc: Document) -> Result<String, StoreError> {
        let id = document::primary_key(&doc)?.to_string();
        let conn = self.connection()?;
        let handle = conn.handle(collection)?;
        let bytes = serde_json::to_vec(&doc)?;

        let mut txn = conn.env.begin_rw_txn()?;
        match txn.put(handle.db, &id, &bytes, WriteFlags::NO_OVERWRITE) {
            Ok(()) => {}
            Err(lmdb::Error::KeyExist) => {
                return Err(StoreError::DuplicateKey { collection, id });
            }
            Err(e) => return Err(e.into()),
        }
        for index in &handle.indexes {
            index.insert(&mut txn, &doc, &id)?;
        }
        txn.commit()?;

        debug!("Inserted '{id}' into {collection}");
        Ok(id)
    }

    /// Inserts documents one by one, each in its own transaction. A failing
    /// document is logged and reported in `failures`; the rest still go in.
    pub fn insert_many(&self, collection: Collection, docs: Vec<Document>) -> Result<InsertManyResult, StoreError> {
        self.connection()?;
        let mut result = InsertManyResult::default();
        for (index, doc) in docs.into_iter().enumerate() {
            let id = document::primary_key(&doc).ok().map(str::to_string);
            match self.insert_one(collection, doc) {
                Ok(id) => result.inserted_ids.push(id),
                Err(error) => {
                    warn!("Skipping document {index} ({id:?}) in {collection}: {error}");
                    result.failures.push(BatchFailure { index, id, error });
                }
            }
        }
        Ok(result)
    }

    pub fn find(&self, collection: Collection, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>, StoreError> {
        let conn = self.connection()?;
        let handle = conn.handle(collection)?;
        let txn = conn.env.begin_ro_txn()?;
        let docs = matching(&txn, handle.db, filter)?;
        txn.abort();
        Ok(options.apply(docs))
    }

    /// First match in key order, or `None`.
    pub fn find_one(&self, collection: Collection, filter: &Filter) -> Result<Option<Document>, StoreError> {
        Ok(self
            .find(collection, filter, &FindOptions::default().limit(1))?
            .into_iter()
            .next())
    }

    /// Shallow-merges `patch` into the first match and writes it back. The
    /// lookup and the write share one write transaction.
    pub fn update_one(&self, collection: Collection, filter: &Filter, patch: &Document) -> Result<UpdateResult, StoreError> {
        let conn = self.connection()?;
        let handle = conn.handle(collection)?;

        let mut txn = conn.env.begin_rw_txn()?;
        let Some(existing) = first_match(&txn, handle.db, filter)? else {
            return Ok(UpdateResult::default());
        };
        let modified = write_merged(&mut txn, handle, &existing, patch)?;
        txn.commit()?;

        Ok(UpdateResult { matched_count: 1, modified_count: usize::from(modified) })
    }

    /// Applies [`Store::update_one`] to every current match by primary key.
    pub fn update_many(&self, collection: Collection, filter: &Filter, patch: &Document) -> Result<UpdateManyResult, StoreError> {
        let ids = self.matching_ids(collection, filter)?;
        let mut result = UpdateManyResult { matched_count: ids.len(), ..Default::default() };
        for (index, id) in ids.into_iter().enumerate() {
            match self.update_one(collection, &Filter::by_id(id.clone()), patch) {
                Ok(update) => result.modified_count += update.modified_count,
                Err(error) => {
                    warn!("Failed to update '{id}' in {collection}: {error}");
                    result.failures.push(BatchFailure { index, id: Some(id), error });
                }
            }
        }
        Ok(result)
    }

    pub fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<DeleteResult, StoreError> {
        let conn = self.connection()?;
        let handle = conn.handle(collection)?;

        let mut txn = conn.env.begin_rw_txn()?;
        let Some(existing) = first_match(&txn, handle.db, filter)? else {
            return Ok(DeleteResult::default());
        };
        remove(&mut txn, handle, &existing)?;
        txn.commit()?;

        Ok(DeleteResult { deleted_count: 1 })
    }

    /// Applies [`Store::delete_one`] to every current match by primary key.
    pub fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<DeleteManyResult, StoreError> {
        let ids = self.matching_ids(collection, filter)?;
        let mut result = DeleteManyResult { matched_count: ids.len(), ..Default::default() };
        for (index, id) in ids.into_iter().enumerate() {
            match self.delete_one(collection, &Filter::by_id(id.clone())) {
                Ok(deleted) => result.deleted_count += deleted.deleted_count,
                Err(error) => {
                    warn!("Failed to delete '{id}' from {collection}: {error}");
                    result.failures.push(BatchFailure { index, id: Some(id), error });
                }
            }
        }
        Ok(result)
    }

    /// Removes every document of a collection; returns how many there were.
    pub fn clear(&self, collection: Collection) -> Result<usize, StoreError> {
        let conn = self.connection()?;
        let handle = conn.handle(collection)?;

        let mut txn = conn.env.begin_rw_txn()?;
        let count = {
            let mut cursor = txn.open_ro_cursor(handle.db)?;
            cursor.iter().count()
        };
        txn.clear_db(handle.db)?;
        for index in &handle.indexes {
            txn.clear_db(index.db)?;
        }
        txn.commit()?;

        info!("Cleared {count} documents from {collection}");
        Ok(count)
    }

    pub fn count_documents(&self, collection: Collection, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self.find(collection, filter, &FindOptions::default())?.len())
    }

    pub fn aggregate(&self, collection: Collection, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError> {
        let docs = self.find(collection, &Filter::all(), &FindOptions::default())?;
        Ok(pipeline.apply(docs))
    }

    /// Documents whose indexed `field` equals `value`, via the secondary
    /// index declared for that field.
    pub fn find_by_index(&self, collection: Collection, field: &str, value: &Value) -> Result<Vec<Document>, StoreError> {
        let conn = self.connection()?;
        let handle = conn.handle(collection)?;
        let index = handle
            .indexes
            .iter()
            .find(|index| index.field == field)
            .ok_or_else(|| {
                StoreError::InvalidQuery(format!("no index on '{field}' in {collection}"))
            })?;

        let txn = conn.env.begin_ro_txn()?;
        let filter = Filter::all().equals(field, value.clone());
        let mut docs = Vec::new();
        for id in index.candidate_ids(&txn, value)? {
            if let Some(doc) = get(&txn, handle.db, &id)? {
                if filter.matches(&doc) {
                    docs.push(doc);
                }
            }
        }
        Ok(docs)
    }

    /// Connection state and per-collection counts. Never connects and never
    /// fails: errors are logged and reported as a disconnected store.
    pub fn health(&self) -> StoreHealth {
        if !self.is_connected() {
            return StoreHealth::default();
        }
        match self.collect_health() {
            Ok(health) => health,
            Err(e) => {
                warn!("Store health check failed: {e}");
                StoreHealth::default()
            }
        }
    }

    fn collect_health(&self) -> Result<StoreHealth, StoreError> {
        let conn = self.connection()?;
        let mut total_documents = BTreeMap::new();
        let txn = conn.env.begin_ro_txn()?;
        for (collection, handle) in &conn.collections {
            let mut cursor = txn.open_ro_cursor(handle.db)?;
            total_documents.insert(collection.name().to_string(), cursor.iter().count());
        }
        Ok(StoreHealth {
            is_connected: true,
            schema_version: Some(conn.schema_version),
            total_documents,
        })
    }

    pub fn insert_record<R: Record>(&self, record: &R) -> Result<String, StoreError> {
        self.insert_one(R::COLLECTION, document::to_document(record)?)
    }

    pub fn find_records<R: Record>(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<R>, StoreError> {
        self.find(R::COLLECTION, filter, options)?
            .into_iter()
            .map(document::from_document)
            .collect()
    }

    pub fn find_record<R: Record>(&self, filter: &Filter) -> Result<Option<R>, StoreError> {
        self.find_one(R::COLLECTION, filter)?
            .map(document::from_document)
            .transpose()
    }

    fn matching_ids(&self, collection: Collection, filter: &Filter) -> Result<Vec<String>, StoreError> {
        self.find(collection, filter, &FindOptions::default())?
            .iter()
            .map(|doc| document::primary_key(doc).map(str::to_string))
            .collect()
    }
}
