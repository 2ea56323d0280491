//! Secondary index maintenance.
//!
//! An index database holds one entry per indexed document:
//! `json(value)[..255] 0x00 id` -> `id`. JSON text never contains a raw NUL,
//! so the separator is unambiguous. Values longer than the prefix share
//! entries; lookups re-check the document itself.

use lmdb::{Database, RwTransaction, Transaction, WriteFlags};
use serde_json::Value;

use crate::document::Document;
use crate::error::StoreError;

/// Bytes of the encoded value kept in an index key.
pub const MAX_INDEX_VALUE_LEN: usize = 255;

const SEPARATOR: u8 = 0;

/// A secondary index on one top-level field.
#[derive(Debug, Clone, Copy)]
pub struct FieldIndex {
    pub field: &'static str,
    pub db: Database,
}

impl FieldIndex {
    /// Value this index records for `doc`; nulls and missing fields are not
    /// indexed.
    fn indexed_value<'d>(&self, doc: &'d Document) -> Option<&'d Value> {
        doc.get(self.field).filter(|v| !v.is_null())
    }

    pub fn insert(&self, txn: &mut RwTransaction<'_>, doc: &Document, id: &str) -> Result<(), StoreError> {
        if let Some(value) = self.indexed_value(doc) {
            let key = entry_key(value, id)?;
            txn.put(self.db, &key, &id, WriteFlags::empty())?;
        }
        Ok(())
    }

    pub fn remove(&self, txn: &mut RwTransaction<'_>, doc: &Document, id: &str) -> Result<(), StoreError> {
        if let Some(value) = self.indexed_value(doc) {
            let key = entry_key(value, id)?;
            match txn.del(self.db, &key, None) {
                Ok(()) | Err(lmdb::Error::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Rewrites the entry only when the indexed value changed.
    pub fn replace(
        &self,
        txn: &mut RwTransaction<'_>,
        old: &Document,
        new: &Document,
        id: &str,
    ) -> Result<(), StoreError> {
        if self.indexed_value(old) == self.indexed_value(new) {
            return Ok(());
        }
        self.remove(txn, old, id)?;
        self.insert(txn, new, id)
    }

    /// Ids recorded under `value`, in key order. May contain false positives
    /// for values longer than [`MAX_INDEX_VALUE_LEN`].
    pub fn candidate_ids<T: Transaction>(&self, txn: &T, value: &Value) -> Result<Vec<String>, StoreError> {
        use lmdb::Cursor;

        let prefix = value_prefix(value)?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        let (first_key, first_id) = match cursor.get(Some(prefix.as_slice()), None, lmdb_sys::MDB_SET_RANGE) {
            Ok(entry) => entry,
            Err(lmdb::Error::NotFound) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if first_key.is_some_and(|key| !key.starts_with(&prefix)) {
            return Ok(Vec::new());
        }

        let mut ids = vec![String::from_utf8_lossy(first_id).into_owned()];
        for (key, id) in cursor.iter() {
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(String::from_utf8_lossy(id).into_owned());
        }
        Ok(ids)
    }
}

fn value_prefix(value: &Value) -> Result<Vec<u8>, StoreError> {
    let mut prefix = serde_json::to_vec(value)?;
    prefix.truncate(MAX_INDEX_VALUE_LEN);
    prefix.push(SEPARATOR);
    Ok(prefix)
}

fn entry_key(value: &Value, id: &str) -> Result<Vec<u8>, StoreError> {
    let mut key = value_prefix(value)?;
    key.extend_from_slice(id.as_bytes());
    Ok(key)
}
