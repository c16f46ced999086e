//! Abstract ordered key/value store and database key builders.
//!
//! Everything persistent is expressed through [`Databaser`]: named
//! sub-databases of ordered `(key, value)` pairs. The reference backend
//! is the in-memory [`MemDBer`]; a transactional backend slots in at the
//! same trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::errors::{KeriError, Result};

/// Returns key formed by joining `top` and the 32-hex rendering of
/// ordinal `on` with separator `sep`.
pub fn on_key(top: impl AsRef<[u8]>, on: u64, sep: u8) -> Vec<u8> {
    let top = top.as_ref();
    let mut key = Vec::with_capacity(top.len() + 33);
    key.extend_from_slice(top);
    key.push(sep);
    key.extend_from_slice(format!("{on:032x}").as_bytes());
    key
}

/// Key for a `(prefix, sequence number)` location.
pub fn sn_key(pre: impl AsRef<[u8]>, sn: u64) -> Vec<u8> {
    on_key(pre, sn, b'.')
}

/// Key for a `(prefix, first-seen ordinal)` location.
pub fn fn_key(pre: impl AsRef<[u8]>, fn_: u64) -> Vec<u8> {
    on_key(pre, fn_, b'.')
}

/// Key for a `(prefix, digest)` location.
pub fn dg_key(pre: impl AsRef<[u8]>, dig: impl AsRef<[u8]>) -> Vec<u8> {
    let pre = pre.as_ref();
    let dig = dig.as_ref();
    let mut key = Vec::with_capacity(pre.len() + 1 + dig.len());
    key.extend_from_slice(pre);
    key.push(b'.');
    key.extend_from_slice(dig);
    key
}

/// Splits a key at the last separator into (prefix, suffix).
pub fn split_key(key: &[u8], sep: u8) -> Result<(Vec<u8>, Vec<u8>)> {
    match key.iter().rposition(|&b| b == sep) {
        Some(pos) => Ok((key[..pos].to_vec(), key[pos + 1..].to_vec())),
        None => Err(KeriError::ValueError(format!(
            "unsplittable key = {}",
            String::from_utf8_lossy(key)
        ))),
    }
}

/// Splits an ordinal key into (prefix, ordinal).
pub fn split_key_on(key: &[u8]) -> Result<(Vec<u8>, u64)> {
    let (top, suffix) = split_key(key, b'.')?;
    let text = std::str::from_utf8(&suffix)
        .map_err(|_| KeriError::ValueError("non-utf8 ordinal suffix".to_string()))?;
    let on = u64::from_str_radix(text, 16)
        .map_err(|_| KeriError::ValueError(format!("invalid ordinal suffix = {text}")))?;
    Ok((top, on))
}

/// Abstract store of named sub-databases of ordered byte keys.
pub trait Databaser: Send + Sync {
    /// Writes `val` at `key` only if absent. Returns false if present.
    fn put(&self, db: &str, key: &[u8], val: &[u8]) -> Result<bool>;

    /// Writes `val` at `key`, overwriting.
    fn set(&self, db: &str, key: &[u8], val: &[u8]) -> Result<bool>;

    fn get(&self, db: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Deletes the entry at `key`. Returns false if absent.
    fn del(&self, db: &str, key: &[u8]) -> Result<bool>;

    /// Number of keys starting with `prefix`.
    fn cnt(&self, db: &str, prefix: &[u8]) -> Result<usize>;

    /// All `(key, value)` pairs with keys starting with `prefix`, in
    /// ascending key order.
    fn items(&self, db: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// First entry at or after `prefix` within the prefix range.
    fn first(&self, db: &str, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Last entry within the prefix range.
    fn last(&self, db: &str, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory reference backend over ordered maps.
#[derive(Default)]
pub struct MemDBer {
    name: String,
    dbs: RwLock<HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemDBer {
    pub fn new(name: &str) -> Self {
        MemDBer {
            name: name.to_string(),
            dbs: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Databaser for MemDBer {
    fn put(&self, db: &str, key: &[u8], val: &[u8]) -> Result<bool> {
        let mut dbs = self.dbs.write().expect("store lock poisoned");
        let sub = dbs.entry(db.to_string()).or_default();
        if sub.contains_key(key) {
            return Ok(false);
        }
        sub.insert(key.to_vec(), val.to_vec());
        Ok(true)
    }

    fn set(&self, db: &str, key: &[u8], val: &[u8]) -> Result<bool> {
        let mut dbs = self.dbs.write().expect("store lock poisoned");
        dbs.entry(db.to_string())
            .or_default()
            .insert(key.to_vec(), val.to_vec());
        Ok(true)
    }

    fn get(&self, db: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let dbs = self.dbs.read().expect("store lock poisoned");
        Ok(dbs.get(db).and_then(|sub| sub.get(key).cloned()))
    }

    fn del(&self, db: &str, key: &[u8]) -> Result<bool> {
        let mut dbs = self.dbs.write().expect("store lock poisoned");
        Ok(dbs
            .get_mut(db)
            .map(|sub| sub.remove(key).is_some())
            .unwrap_or(false))
    }

    fn cnt(&self, db: &str, prefix: &[u8]) -> Result<usize> {
        let dbs = self.dbs.read().expect("store lock poisoned");
        Ok(dbs
            .get(db)
            .map(|sub| {
                sub.range(prefix.to_vec()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .count()
            })
            .unwrap_or(0))
    }

    fn items(&self, db: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let dbs = self.dbs.read().expect("store lock poisoned");
        Ok(dbs
            .get(db)
            .map(|sub| {
                sub.range(prefix.to_vec()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn first(&self, db: &str, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.items(db, prefix)?.into_iter().next())
    }

    fn last(&self, db: &str, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.items(db, prefix)?.into_iter().next_back())
    }
}
