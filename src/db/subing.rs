//! Namespaced sub-database wrappers over the abstract store.
//!
//! `Suber` holds one value per key, `DupSuber` a lexicographically
//! ordered set of values per key, and `IoSetSuber` an insertion-ordered
//! set per key using a 32-hex ordinal suffix. Set members are kept under
//! composite keys `key ‖ 0x00 ‖ member` so range iteration groups them.

use std::sync::Arc;

use crate::db::dbing::Databaser;
use crate::errors::Result;

/// Separator between the logical key and the set member or ordinal.
const ION_SEP: u8 = 0x00;

/// Joins key parts with the `.` separator into a database key.
pub fn tokey(parts: &[&str]) -> Vec<u8> {
    parts.join(".").into_bytes()
}

#[derive(Clone)]
pub struct SuberBase {
    db: Arc<dyn Databaser>,
    subkey: String,
}

impl SuberBase {
    pub fn new(db: Arc<dyn Databaser>, subkey: &str) -> Self {
        SuberBase {
            db,
            subkey: subkey.to_string(),
        }
    }

    fn ion_key(&self, key: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut k = Vec::with_capacity(key.len() + 1 + suffix.len());
        k.extend_from_slice(key);
        k.push(ION_SEP);
        k.extend_from_slice(suffix);
        k
    }

    fn ion_prefix(&self, key: &[u8]) -> Vec<u8> {
        self.ion_key(key, b"")
    }
}

/// Plain key to value sub-database.
#[derive(Clone)]
pub struct Suber {
    base: SuberBase,
}

impl Suber {
    pub fn new(db: Arc<dyn Databaser>, subkey: &str) -> Self {
        Suber {
            base: SuberBase::new(db, subkey),
        }
    }

    /// Writes without overwriting. Returns false if the key is present.
    pub fn put(&self, key: impl AsRef<[u8]>, val: &[u8]) -> Result<bool> {
        self.base.db.put(&self.base.subkey, key.as_ref(), val)
    }

    /// Writes, overwriting any existing value.
    pub fn pin(&self, key: impl AsRef<[u8]>, val: &[u8]) -> Result<bool> {
        self.base.db.set(&self.base.subkey, key.as_ref(), val)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.base.db.get(&self.base.subkey, key.as_ref())
    }

    pub fn rem(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.base.db.del(&self.base.subkey, key.as_ref())
    }

    /// Ordered `(key, value)` pairs with keys starting with `top`.
    pub fn items(&self, top: impl AsRef<[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.base.db.items(&self.base.subkey, top.as_ref())
    }

    /// Last entry within the `top` key range.
    pub fn last(&self, top: impl AsRef<[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.base.db.last(&self.base.subkey, top.as_ref())
    }

    pub fn cnt(&self, top: impl AsRef<[u8]>) -> Result<usize> {
        self.base.db.cnt(&self.base.subkey, top.as_ref())
    }
}

/// Key to lexicographically ordered duplicate value set.
#[derive(Clone)]
pub struct DupSuber {
    base: SuberBase,
}

impl DupSuber {
    pub fn new(db: Arc<dyn Databaser>, subkey: &str) -> Self {
        DupSuber {
            base: SuberBase::new(db, subkey),
        }
    }

    /// Adds `val` to the set at `key`. Returns false if already present.
    pub fn add(&self, key: impl AsRef<[u8]>, val: &[u8]) -> Result<bool> {
        let k = self.base.ion_key(key.as_ref(), val);
        self.base.db.put(&self.base.subkey, &k, b"")
    }

    /// All values at `key` in lexicographic order.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        let prefix = self.base.ion_prefix(key.as_ref());
        Ok(self
            .base
            .db
            .items(&self.base.subkey, &prefix)?
            .into_iter()
            .map(|(k, _)| k[prefix.len()..].to_vec())
            .collect())
    }

    pub fn cnt(&self, key: impl AsRef<[u8]>) -> Result<usize> {
        self.base
            .db
            .cnt(&self.base.subkey, &self.base.ion_prefix(key.as_ref()))
    }

    /// Removes one value, or the whole set when `val` is None.
    pub fn rem(&self, key: impl AsRef<[u8]>, val: Option<&[u8]>) -> Result<bool> {
        match val {
            Some(v) => {
                let k = self.base.ion_key(key.as_ref(), v);
                self.base.db.del(&self.base.subkey, &k)
            }
            None => {
                let prefix = self.base.ion_prefix(key.as_ref());
                let items = self.base.db.items(&self.base.subkey, &prefix)?;
                let mut removed = false;
                for (k, _) in items {
                    removed |= self.base.db.del(&self.base.subkey, &k)?;
                }
                Ok(removed)
            }
        }
    }
}

/// Key to insertion-ordered value set.
#[derive(Clone)]
pub struct IoSetSuber {
    base: SuberBase,
}

impl IoSetSuber {
    pub fn new(db: Arc<dyn Databaser>, subkey: &str) -> Self {
        IoSetSuber {
            base: SuberBase::new(db, subkey),
        }
    }

    /// Appends `val` at `key` unless already present.
    pub fn add(&self, key: impl AsRef<[u8]>, val: &[u8]) -> Result<bool> {
        let key = key.as_ref();
        let prefix = self.base.ion_prefix(key);
        let items = self.base.db.items(&self.base.subkey, &prefix)?;
        if items.iter().any(|(_, v)| v == val) {
            return Ok(false);
        }
        let ion = match items.last() {
            Some((k, _)) => {
                let text = String::from_utf8_lossy(&k[prefix.len()..]).to_string();
                u64::from_str_radix(&text, 16).unwrap_or(0) + 1
            }
            None => 0,
        };
        let k = self.base.ion_key(key, format!("{ion:032x}").as_bytes());
        self.base.db.put(&self.base.subkey, &k, val)
    }

    /// All values at `key` in insertion order.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        let prefix = self.base.ion_prefix(key.as_ref());
        Ok(self
            .base
            .db
            .items(&self.base.subkey, &prefix)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    /// Last (most recently inserted) value at `key`.
    pub fn get_last(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let prefix = self.base.ion_prefix(key.as_ref());
        Ok(self
            .base
            .db
            .last(&self.base.subkey, &prefix)?
            .map(|(_, v)| v))
    }

    pub fn cnt(&self, key: impl AsRef<[u8]>) -> Result<usize> {
        self.base
            .db
            .cnt(&self.base.subkey, &self.base.ion_prefix(key.as_ref()))
    }

    /// Removes one matching value, or the whole set when `val` is None.
    pub fn rem(&self, key: impl AsRef<[u8]>, val: Option<&[u8]>) -> Result<bool> {
        let prefix = self.base.ion_prefix(key.as_ref());
        let items = self.base.db.items(&self.base.subkey, &prefix)?;
        let mut removed = false;
        for (k, v) in items {
            if val.is_none() || val == Some(v.as_slice()) {
                removed |= self.base.db.del(&self.base.subkey, &k)?;
                if val.is_some() {
                    break;
                }
            }
        }
        Ok(removed)
    }

    /// Ordered `(key, value)` pairs for all sets with keys starting with
    /// `top`, with the ordinal suffix stripped from the returned keys.
    pub fn items(&self, top: impl AsRef<[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .base
            .db
            .items(&self.base.subkey, top.as_ref())?
            .into_iter()
            .filter_map(|(k, v)| {
                k.iter()
                    .rposition(|&b| b == ION_SEP)
                    .map(|pos| (k[..pos].to_vec(), v))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dbing::MemDBer;

    fn store() -> Arc<dyn Databaser> {
        Arc::new(MemDBer::new("test"))
    }

    #[test]
    fn test_suber() {
        let suber = Suber::new(store(), "evts");
        assert!(suber.put(b"a", b"1").unwrap());
        assert!(!suber.put(b"a", b"2").unwrap());
        assert_eq!(suber.get(b"a").unwrap().unwrap(), b"1");
        assert!(suber.pin(b"a", b"2").unwrap());
        assert_eq!(suber.get(b"a").unwrap().unwrap(), b"2");
        assert!(suber.rem(b"a").unwrap());
        assert!(suber.get(b"a").unwrap().is_none());
    }

    #[test]
    fn test_dup_suber_sorted() {
        let dups = DupSuber::new(store(), "sigs");
        assert!(dups.add(b"k", b"bb").unwrap());
        assert!(dups.add(b"k", b"aa").unwrap());
        assert!(!dups.add(b"k", b"aa").unwrap());
        assert_eq!(dups.get(b"k").unwrap(), vec![b"aa".to_vec(), b"bb".to_vec()]);
        assert_eq!(dups.cnt(b"k").unwrap(), 2);
        assert!(dups.rem(b"k", Some(b"aa")).unwrap());
        assert_eq!(dups.get(b"k").unwrap(), vec![b"bb".to_vec()]);
        assert!(dups.rem(b"k", None).unwrap());
        assert_eq!(dups.cnt(b"k").unwrap(), 0);
    }

    #[test]
    fn test_ioset_suber_insertion_order() {
        let ios = IoSetSuber::new(store(), "kels");
        assert!(ios.add(b"k", b"zz").unwrap());
        assert!(ios.add(b"k", b"aa").unwrap());
        assert!(!ios.add(b"k", b"zz").unwrap());
        assert_eq!(ios.get(b"k").unwrap(), vec![b"zz".to_vec(), b"aa".to_vec()]);
        assert_eq!(ios.get_last(b"k").unwrap().unwrap(), b"aa");
        assert!(ios.rem(b"k", Some(b"zz")).unwrap());
        assert_eq!(ios.get(b"k").unwrap(), vec![b"aa".to_vec()]);

        // items strips ordinal suffixes and keeps key grouping
        ios.add(b"k2", b"cc").unwrap();
        let items = ios.items(b"k").unwrap();
        assert_eq!(
            items,
            vec![
                (b"k".to_vec(), b"aa".to_vec()),
                (b"k2".to_vec(), b"cc".to_vec())
            ]
        );
    }

    #[test]
    fn test_tokey() {
        assert_eq!(tokey(&["cid", "role", "eid"]), b"cid.role.eid".to_vec());
    }
}
