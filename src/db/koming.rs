//! Komer: sub-database of serde-JSON records.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::dbing::Databaser;
use crate::db::subing::Suber;
use crate::errors::{KeriError, Result};

/// Keyspace of typed records serialized as JSON.
#[derive(Clone)]
pub struct Komer<T: Serialize + DeserializeOwned> {
    suber: Suber,
    _record: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> Komer<T> {
    pub fn new(db: Arc<dyn Databaser>, subkey: &str) -> Self {
        Komer {
            suber: Suber::new(db, subkey),
            _record: PhantomData,
        }
    }

    pub fn put(&self, key: impl AsRef<[u8]>, record: &T) -> Result<bool> {
        self.suber.put(key, &self.dumps(record)?)
    }

    pub fn pin(&self, key: impl AsRef<[u8]>, record: &T) -> Result<bool> {
        self.suber.pin(key, &self.dumps(record)?)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.suber.get(key)? {
            Some(raw) => Ok(Some(self.loads(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn rem(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.suber.rem(key)
    }

    pub fn items(&self, top: impl AsRef<[u8]>) -> Result<Vec<(Vec<u8>, T)>> {
        self.suber
            .items(top)?
            .into_iter()
            .map(|(k, v)| Ok((k, self.loads(&v)?)))
            .collect()
    }

    fn dumps(&self, record: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(record)
            .map_err(|e| KeriError::DatabaseError(format!("record dumps: {e}")))
    }

    fn loads(&self, raw: &[u8]) -> Result<T> {
        serde_json::from_slice(raw)
            .map_err(|e| KeriError::DatabaseError(format!("record loads: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dbing::MemDBer;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        url: String,
    }

    #[test]
    fn test_komer_roundtrip() {
        let db: Arc<dyn Databaser> = Arc::new(MemDBer::new("test"));
        let komer: Komer<Rec> = Komer::new(db, "locs");
        let rec = Rec {
            url: "http://localhost:8080/witness".to_string(),
        };
        assert!(komer.put(b"eid.http", &rec).unwrap());
        assert!(!komer.put(b"eid.http", &rec).unwrap());
        assert_eq!(komer.get(b"eid.http").unwrap().unwrap(), rec);

        let newer = Rec {
            url: String::new(),
        };
        komer.pin(b"eid.http", &newer).unwrap();
        assert_eq!(komer.get(b"eid.http").unwrap().unwrap(), newer);
        assert!(komer.rem(b"eid.http").unwrap());
        assert!(komer.get(b"eid.http").unwrap().is_none());
    }
}
