//! Indexer: indexed signature material.
//!
//! An indexed signature carries the position of its signer in the current
//! signing key list as Base64 soft characters between the code and the
//! signature body.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::cesr::verfer::Verfer;
use crate::cesr::{b64_to_int, decode_b64, encode_b64, int_to_b64, Sizage};
use crate::errors::MatterError;

/// Derivation codes for indexed signatures.
#[allow(dead_code)]
pub mod idr_dex {
    pub const ED25519_SIG: &str = "A"; // Ed25519 indexed signature
    pub const ECDSA_256K1_SIG: &str = "B"; // ECDSA secp256k1 indexed signature
    pub const ED448_SIG: &str = "0A"; // Ed448 indexed signature
}

/// Sizes by Indexer code.
pub static IDX_SIZES: Lazy<HashMap<&'static str, Sizage>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(idr_dex::ED25519_SIG, Sizage { hs: 1, ss: 1, fs: 88 });
    map.insert(idr_dex::ECDSA_256K1_SIG, Sizage { hs: 1, ss: 1, fs: 88 });
    map.insert(idr_dex::ED448_SIG, Sizage { hs: 2, ss: 2, fs: 156 });
    map
});

fn idx_sizage(code: &str) -> Result<Sizage, MatterError> {
    IDX_SIZES
        .get(code)
        .copied()
        .ok_or_else(|| MatterError::InvalidCode(code.to_string()))
}

fn idx_hard_size(first: u8) -> Result<usize, MatterError> {
    match first {
        b'A'..=b'Z' | b'a'..=b'z' => Ok(1),
        b'0' => Ok(2),
        _ => Err(MatterError::InvalidCode(
            String::from_utf8_lossy(&[first]).to_string(),
        )),
    }
}

/// Base implementation of indexed material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseIndexer {
    code: String,
    index: u32,
    raw: Vec<u8>,
}

impl BaseIndexer {
    pub fn new(code: &str, index: u32, raw: &[u8]) -> Result<Self, MatterError> {
        let szg = idx_sizage(code)?;
        if (index as u64) >= 64u64.pow(szg.ss as u32) {
            return Err(MatterError::InvalidIndex(index as u64));
        }
        if raw.len() != szg.raw_size() {
            return Err(MatterError::RawSize {
                code: code.to_string(),
                size: raw.len(),
            });
        }
        Ok(BaseIndexer {
            code: code.to_string(),
            index,
            raw: raw.to_vec(),
        })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        let (indexer, size) = Self::extract(qb64.as_bytes())?;
        if size != qb64.len() {
            return Err(MatterError::InvalidMaterial(qb64.to_string()));
        }
        Ok(indexer)
    }

    /// Extracts one indexed value from the head of a qb64 byte stream.
    pub fn extract(ims: &[u8]) -> Result<(Self, usize), MatterError> {
        if ims.is_empty() {
            return Err(MatterError::Shortage { needed: 1 });
        }
        let hs = idx_hard_size(ims[0])?;
        if ims.len() < hs {
            return Err(MatterError::Shortage {
                needed: hs - ims.len(),
            });
        }
        let code = std::str::from_utf8(&ims[..hs])
            .map_err(|_| MatterError::InvalidCode(format!("{:?}", &ims[..hs])))?;
        let szg = idx_sizage(code)?;
        if ims.len() < szg.fs {
            return Err(MatterError::Shortage {
                needed: szg.fs - ims.len(),
            });
        }
        let soft = std::str::from_utf8(&ims[hs..hs + szg.ss])
            .map_err(|_| MatterError::InvalidMaterial(format!("{:?}", &ims[..szg.fs])))?;
        let index = b64_to_int(soft)? as u32;
        let text = std::str::from_utf8(&ims[hs + szg.ss..szg.fs])
            .map_err(|_| MatterError::InvalidMaterial(format!("{:?}", &ims[..szg.fs])))?;
        let raw = decode_b64(text)?;
        Ok((
            BaseIndexer {
                code: code.to_string(),
                index,
                raw,
            },
            szg.fs,
        ))
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn qb64(&self) -> String {
        let szg = idx_sizage(&self.code).expect("constructed with valid code");
        let mut out = String::with_capacity(szg.fs);
        out.push_str(&self.code);
        out.push_str(&int_to_b64(self.index as u64, szg.ss));
        out.push_str(&encode_b64(&self.raw));
        out
    }

    pub fn qb64b(&self) -> Vec<u8> {
        self.qb64().into_bytes()
    }

    pub fn qb2(&self) -> Vec<u8> {
        decode_b64(&self.qb64()).expect("qb64 is valid base64")
    }
}

/// Indexed signature, optionally carrying its verification key.
#[derive(Debug, Clone)]
pub struct Siger {
    base: BaseIndexer,
    verfer: Option<Verfer>,
}

impl Siger {
    pub fn new(
        code: &str,
        index: u32,
        raw: &[u8],
        verfer: Option<Verfer>,
    ) -> Result<Self, MatterError> {
        Ok(Siger {
            base: BaseIndexer::new(code, index, raw)?,
            verfer,
        })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        Ok(Siger {
            base: BaseIndexer::from_qb64(qb64)?,
            verfer: None,
        })
    }

    pub fn extract(ims: &[u8]) -> Result<(Self, usize), MatterError> {
        let (base, size) = BaseIndexer::extract(ims)?;
        Ok((Siger { base, verfer: None }, size))
    }

    pub fn code(&self) -> &str {
        self.base.code()
    }

    pub fn index(&self) -> u32 {
        self.base.index()
    }

    pub fn raw(&self) -> &[u8] {
        self.base.raw()
    }

    pub fn qb64(&self) -> String {
        self.base.qb64()
    }

    pub fn qb64b(&self) -> Vec<u8> {
        self.base.qb64b()
    }

    pub fn qb2(&self) -> Vec<u8> {
        self.base.qb2()
    }

    pub fn verfer(&self) -> Option<&Verfer> {
        self.verfer.as_ref()
    }

    pub fn set_verfer(&mut self, verfer: Verfer) {
        self.verfer = Some(verfer);
    }
}
