//! Diger: fully qualified cryptographic digest material.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Blake2s256, Digest};
use sha2::{Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};

use crate::cesr::{mtr_dex, BaseMatter, Matter};
use crate::errors::MatterError;

type Blake2b256 = Blake2b<U32>;

/// Computes the digest of `ser` under the given digest code.
pub fn digest(code: &str, ser: &[u8]) -> Result<Vec<u8>, MatterError> {
    match code {
        mtr_dex::BLAKE3_256 => Ok(blake3::hash(ser).as_bytes().to_vec()),
        mtr_dex::BLAKE3_512 => {
            let mut out = vec![0u8; 64];
            let mut hasher = blake3::Hasher::new();
            hasher.update(ser);
            hasher.finalize_xof().fill(&mut out);
            Ok(out)
        }
        mtr_dex::BLAKE2B_256 => Ok(Blake2b256::digest(ser).to_vec()),
        mtr_dex::BLAKE2B_512 => Ok(Blake2b512::digest(ser).to_vec()),
        mtr_dex::BLAKE2S_256 => Ok(Blake2s256::digest(ser).to_vec()),
        mtr_dex::SHA3_256 => Ok(Sha3_256::digest(ser).to_vec()),
        mtr_dex::SHA3_512 => Ok(Sha3_512::digest(ser).to_vec()),
        mtr_dex::SHA2_256 => Ok(Sha256::digest(ser).to_vec()),
        mtr_dex::SHA2_512 => Ok(Sha512::digest(ser).to_vec()),
        _ => Err(MatterError::InvalidCode(code.to_string())),
    }
}

/// Digest material. Wraps a raw digest under one of the digest codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diger {
    base: BaseMatter,
}

impl Diger {
    /// Computes the digest of `ser` under `code` (Blake3-256 by default).
    pub fn new(ser: &[u8], code: Option<&str>) -> Result<Self, MatterError> {
        let code = code.unwrap_or(mtr_dex::BLAKE3_256);
        let raw = digest(code, ser)?;
        Ok(Diger {
            base: BaseMatter::new(code, &raw)?,
        })
    }

    pub fn from_raw(code: &str, raw: &[u8]) -> Result<Self, MatterError> {
        let base = BaseMatter::new(code, raw)?;
        if !base.is_digestive() {
            return Err(MatterError::InvalidCode(code.to_string()));
        }
        Ok(Diger { base })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        let base = BaseMatter::from_qb64(qb64)?;
        if !base.is_digestive() {
            return Err(MatterError::InvalidCode(base.code().to_string()));
        }
        Ok(Diger { base })
    }

    /// True if this digest matches the digest of `ser` under its own code.
    pub fn verify(&self, ser: &[u8]) -> Result<bool, MatterError> {
        Ok(digest(self.code(), ser)? == self.raw())
    }
}

impl Matter for Diger {
    fn code(&self) -> &str {
        self.base.code()
    }

    fn raw(&self) -> &[u8] {
        self.base.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diger_blake3() {
        let ser = b"abcdefghijklmnopqrstuvwxyz0123456";
        let diger = Diger::new(ser, None).unwrap();
        assert_eq!(diger.code(), mtr_dex::BLAKE3_256);
        assert_eq!(diger.qb64().len(), 44);
        assert!(diger.verify(ser).unwrap());
        assert!(!diger.verify(b"tampered").unwrap());

        let again = Diger::from_qb64(&diger.qb64()).unwrap();
        assert!(again.verify(ser).unwrap());
    }

    #[test]
    fn test_diger_other_codes() {
        let ser = b"abcdefghijklmnopqrstuvwxyz0123456";
        for code in [
            mtr_dex::BLAKE2B_256,
            mtr_dex::BLAKE2S_256,
            mtr_dex::SHA3_256,
            mtr_dex::SHA2_256,
        ] {
            let diger = Diger::new(ser, Some(code)).unwrap();
            assert_eq!(diger.qb64().len(), 44);
            assert!(diger.verify(ser).unwrap());
        }
        for code in [mtr_dex::BLAKE3_512, mtr_dex::SHA3_512, mtr_dex::SHA2_512] {
            let diger = Diger::new(ser, Some(code)).unwrap();
            assert_eq!(diger.qb64().len(), 88);
            assert!(diger.verify(ser).unwrap());
        }
    }

    #[test]
    fn test_diger_rejects_non_digest_code() {
        assert!(Diger::from_raw(mtr_dex::ED25519, &[0u8; 32]).is_err());
    }
}
