//! Signer: private key material with signing support.

use sodiumoxide::crypto::sign::ed25519;
use sodiumoxide::randombytes;

use crate::cesr::cigar::Cigar;
use crate::cesr::indexing::{idr_dex, Siger};
use crate::cesr::verfer::Verfer;
use crate::cesr::{mtr_dex, BaseMatter, Matter};
use crate::errors::MatterError;

/// Signing key seed. Owns the verification key derived from it.
#[derive(Debug, Clone)]
pub struct Signer {
    base: BaseMatter,
    verfer: Verfer,
}

impl Signer {
    /// Creates a signer from a raw Ed25519 seed, or a fresh random seed
    /// when `raw` is None. `transferable` selects the verfer code.
    pub fn new(raw: Option<&[u8]>, transferable: bool) -> Result<Self, MatterError> {
        let seed = match raw {
            Some(r) => r.to_vec(),
            None => randombytes::randombytes(ed25519::SEEDBYTES),
        };
        Self::from_code_raw(mtr_dex::ED25519_SEED, &seed, transferable)
    }

    pub fn from_code_raw(code: &str, raw: &[u8], transferable: bool) -> Result<Self, MatterError> {
        if code != mtr_dex::ED25519_SEED {
            return Err(MatterError::InvalidCode(code.to_string()));
        }
        let base = BaseMatter::new(code, raw)?;
        let seed = ed25519::Seed::from_slice(base.raw())
            .ok_or_else(|| MatterError::Crypto("invalid ed25519 seed".to_string()))?;
        let (pk, _) = ed25519::keypair_from_seed(&seed);
        let vcode = if transferable {
            mtr_dex::ED25519
        } else {
            mtr_dex::ED25519N
        };
        let verfer = Verfer::new(vcode, pk.as_ref())?;
        Ok(Signer { base, verfer })
    }

    /// Recreates a signer from its qb64 seed.
    pub fn from_qb64(qb64: &str, transferable: bool) -> Result<Self, MatterError> {
        let base = BaseMatter::from_qb64(qb64)?;
        Self::from_code_raw(&base.code().to_string(), base.raw(), transferable)
    }

    pub fn verfer(&self) -> &Verfer {
        &self.verfer
    }

    fn sign_raw(&self, ser: &[u8]) -> Result<Vec<u8>, MatterError> {
        let seed = ed25519::Seed::from_slice(self.base.raw())
            .ok_or_else(|| MatterError::Crypto("invalid ed25519 seed".to_string()))?;
        let (_, sk) = ed25519::keypair_from_seed(&seed);
        Ok(ed25519::sign_detached(ser, &sk).as_ref().to_vec())
    }

    /// Signs `ser`, returning an unindexed Cigar.
    pub fn sign(&self, ser: &[u8]) -> Result<Cigar, MatterError> {
        let sig = self.sign_raw(ser)?;
        Cigar::new(mtr_dex::ED25519_SIG, &sig, Some(self.verfer.clone()))
    }

    /// Signs `ser`, returning a Siger indexed at the signer's position in
    /// the current key list.
    pub fn sign_indexed(&self, ser: &[u8], index: u32) -> Result<Siger, MatterError> {
        let sig = self.sign_raw(ser)?;
        Siger::new(idr_dex::ED25519_SIG, index, &sig, Some(self.verfer.clone()))
    }
}

impl Matter for Signer {
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
    fn test_signer_sign_verify() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(None, true).unwrap();
        assert_eq!(signer.code(), mtr_dex::ED25519_SEED);
        assert_eq!(signer.verfer().code(), mtr_dex::ED25519);

        let ser = b"abcdefghijklmnopqrstuvwxyz";
        let cigar = signer.sign(ser).unwrap();
        assert!(signer.verfer().verify(cigar.raw(), ser).unwrap());

        let siger = signer.sign_indexed(ser, 3).unwrap();
        assert_eq!(siger.index(), 3);
        assert!(signer.verfer().verify(siger.raw(), ser).unwrap());
    }

    #[test]
    fn test_signer_deterministic_from_seed() {
        sodiumoxide::init().unwrap();
        let seed = [0x42u8; 32];
        let a = Signer::new(Some(&seed), true).unwrap();
        let b = Signer::from_qb64(&a.qb64(), true).unwrap();
        assert_eq!(a.verfer().qb64(), b.verfer().qb64());

        let n = Signer::new(Some(&seed), false).unwrap();
        assert_eq!(n.verfer().code(), mtr_dex::ED25519N);
        assert_eq!(n.verfer().raw(), a.verfer().raw());
    }
}
