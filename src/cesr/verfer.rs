//! Verfer: fully qualified verification key material.

use sodiumoxide::crypto::sign::ed25519;

use crate::cesr::{mtr_dex, BaseMatter, Matter, VERFER_CODES};
use crate::errors::MatterError;

/// Verification key. Verifies signatures over serialized material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verfer {
    base: BaseMatter,
}

impl Verfer {
    pub fn new(code: &str, raw: &[u8]) -> Result<Self, MatterError> {
        if !VERFER_CODES.contains(&code) {
            return Err(MatterError::InvalidCode(code.to_string()));
        }
        Ok(Verfer {
            base: BaseMatter::new(code, raw)?,
        })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        let base = BaseMatter::from_qb64(qb64)?;
        if !VERFER_CODES.contains(&base.code()) {
            return Err(MatterError::InvalidCode(base.code().to_string()));
        }
        Ok(Verfer { base })
    }

    /// Verifies `sig` over `ser` with this key. Returns false on a
    /// well-formed but non-verifying signature.
    pub fn verify(&self, sig: &[u8], ser: &[u8]) -> Result<bool, MatterError> {
        match self.code() {
            mtr_dex::ED25519 | mtr_dex::ED25519N => self.verify_ed25519(sig, ser),
            _ => Err(MatterError::InvalidCode(self.code().to_string())),
        }
    }

    fn verify_ed25519(&self, sig: &[u8], ser: &[u8]) -> Result<bool, MatterError> {
        if sig.len() != ed25519::SIGNATUREBYTES {
            return Err(MatterError::RawSize {
                code: mtr_dex::ED25519_SIG.to_string(),
                size: sig.len(),
            });
        }
        let pk = ed25519::PublicKey::from_slice(self.raw())
            .ok_or_else(|| MatterError::Crypto("invalid ed25519 public key".to_string()))?;
        let signature = match ed25519::Signature::from_bytes(sig) {
            Ok(s) => s,
            Err(_) => return Ok(false),
        };
        Ok(ed25519::verify_detached(&signature, ser, &pk))
    }
}

impl Matter for Verfer {
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
    fn test_verfer_ed25519() {
        sodiumoxide::init().unwrap();
        let (pk, sk) = ed25519::gen_keypair();
        let verfer = Verfer::new(mtr_dex::ED25519, pk.as_ref()).unwrap();
        assert!(verfer.is_transferable());

        let ser = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let sig = ed25519::sign_detached(ser, &sk);
        assert!(verfer.verify(sig.as_ref(), ser).unwrap());
        assert!(!verfer.verify(sig.as_ref(), b"other message").unwrap());

        let mut bad = sig.as_ref().to_vec();
        bad[0] ^= 0xff;
        assert!(!verfer.verify(&bad, ser).unwrap());
    }

    #[test]
    fn test_verfer_nontransferable() {
        sodiumoxide::init().unwrap();
        let (pk, _) = ed25519::gen_keypair();
        let verfer = Verfer::new(mtr_dex::ED25519N, pk.as_ref()).unwrap();
        assert!(!verfer.is_transferable());
    }

    #[test]
    fn test_verfer_bad_code() {
        assert!(Verfer::new(mtr_dex::BLAKE3_256, &[0u8; 32]).is_err());
    }
}
