//! Prefixer: identifier prefix derivation and verification.

use crate::cesr::diger::digest;
use crate::cesr::saider::DUMMY;
use crate::cesr::verfer::Verfer;
use crate::cesr::{mtr_dex, sizage, BaseMatter, Matter, PRE_CODES};
use crate::core::serdering::{dumps, Sad, Sadder};
use crate::core::Kinds;
use crate::errors::{KeriError, Result};

/// Identifier prefix material. Derivation modes: basic non-transferable,
/// basic transferable (single public key), or self-addressing (digest of
/// the inception event with `i` and `d` dummied).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefixer {
    base: BaseMatter,
}

impl Prefixer {
    pub fn from_qb64(qb64: &str) -> std::result::Result<Self, crate::errors::MatterError> {
        let base = BaseMatter::from_qb64(qb64)?;
        if !PRE_CODES.contains(&base.code()) {
            return Err(crate::errors::MatterError::InvalidCode(
                base.code().to_string(),
            ));
        }
        Ok(Prefixer { base })
    }

    /// Derives a prefix from an inception event mapping under `code`.
    pub fn derive(ked: &Sadder, code: &str, kind: Kinds) -> Result<Self> {
        match code {
            mtr_dex::ED25519N => Self::derive_basic(ked, code, false),
            mtr_dex::ED25519 => Self::derive_basic(ked, code, true),
            c if crate::cesr::DIG_CODES.contains(&c) => Self::derive_dig(ked, code, kind),
            other => Err(KeriError::DerivationError(format!(
                "unsupported prefix code = {other}"
            ))),
        }
    }

    fn derive_basic(ked: &Sadder, code: &str, transferable: bool) -> Result<Self> {
        let keys = ked
            .get("k")
            .and_then(Sad::to_strings)
            .unwrap_or_default();
        if keys.len() != 1 {
            return Err(KeriError::DerivationError(format!(
                "basic derivation needs exactly one key, got {}",
                keys.len()
            )));
        }
        let verfer = Verfer::from_qb64(&keys[0])?;
        if verfer.code() != code {
            return Err(KeriError::DerivationError(format!(
                "mismatch of key code = {} with derivation code = {code}",
                verfer.code()
            )));
        }
        if !transferable {
            let nxt = ked.get("n").and_then(Sad::as_str).unwrap_or_default();
            if !nxt.is_empty() {
                return Err(KeriError::DerivationError(
                    "non-empty nxt with non-transferable code".to_string(),
                ));
            }
            let wits = ked.get("b").and_then(Sad::to_strings).unwrap_or_default();
            if !wits.is_empty() {
                return Err(KeriError::DerivationError(
                    "non-empty witnesses with non-transferable code".to_string(),
                ));
            }
            if let Some(Sad::Array(data)) = ked.get("a") {
                if !data.is_empty() {
                    return Err(KeriError::DerivationError(
                        "non-empty data with non-transferable code".to_string(),
                    ));
                }
            }
        }
        Ok(Prefixer {
            base: BaseMatter::new(code, verfer.raw())?,
        })
    }

    fn derive_dig(ked: &Sadder, code: &str, kind: Kinds) -> Result<Self> {
        let szg = sizage(code)?;
        let dummy = DUMMY.to_string().repeat(szg.fs);
        let mut clone = ked.clone();
        clone.insert("i".to_string(), Sad::String(dummy.clone()));
        if clone.contains_key("d") {
            clone.insert("d".to_string(), Sad::String(dummy));
        }
        let ser = dumps(&clone, kind)?;
        let raw = digest(code, &ser)?;
        Ok(Prefixer {
            base: BaseMatter::new(code, &raw)?,
        })
    }

    /// True if this prefix is consistent with the inception mapping.
    /// When `prefixed`, additionally requires the `i` field to equal the
    /// prefix itself.
    pub fn verify(&self, ked: &Sadder, kind: Kinds, prefixed: bool) -> bool {
        let derived = match Self::derive(ked, self.code(), kind) {
            Ok(p) => p,
            Err(_) => return false,
        };
        if derived.qb64() != self.qb64() {
            return false;
        }
        if prefixed && ked.get("i").and_then(Sad::as_str) != Some(&self.qb64()) {
            return false;
        }
        true
    }
}

impl Matter for Prefixer {
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
    use crate::cesr::signer::Signer;

    fn inception_ked(key: &str, nxt: &str) -> Sadder {
        let mut sad = Sadder::new();
        sad.insert("v".to_string(), Sad::from("KERI10JSON000000_"));
        sad.insert("t".to_string(), Sad::from("icp"));
        sad.insert("d".to_string(), Sad::from(""));
        sad.insert("i".to_string(), Sad::from(""));
        sad.insert("s".to_string(), Sad::from("0"));
        sad.insert("kt".to_string(), Sad::from("1"));
        sad.insert("k".to_string(), Sad::from_strings([key.to_string()]));
        sad.insert("n".to_string(), Sad::from(nxt));
        sad.insert("bt".to_string(), Sad::from("0"));
        sad.insert("b".to_string(), Sad::Array(vec![]));
        sad.insert("c".to_string(), Sad::Array(vec![]));
        sad.insert("a".to_string(), Sad::Array(vec![]));
        sad
    }

    #[test]
    fn test_prefixer_basic_transferable() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&[5u8; 32]), true).unwrap();
        let ked = inception_ked(&signer.verfer().qb64(), "");
        let prefixer = Prefixer::derive(&ked, mtr_dex::ED25519, Kinds::Json).unwrap();
        assert_eq!(prefixer.qb64(), signer.verfer().qb64());
        assert!(prefixer.verify(&ked, Kinds::Json, false));
    }

    #[test]
    fn test_prefixer_nontransferable_constraints() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&[6u8; 32]), false).unwrap();
        let ked = inception_ked(&signer.verfer().qb64(), "");
        let prefixer = Prefixer::derive(&ked, mtr_dex::ED25519N, Kinds::Json).unwrap();
        assert!(!prefixer.is_transferable());

        // non-empty next commitment is a derivation error
        let bad = inception_ked(
            &signer.verfer().qb64(),
            "EcBCalw7Oe2ohLDra2ovwlv72PrlQZdQdaoSZ1Vvk5P4",
        );
        assert!(Prefixer::derive(&bad, mtr_dex::ED25519N, Kinds::Json).is_err());
    }

    #[test]
    fn test_prefixer_self_addressing() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&[7u8; 32]), true).unwrap();
        let ked = inception_ked(&signer.verfer().qb64(), "");
        let prefixer = Prefixer::derive(&ked, mtr_dex::BLAKE3_256, Kinds::Json).unwrap();
        assert_eq!(prefixer.code(), mtr_dex::BLAKE3_256);

        // filling i and d with the derived prefix still verifies since
        // both fields are dummied during derivation
        let mut filled = ked.clone();
        filled.insert("i".to_string(), Sad::from(prefixer.qb64()));
        filled.insert("d".to_string(), Sad::from(prefixer.qb64()));
        assert!(prefixer.verify(&filled, Kinds::Json, true));

        // any key change breaks the derivation
        let other = Signer::new(Some(&[8u8; 32]), true).unwrap();
        let mut tampered = filled.clone();
        tampered.insert(
            "k".to_string(),
            Sad::from_strings([other.verfer().qb64()]),
        );
        assert!(!prefixer.verify(&tampered, Kinds::Json, true));
    }
}
