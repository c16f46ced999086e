//! Nexter: commitment to the next signing threshold and keys.
//!
//! The commitment hides the next keys: the digest of the threshold limen
//! is XORed with the digest of each next key's qb64. A rotation exposes
//! the plaintext keys and the verifier recomputes the commitment against
//! the prior establishment event's `n` field.

use crate::cesr::tholder::Tholder;
use crate::cesr::{mtr_dex, BaseMatter, Matter};
use crate::errors::MatterError;

/// Next-key commitment digest material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nexter {
    base: BaseMatter,
}

impl Nexter {
    /// Computes the commitment over `keys` with threshold `sith` (limen
    /// or hex form). Defaults to a simple majority of the key count.
    pub fn new(sith: Option<&str>, keys: &[String]) -> Result<Self, MatterError> {
        if keys.is_empty() {
            return Err(MatterError::EmptyMaterial);
        }
        let limen = Self::limen_for(sith, keys.len())?;
        let raw = Self::derive(&limen, keys);
        Ok(Nexter {
            base: BaseMatter::new(mtr_dex::BLAKE3_256, &raw)?,
        })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        let base = BaseMatter::from_qb64(qb64)?;
        if base.code() != mtr_dex::BLAKE3_256 {
            return Err(MatterError::InvalidCode(base.code().to_string()));
        }
        Ok(Nexter { base })
    }

    fn limen_for(sith: Option<&str>, count: usize) -> Result<String, MatterError> {
        match sith {
            Some(s) => Ok(Tholder::from_limen(s)?.limen()),
            None => {
                let num = std::cmp::max(1, count.div_ceil(2)) as u64;
                Ok(Tholder::from_num(num).limen())
            }
        }
    }

    fn derive(limen: &str, keys: &[String]) -> [u8; 32] {
        let mut acc = *blake3::hash(limen.as_bytes()).as_bytes();
        for key in keys {
            let kdig = blake3::hash(key.as_bytes());
            for (a, b) in acc.iter_mut().zip(kdig.as_bytes()) {
                *a ^= b;
            }
        }
        acc
    }

    /// True if the commitment matches `sith` and `keys`.
    pub fn verify(&self, sith: Option<&str>, keys: &[String]) -> Result<bool, MatterError> {
        if keys.is_empty() {
            return Ok(false);
        }
        let limen = Self::limen_for(sith, keys.len())?;
        Ok(Self::derive(&limen, keys) == self.raw())
    }
}

impl Matter for Nexter {
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

    #[test]
    fn test_nexter_verify() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&[1u8; 32]), true).unwrap();
        let keys = vec![signer.verfer().qb64()];
        let nexter = Nexter::new(None, &keys).unwrap();
        assert_eq!(nexter.qb64().len(), 44);
        assert!(nexter.verify(Some("1"), &keys).unwrap());
        assert!(nexter.verify(None, &keys).unwrap());
        assert!(!nexter.verify(Some("2"), &keys).unwrap());

        let other = vec![Signer::new(Some(&[2u8; 32]), true)
            .unwrap()
            .verfer()
            .qb64()];
        assert!(!nexter.verify(Some("1"), &other).unwrap());

        let again = Nexter::from_qb64(&nexter.qb64()).unwrap();
        assert!(again.verify(Some("1"), &keys).unwrap());
    }

    #[test]
    fn test_nexter_multikey_order_matters_not() {
        // XOR composition is order independent
        sodiumoxide::init().unwrap();
        let k0 = Signer::new(Some(&[3u8; 32]), true).unwrap().verfer().qb64();
        let k1 = Signer::new(Some(&[4u8; 32]), true).unwrap().verfer().qb64();
        let a = Nexter::new(Some("2"), &[k0.clone(), k1.clone()]).unwrap();
        let b = Nexter::new(Some("2"), &[k1, k0]).unwrap();
        assert_eq!(a.qb64(), b.qb64());
    }

    #[test]
    fn test_nexter_known_vector() {
        // known commitment for a fixed seed
        sodiumoxide::init().unwrap();
        let seed1: [u8; 32] = [
            0x83, 0x42, 0x7e, 0x04, 0x94, 0xe3, 0xce, 0x55, 0x51, 0x79, 0x11, 0x66, 0x0c, 0x93,
            0x5d, 0x1e, 0xbf, 0xac, 0x51, 0xb5, 0xd6, 0x59, 0x5e, 0xa2, 0x45, 0xfa, 0x01, 0x35,
            0x98, 0x59, 0xdd, 0xe8,
        ];
        let signer1 = Signer::new(Some(&seed1), true).unwrap();
        assert_eq!(
            signer1.verfer().qb64(),
            "DHgZa-u7veNZkqk2AxCnxrINGKfQ0bRiaf9FdA_-_49A"
        );
        let nexter1 = Nexter::new(None, &[signer1.verfer().qb64()]).unwrap();
        assert_eq!(nexter1.qb64(), "EcBCalw7Oe2ohLDra2ovwlv72PrlQZdQdaoSZ1Vvk5P4");
    }
}
