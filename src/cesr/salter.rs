//! Salter: 128-bit salt material with key stretching.

use sodiumoxide::crypto::pwhash::argon2id13;
use sodiumoxide::randombytes;

use crate::cesr::signer::Signer;
use crate::cesr::{mtr_dex, BaseMatter, Matter};
use crate::errors::MatterError;

/// Security tier for the Argon2id stretch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Low,
    Med,
    High,
}

/// Random salt used to derive deterministic sequences of signing keys.
#[derive(Debug, Clone)]
pub struct Salter {
    base: BaseMatter,
}

impl Salter {
    pub fn new(raw: Option<&[u8]>) -> Result<Self, MatterError> {
        let raw = match raw {
            Some(r) => r.to_vec(),
            None => randombytes::randombytes(argon2id13::SALTBYTES),
        };
        Ok(Salter {
            base: BaseMatter::new(mtr_dex::SALT_128, &raw)?,
        })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        let base = BaseMatter::from_qb64(qb64)?;
        if base.code() != mtr_dex::SALT_128 {
            return Err(MatterError::InvalidCode(base.code().to_string()));
        }
        Ok(Salter { base })
    }

    /// Stretches salt and path to a 32-byte seed with Argon2id. `temp`
    /// selects minimal work parameters for tests.
    pub fn stretch(&self, path: &str, tier: Tier, temp: bool) -> Result<Vec<u8>, MatterError> {
        let salt = argon2id13::Salt::from_slice(self.raw())
            .ok_or_else(|| MatterError::Crypto("invalid salt size".to_string()))?;
        let (ops, mem) = if temp {
            (argon2id13::OpsLimit(1), argon2id13::MemLimit(8192))
        } else {
            match tier {
                Tier::Low => (
                    argon2id13::OPSLIMIT_INTERACTIVE,
                    argon2id13::MEMLIMIT_INTERACTIVE,
                ),
                Tier::Med => (
                    argon2id13::OPSLIMIT_MODERATE,
                    argon2id13::MEMLIMIT_MODERATE,
                ),
                Tier::High => (
                    argon2id13::OPSLIMIT_SENSITIVE,
                    argon2id13::MEMLIMIT_SENSITIVE,
                ),
            }
        };
        let mut seed = vec![0u8; 32];
        argon2id13::derive_key(&mut seed, path.as_bytes(), &salt, ops, mem)
            .map_err(|_| MatterError::Crypto("argon2id stretch failed".to_string()))?;
        Ok(seed)
    }

    /// Derives a signer from this salt at `path`.
    pub fn signer(
        &self,
        path: &str,
        tier: Tier,
        temp: bool,
        transferable: bool,
    ) -> Result<Signer, MatterError> {
        let seed = self.stretch(path, tier, temp)?;
        Signer::new(Some(&seed), transferable)
    }

    /// Derives `count` signers at paths `"{stem}{i:x}"`.
    pub fn signers(
        &self,
        count: usize,
        stem: &str,
        tier: Tier,
        temp: bool,
        transferable: bool,
    ) -> Result<Vec<Signer>, MatterError> {
        (0..count)
            .map(|i| self.signer(&format!("{stem}{i:x}"), tier, temp, transferable))
            .collect()
    }
}

impl Matter for Salter {
    fn code(&self) -> &str {
        self.base.code()
    }

    fn raw(&self) -> &[u8] {
        self.base.raw()
    }
}
