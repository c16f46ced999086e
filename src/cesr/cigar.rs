//! Cigar: unindexed (non-transferable receipt) signature material.

use crate::cesr::verfer::Verfer;
use crate::cesr::{mtr_dex, BaseMatter, Matter};
use crate::errors::MatterError;

/// Unindexed signature, optionally carrying the verification key that
/// produced it. Used for non-transferable receipt couples.
#[derive(Debug, Clone)]
pub struct Cigar {
    base: BaseMatter,
    verfer: Option<Verfer>,
}

impl Cigar {
    pub fn new(code: &str, raw: &[u8], verfer: Option<Verfer>) -> Result<Self, MatterError> {
        Ok(Cigar {
            base: BaseMatter::new(code, raw)?,
            verfer,
        })
    }

    pub fn from_qb64(qb64: &str, verfer: Option<Verfer>) -> Result<Self, MatterError> {
        Ok(Cigar {
            base: BaseMatter::from_qb64(qb64)?,
            verfer,
        })
    }

    pub fn verfer(&self) -> Option<&Verfer> {
        self.verfer.as_ref()
    }

    pub fn set_verfer(&mut self, verfer: Verfer) {
        self.verfer = Some(verfer);
    }
}

impl Matter for Cigar {
    fn code(&self) -> &str {
        self.base.code()
    }

    fn raw(&self) -> &[u8] {
        self.base.raw()
    }
}
