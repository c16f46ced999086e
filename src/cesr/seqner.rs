//! Seqner: sequence number material.

use crate::cesr::{mtr_dex, BaseMatter, Matter};
use crate::errors::MatterError;

/// Sequence number (or first-seen ordinal) as a 128-bit big-endian
/// number under the Salt_128 code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seqner {
    base: BaseMatter,
}

impl Seqner {
    pub fn new(sn: u64) -> Self {
        let raw = (sn as u128).to_be_bytes();
        Seqner {
            base: BaseMatter::new(mtr_dex::SALT_128, &raw).expect("16 byte raw"),
        }
    }

    /// From a lowercase hex string as used in event `s` fields.
    pub fn from_snh(snh: &str) -> Result<Self, MatterError> {
        let sn = u64::from_str_radix(snh, 16)
            .map_err(|_| MatterError::InvalidMaterial(snh.to_string()))?;
        Ok(Self::new(sn))
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        let base = BaseMatter::from_qb64(qb64)?;
        if base.code() != mtr_dex::SALT_128 {
            return Err(MatterError::InvalidCode(base.code().to_string()));
        }
        Ok(Seqner { base })
    }

    pub fn extract(ims: &[u8]) -> Result<(Self, usize), MatterError> {
        let (base, size) = BaseMatter::extract(ims)?;
        if base.code() != mtr_dex::SALT_128 {
            return Err(MatterError::InvalidCode(base.code().to_string()));
        }
        Ok((Seqner { base }, size))
    }

    pub fn sn(&self) -> u64 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(self.raw());
        u128::from_be_bytes(buf) as u64
    }

    /// Lowercase hex rendering used in event fields.
    pub fn snh(&self) -> String {
        format!("{:x}", self.sn())
    }
}

impl Matter for Seqner {
    fn code(&self) -> &str {
        self.base.code()
    }

    fn raw(&self) -> &[u8] {
        self.base.raw()
    }
}
