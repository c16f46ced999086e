//! Counter: framing codes for attached CESR groups.
//!
//! A counter declares how many members of a group follow it on the
//! stream, or for the attachment meta counters, how many quadlets
//! (4-character / 3-byte groups) the attachment region occupies.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::cesr::{b64_to_int, decode_b64, int_to_b64, Sizage};
use crate::errors::MatterError;

/// Counter codes for attachment groups.
#[allow(dead_code)]
pub mod ctr_dex {
    pub const CONTROLLER_IDX_SIGS: &str = "-A"; // indexed controller signatures
    pub const WITNESS_IDX_SIGS: &str = "-B"; // indexed witness signatures
    pub const NON_TRANS_RECEIPT_COUPLES: &str = "-C"; // pre+cig couples
    pub const SEAL_SOURCE_COUPLES: &str = "-E"; // snu+dig couples of anchoring event
    pub const TRANS_RECEIPT_QUADRUPLES: &str = "-F"; // pre+snu+dig+sig group quadruples
    pub const TRANS_LAST_IDX_SIG_GROUPS: &str = "-H"; // pre+sig group, latest est event
    pub const ATTACHED_MATERIAL_QUADLETS: &str = "-V"; // quadlet count of attachment region
    pub const BIG_ATTACHED_MATERIAL_QUADLETS: &str = "-0V"; // big quadlet count
}

/// Sizes by Counter code.
pub static CTR_SIZES: Lazy<HashMap<&'static str, Sizage>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for code in [
        ctr_dex::CONTROLLER_IDX_SIGS,
        ctr_dex::WITNESS_IDX_SIGS,
        ctr_dex::NON_TRANS_RECEIPT_COUPLES,
        ctr_dex::SEAL_SOURCE_COUPLES,
        ctr_dex::TRANS_RECEIPT_QUADRUPLES,
        ctr_dex::TRANS_LAST_IDX_SIG_GROUPS,
        ctr_dex::ATTACHED_MATERIAL_QUADLETS,
    ] {
        map.insert(code, Sizage { hs: 2, ss: 2, fs: 4 });
    }
    map.insert(
        ctr_dex::BIG_ATTACHED_MATERIAL_QUADLETS,
        Sizage { hs: 3, ss: 5, fs: 8 },
    );
    map
});

fn ctr_sizage(code: &str) -> Result<Sizage, MatterError> {
    CTR_SIZES
        .get(code)
        .copied()
        .ok_or_else(|| MatterError::InvalidCode(code.to_string()))
}

/// Framing counter for an attached group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    code: String,
    count: u64,
}

impl Counter {
    pub fn new(code: &str, count: u64) -> Result<Self, MatterError> {
        let szg = ctr_sizage(code)?;
        if count >= 64u64.pow(szg.ss as u32) {
            return Err(MatterError::InvalidCount(count));
        }
        Ok(Counter {
            code: code.to_string(),
            count,
        })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        let (counter, size) = Self::extract(qb64.as_bytes())?;
        if size != qb64.len() {
            return Err(MatterError::InvalidMaterial(qb64.to_string()));
        }
        Ok(counter)
    }

    /// Extracts one counter from the head of a qb64 byte stream.
    pub fn extract(ims: &[u8]) -> Result<(Self, usize), MatterError> {
        if ims.len() < 2 {
            return Err(MatterError::Shortage {
                needed: 2 - ims.len(),
            });
        }
        if ims[0] != b'-' {
            return Err(MatterError::InvalidCode(
                String::from_utf8_lossy(&ims[..1]).to_string(),
            ));
        }
        let hs = if ims[1] == b'0' { 3 } else { 2 };
        if ims.len() < hs {
            return Err(MatterError::Shortage {
                needed: hs - ims.len(),
            });
        }
        let code = std::str::from_utf8(&ims[..hs])
            .map_err(|_| MatterError::InvalidCode(format!("{:?}", &ims[..hs])))?;
        let szg = ctr_sizage(code)?;
        if ims.len() < szg.fs {
            return Err(MatterError::Shortage {
                needed: szg.fs - ims.len(),
            });
        }
        let soft = std::str::from_utf8(&ims[hs..szg.fs])
            .map_err(|_| MatterError::InvalidMaterial(format!("{:?}", &ims[..szg.fs])))?;
        let count = b64_to_int(soft)?;
        Ok((
            Counter {
                code: code.to_string(),
                count,
            },
            szg.fs,
        ))
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn qb64(&self) -> String {
        let szg = ctr_sizage(&self.code).expect("constructed with valid code");
        let mut out = String::with_capacity(szg.fs);
        out.push_str(&self.code);
        out.push_str(&int_to_b64(self.count, szg.ss));
        out
    }

    pub fn qb64b(&self) -> Vec<u8> {
        self.qb64().into_bytes()
    }

    pub fn qb2(&self) -> Vec<u8> {
        decode_b64(&self.qb64()).expect("qb64 is valid base64")
    }
}
