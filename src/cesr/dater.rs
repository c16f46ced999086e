//! Dater: ISO-8601 datetime material.

use chrono::{DateTime, FixedOffset};

use crate::cesr::{decode_b64, encode_b64, mtr_dex, BaseMatter, Matter};
use crate::errors::MatterError;
use crate::help;

/// Length of the extended ISO-8601 datetime string.
const DTS_LEN: usize = 32;

/// Datetime material. The 32-character extended ISO-8601 string is made
/// Base64 safe by substituting `c` for `:`, `d` for `.`, and `p` for `+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dater {
    base: BaseMatter,
}

impl Dater {
    /// From an extended ISO-8601 datetime string with microseconds and
    /// explicit offset.
    pub fn from_dts(dts: &str) -> Result<Self, MatterError> {
        if dts.len() != DTS_LEN {
            return Err(MatterError::InvalidMaterial(dts.to_string()));
        }
        help::from_iso8601(dts).map_err(|_| MatterError::InvalidMaterial(dts.to_string()))?;
        let safe: String = dts
            .chars()
            .map(|c| match c {
                ':' => 'c',
                '.' => 'd',
                '+' => 'p',
                other => other,
            })
            .collect();
        let raw = decode_b64(&safe)?;
        Ok(Dater {
            base: BaseMatter::new(mtr_dex::DATETIME, &raw)?,
        })
    }

    /// The current UTC datetime.
    pub fn now() -> Self {
        Self::from_dts(&help::now_iso8601()).expect("now is well formed")
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        let base = BaseMatter::from_qb64(qb64)?;
        if base.code() != mtr_dex::DATETIME {
            return Err(MatterError::InvalidCode(base.code().to_string()));
        }
        Ok(Dater { base })
    }

    pub fn extract(ims: &[u8]) -> Result<(Self, usize), MatterError> {
        let (base, size) = BaseMatter::extract(ims)?;
        if base.code() != mtr_dex::DATETIME {
            return Err(MatterError::InvalidCode(base.code().to_string()));
        }
        Ok((Dater { base }, size))
    }

    /// The ISO-8601 datetime string.
    pub fn dts(&self) -> String {
        encode_b64(self.raw())
            .chars()
            .map(|c| match c {
                'c' => ':',
                'd' => '.',
                'p' => '+',
                other => other,
            })
            .collect()
    }

    /// The parsed datetime for comparisons.
    pub fn dt(&self) -> Result<DateTime<FixedOffset>, MatterError> {
        help::from_iso8601(&self.dts()).map_err(|_| MatterError::InvalidMaterial(self.dts()))
    }
}

impl Matter for Dater {
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
    fn test_dater_roundtrip() {
        let dts = "2021-01-01T00:00:00.000000+00:00";
        let dater = Dater::from_dts(dts).unwrap();
        assert_eq!(dater.code(), mtr_dex::DATETIME);
        assert_eq!(dater.qb64().len(), 36);
        assert_eq!(dater.dts(), dts);

        let again = Dater::from_qb64(&dater.qb64()).unwrap();
        assert_eq!(again.dts(), dts);
    }

    #[test]
    fn test_dater_ordering() {
        let d0 = Dater::from_dts("2021-01-01T00:00:00.000000+00:00").unwrap();
        let d1 = Dater::from_dts("2021-01-01T00:00:01.000000+00:00").unwrap();
        assert!(d0.dt().unwrap() < d1.dt().unwrap());
        assert_eq!(d0.dt().unwrap(), d0.dt().unwrap());
    }

    #[test]
    fn test_dater_rejects_malformed() {
        assert!(Dater::from_dts("2021-01-01").is_err());
        assert!(Dater::from_dts("2021-01-01T00:00:00.000000Z0:00").is_err());
    }
}
