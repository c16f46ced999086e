//! CESR (Composable Event Streaming Representation) primitives.
//!
//! Every cryptographic value is a typed byte string with three
//! interchangeable renderings: qb64 (fully qualified URL-safe Base64 with
//! leading code characters and no pad), qb2 (the Base64 decoding of the
//! full qb64 value), and raw (the payload alone, given the code). The code
//! length equals the Base64 pad size of the raw payload so every qb64
//! value is a whole number of 4-character quadlets.

pub mod cigar;
pub mod counting;
pub mod dater;
pub mod diger;
pub mod indexing;
pub mod nexter;
pub mod prefixer;
pub mod saider;
pub mod salter;
pub mod seqner;
pub mod signer;
pub mod tholder;
pub mod verfer;

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use once_cell::sync::Lazy;

use crate::errors::MatterError;

/// The URL-safe Base64 alphabet in index order.
pub const B64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Maps Base64 character to its index.
pub static B64_IDX_BY_CHR: Lazy<HashMap<u8, u64>> = Lazy::new(|| {
    B64_ALPHABET
        .iter()
        .enumerate()
        .map(|(i, &c)| (c, i as u64))
        .collect()
});

/// Converts an integer to a Base64 string of exactly `length` characters,
/// most significant character first, left padded with 'A'.
pub fn int_to_b64(mut n: u64, length: usize) -> String {
    let mut out = vec![b'A'; length];
    for slot in out.iter_mut().rev() {
        *slot = B64_ALPHABET[(n % 64) as usize];
        n /= 64;
    }
    String::from_utf8(out).expect("alphabet is ascii")
}

/// Converts a Base64 string to its integer value.
pub fn b64_to_int(s: &str) -> Result<u64, MatterError> {
    let mut n: u64 = 0;
    for c in s.bytes() {
        let idx = B64_IDX_BY_CHR
            .get(&c)
            .ok_or_else(|| MatterError::InvalidBase64(s.to_string()))?;
        n = n * 64 + idx;
    }
    Ok(n)
}

/// Encodes raw bytes as unpadded URL-safe Base64.
pub fn encode_b64(raw: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(raw)
}

/// Decodes unpadded URL-safe Base64.
pub fn decode_b64(text: &str) -> Result<Vec<u8>, MatterError> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| MatterError::InvalidBase64(text.to_string()))
}

/// Sizes for a derivation code: hard (code) size, soft (index/count) size,
/// and full size of the qb64 value, all in Base64 characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizage {
    pub hs: usize,
    pub ss: usize,
    pub fs: usize,
}

impl Sizage {
    /// Raw payload size in bytes implied by the full and hard sizes.
    pub fn raw_size(&self) -> usize {
        (self.fs - self.hs - self.ss) * 3 / 4
    }
}

/// Derivation codes for Matter values.
#[allow(dead_code)]
pub mod mtr_dex {
    pub const ED25519_SEED: &str = "A"; // Ed25519 256 bit random seed for private key
    pub const ED25519N: &str = "B"; // Ed25519 verification key, non-transferable
    pub const X25519: &str = "C"; // X25519 public encryption key
    pub const ED25519: &str = "D"; // Ed25519 verification key, basic derivation
    pub const BLAKE3_256: &str = "E"; // Blake3 256 bit digest
    pub const BLAKE2B_256: &str = "F"; // Blake2b 256 bit digest
    pub const BLAKE2S_256: &str = "G"; // Blake2s 256 bit digest
    pub const SHA3_256: &str = "H"; // SHA3 256 bit digest
    pub const SHA2_256: &str = "I"; // SHA2 256 bit digest
    pub const ECDSA_256K1_SEED: &str = "J"; // ECDSA secp256k1 256 bit random seed
    pub const SHORT: &str = "M"; // Short 2 byte number
    pub const SALT_128: &str = "0A"; // 128 bit random salt/seed/nonce/sequence number
    pub const ED25519_SIG: &str = "0B"; // Ed25519 signature
    pub const ECDSA_256K1_SIG: &str = "0C"; // ECDSA secp256k1 signature
    pub const BLAKE3_512: &str = "0D"; // Blake3 512 bit digest
    pub const SHA3_512: &str = "0E"; // SHA3 512 bit digest
    pub const BLAKE2B_512: &str = "0F"; // Blake2b 512 bit digest
    pub const SHA2_512: &str = "0G"; // SHA2 512 bit digest
    pub const ECDSA_256K1N: &str = "1AAA"; // ECDSA secp256k1 verification key, non-transferable
    pub const ECDSA_256K1: &str = "1AAB"; // ECDSA secp256k1 verification key
    pub const DATETIME: &str = "1AAG"; // ISO-8601 datetime
}

/// Digest (self-addressing) codes.
pub const DIG_CODES: &[&str] = &[
    mtr_dex::BLAKE3_256,
    mtr_dex::BLAKE2B_256,
    mtr_dex::BLAKE2S_256,
    mtr_dex::SHA3_256,
    mtr_dex::SHA2_256,
    mtr_dex::BLAKE3_512,
    mtr_dex::SHA3_512,
    mtr_dex::BLAKE2B_512,
    mtr_dex::SHA2_512,
];

/// Non-transferable identifier codes. Only inception is permitted for
/// prefixes under these codes.
pub const NON_TRANS_CODES: &[&str] = &[mtr_dex::ED25519N, mtr_dex::ECDSA_256K1N];

/// Codes valid as identifier prefixes.
pub const PRE_CODES: &[&str] = &[
    mtr_dex::ED25519N,
    mtr_dex::ED25519,
    mtr_dex::BLAKE3_256,
    mtr_dex::BLAKE2B_256,
    mtr_dex::BLAKE2S_256,
    mtr_dex::SHA3_256,
    mtr_dex::SHA2_256,
];

/// Codes valid for verification keys.
pub const VERFER_CODES: &[&str] = &[mtr_dex::ED25519N, mtr_dex::ED25519];

/// Sizes by Matter code.
pub static SIZES: Lazy<HashMap<&'static str, Sizage>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for code in [
        mtr_dex::ED25519_SEED,
        mtr_dex::ED25519N,
        mtr_dex::X25519,
        mtr_dex::ED25519,
        mtr_dex::BLAKE3_256,
        mtr_dex::BLAKE2B_256,
        mtr_dex::BLAKE2S_256,
        mtr_dex::SHA3_256,
        mtr_dex::SHA2_256,
        mtr_dex::ECDSA_256K1_SEED,
    ] {
        map.insert(code, Sizage { hs: 1, ss: 0, fs: 44 });
    }
    map.insert(mtr_dex::SHORT, Sizage { hs: 1, ss: 0, fs: 4 });
    map.insert(mtr_dex::SALT_128, Sizage { hs: 2, ss: 0, fs: 24 });
    for code in [mtr_dex::ED25519_SIG, mtr_dex::ECDSA_256K1_SIG] {
        map.insert(code, Sizage { hs: 2, ss: 0, fs: 88 });
    }
    for code in [
        mtr_dex::BLAKE3_512,
        mtr_dex::SHA3_512,
        mtr_dex::BLAKE2B_512,
        mtr_dex::SHA2_512,
    ] {
        map.insert(code, Sizage { hs: 2, ss: 0, fs: 88 });
    }
    for code in [mtr_dex::ECDSA_256K1N, mtr_dex::ECDSA_256K1] {
        map.insert(code, Sizage { hs: 4, ss: 0, fs: 48 });
    }
    map.insert(mtr_dex::DATETIME, Sizage { hs: 4, ss: 0, fs: 36 });
    map
});

/// Hard (code) size selected by the first code character.
pub fn hard_size(first: u8) -> Result<usize, MatterError> {
    match first {
        b'A'..=b'Z' | b'a'..=b'z' => Ok(1),
        b'0' => Ok(2),
        b'1' => Ok(4),
        _ => Err(MatterError::InvalidCode(
            String::from_utf8_lossy(&[first]).to_string(),
        )),
    }
}

/// Looks up the Sizage for a Matter code.
pub fn sizage(code: &str) -> Result<Sizage, MatterError> {
    SIZES
        .get(code)
        .copied()
        .ok_or_else(|| MatterError::InvalidCode(code.to_string()))
}

/// Core trait for all fully qualified cryptographic material.
pub trait Matter {
    /// Derivation code.
    fn code(&self) -> &str;

    /// Raw payload bytes.
    fn raw(&self) -> &[u8];

    /// Fully qualified Base64 representation.
    fn qb64(&self) -> String {
        let mut out = String::with_capacity(self.code().len() + (self.raw().len() * 4 + 2) / 3);
        out.push_str(self.code());
        out.push_str(&encode_b64(self.raw()));
        out
    }

    /// Fully qualified Base64 representation as bytes.
    fn qb64b(&self) -> Vec<u8> {
        self.qb64().into_bytes()
    }

    /// Fully qualified binary representation.
    fn qb2(&self) -> Vec<u8> {
        decode_b64(&self.qb64()).expect("qb64 is valid base64")
    }

    /// True if the code is not in the non-transferable set.
    fn is_transferable(&self) -> bool {
        !NON_TRANS_CODES.contains(&self.code())
    }

    /// True if the code is a digest (self-addressing) code.
    fn is_digestive(&self) -> bool {
        DIG_CODES.contains(&self.code())
    }

    /// True if the code may serve as an identifier prefix.
    fn is_prefixive(&self) -> bool {
        PRE_CODES.contains(&self.code())
    }
}

/// Base implementation of typed cryptographic material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseMatter {
    code: String,
    raw: Vec<u8>,
}

impl BaseMatter {
    /// Creates material from a code and raw payload, validating the size.
    pub fn new(code: &str, raw: &[u8]) -> Result<Self, MatterError> {
        let szg = sizage(code)?;
        if raw.len() != szg.raw_size() {
            return Err(MatterError::RawSize {
                code: code.to_string(),
                size: raw.len(),
            });
        }
        Ok(BaseMatter {
            code: code.to_string(),
            raw: raw.to_vec(),
        })
    }

    /// Parses a complete qb64 string. The string must be exactly the full
    /// size of its code.
    pub fn from_qb64(qb64: &str) -> Result<Self, MatterError> {
        let (matter, size) = Self::extract(qb64.as_bytes())?;
        if size != qb64.len() {
            return Err(MatterError::InvalidMaterial(qb64.to_string()));
        }
        Ok(matter)
    }

    /// Parses qb64 bytes, see [`BaseMatter::from_qb64`].
    pub fn from_qb64b(qb64b: &[u8]) -> Result<Self, MatterError> {
        let (matter, size) = Self::extract(qb64b)?;
        if size != qb64b.len() {
            return Err(MatterError::InvalidMaterial(
                String::from_utf8_lossy(qb64b).to_string(),
            ));
        }
        Ok(matter)
    }

    /// Parses a complete qb2 value.
    pub fn from_qb2(qb2: &[u8]) -> Result<Self, MatterError> {
        let qb64 = encode_b64(qb2);
        Self::from_qb64(&qb64)
    }

    /// Extracts one value from the head of a qb64 byte stream, returning
    /// the value and the number of bytes consumed. A truncated stream
    /// yields [`MatterError::Shortage`] with the byte deficit.
    pub fn extract(ims: &[u8]) -> Result<(Self, usize), MatterError> {
        if ims.is_empty() {
            return Err(MatterError::Shortage { needed: 1 });
        }
        let hs = hard_size(ims[0])?;
        if ims.len() < hs {
            return Err(MatterError::Shortage {
                needed: hs - ims.len(),
            });
        }
        let code = std::str::from_utf8(&ims[..hs])
            .map_err(|_| MatterError::InvalidCode(format!("{:?}", &ims[..hs])))?;
        let szg = sizage(code)?;
        if ims.len() < szg.fs {
            return Err(MatterError::Shortage {
                needed: szg.fs - ims.len(),
            });
        }
        let text = std::str::from_utf8(&ims[hs..szg.fs])
            .map_err(|_| MatterError::InvalidMaterial(format!("{:?}", &ims[..szg.fs])))?;
        let raw = decode_b64(text)?;
        Ok((
            BaseMatter {
                code: code.to_string(),
                raw,
            },
            szg.fs,
        ))
    }
}

impl Matter for BaseMatter {
    fn code(&self) -> &str {
        &self.code
    }

    fn raw(&self) -> &[u8] {
        &self.raw
    }
}
