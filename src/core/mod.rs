//! Core event model: version strings, serialization kinds, event types.

pub mod eventing;
pub mod parsing;
pub mod routing;
pub mod serdering;

use std::fmt;

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::errors::KeriError;

/// Protocol identifier in the version string.
pub const PROTO: &str = "KERI";

/// Protocol version carried in the version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Versionage {
    pub major: u32,
    pub minor: u32,
}

/// Current protocol version.
pub const VERSION: Versionage = Versionage { major: 1, minor: 0 };

/// Number of characters in a full version string.
pub const VER_FULL_SPAN: usize = 17;

/// Maximum offset of the version string from the head of a message.
pub const MAX_VS_OFFSET: usize = 12;

/// Minimum buffer needed to detect a version string.
pub const SMELL_SIZE: usize = MAX_VS_OFFSET + VER_FULL_SPAN;

/// Compiled version string pattern.
pub static REVER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"KERI(?P<major>[0-9a-f])(?P<minor>[0-9a-f])(?P<kind>[A-Z]{4})(?P<size>[0-9a-f]{6})_")
        .expect("version pattern compiles")
});

/// Serialization kinds for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kinds {
    Json,
    Mgpk,
    Cbor,
}

impl Kinds {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kinds::Json => "JSON",
            Kinds::Mgpk => "MGPK",
            Kinds::Cbor => "CBOR",
        }
    }

    pub fn from_str(kind: &str) -> Result<Self, KeriError> {
        match kind {
            "JSON" => Ok(Kinds::Json),
            "MGPK" => Ok(Kinds::Mgpk),
            "CBOR" => Ok(Kinds::Cbor),
            other => Err(KeriError::VersionError(format!("unknown kind = {other}"))),
        }
    }
}

impl fmt::Display for Kinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event message types (the `t` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ilk {
    Icp,
    Rot,
    Ixn,
    Dip,
    Drt,
    Rct,
    Ksn,
    Qry,
    Rpy,
    Exn,
    Fwd,
}

impl Ilk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ilk::Icp => "icp",
            Ilk::Rot => "rot",
            Ilk::Ixn => "ixn",
            Ilk::Dip => "dip",
            Ilk::Drt => "drt",
            Ilk::Rct => "rct",
            Ilk::Ksn => "ksn",
            Ilk::Qry => "qry",
            Ilk::Rpy => "rpy",
            Ilk::Exn => "exn",
            Ilk::Fwd => "fwd",
        }
    }

    pub fn from_str(ilk: &str) -> Result<Self, KeriError> {
        match ilk {
            "icp" => Ok(Ilk::Icp),
            "rot" => Ok(Ilk::Rot),
            "ixn" => Ok(Ilk::Ixn),
            "dip" => Ok(Ilk::Dip),
            "drt" => Ok(Ilk::Drt),
            "rct" => Ok(Ilk::Rct),
            "ksn" => Ok(Ilk::Ksn),
            "qry" => Ok(Ilk::Qry),
            "rpy" => Ok(Ilk::Rpy),
            "exn" => Ok(Ilk::Exn),
            "fwd" => Ok(Ilk::Fwd),
            other => Err(KeriError::ValueError(format!("unknown ilk = {other}"))),
        }
    }

    /// True for establishment event types.
    pub fn estive(&self) -> bool {
        matches!(self, Ilk::Icp | Ilk::Rot | Ilk::Dip | Ilk::Drt)
    }
}

impl fmt::Display for Ilk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composes a version string `KERI10<KIND><SIZE>_`.
pub fn versify(kind: Kinds, size: usize) -> String {
    format!(
        "{}{:x}{:x}{}{:06x}_",
        PROTO,
        VERSION.major,
        VERSION.minor,
        kind.as_str(),
        size
    )
}

/// Parsed version string contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smellage {
    pub vrsn: Versionage,
    pub kind: Kinds,
    pub size: usize,
}

/// Decomposes a full version string.
pub fn deversify(vs: &str) -> Result<Smellage, KeriError> {
    let caps = REVER
        .captures(vs.as_bytes())
        .ok_or_else(|| KeriError::VersionError(vs.to_string()))?;
    if caps.get(0).map(|m| m.as_bytes().len()) != Some(VER_FULL_SPAN) {
        return Err(KeriError::VersionError(vs.to_string()));
    }
    smellage_from_caps(&caps, vs)
}

fn smellage_from_caps(
    caps: &regex::bytes::Captures<'_>,
    context: &str,
) -> Result<Smellage, KeriError> {
    let text = |name: &str| -> String {
        String::from_utf8_lossy(caps.name(name).expect("group matched").as_bytes()).to_string()
    };
    let major = u32::from_str_radix(&text("major"), 16)
        .map_err(|_| KeriError::VersionError(context.to_string()))?;
    let minor = u32::from_str_radix(&text("minor"), 16)
        .map_err(|_| KeriError::VersionError(context.to_string()))?;
    if major != VERSION.major {
        return Err(KeriError::VersionError(format!(
            "incompatible major version = {major}"
        )));
    }
    let kind = Kinds::from_str(&text("kind"))?;
    let size = usize::from_str_radix(&text("size"), 16)
        .map_err(|_| KeriError::VersionError(context.to_string()))?;
    Ok(Smellage {
        vrsn: Versionage { major, minor },
        kind,
        size,
    })
}

/// Finds and parses the version string near the head of a raw message.
/// Returns a shortage when fewer than [`SMELL_SIZE`] bytes are available
/// and no version string has been found yet.
pub fn smell(raw: &[u8]) -> Result<Smellage, KeriError> {
    let window = &raw[..raw.len().min(SMELL_SIZE)];
    match REVER.captures(window) {
        Some(caps) => {
            let start = caps.get(0).expect("matched").start();
            if start > MAX_VS_OFFSET {
                return Err(KeriError::VersionError(
                    "version string too deep in message".to_string(),
                ));
            }
            smellage_from_caps(&caps, &String::from_utf8_lossy(window))
        }
        None => {
            if raw.len() < SMELL_SIZE {
                Err(KeriError::ShortageError {
                    needed: SMELL_SIZE - raw.len(),
                })
            } else {
                Err(KeriError::VersionError(
                    String::from_utf8_lossy(window).to_string(),
                ))
            }
        }
    }
}
