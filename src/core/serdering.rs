//! Serder: parsed event message with canonical serialization.
//!
//! The field order of the event mapping is part of the wire contract, so
//! the mapping is an insertion-ordered `IndexMap` and every encoder emits
//! entries in that order. CBOR and MGPK maps are never key sorted.

use std::fmt;

use indexmap::IndexMap;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::cesr::nexter::Nexter;
use crate::cesr::tholder::Tholder;
use crate::cesr::verfer::Verfer;
use crate::core::{deversify, smell, versify, Ilk, Kinds, Smellage};
use crate::errors::{KeriError, Result};

/// A value in an event mapping, preserving object insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum Sad {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Sad>),
    Object(IndexMap<String, Sad>),
}

/// An ordered event mapping.
pub type Sadder = IndexMap<String, Sad>;

impl Sad {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Sad::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Sad>> {
        match self {
            Sad::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Sad>> {
        match self {
            Sad::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn from_strings<I: IntoIterator<Item = String>>(items: I) -> Sad {
        Sad::Array(items.into_iter().map(Sad::String).collect())
    }

    /// The list of strings an array of strings holds, if it is one.
    pub fn to_strings(&self) -> Option<Vec<String>> {
        let array = self.as_array()?;
        array
            .iter()
            .map(|v| v.as_str().map(|s| s.to_string()))
            .collect()
    }
}

impl Sad {
    /// Converts a serde_json value, preserving object member order.
    pub fn from_json(value: &serde_json::Value) -> Sad {
        match value {
            serde_json::Value::Null => Sad::Null,
            serde_json::Value::Bool(b) => Sad::Bool(*b),
            serde_json::Value::Number(n) => Sad::Number(n.clone()),
            serde_json::Value::String(s) => Sad::String(s.clone()),
            serde_json::Value::Array(a) => Sad::Array(a.iter().map(Sad::from_json).collect()),
            serde_json::Value::Object(o) => Sad::Object(
                o.iter()
                    .map(|(k, v)| (k.clone(), Sad::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts to a serde_json value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Sad::Null => serde_json::Value::Null,
            Sad::Bool(b) => serde_json::Value::Bool(*b),
            Sad::Number(n) => serde_json::Value::Number(n.clone()),
            Sad::String(s) => serde_json::Value::String(s.clone()),
            Sad::Array(a) => serde_json::Value::Array(a.iter().map(Sad::to_json).collect()),
            Sad::Object(o) => serde_json::Value::Object(
                o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<&str> for Sad {
    fn from(s: &str) -> Self {
        Sad::String(s.to_string())
    }
}

impl From<String> for Sad {
    fn from(s: String) -> Self {
        Sad::String(s)
    }
}

impl Serialize for Sad {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Sad::Null => serializer.serialize_unit(),
            Sad::Bool(b) => serializer.serialize_bool(*b),
            Sad::Number(n) => n.serialize(serializer),
            Sad::String(s) => serializer.serialize_str(s),
            Sad::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for item in a {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Sad::Object(o) => {
                let mut map = serializer.serialize_map(Some(o.len()))?;
                for (key, value) in o {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct SadVisitor;

impl<'de> Visitor<'de> for SadVisitor {
    type Value = Sad;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a KERI event value")
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Sad, E> {
        Ok(Sad::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Sad, E> {
        Ok(Sad::Number(serde_json::Number::from(v)))
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Sad, E> {
        Ok(Sad::Number(serde_json::Number::from(v)))
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> std::result::Result<Sad, E> {
        serde_json::Number::from_f64(v)
            .map(Sad::Number)
            .ok_or_else(|| E::custom("non-finite number"))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Sad, E> {
        Ok(Sad::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Sad, E> {
        Ok(Sad::String(v))
    }

    fn visit_unit<E>(self) -> std::result::Result<Sad, E> {
        Ok(Sad::Null)
    }

    fn visit_none<E>(self) -> std::result::Result<Sad, E> {
        Ok(Sad::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Sad, D::Error> {
        d.deserialize_any(SadVisitor)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Sad, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Sad::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Sad, A::Error> {
        let mut object = IndexMap::new();
        while let Some((key, value)) = map.next_entry::<String, Sad>()? {
            object.insert(key, value);
        }
        Ok(Sad::Object(object))
    }
}

impl<'de> Deserialize<'de> for Sad {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Sad, D::Error> {
        d.deserialize_any(SadVisitor)
    }
}

/// Serializes an ordered mapping under the given kind.
pub fn dumps(sad: &Sadder, kind: Kinds) -> Result<Vec<u8>> {
    match kind {
        Kinds::Json => serde_json::to_vec(sad)
            .map_err(|e| KeriError::DeserializeError(format!("json dumps: {e}"))),
        Kinds::Mgpk => rmp_serde::to_vec(sad)
            .map_err(|e| KeriError::DeserializeError(format!("mgpk dumps: {e}"))),
        Kinds::Cbor => serde_cbor::to_vec(sad)
            .map_err(|e| KeriError::DeserializeError(format!("cbor dumps: {e}"))),
    }
}

/// Deserializes an ordered mapping under the given kind.
pub fn loads(raw: &[u8], kind: Kinds) -> Result<Sadder> {
    match kind {
        Kinds::Json => serde_json::from_slice(raw)
            .map_err(|e| KeriError::DeserializeError(format!("json loads: {e}"))),
        Kinds::Mgpk => rmp_serde::from_slice(raw)
            .map_err(|e| KeriError::DeserializeError(format!("mgpk loads: {e}"))),
        Kinds::Cbor => serde_cbor::from_slice(raw)
            .map_err(|e| KeriError::DeserializeError(format!("cbor loads: {e}"))),
    }
}

/// A parsed event message: raw bytes, ordered mapping, detected kind and
/// declared size. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Serder {
    raw: Vec<u8>,
    sad: Sadder,
    kind: Kinds,
    size: usize,
}

impl Serder {
    /// Parses an event from the head of `raw`. Requires the full declared
    /// size to be present, decodes under the declared kind, and verifies
    /// that re-serialization reproduces the input bytes.
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        let Smellage { kind, size, .. } = smell(raw)?;
        if raw.len() < size {
            return Err(KeriError::ShortageError {
                needed: size - raw.len(),
            });
        }
        let body = &raw[..size];
        let sad = loads(body, kind)?;
        let again = dumps(&sad, kind)?;
        if again != body {
            return Err(KeriError::DeserializeError(
                "re-serialization does not match raw event bytes".to_string(),
            ));
        }
        Ok(Serder {
            raw: body.to_vec(),
            sad,
            kind,
            size,
        })
    }

    /// Builds an event from a mapping: serializes with a zeroed size
    /// placeholder, measures, rewrites the version string with the true
    /// size, and re-serializes.
    pub fn from_sad(mut sad: Sadder, kind: Kinds) -> Result<Self> {
        sad.shift_remove("v");
        sad.shift_insert(0, "v".to_string(), Sad::String(versify(kind, 0)));
        let probe = dumps(&sad, kind)?;
        let size = probe.len();
        sad.insert("v".to_string(), Sad::String(versify(kind, size)));
        let raw = dumps(&sad, kind)?;
        debug_assert_eq!(raw.len(), size);
        Ok(Serder {
            raw,
            sad,
            kind,
            size,
        })
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn ked(&self) -> &Sadder {
        &self.sad
    }

    pub fn kind(&self) -> Kinds {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The version string field.
    pub fn vs(&self) -> Option<&str> {
        self.sad.get("v").and_then(Sad::as_str)
    }

    pub fn verify_vs(&self) -> Result<()> {
        let vs = self
            .vs()
            .ok_or_else(|| KeriError::VersionError("missing v field".to_string()))?;
        let smellage = deversify(vs)?;
        if smellage.size != self.size || smellage.kind != self.kind {
            return Err(KeriError::VersionError(vs.to_string()));
        }
        Ok(())
    }

    /// SAID of the event (the `d` field).
    pub fn said(&self) -> Option<&str> {
        self.sad.get("d").and_then(Sad::as_str)
    }

    /// Identifier prefix (the `i` field).
    pub fn pre(&self) -> Option<&str> {
        self.sad.get("i").and_then(Sad::as_str)
    }

    /// Sequence number parsed from the hex `s` field.
    pub fn sn(&self) -> Result<u64> {
        let snh = self
            .sad
            .get("s")
            .and_then(Sad::as_str)
            .ok_or_else(|| KeriError::ValueError("missing s field".to_string()))?;
        u64::from_str_radix(snh, 16)
            .map_err(|_| KeriError::ValueError(format!("invalid sn = {snh}")))
    }

    pub fn ilk(&self) -> Result<Ilk> {
        let t = self
            .sad
            .get("t")
            .and_then(Sad::as_str)
            .ok_or_else(|| KeriError::ValueError("missing t field".to_string()))?;
        Ilk::from_str(t)
    }

    /// Prior event digest (the `p` field).
    pub fn prior(&self) -> Option<&str> {
        self.sad.get("p").and_then(Sad::as_str)
    }

    /// Current signing keys (the `k` field).
    pub fn keys(&self) -> Vec<String> {
        self.sad
            .get("k")
            .and_then(Sad::to_strings)
            .unwrap_or_default()
    }

    /// Verfers for the current signing keys.
    pub fn verfers(&self) -> Result<Vec<Verfer>> {
        self.keys()
            .iter()
            .map(|k| Verfer::from_qb64(k).map_err(KeriError::from))
            .collect()
    }

    /// Signing threshold (the `kt` field).
    pub fn tholder(&self) -> Result<Option<Tholder>> {
        match self.sad.get("kt") {
            None => Ok(None),
            Some(Sad::String(s)) => Ok(Some(Tholder::from_hex(s)?)),
            Some(value @ Sad::Array(items)) => {
                let clauses: Vec<Vec<String>> = if items.iter().all(|i| i.as_str().is_some()) {
                    vec![value.to_strings().expect("all strings")]
                } else {
                    items
                        .iter()
                        .map(|clause| {
                            clause.to_strings().ok_or_else(|| {
                                KeriError::ValueError("malformed weighted kt".to_string())
                            })
                        })
                        .collect::<Result<_>>()?
                };
                Ok(Some(Tholder::from_clauses(&clauses)?))
            }
            Some(_) => Err(KeriError::ValueError("malformed kt field".to_string())),
        }
    }

    /// Next-key commitment (the `n` field); None when empty (abandoned).
    pub fn nexter(&self) -> Result<Option<Nexter>> {
        match self.sad.get("n").and_then(Sad::as_str) {
            None => Ok(None),
            Some("") => Ok(None),
            Some(n) => Ok(Some(Nexter::from_qb64(n)?)),
        }
    }

    /// Witness threshold parsed from the hex `bt` field.
    pub fn toad(&self) -> Result<u64> {
        let bth = self
            .sad
            .get("bt")
            .and_then(Sad::as_str)
            .ok_or_else(|| KeriError::ValueError("missing bt field".to_string()))?;
        u64::from_str_radix(bth, 16)
            .map_err(|_| KeriError::ValueError(format!("invalid toad = {bth}")))
    }

    /// Witness list (the `b` field).
    pub fn backs(&self) -> Vec<String> {
        self.sad
            .get("b")
            .and_then(Sad::to_strings)
            .unwrap_or_default()
    }

    /// Witness cuts on rotation (the `br` field).
    pub fn cuts(&self) -> Vec<String> {
        self.sad
            .get("br")
            .and_then(Sad::to_strings)
            .unwrap_or_default()
    }

    /// Witness adds on rotation (the `ba` field).
    pub fn adds(&self) -> Vec<String> {
        self.sad
            .get("ba")
            .and_then(Sad::to_strings)
            .unwrap_or_default()
    }

    /// Configuration traits (the `c` field).
    pub fn traits(&self) -> Vec<String> {
        self.sad
            .get("c")
            .and_then(Sad::to_strings)
            .unwrap_or_default()
    }

    /// Seal or data section (the `a` field).
    pub fn data(&self) -> Option<&Sad> {
        self.sad.get("a")
    }

    /// Delegator prefix (the `di` field).
    pub fn delpre(&self) -> Option<&str> {
        self.sad.get("di").and_then(Sad::as_str)
    }

    /// Route (the `r` field of qry/rpy/exn/fwd).
    pub fn route(&self) -> Option<&str> {
        self.sad.get("r").and_then(Sad::as_str)
    }

    /// Datetime stamp (the `dt` field).
    pub fn stamp(&self) -> Option<&str> {
        self.sad.get("dt").and_then(Sad::as_str)
    }

    /// Pretty JSON rendering for logs.
    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(&self.sad).unwrap_or_else(|_| "<unprintable>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sad() -> Sadder {
        let mut sad = Sadder::new();
        sad.insert("t".to_string(), Sad::from("icp"));
        sad.insert("d".to_string(), Sad::from(""));
        sad.insert("i".to_string(), Sad::from("DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc"));
        sad.insert("s".to_string(), Sad::from("0"));
        sad.insert("kt".to_string(), Sad::from("1"));
        sad.insert(
            "k".to_string(),
            Sad::from_strings(["DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc".to_string()]),
        );
        sad.insert("n".to_string(), Sad::from(""));
        sad.insert("bt".to_string(), Sad::from("0"));
        sad.insert("b".to_string(), Sad::Array(vec![]));
        sad.insert("c".to_string(), Sad::Array(vec![]));
        sad.insert("a".to_string(), Sad::Array(vec![]));
        sad
    }

    #[test]
    fn test_serder_from_sad_json() {
        let serder = Serder::from_sad(sample_sad(), Kinds::Json).unwrap();
        assert_eq!(serder.kind(), Kinds::Json);
        assert!(serder.raw().starts_with(br#"{"v":"KERI10JSON"#));
        assert_eq!(serder.raw().len(), serder.size());
        serder.verify_vs().unwrap();

        // version string is moved to the front
        assert_eq!(serder.ked().get_index(0).unwrap().0, "v");

        // declared size is embedded in the bytes
        let vs = serder.vs().unwrap();
        let size = usize::from_str_radix(&vs[10..16], 16).unwrap();
        assert_eq!(size, serder.size());
    }

    #[test]
    fn test_serder_roundtrip_kinds() {
        for kind in [Kinds::Json, Kinds::Mgpk, Kinds::Cbor] {
            let serder = Serder::from_sad(sample_sad(), kind).unwrap();
            let parsed = Serder::from_raw(serder.raw()).unwrap();
            assert_eq!(parsed.kind(), kind);
            assert_eq!(parsed.ked(), serder.ked());
            assert_eq!(parsed.raw(), serder.raw());
            assert_eq!(parsed.sn().unwrap(), 0);
            assert_eq!(parsed.ilk().unwrap(), Ilk::Icp);
            assert_eq!(
                parsed.pre().unwrap(),
                "DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc"
            );
            assert_eq!(parsed.keys().len(), 1);
            assert!(parsed.nexter().unwrap().is_none());
        }
    }

    #[test]
    fn test_serder_preserves_field_order() {
        let serder = Serder::from_sad(sample_sad(), Kinds::Json).unwrap();
        let keys: Vec<&String> = serder.ked().keys().collect();
        assert_eq!(
            keys,
            ["v", "t", "d", "i", "s", "kt", "k", "n", "bt", "b", "c", "a"]
        );
    }

    #[test]
    fn test_serder_shortage_and_trailing() {
        let serder = Serder::from_sad(sample_sad(), Kinds::Json).unwrap();
        match Serder::from_raw(&serder.raw()[..serder.size() - 10]) {
            Err(KeriError::ShortageError { needed }) => assert_eq!(needed, 10),
            other => panic!("expected shortage, got {other:?}"),
        }

        // extra bytes after the declared size are ignored
        let mut stream = serder.raw().to_vec();
        stream.extend_from_slice(b"-AAB");
        let parsed = Serder::from_raw(&stream).unwrap();
        assert_eq!(parsed.size(), serder.size());
    }

    #[test]
    fn test_serder_rejects_mutated_raw() {
        let serder = Serder::from_sad(sample_sad(), Kinds::Json).unwrap();
        let mut raw = serder.raw().to_vec();
        // flip a byte inside the mapping without touching the size
        let pos = raw.len() - 5;
        raw[pos] = b'X';
        assert!(Serder::from_raw(&raw).is_err());
    }

    #[test]
    fn test_serder_weighted_tholder() {
        let mut sad = sample_sad();
        sad.insert(
            "kt".to_string(),
            Sad::from_strings(["1/2".to_string(), "1/2".to_string()]),
        );
        let serder = Serder::from_sad(sad, Kinds::Json).unwrap();
        let tholder = serder.tholder().unwrap().unwrap();
        assert!(tholder.weighted());
        assert!(tholder.satisfy(&[0, 1]));
        assert!(!tholder.satisfy(&[0]));
    }
}
