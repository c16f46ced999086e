//! Rotation and delegated rotation event builders.

use crate::cesr::saider::{Saider, DUMMY};
use crate::core::eventing::incept::{resolve_tholder, resolve_toad};
use crate::core::eventing::ample;
use crate::core::serdering::{Sad, Sadder, Serder};
use crate::core::{Ilk, Kinds};
use crate::errors::{KeriError, Result};

/// Builder for rotation (`rot`) and delegated rotation (`drt`) events.
pub struct RotateBuilder {
    pre: String,
    keys: Vec<String>,
    dig: String,
    sn: u64,
    sith: Option<Sad>,
    nxt: String,
    toad: Option<u64>,
    wits: Vec<String>,
    cuts: Vec<String>,
    adds: Vec<String>,
    data: Vec<Sad>,
    delegated: bool,
    kind: Kinds,
}

impl RotateBuilder {
    /// `dig` is the SAID of the prior event; `wits` is the prior witness
    /// set against which cuts and adds are validated.
    pub fn new(pre: &str, keys: Vec<String>, dig: &str, sn: u64) -> Self {
        RotateBuilder {
            pre: pre.to_string(),
            keys,
            dig: dig.to_string(),
            sn,
            sith: None,
            nxt: String::new(),
            toad: None,
            wits: Vec::new(),
            cuts: Vec::new(),
            adds: Vec::new(),
            data: Vec::new(),
            delegated: false,
            kind: Kinds::Json,
        }
    }

    pub fn with_sith(mut self, sith: Sad) -> Self {
        self.sith = Some(sith);
        self
    }

    pub fn with_nxt(mut self, nxt: &str) -> Self {
        self.nxt = nxt.to_string();
        self
    }

    pub fn with_toad(mut self, toad: u64) -> Self {
        self.toad = Some(toad);
        self
    }

    pub fn with_wits(mut self, wits: Vec<String>) -> Self {
        self.wits = wits;
        self
    }

    pub fn with_cuts(mut self, cuts: Vec<String>) -> Self {
        self.cuts = cuts;
        self
    }

    pub fn with_adds(mut self, adds: Vec<String>) -> Self {
        self.adds = adds;
        self
    }

    pub fn with_data(mut self, data: Vec<Sad>) -> Self {
        self.data = data;
        self
    }

    pub fn delegated(mut self) -> Self {
        self.delegated = true;
        self
    }

    pub fn with_kind(mut self, kind: Kinds) -> Self {
        self.kind = kind;
        self
    }

    pub fn build(self) -> Result<Serder> {
        if self.sn < 1 {
            return Err(KeriError::ValueError(format!(
                "invalid sn = {} for rot",
                self.sn
            )));
        }
        if self.keys.is_empty() {
            return Err(KeriError::ValueError("missing rotation keys".to_string()));
        }
        let tholder = resolve_tholder(self.sith.as_ref(), self.keys.len())?;
        if self.keys.len() < tholder.size() {
            return Err(KeriError::ValidationError(format!(
                "invalid sith = {} for {} keys",
                tholder.limen(),
                self.keys.len()
            )));
        }

        let newset = apply_cuts_adds(&self.wits, &self.cuts, &self.adds)?;
        let toad = match self.toad {
            Some(t) => resolve_toad(Some(t), newset.len())?,
            None => {
                if newset.is_empty() {
                    0
                } else {
                    ample(newset.len() as i64, None, true)?
                }
            }
        };

        let ilk = if self.delegated { Ilk::Drt } else { Ilk::Rot };
        let mut sad = Sadder::new();
        sad.insert("v".to_string(), Sad::from(""));
        sad.insert("t".to_string(), Sad::from(ilk.as_str()));
        sad.insert("d".to_string(), Sad::String(DUMMY.to_string().repeat(44)));
        sad.insert("i".to_string(), Sad::from(self.pre.as_str()));
        sad.insert("s".to_string(), Sad::String(format!("{:x}", self.sn)));
        sad.insert("p".to_string(), Sad::from(self.dig.as_str()));
        sad.insert("kt".to_string(), Sad::from_json(&tholder.sith()));
        sad.insert("k".to_string(), Sad::from_strings(self.keys.clone()));
        sad.insert("n".to_string(), Sad::from(self.nxt.as_str()));
        sad.insert("bt".to_string(), Sad::String(format!("{toad:x}")));
        sad.insert("br".to_string(), Sad::from_strings(self.cuts.clone()));
        sad.insert("ba".to_string(), Sad::from_strings(self.adds.clone()));
        sad.insert("a".to_string(), Sad::Array(self.data.clone()));

        let sized = Serder::from_sad(sad, self.kind)?;
        let (_, filled) = Saider::saidify(sized.ked(), self.kind, None, "d")?;
        Serder::from_sad(filled, self.kind)
    }
}

/// Computes the new witness set from prior wits with cuts then adds.
pub(crate) fn apply_cuts_adds(
    wits: &[String],
    cuts: &[String],
    adds: &[String],
) -> Result<Vec<String>> {
    let mut seen = cuts.to_vec();
    seen.sort();
    seen.dedup();
    if seen.len() != cuts.len() {
        return Err(KeriError::ValueError("duplicate cuts".to_string()));
    }
    if cuts.iter().any(|c| !wits.contains(c)) {
        return Err(KeriError::ValueError(
            "cut of witness not in witness set".to_string(),
        ));
    }
    let mut seen = adds.to_vec();
    seen.sort();
    seen.dedup();
    if seen.len() != adds.len() {
        return Err(KeriError::ValueError("duplicate adds".to_string()));
    }
    if adds.iter().any(|a| wits.contains(a) || cuts.contains(a)) {
        return Err(KeriError::ValueError(
            "add of witness already in witness or cut set".to_string(),
        ));
    }
    let mut newset: Vec<String> = wits.iter().filter(|w| !cuts.contains(w)).cloned().collect();
    newset.extend(adds.iter().cloned());
    Ok(newset)
}

/// Rotation with defaults: majority sith, no witness changes.
pub fn rotate(pre: &str, keys: &[String], dig: &str, sn: u64, nxt: &str, kind: Kinds) -> Result<Serder> {
    RotateBuilder::new(pre, keys.to_vec(), dig, sn)
        .with_nxt(nxt)
        .with_kind(kind)
        .build()
}

/// Delegated rotation.
pub fn deltate(pre: &str, keys: &[String], dig: &str, sn: u64, nxt: &str, kind: Kinds) -> Result<Serder> {
    RotateBuilder::new(pre, keys.to_vec(), dig, sn)
        .with_nxt(nxt)
        .delegated()
        .with_kind(kind)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cesr::nexter::Nexter;
    use crate::cesr::signer::Signer;
    use crate::core::eventing::incept::incept;
    use crate::core::eventing::test_kit::{witness_signers, SEED0, SEED1, SEED2};
    use crate::cesr::Matter;

    #[test]
    fn test_rotate_fields_and_prior() {
        sodiumoxide::init().unwrap();
        let signer0 = Signer::new(Some(&SEED0), true).unwrap();
        let signer1 = Signer::new(Some(&SEED1), true).unwrap();
        let signer2 = Signer::new(Some(&SEED2), true).unwrap();

        let nxt1 = Nexter::new(None, &[signer1.verfer().qb64()]).unwrap();
        let serder0 = incept_with_nxt(signer0.verfer().qb64(), nxt1.qb64());

        let nxt2 = Nexter::new(None, &[signer2.verfer().qb64()]).unwrap();
        let serder1 = rotate(
            serder0.pre().unwrap(),
            &[signer1.verfer().qb64()],
            serder0.said().unwrap(),
            1,
            &nxt2.qb64(),
            Kinds::Json,
        )
        .unwrap();

        assert_eq!(serder1.ilk().unwrap(), Ilk::Rot);
        assert_eq!(serder1.sn().unwrap(), 1);
        assert_eq!(serder1.prior(), serder0.said());
        assert_eq!(
            serder1.ked().get("n").unwrap().as_str().unwrap(),
            nxt2.qb64()
        );
        let keys: Vec<&String> = serder1.ked().keys().collect();
        assert_eq!(
            keys,
            ["v", "t", "d", "i", "s", "p", "kt", "k", "n", "bt", "br", "ba", "a"]
        );

        // prior establishment commitment verifies against exposed keys
        assert!(nxt1
            .verify(Some("1"), &[signer1.verfer().qb64()])
            .unwrap());
    }

    fn incept_with_nxt(key: String, nxt: String) -> crate::core::serdering::Serder {
        crate::core::eventing::incept::InceptBuilder::new(vec![key])
            .with_nxt(&nxt)
            .build()
            .unwrap()
    }

    #[test]
    fn test_rotate_rejects_sn_zero() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&SEED0), true).unwrap();
        assert!(rotate(
            "DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc",
            &[signer.verfer().qb64()],
            "EO4Z11IVb8w4dUs4cGqYtp53dYKIV8j-mORGJ7wOdSN8",
            0,
            "",
            Kinds::Json,
        )
        .is_err());
    }

    #[test]
    fn test_rotate_witness_cuts_adds() {
        sodiumoxide::init().unwrap();
        let wits: Vec<String> = witness_signers(4)
            .iter()
            .map(|s| s.verfer().qb64())
            .collect();
        let signer = Signer::new(Some(&SEED0), true).unwrap();
        let serder = incept(&[signer.verfer().qb64()], Kinds::Json).unwrap();

        let rot = RotateBuilder::new(
            serder.pre().unwrap(),
            vec![signer.verfer().qb64()],
            serder.said().unwrap(),
            1,
        )
        .with_wits(wits[..3].to_vec())
        .with_cuts(vec![wits[0].clone()])
        .with_adds(vec![wits[3].clone()])
        .build()
        .unwrap();
        assert_eq!(rot.cuts(), vec![wits[0].clone()]);
        assert_eq!(rot.adds(), vec![wits[3].clone()]);
        // new set has three members so default toad is the ample majority
        assert_eq!(rot.toad().unwrap(), 3);

        // cut of an unknown witness is invalid
        assert!(RotateBuilder::new(
            serder.pre().unwrap(),
            vec![signer.verfer().qb64()],
            serder.said().unwrap(),
            1,
        )
        .with_wits(wits[..2].to_vec())
        .with_cuts(vec![wits[3].clone()])
        .build()
        .is_err());

        // add of an existing witness is invalid
        assert!(RotateBuilder::new(
            serder.pre().unwrap(),
            vec![signer.verfer().qb64()],
            serder.said().unwrap(),
            1,
        )
        .with_wits(wits[..2].to_vec())
        .with_adds(vec![wits[1].clone()])
        .build()
        .is_err());
    }
}
