//! Inception and delegated inception event builders.

use crate::cesr::prefixer::Prefixer;
use crate::cesr::saider::{Saider, DUMMY};
use crate::cesr::tholder::Tholder;
use crate::cesr::verfer::Verfer;
use crate::cesr::{mtr_dex, Matter, DIG_CODES};
use crate::core::eventing::ample;
use crate::core::serdering::{Sad, Sadder, Serder};
use crate::core::{Ilk, Kinds};
use crate::errors::{KeriError, Result};

/// Builder for inception (`icp`) and delegated inception (`dip`) events.
pub struct InceptBuilder {
    keys: Vec<String>,
    sith: Option<Sad>,
    nxt: String,
    toad: Option<u64>,
    wits: Vec<String>,
    cnfg: Vec<String>,
    data: Vec<Sad>,
    code: Option<String>,
    delpre: Option<String>,
    kind: Kinds,
}

impl InceptBuilder {
    pub fn new(keys: Vec<String>) -> Self {
        InceptBuilder {
            keys,
            sith: None,
            nxt: String::new(),
            toad: None,
            wits: Vec::new(),
            cnfg: Vec::new(),
            data: Vec::new(),
            code: None,
            delpre: None,
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

    pub fn with_cnfg(mut self, cnfg: Vec<String>) -> Self {
        self.cnfg = cnfg;
        self
    }

    pub fn with_data(mut self, data: Vec<Sad>) -> Self {
        self.data = data;
        self
    }

    /// Derivation code for the prefix. Defaults to the code of the first
    /// key (basic derivation).
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_delpre(mut self, delpre: &str) -> Self {
        self.delpre = Some(delpre.to_string());
        self
    }

    pub fn with_kind(mut self, kind: Kinds) -> Self {
        self.kind = kind;
        self
    }

    pub fn build(self) -> Result<Serder> {
        if self.keys.is_empty() {
            return Err(KeriError::ValueError("missing inception keys".to_string()));
        }
        let tholder = resolve_tholder(self.sith.as_ref(), self.keys.len())?;
        if self.keys.len() < tholder.size() {
            return Err(KeriError::ValidationError(format!(
                "invalid sith = {} for {} keys",
                tholder.limen(),
                self.keys.len()
            )));
        }

        let mut uniq = self.wits.clone();
        uniq.sort();
        uniq.dedup();
        if uniq.len() != self.wits.len() {
            return Err(KeriError::ValueError("duplicate witnesses".to_string()));
        }
        let toad = resolve_toad(self.toad, self.wits.len())?;

        let code = match &self.code {
            Some(code) => code.clone(),
            None => Verfer::from_qb64(&self.keys[0])?.code().to_string(),
        };
        if self.delpre.is_some() && !DIG_CODES.contains(&code.as_str()) {
            return Err(KeriError::DerivationError(format!(
                "invalid derivation code = {code} for delegated inception"
            )));
        }

        let ilk = if self.delpre.is_some() {
            Ilk::Dip
        } else {
            Ilk::Icp
        };
        let dummy = DUMMY.to_string().repeat(44);
        let mut sad = Sadder::new();
        sad.insert("v".to_string(), Sad::from(""));
        sad.insert("t".to_string(), Sad::from(ilk.as_str()));
        sad.insert("d".to_string(), Sad::String(dummy.clone()));
        sad.insert("i".to_string(), Sad::String(dummy));
        sad.insert("s".to_string(), Sad::from("0"));
        sad.insert("kt".to_string(), Sad::from_json(&tholder.sith()));
        sad.insert("k".to_string(), Sad::from_strings(self.keys.clone()));
        sad.insert("n".to_string(), Sad::from(self.nxt.as_str()));
        sad.insert("bt".to_string(), Sad::String(format!("{toad:x}")));
        sad.insert("b".to_string(), Sad::from_strings(self.wits.clone()));
        sad.insert("c".to_string(), Sad::from_strings(self.cnfg.clone()));
        sad.insert("a".to_string(), Sad::Array(self.data.clone()));
        if let Some(delpre) = &self.delpre {
            sad.insert("di".to_string(), Sad::from(delpre.as_str()));
        }

        let sized = Serder::from_sad(sad, self.kind)?;
        let prefixer = Prefixer::derive(sized.ked(), &code, self.kind)?;
        let mut sad = sized.ked().clone();
        sad.insert("i".to_string(), Sad::from(prefixer.qb64()));
        if prefixer.is_digestive() {
            sad.insert("d".to_string(), Sad::from(prefixer.qb64()));
            Serder::from_sad(sad, self.kind)
        } else {
            let (_, filled) = Saider::saidify(&sad, self.kind, None, "d")?;
            Serder::from_sad(filled, self.kind)
        }
    }
}

/// Inception with defaults: single-key basic derivation, empty next
/// commitment (abandoned), no witnesses.
pub fn incept(keys: &[String], kind: Kinds) -> Result<Serder> {
    InceptBuilder::new(keys.to_vec()).with_kind(kind).build()
}

/// Delegated inception with self-addressing prefix.
pub fn delcept(keys: &[String], delpre: &str, nxt: &str, kind: Kinds) -> Result<Serder> {
    InceptBuilder::new(keys.to_vec())
        .with_delpre(delpre)
        .with_nxt(nxt)
        .with_code(mtr_dex::BLAKE3_256)
        .with_kind(kind)
        .build()
}

/// Resolves an optional `kt` field value to a Tholder, defaulting to a
/// majority of the key count.
pub(crate) fn resolve_tholder(sith: Option<&Sad>, count: usize) -> Result<Tholder> {
    match sith {
        None => Ok(Tholder::from_num(std::cmp::max(1, count.div_ceil(2)) as u64)),
        Some(Sad::String(s)) => Ok(Tholder::from_hex(s)?),
        Some(value @ Sad::Array(items)) => {
            let clauses: Vec<Vec<String>> = if items.iter().all(|i| i.as_str().is_some()) {
                vec![value
                    .to_strings()
                    .ok_or_else(|| KeriError::ValueError("malformed sith".to_string()))?]
            } else {
                items
                    .iter()
                    .map(|clause| {
                        clause
                            .to_strings()
                            .ok_or_else(|| KeriError::ValueError("malformed sith".to_string()))
                    })
                    .collect::<Result<_>>()?
            };
            Ok(Tholder::from_clauses(&clauses)?)
        }
        Some(_) => Err(KeriError::ValueError("malformed sith".to_string())),
    }
}

/// Resolves an optional witness threshold, defaulting to an ample
/// majority of the witness count, and validates its bounds.
pub(crate) fn resolve_toad(toad: Option<u64>, wit_count: usize) -> Result<u64> {
    let toad = match toad {
        Some(t) => t,
        None => {
            if wit_count == 0 {
                0
            } else {
                ample(wit_count as i64, None, true)?
            }
        }
    };
    if wit_count > 0 {
        if toad < 1 || toad > wit_count as u64 {
            return Err(KeriError::ValueError(format!(
                "invalid toad = {toad} for {wit_count} witnesses"
            )));
        }
    } else if toad != 0 {
        return Err(KeriError::ValueError(format!(
            "invalid toad = {toad} with no witnesses"
        )));
    }
    Ok(toad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cesr::nexter::Nexter;
    use crate::cesr::signer::Signer;
    use crate::core::eventing::test_kit::SEED0;

    #[test]
    fn test_incept_nontransferable() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&SEED0), false).unwrap();
        let serder = incept(&[signer.verfer().qb64()], Kinds::Json).unwrap();
        assert_eq!(
            serder.pre().unwrap(),
            "BWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc"
        );
        assert_eq!(serder.ked().get("n").unwrap().as_str().unwrap(), "");
        let keys: Vec<&String> = serder.ked().keys().collect();
        assert_eq!(
            keys,
            ["v", "t", "d", "i", "s", "kt", "k", "n", "bt", "b", "c", "a"]
        );
    }

    #[test]
    fn test_incept_transferable_expected_prefix() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&SEED0), true).unwrap();
        let serder = incept(&[signer.verfer().qb64()], Kinds::Json).unwrap();
        assert_eq!(
            serder.pre().unwrap(),
            "DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc"
        );
        let saider = Saider::from_qb64(serder.said().unwrap()).unwrap();
        assert!(saider.verify(serder.ked(), Kinds::Json, "d"));
    }

    #[test]
    fn test_incept_nontransferable_rejects_nxt_wits_data() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&SEED0), false).unwrap();
        let keys = vec![signer.verfer().qb64()];

        assert!(InceptBuilder::new(keys.clone())
            .with_nxt("EcBCalw7Oe2ohLDra2ovwlv72PrlQZdQdaoSZ1Vvk5P4")
            .build()
            .is_err());
        assert!(InceptBuilder::new(keys.clone())
            .with_wits(vec!["BWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc".to_string()])
            .with_toad(1)
            .build()
            .is_err());
        let mut seal = Sadder::new();
        seal.insert("i".to_string(), Sad::from("ABCDE"));
        assert!(InceptBuilder::new(keys)
            .with_data(vec![Sad::Object(seal)])
            .build()
            .is_err());
    }

    #[test]
    fn test_key_event_sequence_wire_vectors() {
        // exact bytes of the icp/rot/ixn chain for the fixed seeds
        sodiumoxide::init().unwrap();
        use crate::core::eventing::test_kit::{SEED1, SEED2};
        use crate::core::eventing::{interact, rotate};

        let signer0 = Signer::new(Some(&SEED0), true).unwrap();
        let signer1 = Signer::new(Some(&SEED1), true).unwrap();
        let signer2 = Signer::new(Some(&SEED2), true).unwrap();

        let nxt1 = Nexter::new(None, &[signer1.verfer().qb64()]).unwrap();
        let serder0 = InceptBuilder::new(vec![signer0.verfer().qb64()])
            .with_nxt(&nxt1.qb64())
            .build()
            .unwrap();
        assert_eq!(
            serder0.raw(),
            &br#"{"v":"KERI10JSON000120_","t":"icp","d":"EO4Z11IVb8w4dUs4cGqYtp53dYKIV8j-mORGJ7wOdSN8","i":"DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc","s":"0","kt":"1","k":["DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc"],"n":"EcBCalw7Oe2ohLDra2ovwlv72PrlQZdQdaoSZ1Vvk5P4","bt":"0","b":[],"c":[],"a":[]}"#[..]
        );

        let nxt2 = Nexter::new(None, &[signer2.verfer().qb64()]).unwrap();
        assert_eq!(nxt2.qb64(), "EAXTvbATMnVRGjyC_VCNuXcPTxxpLanfzj14u3QMsD_U");
        let serder1 = rotate(
            serder0.pre().unwrap(),
            &[signer1.verfer().qb64()],
            serder0.said().unwrap(),
            1,
            &nxt2.qb64(),
            Kinds::Json,
        )
        .unwrap();
        assert_eq!(
            serder1.raw(),
            &br#"{"v":"KERI10JSON000155_","t":"rot","d":"EAntLipNnDDcGAJfGz9TStcJ8M19YLji3LPNVpXalwv4","i":"DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc","s":"1","p":"EO4Z11IVb8w4dUs4cGqYtp53dYKIV8j-mORGJ7wOdSN8","kt":"1","k":["DHgZa-u7veNZkqk2AxCnxrINGKfQ0bRiaf9FdA_-_49A"],"n":"EAXTvbATMnVRGjyC_VCNuXcPTxxpLanfzj14u3QMsD_U","bt":"0","br":[],"ba":[],"a":[]}"#[..]
        );

        let serder2 = interact(
            serder0.pre().unwrap(),
            serder1.said().unwrap(),
            2,
            vec![],
            Kinds::Json,
        )
        .unwrap();
        assert_eq!(
            serder2.raw(),
            &br#"{"v":"KERI10JSON0000cb_","t":"ixn","d":"E4hrx06bab0CN3rZoT-9NMtidfOH8PnIP0IvqsuUQOZ0","i":"DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc","s":"2","p":"EAntLipNnDDcGAJfGz9TStcJ8M19YLji3LPNVpXalwv4","a":[]}"#[..]
        );
    }

    #[test]
    fn test_incept_self_addressing_i_equals_d() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&SEED0), true).unwrap();
        let next = Signer::new(Some(&[0x83u8; 32]), true).unwrap();
        let nexter = Nexter::new(None, &[next.verfer().qb64()]).unwrap();
        let serder = InceptBuilder::new(vec![signer.verfer().qb64()])
            .with_nxt(&nexter.qb64())
            .with_code(mtr_dex::BLAKE3_256)
            .build()
            .unwrap();
        assert_eq!(serder.pre(), serder.said());
        let prefixer = Prefixer::from_qb64(serder.pre().unwrap()).unwrap();
        assert!(prefixer.verify(serder.ked(), Kinds::Json, true));
    }

    #[test]
    fn test_delcept() {
        sodiumoxide::init().unwrap();
        let signer = Signer::new(Some(&[0x83u8; 32]), true).unwrap();
        let delpre = "ENdHxtdjCQUM-TVO8CgJAKb8ykXsFe4u9epTUQFCL7Yd";
        let serder = delcept(
            &[signer.verfer().qb64()],
            delpre,
            "EcBCalw7Oe2ohLDra2ovwlv72PrlQZdQdaoSZ1Vvk5P4",
            Kinds::Json,
        )
        .unwrap();
        assert_eq!(serder.ilk().unwrap(), Ilk::Dip);
        assert_eq!(serder.delpre().unwrap(), delpre);
        assert_eq!(serder.pre(), serder.said());
        let keys: Vec<&String> = serder.ked().keys().collect();
        assert_eq!(
            keys,
            ["v", "t", "d", "i", "s", "kt", "k", "n", "bt", "b", "c", "a", "di"]
        );
    }
}
