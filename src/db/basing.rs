//! Baser: the aggregate of named sub-databases backing Kevers, Keveries,
//! and the reply store.

use std::sync::{Arc, RwLock};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::cesr::cigar::Cigar;
use crate::cesr::counting::{ctr_dex, Counter};
use crate::cesr::indexing::Siger;
use crate::cesr::prefixer::Prefixer;
use crate::cesr::saider::Saider;
use crate::cesr::seqner::Seqner;
use crate::cesr::verfer::Verfer;
use crate::cesr::Matter;
use crate::db::dbing::{dg_key, split_key_on, Databaser};
use crate::db::koming::Komer;
use crate::db::subing::{DupSuber, IoSetSuber, Suber};
use crate::errors::{KeriError, Result};

/// Location of the latest establishment event within a key state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StateEERecord {
    /// Sequence number, lowercase hex.
    pub s: String,
    /// SAID of the establishment event.
    pub d: String,
    /// Witness cuts of that event.
    pub br: Vec<String>,
    /// Witness adds of that event.
    pub ba: Vec<String>,
}

/// Latest key state snapshot for one prefix, in key state notice field
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStateRecord {
    pub i: String,
    pub s: String,
    pub p: String,
    pub d: String,
    pub f: String,
    pub dt: String,
    pub et: String,
    pub kt: serde_json::Value,
    pub k: Vec<String>,
    pub n: String,
    pub bt: String,
    pub b: Vec<String>,
    pub c: Vec<String>,
    pub ee: StateEERecord,
    pub di: String,
}

/// Service endpoint authorization record at keys (cid, role, eid).
/// `allowed` mirrors the latest add/cut reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EndpointRecord {
    pub allowed: Option<bool>,
    pub name: String,
}

/// Service endpoint location record at keys (eid, scheme). An empty url
/// nullifies the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LocationRecord {
    pub url: String,
}

impl LocationRecord {
    pub fn is_nullified(&self) -> bool {
        self.url.is_empty()
    }
}

/// All named sub-databases over one store handle.
pub struct Baser {
    db: Arc<dyn Databaser>,

    /// Prefixes controlled by the local habitat; set by the embedder.
    prefixes: RwLock<IndexSet<String>>,

    /// Raw event bytes by (prefix, said).
    pub evts: Suber,
    /// Event digest per (prefix, sn), insertion ordered to permit
    /// recovery branches.
    pub kels: IoSetSuber,
    /// Event digest by (prefix, first-seen ordinal).
    pub fels: Suber,
    /// First-seen ordinal by (prefix, said), 32-hex.
    pub fons: Suber,
    /// First-seen or escrow datetime by (prefix, said).
    pub dtss: Suber,
    /// Controller signatures by (prefix, said).
    pub sigs: DupSuber,
    /// Witness indexed signatures by (prefix, said).
    pub wigs: DupSuber,
    /// Non-transferable receipt couples (pre ‖ cigar) by (prefix, said).
    pub rcts: DupSuber,
    /// Transferable receipt quadruples (pre ‖ snu ‖ dig ‖ sig) by
    /// (prefix, said).
    pub vrcs: DupSuber,
    /// Latest key state snapshot by prefix.
    pub states: Komer<KeyStateRecord>,

    /// Out-of-order event escrow: digests at (prefix, sn).
    pub ooes: IoSetSuber,
    /// Partially signed event escrow: digests at (prefix, sn).
    pub pses: IoSetSuber,
    /// Partially witnessed event escrow: digests at (prefix, sn).
    pub pwes: IoSetSuber,
    /// Out-of-order delegation escrow: digests at (prefix, sn).
    pub ldes: IoSetSuber,
    /// Delegation source couples (snu ‖ dig) by (prefix, said).
    pub pdes: Suber,
    /// Unverified non-transferable receipt escrow: (dig ‖ pre ‖ cigar)
    /// triples at (prefix, sn).
    pub ures: IoSetSuber,
    /// Unverified transferable receipt escrow: (dig ‖ spre ‖ snu ‖ sdig ‖
    /// sig) quintuples at (prefix, sn).
    pub vres: IoSetSuber,
    /// Unverified witness receipt escrow: (dig ‖ wig) couples at
    /// (prefix, sn).
    pub uwes: IoSetSuber,
    /// Likely duplicitous event record: digests at (prefix, sn).
    pub dups: IoSetSuber,

    /// Reply message raw bytes by said.
    pub rpys: Suber,
    /// Reply datetime by said.
    pub sdts: Suber,
    /// Reply non-transferable signature couples (verfer ‖ cigar) by said.
    pub scgs: IoSetSuber,
    /// Reply transferable signature quadruples (pre ‖ snu ‖ dig ‖ sig)
    /// by said.
    pub ssgs: IoSetSuber,
    /// Accepted end/role reply said by (cid, role, eid).
    pub eans: Suber,
    /// Accepted loc/scheme reply said by (eid, scheme).
    pub lans: Suber,
    /// Endpoint authorization records by (cid, role, eid).
    pub ends: Komer<EndpointRecord>,
    /// Endpoint location records by (eid, scheme).
    pub locs: Komer<LocationRecord>,
    /// Reply escrow saids by route base.
    pub rpes: IoSetSuber,
}

impl Baser {
    pub fn new(db: Arc<dyn Databaser>) -> Self {
        Baser {
            prefixes: RwLock::new(IndexSet::new()),
            evts: Suber::new(db.clone(), "evts"),
            kels: IoSetSuber::new(db.clone(), "kels"),
            fels: Suber::new(db.clone(), "fels"),
            fons: Suber::new(db.clone(), "fons"),
            dtss: Suber::new(db.clone(), "dtss"),
            sigs: DupSuber::new(db.clone(), "sigs"),
            wigs: DupSuber::new(db.clone(), "wigs"),
            rcts: DupSuber::new(db.clone(), "rcts"),
            vrcs: DupSuber::new(db.clone(), "vrcs"),
            states: Komer::new(db.clone(), "states"),
            ooes: IoSetSuber::new(db.clone(), "ooes"),
            pses: IoSetSuber::new(db.clone(), "pses"),
            pwes: IoSetSuber::new(db.clone(), "pwes"),
            ldes: IoSetSuber::new(db.clone(), "ldes"),
            pdes: Suber::new(db.clone(), "pdes"),
            ures: IoSetSuber::new(db.clone(), "ures"),
            vres: IoSetSuber::new(db.clone(), "vres"),
            uwes: IoSetSuber::new(db.clone(), "uwes"),
            dups: IoSetSuber::new(db.clone(), "dups"),
            rpys: Suber::new(db.clone(), "rpys"),
            sdts: Suber::new(db.clone(), "sdts"),
            scgs: IoSetSuber::new(db.clone(), "scgs"),
            ssgs: IoSetSuber::new(db.clone(), "ssgs"),
            eans: Suber::new(db.clone(), "eans"),
            lans: Suber::new(db.clone(), "lans"),
            ends: Komer::new(db.clone(), "ends"),
            locs: Komer::new(db.clone(), "locs"),
            rpes: IoSetSuber::new(db.clone(), "rpes"),
            db,
        }
    }

    pub fn store(&self) -> Arc<dyn Databaser> {
        self.db.clone()
    }

    /// Registers a locally controlled prefix.
    pub fn add_prefix(&self, pre: &str) {
        self.prefixes
            .write()
            .expect("prefixes lock poisoned")
            .insert(pre.to_string());
    }

    pub fn has_prefix(&self, pre: &str) -> bool {
        self.prefixes
            .read()
            .expect("prefixes lock poisoned")
            .contains(pre)
    }

    /// Digest of the last inserted event at (pre, sn), if any.
    pub fn get_ke_last(&self, key: &[u8]) -> Result<Option<String>> {
        Ok(self
            .kels
            .get_last(key)?
            .map(|d| String::from_utf8_lossy(&d).to_string()))
    }

    /// Raw event bytes at (pre, dig).
    pub fn get_evt(&self, pre: &str, dig: &str) -> Result<Option<Vec<u8>>> {
        self.evts.get(dg_key(pre, dig))
    }

    /// Next dense first-seen ordinal for a prefix.
    pub fn next_fn(&self, pre: &str) -> Result<u64> {
        match self.fels.last(format!("{pre}."))? {
            Some((key, _)) => Ok(split_key_on(&key)?.1 + 1),
            None => Ok(0),
        }
    }

    /// Transferable signature groups stored for a reply said, grouped by
    /// (prefix, sn, establishment said).
    pub fn fetch_tsgs(&self, said: &str) -> Result<Vec<(Prefixer, Seqner, Saider, Vec<Siger>)>> {
        let mut groups: Vec<(Prefixer, Seqner, Saider, Vec<Siger>)> = Vec::new();
        for quad in self.ssgs.get(said.as_bytes())? {
            let text = String::from_utf8_lossy(&quad).to_string();
            let (prefixer, seqner, saider, siger) = parse_quadruple(&text)?;
            match groups.iter_mut().find(|(p, s, d, _)| {
                p.qb64() == prefixer.qb64() && s.sn() == seqner.sn() && d.qb64() == saider.qb64()
            }) {
                Some((_, _, _, sigers)) => sigers.push(siger),
                None => groups.push((prefixer, seqner, saider, vec![siger])),
            }
        }
        Ok(groups)
    }

    /// Signature couples stored for a reply said as (verfer, cigar).
    pub fn fetch_scgs(&self, said: &str) -> Result<Vec<(Verfer, Cigar)>> {
        let mut couples = Vec::new();
        for couple in self.scgs.get(said.as_bytes())? {
            let text = String::from_utf8_lossy(&couple).to_string();
            let (verfer, rest) = extract_verfer(&text)?;
            let cigar = Cigar::from_qb64(rest, Some(verfer.clone()))?;
            couples.push((verfer, cigar));
        }
        Ok(couples)
    }

    /// Reassembles the full message for an accepted event: raw bytes plus
    /// attached signatures and receipts.
    pub fn clone_evt_msg(&self, pre: &str, dig: &str) -> Result<Vec<u8>> {
        let key = dg_key(pre, dig);
        let raw = self
            .evts
            .get(&key)?
            .ok_or_else(|| KeriError::ValueError(format!("missing event for dig = {dig}")))?;
        let mut msg = raw;

        let sigs = self.sigs.get(&key)?;
        if !sigs.is_empty() {
            msg.extend_from_slice(
                &Counter::new(ctr_dex::CONTROLLER_IDX_SIGS, sigs.len() as u64)?.qb64b(),
            );
            for sig in sigs {
                msg.extend_from_slice(&sig);
            }
        }
        let wigs = self.wigs.get(&key)?;
        if !wigs.is_empty() {
            msg.extend_from_slice(
                &Counter::new(ctr_dex::WITNESS_IDX_SIGS, wigs.len() as u64)?.qb64b(),
            );
            for wig in wigs {
                msg.extend_from_slice(&wig);
            }
        }
        let rcts = self.rcts.get(&key)?;
        if !rcts.is_empty() {
            msg.extend_from_slice(
                &Counter::new(ctr_dex::NON_TRANS_RECEIPT_COUPLES, rcts.len() as u64)?.qb64b(),
            );
            for couple in rcts {
                msg.extend_from_slice(&couple);
            }
        }
        Ok(msg)
    }

    /// Replays all accepted event messages for a prefix in first-seen
    /// order.
    pub fn clone_pre_iter(&self, pre: &str) -> Result<Vec<Vec<u8>>> {
        let mut msgs = Vec::new();
        for (_, dig) in self.fels.items(format!("{pre}."))? {
            let dig = String::from_utf8_lossy(&dig).to_string();
            msgs.push(self.clone_evt_msg(pre, &dig)?);
        }
        Ok(msgs)
    }
}

/// Splits a qb64 concatenation of (prefixer, seqner, saider, siger).
fn parse_quadruple(text: &str) -> Result<(Prefixer, Seqner, Saider, Siger)> {
    let (prefixer, rest) = extract_prefixer(text)?;
    let (seqner, size) = Seqner::extract(rest.as_bytes())?;
    let rest = &rest[size..];
    let (_, size) = crate::cesr::BaseMatter::extract(rest.as_bytes())?;
    let saider = Saider::from_qb64(&rest[..size])?;
    let siger = Siger::from_qb64(&rest[size..])?;
    Ok((prefixer, seqner, saider, siger))
}

fn extract_prefixer(text: &str) -> Result<(Prefixer, &str)> {
    let (_, size) = crate::cesr::BaseMatter::extract(text.as_bytes())?;
    let prefixer = Prefixer::from_qb64(&text[..size])?;
    Ok((prefixer, &text[size..]))
}

fn extract_verfer(text: &str) -> Result<(Verfer, &str)> {
    let (_, size) = crate::cesr::BaseMatter::extract(text.as_bytes())?;
    let verfer = Verfer::from_qb64(&text[..size])?;
    Ok((verfer, &text[size..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dbing::{fn_key, sn_key, MemDBer};

    fn baser() -> Baser {
        Baser::new(Arc::new(MemDBer::new("test")))
    }

    #[test]
    fn test_baser_kel_ordering() {
        let db = baser();
        let pre = "DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc";
        db.kels.add(sn_key(pre, 0), b"EdigA").unwrap();
        db.kels.add(sn_key(pre, 0), b"EdigB").unwrap();
        assert_eq!(
            db.get_ke_last(&sn_key(pre, 0)).unwrap().unwrap(),
            "EdigB"
        );
        assert_eq!(db.kels.cnt(sn_key(pre, 0)).unwrap(), 2);
    }

    #[test]
    fn test_baser_next_fn() {
        let db = baser();
        let pre = "DWzw";
        assert_eq!(db.next_fn(pre).unwrap(), 0);
        db.fels.put(fn_key(pre, 0), b"EdigA").unwrap();
        assert_eq!(db.next_fn(pre).unwrap(), 1);
        db.fels.put(fn_key(pre, 1), b"EdigB").unwrap();
        assert_eq!(db.next_fn(pre).unwrap(), 2);
    }

    #[test]
    fn test_baser_reply_signature_fetchers() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let said = "EcBCalw7Oe2ohLDra2ovwlv72PrlQZdQdaoSZ1Vvk5P4";
        let signer = crate::cesr::signer::Signer::new(Some(&[11u8; 32]), true).unwrap();
        let nsigner = crate::cesr::signer::Signer::new(Some(&[12u8; 32]), false).unwrap();

        // one quadruple with two sigers at the same establishment event
        let pre = signer.verfer().qb64();
        for index in [0u32, 1] {
            let siger = signer.sign_indexed(b"reply body", index).unwrap();
            let mut quad = pre.clone().into_bytes();
            quad.extend_from_slice(&Seqner::new(0).qb64b());
            quad.extend_from_slice(said.as_bytes());
            quad.extend_from_slice(&siger.qb64b());
            db.ssgs.add(said.as_bytes(), &quad).unwrap();
        }
        let tsgs = db.fetch_tsgs(said).unwrap();
        assert_eq!(tsgs.len(), 1);
        assert_eq!(tsgs[0].0.qb64(), pre);
        assert_eq!(tsgs[0].3.len(), 2);

        let cigar = nsigner.sign(b"reply body").unwrap();
        let mut couple = nsigner.verfer().qb64b();
        couple.extend_from_slice(&cigar.qb64b());
        db.scgs.add(said.as_bytes(), &couple).unwrap();
        let scgs = db.fetch_scgs(said).unwrap();
        assert_eq!(scgs.len(), 1);
        assert_eq!(scgs[0].0.qb64(), nsigner.verfer().qb64());
        assert_eq!(scgs[0].1.raw(), cigar.raw());
    }

    #[test]
    fn test_baser_prefixes() {
        let db = baser();
        assert!(!db.has_prefix("DWzw"));
        db.add_prefix("DWzw");
        assert!(db.has_prefix("DWzw"));
    }
}
