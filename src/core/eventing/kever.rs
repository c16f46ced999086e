//! Kever: per-identifier key event verifier and state machine.
//!
//! A Kever is created by processing an inception event and advanced only
//! by `update`. Validation is completed before the first store write, so
//! a rejected event leaves both the in-memory state and the store
//! untouched.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cesr::dater::Dater;
use crate::cesr::indexing::Siger;
use crate::cesr::nexter::Nexter;
use crate::cesr::prefixer::Prefixer;
use crate::cesr::saider::Saider;
use crate::cesr::seqner::Seqner;
use crate::cesr::tholder::Tholder;
use crate::cesr::verfer::Verfer;
use crate::cesr::{BaseMatter, Matter};
use crate::core::eventing::incept::resolve_toad;
use crate::core::eventing::rotate::apply_cuts_adds;
use crate::core::eventing::{trait_dex, verify_sigs};
use crate::core::serdering::{Sad, Serder};
use crate::core::Ilk;
use crate::db::basing::{Baser, KeyStateRecord, StateEERecord};
use crate::db::dbing::{dg_key, fn_key, sn_key};
use crate::errors::{KeriError, Result};

/// Location of the latest establishment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastEstLoc {
    pub s: u64,
    pub d: String,
}

/// Current verified key state for one identifier prefix.
pub struct Kever {
    pub db: Arc<Baser>,
    pub prefixer: Prefixer,
    pub sn: u64,
    pub fner: Option<u64>,
    pub dater: Option<Dater>,
    /// Last accepted event.
    pub serder: Serder,
    pub ilk: Ilk,
    pub verfers: Vec<Verfer>,
    pub tholder: Tholder,
    /// Commitment to next keys; None once abandoned.
    pub nexter: Option<Nexter>,
    pub toad: u64,
    pub wits: Vec<String>,
    pub cuts: Vec<String>,
    pub adds: Vec<String>,
    pub est_only: bool,
    pub do_not_delegate: bool,
    pub delegated: bool,
    pub delpre: Option<String>,
    pub last_est: LastEstLoc,
}

impl Kever {
    /// Creates a Kever by validating and accepting an inception event.
    pub fn incept(
        db: Arc<Baser>,
        serder: &Serder,
        sigers: Vec<Siger>,
        wigers: Vec<Siger>,
        delseqner: Option<Seqner>,
        delsaider: Option<Saider>,
    ) -> Result<Self> {
        let ilk = serder.ilk()?;
        if !matches!(ilk, Ilk::Icp | Ilk::Dip) {
            return Err(KeriError::ValidationError(format!(
                "unexpected ilk = {ilk} for inception"
            )));
        }
        let sn = serder.sn()?;
        if sn != 0 {
            return Err(KeriError::ValidationError(format!(
                "invalid sn = {sn} for inception event"
            )));
        }
        let pre = serder
            .pre()
            .ok_or_else(|| KeriError::ValueError("missing i field".to_string()))?
            .to_string();
        let said = serder
            .said()
            .ok_or_else(|| KeriError::ValueError("missing d field".to_string()))?
            .to_string();

        let prefixer = Prefixer::from_qb64(&pre)?;
        if !prefixer.verify(serder.ked(), serder.kind(), true) {
            return Err(KeriError::DerivationError(format!(
                "invalid prefix derivation for pre = {pre}"
            )));
        }

        let verfers = serder.verfers()?;
        let tholder = serder
            .tholder()?
            .ok_or_else(|| KeriError::ValidationError("missing kt field".to_string()))?;
        if verfers.len() < tholder.size() {
            return Err(KeriError::ValidationError(format!(
                "invalid sith = {} for {} keys",
                tholder.limen(),
                verfers.len()
            )));
        }
        let nexter = serder.nexter()?;

        let wits = serder.backs();
        let mut uniq = wits.clone();
        uniq.sort();
        uniq.dedup();
        if uniq.len() != wits.len() {
            return Err(KeriError::ValidationError("duplicate witnesses".to_string()));
        }
        let toad = resolve_toad(Some(serder.toad()?), wits.len())?;

        if !prefixer.is_transferable() {
            if nexter.is_some() || !wits.is_empty() {
                return Err(KeriError::DerivationError(
                    "non-transferable prefix with next keys or witnesses".to_string(),
                ));
            }
            if let Some(Sad::Array(data)) = serder.data() {
                if !data.is_empty() {
                    return Err(KeriError::DerivationError(
                        "non-transferable prefix with anchored data".to_string(),
                    ));
                }
            }
        }

        let traits = serder.traits();
        let est_only = traits.iter().any(|t| t == trait_dex::EST_ONLY);
        let do_not_delegate = traits.iter().any(|t| t == trait_dex::DO_NOT_DELEGATE);

        let delegated = ilk == Ilk::Dip;
        let delpre = serder.delpre().map(|d| d.to_string());
        if delegated && delpre.is_none() {
            return Err(KeriError::ValidationError(
                "missing di field for delegated inception".to_string(),
            ));
        }

        let kever = Kever {
            db,
            prefixer,
            sn,
            fner: None,
            dater: None,
            serder: serder.clone(),
            ilk,
            verfers,
            tholder,
            nexter,
            toad,
            wits,
            cuts: Vec::new(),
            adds: Vec::new(),
            est_only,
            do_not_delegate,
            delegated,
            delpre,
            last_est: LastEstLoc { s: sn, d: said },
        };

        let (sigers, wigers, couple) = kever.val_sigs_wigs_del(
            serder,
            sigers,
            wigers,
            &kever.verfers,
            &kever.tholder,
            kever.toad,
            &kever.wits,
            delseqner,
            delsaider,
        )?;

        let mut kever = kever;
        let (fn_, dts) = kever.log_event(serder, &sigers, &wigers, true, couple.as_ref())?;
        kever.fner = fn_;
        kever.dater = Some(dts);
        kever
            .db
            .states
            .pin(kever.prefixer.qb64().as_bytes(), &kever.state())?;
        Ok(kever)
    }

    /// Restores a Kever from a persisted key state record.
    pub fn reload(db: Arc<Baser>, state: &KeyStateRecord) -> Result<Self> {
        let raw = db
            .get_evt(&state.i, &state.d)?
            .ok_or_else(|| KeriError::ValueError(format!("missing event for dig = {}", state.d)))?;
        let serder = Serder::from_raw(&raw)?;
        let tholder = match &state.kt {
            serde_json::Value::String(s) => Tholder::from_hex(s)?,
            value => {
                let sad = Sad::from_json(value);
                crate::core::eventing::incept::resolve_tholder(Some(&sad), state.k.len())?
            }
        };
        Ok(Kever {
            db,
            prefixer: Prefixer::from_qb64(&state.i)?,
            sn: u64::from_str_radix(&state.s, 16)
                .map_err(|_| KeriError::ValueError(format!("invalid state sn = {}", state.s)))?,
            fner: u64::from_str_radix(&state.f, 16).ok(),
            dater: Dater::from_dts(&state.dt).ok(),
            ilk: serder.ilk()?,
            verfers: state
                .k
                .iter()
                .map(|k| Verfer::from_qb64(k).map_err(KeriError::from))
                .collect::<Result<_>>()?,
            tholder,
            nexter: if state.n.is_empty() {
                None
            } else {
                Some(Nexter::from_qb64(&state.n)?)
            },
            toad: u64::from_str_radix(&state.bt, 16)
                .map_err(|_| KeriError::ValueError(format!("invalid state toad = {}", state.bt)))?,
            wits: state.b.clone(),
            cuts: state.ee.br.clone(),
            adds: state.ee.ba.clone(),
            est_only: state.c.iter().any(|t| t == trait_dex::EST_ONLY),
            do_not_delegate: state.c.iter().any(|t| t == trait_dex::DO_NOT_DELEGATE),
            delegated: !state.di.is_empty(),
            delpre: if state.di.is_empty() {
                None
            } else {
                Some(state.di.clone())
            },
            last_est: LastEstLoc {
                s: u64::from_str_radix(&state.ee.s, 16).map_err(|_| {
                    KeriError::ValueError(format!("invalid est sn = {}", state.ee.s))
                })?,
                d: state.ee.d.clone(),
            },
            serder,
        })
    }

    /// True unless the identifier is non-transferable or abandoned.
    pub fn transferable(&self) -> bool {
        self.prefixer.is_transferable() && self.nexter.is_some()
    }

    fn locally_owned(&self) -> bool {
        self.db.has_prefix(&self.prefixer.qb64())
    }

    /// Applies a rotation or interaction event to the key state.
    pub fn update(
        &mut self,
        serder: &Serder,
        sigers: Vec<Siger>,
        wigers: Vec<Siger>,
        delseqner: Option<Seqner>,
        delsaider: Option<Saider>,
    ) -> Result<()> {
        if !self.transferable() {
            return Err(KeriError::ValidationError(format!(
                "identifier {} is non-transferable or abandoned",
                self.prefixer.qb64()
            )));
        }
        if serder.pre() != Some(&self.prefixer.qb64()) {
            return Err(KeriError::ValidationError(format!(
                "mismatch event pre = {:?} expecting = {}",
                serder.pre(),
                self.prefixer.qb64()
            )));
        }
        let sn = serder.sn()?;
        let ilk = serder.ilk()?;
        let said = serder
            .said()
            .ok_or_else(|| KeriError::ValueError("missing d field".to_string()))?
            .to_string();

        if matches!(ilk, Ilk::Rot | Ilk::Drt) {
            if self.delegated && ilk != Ilk::Drt {
                return Err(KeriError::ValidationError(format!(
                    "non-delegated rotation on delegated pre = {}",
                    self.prefixer.qb64()
                )));
            }
            if !self.delegated && ilk == Ilk::Drt {
                return Err(KeriError::ValidationError(format!(
                    "delegated rotation on non-delegated pre = {}",
                    self.prefixer.qb64()
                )));
            }
            let recovering = sn <= self.sn;
            let (tholder, toad, wits, cuts, adds) = self.rotate(serder)?;
            let verfers = serder.verfers()?;
            let (sigers, wigers, couple) = self.val_sigs_wigs_del(
                serder,
                sigers,
                wigers,
                &verfers,
                &tholder,
                toad,
                &wits,
                delseqner,
                delsaider,
            )?;

            let (fn_, dts) = self.log_event(serder, &sigers, &wigers, true, couple.as_ref())?;
            if recovering {
                self.mark_superseded(sn, &said)?;
            }

            self.sn = sn;
            self.serder = serder.clone();
            self.ilk = ilk;
            self.tholder = tholder;
            self.verfers = verfers;
            self.nexter = serder.nexter()?;
            self.toad = toad;
            self.wits = wits;
            self.cuts = cuts;
            self.adds = adds;
            self.last_est = LastEstLoc { s: sn, d: said };
            self.fner = fn_;
            self.dater = Some(dts);
            self.db
                .states
                .pin(self.prefixer.qb64().as_bytes(), &self.state())?;
        } else if ilk == Ilk::Ixn {
            if self.est_only {
                return Err(KeriError::ValidationError(format!(
                    "unexpected non-establishment event for est-only pre = {}",
                    self.prefixer.qb64()
                )));
            }
            if sn != self.sn + 1 {
                return Err(KeriError::ValidationError(format!(
                    "invalid sn = {sn} expecting = {}",
                    self.sn + 1
                )));
            }
            if serder.prior() != self.serder.said() {
                return Err(KeriError::ValidationError(format!(
                    "mismatch event prior = {:?} with state dig = {:?}",
                    serder.prior(),
                    self.serder.said()
                )));
            }
            let verfers = self.verfers.clone();
            let tholder = self.tholder.clone();
            let toad = self.toad;
            let wits = self.wits.clone();
            let (sigers, wigers, _) = self.val_sigs_wigs_del(
                serder, sigers, wigers, &verfers, &tholder, toad, &wits, None, None,
            )?;

            let (fn_, dts) = self.log_event(serder, &sigers, &wigers, true, None)?;
            self.sn = sn;
            self.serder = serder.clone();
            self.ilk = ilk;
            self.fner = fn_;
            self.dater = Some(dts);
            self.db
                .states
                .pin(self.prefixer.qb64().as_bytes(), &self.state())?;
        } else {
            return Err(KeriError::ValidationError(format!(
                "unsupported ilk = {ilk} for update"
            )));
        }
        Ok(())
    }

    /// Validates a provisional rotation, including superseding recovery,
    /// returning the new (tholder, toad, wits, cuts, adds).
    fn rotate(&self, serder: &Serder) -> Result<(Tholder, u64, Vec<String>, Vec<String>, Vec<String>)> {
        let sn = serder.sn()?;
        let ilk = serder.ilk()?;
        let pre = self.prefixer.qb64();
        let prior = serder
            .prior()
            .ok_or_else(|| KeriError::ValueError("missing p field".to_string()))?;

        if sn > self.sn + 1 {
            return Err(KeriError::ValidationError(format!(
                "out of order rotation sn = {sn} expecting = {}",
                self.sn + 1
            )));
        } else if sn <= self.sn {
            // superseding recovery
            if (ilk == Ilk::Rot && sn <= self.last_est.s)
                || (ilk == Ilk::Drt && sn < self.last_est.s)
            {
                return Err(KeriError::ValidationError(format!(
                    "stale rotation sn = {sn} at or before last est sn = {}",
                    self.last_est.s
                )));
            }
            if ilk == Ilk::Rot && self.ilk != Ilk::Ixn {
                return Err(KeriError::ValidationError(
                    "recovery rotation may only supersede an interaction tail".to_string(),
                ));
            }
            let psn = sn - 1;
            let pdig = self
                .db
                .get_ke_last(&sn_key(&pre, psn))?
                .ok_or_else(|| {
                    KeriError::ValidationError(format!(
                        "invalid recovery: no event at sn = {psn}"
                    ))
                })?;
            let praw = self.db.get_evt(&pre, &pdig)?.ok_or_else(|| {
                KeriError::ValidationError(format!("invalid recovery: missing event dig = {pdig}"))
            })?;
            let pserder = Serder::from_raw(&praw)?;
            if Some(prior) != pserder.said() {
                return Err(KeriError::ValidationError(format!(
                    "invalid recovery: mismatch prior = {prior} with event at sn = {psn}"
                )));
            }
        } else if serder.prior() != self.serder.said() {
            return Err(KeriError::ValidationError(format!(
                "mismatch event prior = {prior:?} with state dig = {:?}",
                self.serder.said()
            )));
        }

        let nexter = self.nexter.as_ref().ok_or_else(|| {
            KeriError::ValidationError(format!("rotation of abandoned pre = {pre}"))
        })?;
        let tholder = serder
            .tholder()?
            .ok_or_else(|| KeriError::ValidationError("missing kt field".to_string()))?;
        let keys = serder.keys();
        if keys.len() < tholder.size() {
            return Err(KeriError::ValidationError(format!(
                "invalid sith = {} for {} keys",
                tholder.limen(),
                keys.len()
            )));
        }
        // the exposed keys and threshold must match the prior commitment
        if !nexter.verify(Some(&tholder.limen()), &keys)? {
            return Err(KeriError::ValidationError(format!(
                "mismatch of rotation keys with prior next commitment for pre = {pre}"
            )));
        }

        let cuts = serder.cuts();
        let adds = serder.adds();
        let wits = apply_cuts_adds(&self.wits, &cuts, &adds)?;
        let toad = resolve_toad(Some(serder.toad()?), wits.len())?;
        Ok((tholder, toad, wits, cuts, adds))
    }

    /// Verifies controller signatures, delegation anchoring, and witness
    /// attestation, escrowing on any shortfall.
    #[allow(clippy::too_many_arguments)]
    fn val_sigs_wigs_del(
        &self,
        serder: &Serder,
        sigers: Vec<Siger>,
        wigers: Vec<Siger>,
        verfers: &[Verfer],
        tholder: &Tholder,
        toad: u64,
        wits: &[String],
        delseqner: Option<Seqner>,
        delsaider: Option<Saider>,
    ) -> Result<(Vec<Siger>, Vec<Siger>, Option<(Seqner, Saider)>)> {
        let (sigers, indices) = verify_sigs(serder.raw(), sigers, verfers)?;
        if !tholder.satisfy(&indices) {
            self.escrow_ps_event(serder, &sigers, &wigers, delseqner.as_ref(), delsaider.as_ref())?;
            return Err(KeriError::MissingSignatureError(format!(
                "threshold {} not met with indices {indices:?} for evt = {}",
                tholder.limen(),
                serder.said().unwrap_or_default()
            )));
        }

        let couple = if matches!(serder.ilk()?, Ilk::Dip | Ilk::Drt) {
            Some(self.validate_delegation(serder, &sigers, delseqner, delsaider)?)
        } else {
            None
        };

        // witness indexed signatures verify against the witness prefixes
        let wit_verfers: Vec<Verfer> = wits
            .iter()
            .map(|w| Verfer::from_qb64(w).map_err(KeriError::from))
            .collect::<Result<_>>()?;
        let (wigers, _windices) = verify_sigs(serder.raw(), wigers, &wit_verfers)?;

        if !wits.is_empty() && !self.locally_owned() {
            let attested = self.wit_attestations(serder, wits, &wigers)?;
            if (attested as u64) < toad {
                self.escrow_pw_event(serder, &sigers, &wigers)?;
                return Err(KeriError::MissingWitnessSignatureError(format!(
                    "toad = {toad} not met with {attested} witness attestations for evt = {}",
                    serder.said().unwrap_or_default()
                )));
            }
        }
        Ok((sigers, wigers, couple))
    }

    /// Counts distinct witness attestations: attached witness indexed
    /// signatures plus already stored witness signatures and receipt
    /// couples from witnesses.
    fn wit_attestations(
        &self,
        serder: &Serder,
        wits: &[String],
        wigers: &[Siger],
    ) -> Result<usize> {
        let said = serder.said().unwrap_or_default();
        let dgkey = dg_key(serder.pre().unwrap_or_default(), said);
        let mut attested: Vec<String> = Vec::new();
        for wiger in wigers {
            let index = wiger.index() as usize;
            if index < wits.len() && !attested.contains(&wits[index]) {
                attested.push(wits[index].clone());
            }
        }
        for wig in self.db.wigs.get(&dgkey)? {
            if let Ok(siger) = Siger::from_qb64(&String::from_utf8_lossy(&wig)) {
                let index = siger.index() as usize;
                if index < wits.len() && !attested.contains(&wits[index]) {
                    attested.push(wits[index].clone());
                }
            }
        }
        for couple in self.db.rcts.get(&dgkey)? {
            let text = String::from_utf8_lossy(&couple).to_string();
            if let Ok((_, size)) = BaseMatter::extract(text.as_bytes()) {
                let rpre = text[..size].to_string();
                if wits.contains(&rpre) && !attested.contains(&rpre) {
                    attested.push(rpre);
                }
            }
        }
        Ok(attested.len())
    }

    /// Requires the delegation seal of this event to be anchored in the
    /// delegator's KEL. Escrows as out-of-order delegation when the
    /// anchor is not yet seen.
    fn validate_delegation(
        &self,
        serder: &Serder,
        sigers: &[Siger],
        delseqner: Option<Seqner>,
        delsaider: Option<Saider>,
    ) -> Result<(Seqner, Saider)> {
        let delpre = self
            .delpre
            .clone()
            .ok_or_else(|| KeriError::ValidationError("missing delegator prefix".to_string()))?;

        if let Some(state) = self.db.states.get(delpre.as_bytes())? {
            if state.c.iter().any(|t| t == trait_dex::DO_NOT_DELEGATE) {
                return Err(KeriError::ValidationError(format!(
                    "delegator {delpre} does not delegate"
                )));
            }
        }

        let (seqner, saider) = match (delseqner, delsaider) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                // fall back to a previously escrowed source couple
                let dgkey = dg_key(
                    serder.pre().unwrap_or_default(),
                    serder.said().unwrap_or_default(),
                );
                match self.db.pdes.get(&dgkey)? {
                    Some(couple) => {
                        let text = String::from_utf8_lossy(&couple).to_string();
                        let (seqner, size) = Seqner::extract(text.as_bytes())?;
                        let saider = Saider::from_qb64(&text[size..])?;
                        (seqner, saider)
                    }
                    None => {
                        self.escrow_delegable_event(serder, sigers, None)?;
                        return Err(KeriError::MissingDelegationError(format!(
                            "missing delegation source couple for evt = {}",
                            serder.said().unwrap_or_default()
                        )));
                    }
                }
            }
        };

        let ddig = self.db.get_ke_last(&sn_key(&delpre, seqner.sn()))?;
        let ddig = match ddig {
            Some(d) => d,
            None => {
                self.escrow_delegable_event(serder, sigers, Some((&seqner, &saider)))?;
                return Err(KeriError::MissingDelegationError(format!(
                    "delegation anchor at sn = {} not yet in KEL of {delpre}",
                    seqner.sn()
                )));
            }
        };
        if ddig != saider.qb64() {
            return Err(KeriError::ValidationError(format!(
                "mismatch delegation source dig = {} with delegator event = {ddig}",
                saider.qb64()
            )));
        }
        let draw = self.db.get_evt(&delpre, &ddig)?.ok_or_else(|| {
            KeriError::ValidationError(format!("missing delegator event dig = {ddig}"))
        })?;
        let dserder = Serder::from_raw(&draw)?;

        let snh = format!("{:x}", serder.sn()?);
        let said = serder.said().unwrap_or_default();
        let pre = serder.pre().unwrap_or_default();
        let anchored = dserder
            .data()
            .and_then(Sad::as_array)
            .map(|seals| {
                seals.iter().any(|seal| {
                    seal.as_object().is_some_and(|o| {
                        o.get("i").and_then(Sad::as_str) == Some(pre)
                            && o.get("s").and_then(Sad::as_str) == Some(snh.as_str())
                            && o.get("d").and_then(Sad::as_str) == Some(said)
                    })
                })
            })
            .unwrap_or(false);
        if !anchored {
            self.escrow_delegable_event(serder, sigers, Some((&seqner, &saider)))?;
            return Err(KeriError::MissingDelegationError(format!(
                "no seal for evt = {said} in delegator event = {ddig}"
            )));
        }
        Ok((seqner, saider))
    }

    /// Persists an accepted (or additionally attested) event. When
    /// `first`, also appends to the first-seen log and the KEL.
    pub fn log_event(
        &self,
        serder: &Serder,
        sigers: &[Siger],
        wigers: &[Siger],
        first: bool,
        couple: Option<&(Seqner, Saider)>,
    ) -> Result<(Option<u64>, Dater)> {
        let pre = serder
            .pre()
            .ok_or_else(|| KeriError::ValueError("missing i field".to_string()))?;
        let said = serder
            .said()
            .ok_or_else(|| KeriError::ValueError("missing d field".to_string()))?;
        let dgkey = dg_key(pre, said);
        let dater = Dater::now();

        self.db.dtss.put(&dgkey, dater.dts().as_bytes())?;
        for siger in sigers {
            self.db.sigs.add(&dgkey, &siger.qb64b())?;
        }
        for wiger in wigers {
            self.db.wigs.add(&dgkey, &wiger.qb64b())?;
        }
        if let Some((seqner, saider)) = couple {
            let mut val = seqner.qb64b();
            val.extend_from_slice(&saider.qb64b());
            self.db.pdes.pin(&dgkey, &val)?;
        }
        self.db.evts.put(&dgkey, serder.raw())?;

        if first {
            let fn_ = self.db.next_fn(pre)?;
            self.db.fels.put(fn_key(pre, fn_), said.as_bytes())?;
            self.db.fons.pin(&dgkey, format!("{fn_:032x}").as_bytes())?;
            self.db.kels.add(sn_key(pre, serder.sn()?), said.as_bytes())?;
            info!(pre, sn = serder.sn()?, said, fn_, "accepted key event");
            return Ok((Some(fn_), dater));
        }
        debug!(pre, said, "logged additional event material");
        Ok((None, dater))
    }

    /// Records superseded first-seen events at and after the recovery
    /// point as likely duplicitous. First-seen entries are never removed.
    fn mark_superseded(&self, sn: u64, said: &str) -> Result<()> {
        let pre = self.prefixer.qb64();
        for psn in sn..=self.sn {
            for dig in self.db.kels.get(sn_key(&pre, psn))? {
                let dig = String::from_utf8_lossy(&dig).to_string();
                if dig != said {
                    self.db.dups.add(sn_key(&pre, psn), dig.as_bytes())?;
                    info!(%pre, sn = psn, %dig, "superseded event marked likely duplicitous");
                }
            }
        }
        Ok(())
    }

    fn escrow_ps_event(
        &self,
        serder: &Serder,
        sigers: &[Siger],
        wigers: &[Siger],
        delseqner: Option<&Seqner>,
        delsaider: Option<&Saider>,
    ) -> Result<()> {
        let pre = serder.pre().unwrap_or_default();
        let said = serder.said().unwrap_or_default();
        let dgkey = dg_key(pre, said);
        self.db.dtss.put(&dgkey, crate::help::now_iso8601().as_bytes())?;
        for siger in sigers {
            self.db.sigs.add(&dgkey, &siger.qb64b())?;
        }
        for wiger in wigers {
            self.db.wigs.add(&dgkey, &wiger.qb64b())?;
        }
        if let (Some(seqner), Some(saider)) = (delseqner, delsaider) {
            let mut val = seqner.qb64b();
            val.extend_from_slice(&saider.qb64b());
            self.db.pdes.pin(&dgkey, &val)?;
        }
        self.db.evts.put(&dgkey, serder.raw())?;
        self.db.pses.add(sn_key(pre, serder.sn()?), said.as_bytes())?;
        debug!(pre, said, "escrowed partially signed event");
        Ok(())
    }

    fn escrow_pw_event(&self, serder: &Serder, sigers: &[Siger], wigers: &[Siger]) -> Result<()> {
        let pre = serder.pre().unwrap_or_default();
        let said = serder.said().unwrap_or_default();
        let dgkey = dg_key(pre, said);
        self.db.dtss.put(&dgkey, crate::help::now_iso8601().as_bytes())?;
        for siger in sigers {
            self.db.sigs.add(&dgkey, &siger.qb64b())?;
        }
        for wiger in wigers {
            self.db.wigs.add(&dgkey, &wiger.qb64b())?;
        }
        self.db.evts.put(&dgkey, serder.raw())?;
        self.db.pwes.add(sn_key(pre, serder.sn()?), said.as_bytes())?;
        debug!(pre, said, "escrowed partially witnessed event");
        Ok(())
    }

    fn escrow_delegable_event(
        &self,
        serder: &Serder,
        sigers: &[Siger],
        couple: Option<(&Seqner, &Saider)>,
    ) -> Result<()> {
        let pre = serder.pre().unwrap_or_default();
        let said = serder.said().unwrap_or_default();
        let dgkey = dg_key(pre, said);
        self.db.dtss.put(&dgkey, crate::help::now_iso8601().as_bytes())?;
        for siger in sigers {
            self.db.sigs.add(&dgkey, &siger.qb64b())?;
        }
        if let Some((seqner, saider)) = couple {
            let mut val = seqner.qb64b();
            val.extend_from_slice(&saider.qb64b());
            self.db.pdes.pin(&dgkey, &val)?;
        }
        self.db.evts.put(&dgkey, serder.raw())?;
        self.db.ldes.add(sn_key(pre, serder.sn()?), said.as_bytes())?;
        debug!(pre, said, "escrowed out-of-order delegation");
        Ok(())
    }

    /// The current key state as a record for persistence and key state
    /// notices.
    pub fn state(&self) -> KeyStateRecord {
        KeyStateRecord {
            i: self.prefixer.qb64(),
            s: format!("{:x}", self.sn),
            p: self.serder.prior().unwrap_or_default().to_string(),
            d: self.serder.said().unwrap_or_default().to_string(),
            f: format!("{:x}", self.fner.unwrap_or(0)),
            dt: self
                .dater
                .as_ref()
                .map(|d| d.dts())
                .unwrap_or_else(crate::help::now_iso8601),
            et: self.ilk.as_str().to_string(),
            kt: self.tholder.sith(),
            k: self.verfers.iter().map(|v| v.qb64()).collect(),
            n: self
                .nexter
                .as_ref()
                .map(|n| n.qb64())
                .unwrap_or_default(),
            bt: format!("{:x}", self.toad),
            b: self.wits.clone(),
            c: {
                let mut c = Vec::new();
                if self.est_only {
                    c.push(trait_dex::EST_ONLY.to_string());
                }
                if self.do_not_delegate {
                    c.push(trait_dex::DO_NOT_DELEGATE.to_string());
                }
                c
            },
            ee: StateEERecord {
                s: format!("{:x}", self.last_est.s),
                d: self.last_est.d.clone(),
                br: self.cuts.clone(),
                ba: self.adds.clone(),
            },
            di: self.delpre.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cesr::nexter::Nexter;
    use crate::cesr::signer::Signer;
    use crate::core::eventing::incept::InceptBuilder;
    use crate::core::eventing::test_kit::{SEED0, SEED1, SEED2};
    use crate::core::eventing::{interact, rotate};
    use crate::core::Kinds;
    use crate::db::dbing::MemDBer;

    fn baser() -> Arc<Baser> {
        Arc::new(Baser::new(Arc::new(MemDBer::new("test"))))
    }

    fn sign(serder: &Serder, signer: &Signer, index: u32) -> Siger {
        signer.sign_indexed(serder.raw(), index).unwrap()
    }

    #[test]
    fn test_kever_incept_rotate_interact() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let signer0 = Signer::new(Some(&SEED0), true).unwrap();
        let signer1 = Signer::new(Some(&SEED1), true).unwrap();
        let signer2 = Signer::new(Some(&SEED2), true).unwrap();

        let nxt1 = Nexter::new(None, &[signer1.verfer().qb64()]).unwrap();
        let serder0 = InceptBuilder::new(vec![signer0.verfer().qb64()])
            .with_nxt(&nxt1.qb64())
            .build()
            .unwrap();
        assert_eq!(
            serder0.pre().unwrap(),
            "DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc"
        );

        let mut kever = Kever::incept(
            db.clone(),
            &serder0,
            vec![sign(&serder0, &signer0, 0)],
            vec![],
            None,
            None,
        )
        .unwrap();
        assert_eq!(kever.sn, 0);
        assert_eq!(kever.fner, Some(0));
        assert_eq!(kever.last_est.s, 0);
        assert!(kever.transferable());

        // rotation to signer1 committing to signer2
        let nxt2 = Nexter::new(None, &[signer2.verfer().qb64()]).unwrap();
        let serder1 = rotate(
            &kever.prefixer.qb64(),
            &[signer1.verfer().qb64()],
            serder0.said().unwrap(),
            1,
            &nxt2.qb64(),
            Kinds::Json,
        )
        .unwrap();
        kever
            .update(&serder1, vec![sign(&serder1, &signer1, 0)], vec![], None, None)
            .unwrap();
        assert_eq!(kever.sn, 1);
        assert_eq!(kever.last_est.s, 1);
        assert_eq!(kever.verfers[0].qb64(), signer1.verfer().qb64());

        // interaction signed by current key
        let serder2 = interact(
            &kever.prefixer.qb64(),
            serder1.said().unwrap(),
            2,
            vec![],
            Kinds::Json,
        )
        .unwrap();
        kever
            .update(&serder2, vec![sign(&serder2, &signer1, 0)], vec![], None, None)
            .unwrap();
        assert_eq!(kever.sn, 2);
        assert_eq!(kever.last_est.s, 1);

        // first seen ordinals are dense from zero
        assert_eq!(db.next_fn(&kever.prefixer.qb64()).unwrap(), 3);

        // state snapshot round-trips through reload
        let state = db
            .states
            .get(kever.prefixer.qb64().as_bytes())
            .unwrap()
            .unwrap();
        let reloaded = Kever::reload(db.clone(), &state).unwrap();
        assert_eq!(reloaded.sn, 2);
        assert_eq!(reloaded.last_est, kever.last_est);
        assert_eq!(reloaded.verfers[0].qb64(), signer1.verfer().qb64());
    }

    #[test]
    fn test_kever_rejects_wrong_rotation_keys() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let signer0 = Signer::new(Some(&SEED0), true).unwrap();
        let signer1 = Signer::new(Some(&SEED1), true).unwrap();
        let signer2 = Signer::new(Some(&SEED2), true).unwrap();

        let nxt1 = Nexter::new(None, &[signer1.verfer().qb64()]).unwrap();
        let serder0 = InceptBuilder::new(vec![signer0.verfer().qb64()])
            .with_nxt(&nxt1.qb64())
            .build()
            .unwrap();
        let mut kever = Kever::incept(
            db,
            &serder0,
            vec![sign(&serder0, &signer0, 0)],
            vec![],
            None,
            None,
        )
        .unwrap();

        // rotation exposing signer2 does not match the commitment to signer1
        let serder1 = rotate(
            &kever.prefixer.qb64(),
            &[signer2.verfer().qb64()],
            serder0.said().unwrap(),
            1,
            "",
            Kinds::Json,
        )
        .unwrap();
        let result = kever.update(&serder1, vec![sign(&serder1, &signer2, 0)], vec![], None, None);
        assert!(matches!(result, Err(KeriError::ValidationError(_))));
        assert_eq!(kever.sn, 0);
    }

    #[test]
    fn test_kever_partial_signature_escrow() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let signers = crate::core::eventing::test_kit::signers(3);
        let keys: Vec<String> = signers.iter().map(|s| s.verfer().qb64()).collect();
        let serder = InceptBuilder::new(keys)
            .with_sith(Sad::from("2"))
            .with_nxt("EcBCalw7Oe2ohLDra2ovwlv72PrlQZdQdaoSZ1Vvk5P4")
            .with_code(crate::cesr::mtr_dex::BLAKE3_256)
            .build()
            .unwrap();

        // only one of two required signatures
        let result = Kever::incept(
            db.clone(),
            &serder,
            vec![sign(&serder, &signers[0], 0)],
            vec![],
            None,
            None,
        );
        assert!(matches!(result, Err(KeriError::MissingSignatureError(_))));
        let pre = serder.pre().unwrap();
        assert_eq!(
            db.pses.cnt(sn_key(pre, 0)).unwrap(),
            1,
            "event should be in partially signed escrow"
        );

        // signatures from keys 0 and 2 meet the threshold
        let kever = Kever::incept(
            db,
            &serder,
            vec![sign(&serder, &signers[0], 0), sign(&serder, &signers[2], 2)],
            vec![],
            None,
            None,
        )
        .unwrap();
        assert_eq!(kever.sn, 0);
    }

    #[test]
    fn test_kever_est_only_rejects_interaction() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let signer0 = Signer::new(Some(&SEED0), true).unwrap();
        let signer1 = Signer::new(Some(&SEED1), true).unwrap();
        let nxt1 = Nexter::new(None, &[signer1.verfer().qb64()]).unwrap();
        let serder0 = InceptBuilder::new(vec![signer0.verfer().qb64()])
            .with_nxt(&nxt1.qb64())
            .with_cnfg(vec![trait_dex::EST_ONLY.to_string()])
            .build()
            .unwrap();
        let mut kever = Kever::incept(
            db,
            &serder0,
            vec![sign(&serder0, &signer0, 0)],
            vec![],
            None,
            None,
        )
        .unwrap();
        assert!(kever.est_only);

        let serder1 = interact(
            &kever.prefixer.qb64(),
            serder0.said().unwrap(),
            1,
            vec![],
            Kinds::Json,
        )
        .unwrap();
        let result = kever.update(&serder1, vec![sign(&serder1, &signer0, 0)], vec![], None, None);
        assert!(matches!(result, Err(KeriError::ValidationError(_))));
    }

    #[test]
    fn test_kever_abandonment() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let signer0 = Signer::new(Some(&SEED0), true).unwrap();
        let signer1 = Signer::new(Some(&SEED1), true).unwrap();
        let nxt1 = Nexter::new(None, &[signer1.verfer().qb64()]).unwrap();
        let serder0 = InceptBuilder::new(vec![signer0.verfer().qb64()])
            .with_nxt(&nxt1.qb64())
            .build()
            .unwrap();
        let mut kever = Kever::incept(
            db,
            &serder0,
            vec![sign(&serder0, &signer0, 0)],
            vec![],
            None,
            None,
        )
        .unwrap();

        // rotation with empty next commitment abandons the identifier
        let serder1 = rotate(
            &kever.prefixer.qb64(),
            &[signer1.verfer().qb64()],
            serder0.said().unwrap(),
            1,
            "",
            Kinds::Json,
        )
        .unwrap();
        kever
            .update(&serder1, vec![sign(&serder1, &signer1, 0)], vec![], None, None)
            .unwrap();
        assert!(!kever.transferable());

        let serder2 = interact(
            &kever.prefixer.qb64(),
            serder1.said().unwrap(),
            2,
            vec![],
            Kinds::Json,
        )
        .unwrap();
        let result = kever.update(&serder2, vec![sign(&serder2, &signer1, 0)], vec![], None, None);
        assert!(matches!(result, Err(KeriError::ValidationError(_))));
    }
}
