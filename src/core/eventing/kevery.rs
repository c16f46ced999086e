//! Kevery: stream-level dispatcher of key event messages.
//!
//! Routes framed messages with their attachments to the Kever for the
//! prefix, escrows events that cannot yet be accepted, attaches receipts,
//! and re-attempts every escrow category on `process_escrows`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cesr::cigar::Cigar;
use crate::cesr::indexing::Siger;
use crate::cesr::prefixer::Prefixer;
use crate::cesr::saider::Saider;
use crate::cesr::seqner::Seqner;
use crate::cesr::{BaseMatter, Matter};
use crate::core::eventing::kever::Kever;
use crate::core::serdering::Serder;
use crate::core::Ilk;
use crate::db::basing::Baser;
use crate::db::dbing::{dg_key, sn_key, split_key_on};
use crate::errors::{KeriError, Result};
use crate::help;

/// Escrow timeouts in seconds.
const TIMEOUT_OOE: i64 = 1200;
const TIMEOUT_PSE: i64 = 3600;
const TIMEOUT_PWE: i64 = 3600;
const TIMEOUT_URE: i64 = 3600;
const TIMEOUT_VRE: i64 = 3600;
const TIMEOUT_UWE: i64 = 3600;
const TIMEOUT_LDE: i64 = 86400;

/// Notice or request produced while processing, drained by the embedder.
#[derive(Debug, Clone)]
pub struct Cue {
    pub kin: String,
    pub serder: Serder,
}

/// Attachment groups extracted for one framed message.
#[derive(Default, Clone)]
pub struct Attachments {
    /// Controller indexed signatures.
    pub sigers: Vec<Siger>,
    /// Witness indexed signatures.
    pub wigers: Vec<Siger>,
    /// Non-transferable receipt couples as cigars with verfers attached.
    pub cigars: Vec<Cigar>,
    /// Transferable receipt quadruple groups.
    pub trqs: Vec<(Prefixer, Seqner, Saider, Vec<Siger>)>,
    /// Transferable latest-establishment signature groups.
    pub tlgs: Vec<(Prefixer, Vec<Siger>)>,
    /// Seal source couples for delegation anchoring.
    pub sscs: Vec<(Seqner, Saider)>,
}

/// Handler invoked for routed messages (`qry`/`exn`/`fwd`) the core does
/// not consume itself.
pub type RouteHandler = Box<dyn FnMut(&Serder, &Attachments) -> Result<()> + Send>;

/// Stream dispatcher over one store and a short-lived map of Kevers.
pub struct Kevery {
    pub db: Arc<Baser>,
    pub kevers: HashMap<String, Kever>,
    pub cues: VecDeque<Cue>,
    /// Promiscuous mode: trust without full locality checks.
    pub lax: bool,
    /// Message source is the local habitat.
    pub local: bool,
    /// Direct (two-party) exchange mode.
    pub direct: bool,
    handlers: HashMap<String, RouteHandler>,
}

impl Kevery {
    pub fn new(db: Arc<Baser>) -> Self {
        Kevery {
            db,
            kevers: HashMap::new(),
            cues: VecDeque::new(),
            lax: false,
            local: false,
            direct: true,
            handlers: HashMap::new(),
        }
    }

    pub fn with_lax(mut self, lax: bool) -> Self {
        self.lax = lax;
        self
    }

    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    pub fn with_direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }

    /// Registers a handler for a route base of `qry`/`exn`/`fwd`
    /// messages.
    pub fn register_handler(&mut self, route_base: &str, handler: RouteHandler) {
        self.handlers.insert(route_base.to_string(), handler);
    }

    /// Returns the Kever for `pre`, reloading it from the persisted key
    /// state when not in the map.
    pub fn fetch_kever(&mut self, pre: &str) -> Result<Option<&mut Kever>> {
        if !self.kevers.contains_key(pre) {
            if let Some(state) = self.db.states.get(pre.as_bytes())? {
                let kever = Kever::reload(self.db.clone(), &state)?;
                self.kevers.insert(pre.to_string(), kever);
            } else {
                return Ok(None);
            }
        }
        Ok(self.kevers.get_mut(pre))
    }

    /// Applies one framed message with its attachments.
    pub fn process_message(&mut self, serder: &Serder, atc: &Attachments) -> Result<()> {
        match serder.ilk()? {
            Ilk::Icp | Ilk::Rot | Ilk::Ixn | Ilk::Dip | Ilk::Drt => {
                let couple = atc.sscs.first().cloned();
                self.process_event(serder, atc.sigers.clone(), atc.wigers.clone(), couple)
            }
            Ilk::Rct => {
                if !atc.cigars.is_empty() {
                    self.process_receipt_couples(serder, &atc.cigars)?;
                }
                if !atc.wigers.is_empty() {
                    self.process_receipt_witness(serder, atc.wigers.clone())?;
                }
                if !atc.trqs.is_empty() {
                    self.process_receipt_quadruples(serder, &atc.trqs)?;
                }
                Ok(())
            }
            Ilk::Qry => self.process_query(serder, atc),
            Ilk::Exn | Ilk::Fwd => self.process_routed(serder, atc),
            Ilk::Rpy | Ilk::Ksn => Err(KeriError::ValueError(format!(
                "unexpected message ilk = {} for kevery",
                serder.ilk()?
            ))),
        }
    }

    /// Applies one key event: routes to the Kever for the prefix or
    /// escrows it.
    pub fn process_event(
        &mut self,
        serder: &Serder,
        sigers: Vec<Siger>,
        wigers: Vec<Siger>,
        couple: Option<(Seqner, Saider)>,
    ) -> Result<()> {
        let pre = serder
            .pre()
            .ok_or_else(|| KeriError::ValueError("missing i field".to_string()))?
            .to_string();
        Prefixer::from_qb64(&pre)?;
        let sn = serder.sn()?;
        let ilk = serder.ilk()?;
        let said = serder
            .said()
            .ok_or_else(|| KeriError::ValueError("missing d field".to_string()))?
            .to_string();

        let (delseqner, delsaider) = match couple {
            Some((s, d)) => (Some(s), Some(d)),
            None => (None, None),
        };

        if self.fetch_kever(&pre)?.is_none() {
            // first seen event for pre
            if matches!(ilk, Ilk::Icp | Ilk::Dip) {
                let kever = Kever::incept(
                    self.db.clone(),
                    serder,
                    sigers,
                    wigers,
                    delseqner,
                    delsaider,
                )?;
                self.kevers.insert(pre.clone(), kever);
                self.cue_accepted(&pre, serder);
            } else {
                self.escrow_oo_event(serder, &sigers, &wigers, delseqner.as_ref(), delsaider.as_ref())?;
                return Err(KeriError::OutOfOrderError(format!(
                    "no inception yet for pre = {pre} at sn = {sn}"
                )));
            }
        } else if matches!(ilk, Ilk::Icp | Ilk::Dip) {
            // already incepted: duplicate or duplicitous
            if sn != 0 {
                return Err(KeriError::ValueError(format!(
                    "invalid sn = {sn} for inception event"
                )));
            }
            let ldig = self
                .db
                .get_ke_last(&sn_key(&pre, 0))?
                .ok_or_else(|| KeriError::ValueError(format!("missing KEL entry for {pre}")))?;
            if ldig == said {
                self.log_duplicate(serder, sigers, wigers)?;
            } else {
                self.escrow_ld_event(serder, &sigers)?;
                return Err(KeriError::LikelyDuplicitousError(format!(
                    "inception fork for pre = {pre}: {said} vs {ldig}"
                )));
            }
        } else {
            let (sno, last_est_s) = {
                let kever = self.kevers.get(&pre).expect("kever fetched above");
                (kever.sn + 1, kever.last_est.s)
            };
            if sn > sno {
                self.escrow_oo_event(serder, &sigers, &wigers, delseqner.as_ref(), delsaider.as_ref())?;
                return Err(KeriError::OutOfOrderError(format!(
                    "out of order event for pre = {pre}: sn = {sn} expecting = {sno}"
                )));
            }
            let in_recovery_window = (ilk == Ilk::Rot && last_est_s < sn && sn <= sno)
                || (ilk == Ilk::Drt && last_est_s <= sn && sn <= sno);
            if sn == sno || in_recovery_window {
                let kever = self.kevers.get_mut(&pre).expect("kever fetched above");
                kever.update(serder, sigers, wigers, delseqner, delsaider)?;
                self.cue_accepted(&pre, serder);
            } else {
                // stale: duplicate re-delivery or a fork
                let ldig = self.db.get_ke_last(&sn_key(&pre, sn))?;
                if ldig.as_deref() == Some(&said) {
                    self.log_duplicate(serder, sigers, wigers)?;
                } else {
                    self.escrow_ld_event(serder, &sigers)?;
                    return Err(KeriError::LikelyDuplicitousError(format!(
                        "conflicting event at first-seen sn = {sn} for pre = {pre}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Logs additional valid material for an already accepted event.
    fn log_duplicate(
        &mut self,
        serder: &Serder,
        sigers: Vec<Siger>,
        wigers: Vec<Siger>,
    ) -> Result<()> {
        let pre = serder.pre().unwrap_or_default().to_string();
        let kever = match self.kevers.get(&pre) {
            Some(k) => k,
            None => return Ok(()),
        };
        let (sigers, _) =
            crate::core::eventing::verify_sigs(serder.raw(), sigers, &serder.verfers()?)?;
        let wit_verfers: Vec<_> = kever
            .wits
            .iter()
            .filter_map(|w| crate::cesr::verfer::Verfer::from_qb64(w).ok())
            .collect();
        let (wigers, _) = crate::core::eventing::verify_sigs(serder.raw(), wigers, &wit_verfers)?;
        if !sigers.is_empty() || !wigers.is_empty() {
            kever.log_event(serder, &sigers, &wigers, false, None)?;
        }
        Ok(())
    }

    fn cue_accepted(&mut self, pre: &str, serder: &Serder) {
        let kin = if self.direct || self.lax || !self.db.has_prefix(pre) {
            "receipt"
        } else {
            "notice"
        };
        self.cues.push_back(Cue {
            kin: kin.to_string(),
            serder: serder.clone(),
        });
    }

    /// Processes attached non-transferable receipt couples for an `rct`.
    pub fn process_receipt_couples(&mut self, serder: &Serder, cigars: &[Cigar]) -> Result<()> {
        let pre = serder
            .pre()
            .ok_or_else(|| KeriError::ValueError("missing i field".to_string()))?
            .to_string();
        let sn = serder.sn()?;
        let said = serder
            .said()
            .ok_or_else(|| KeriError::ValueError("missing d field".to_string()))?
            .to_string();

        // receipts verify against the accepted event at sn, or against a
        // matching escrowed event so partially witnessed escrows can
        // graduate
        let ldig = match self.db.get_ke_last(&sn_key(&pre, sn))? {
            Some(ldig) => Some(ldig),
            None => self.db.get_evt(&pre, &said)?.map(|_| said.clone()),
        };
        match ldig {
            Some(ldig) => {
                if ldig != said {
                    return Err(KeriError::ValidationError(format!(
                        "stale receipt for pre = {pre} at sn = {sn}: {said} vs {ldig}"
                    )));
                }
                let eraw = self
                    .db
                    .get_evt(&pre, &ldig)?
                    .ok_or_else(|| KeriError::ValueError(format!("missing event {ldig}")))?;
                let dgkey = dg_key(&pre, &ldig);
                for cigar in cigars {
                    let verfer = match cigar.verfer() {
                        Some(v) if !v.is_transferable() => v,
                        _ => {
                            debug!(%pre, sn, "skipped receipt couple without nontrans verfer");
                            continue;
                        }
                    };
                    if verfer.verify(cigar.raw(), &eraw)? {
                        let mut couple = verfer.qb64b();
                        couple.extend_from_slice(&cigar.qb64b());
                        self.db.rcts.add(&dgkey, &couple)?;
                    } else {
                        debug!(%pre, sn, "dropped non-verifying receipt couple");
                    }
                }
                Ok(())
            }
            None => {
                // escrow unverified receipt triples (dig, pre, cigar)
                for cigar in cigars {
                    if let Some(verfer) = cigar.verfer() {
                        let mut triple = said.as_bytes().to_vec();
                        triple.extend_from_slice(&verfer.qb64b());
                        triple.extend_from_slice(&cigar.qb64b());
                        self.db.ures.add(sn_key(&pre, sn), &triple)?;
                    }
                }
                self.db.dtss.put(
                    dg_key(&pre, &said),
                    help::now_iso8601().as_bytes(),
                )?;
                Err(KeriError::UnverifiedReceiptError(format!(
                    "receipt for unseen event at pre = {pre} sn = {sn}"
                )))
            }
        }
    }

    /// Processes attached witness indexed signatures for an `rct`.
    pub fn process_receipt_witness(&mut self, serder: &Serder, wigers: Vec<Siger>) -> Result<()> {
        let pre = serder
            .pre()
            .ok_or_else(|| KeriError::ValueError("missing i field".to_string()))?
            .to_string();
        let sn = serder.sn()?;
        let said = serder
            .said()
            .ok_or_else(|| KeriError::ValueError("missing d field".to_string()))?
            .to_string();

        let ldig = match self.db.get_ke_last(&sn_key(&pre, sn))? {
            Some(ldig) => Some(ldig),
            None => self.db.get_evt(&pre, &said)?.map(|_| said.clone()),
        };
        match ldig {
            Some(ldig) => {
                if ldig != said {
                    return Err(KeriError::ValidationError(format!(
                        "stale witness receipt for pre = {pre} at sn = {sn}"
                    )));
                }
                let eraw = self
                    .db
                    .get_evt(&pre, &ldig)?
                    .ok_or_else(|| KeriError::ValueError(format!("missing event {ldig}")))?;
                let eserder = Serder::from_raw(&eraw)?;
                let wits = self.wits_for_event(&eserder)?;
                let dgkey = dg_key(&pre, &ldig);
                for wiger in wigers {
                    let index = wiger.index() as usize;
                    if index >= wits.len() {
                        debug!(%pre, sn, index, "dropped witness receipt with bad index");
                        continue;
                    }
                    let verfer = crate::cesr::verfer::Verfer::from_qb64(&wits[index])?;
                    if verfer.verify(wiger.raw(), &eraw)? {
                        self.db.wigs.add(&dgkey, &wiger.qb64b())?;
                    }
                }
                Ok(())
            }
            None => {
                for wiger in wigers {
                    let mut couple = said.as_bytes().to_vec();
                    couple.extend_from_slice(&wiger.qb64b());
                    self.db.uwes.add(sn_key(&pre, sn), &couple)?;
                }
                self.db.dtss.put(
                    dg_key(&pre, &said),
                    help::now_iso8601().as_bytes(),
                )?;
                Err(KeriError::UnverifiedWitnessReceiptError(format!(
                    "witness receipt for unseen event at pre = {pre} sn = {sn}"
                )))
            }
        }
    }

    /// Processes attached transferable receipt quadruple groups.
    pub fn process_receipt_quadruples(
        &mut self,
        serder: &Serder,
        trqs: &[(Prefixer, Seqner, Saider, Vec<Siger>)],
    ) -> Result<()> {
        let pre = serder
            .pre()
            .ok_or_else(|| KeriError::ValueError("missing i field".to_string()))?
            .to_string();
        let sn = serder.sn()?;
        let said = serder
            .said()
            .ok_or_else(|| KeriError::ValueError("missing d field".to_string()))?
            .to_string();

        for (sprefixer, sseqner, ssaider, sigers) in trqs {
            let ldig = self.db.get_ke_last(&sn_key(&pre, sn))?;
            let sdig = self
                .db
                .get_ke_last(&sn_key(&sprefixer.qb64(), sseqner.sn()))?;
            match (&ldig, &sdig) {
                (Some(ldig), Some(_)) => {
                    if *ldig != said {
                        return Err(KeriError::ValidationError(format!(
                            "stale transferable receipt for pre = {pre} at sn = {sn}"
                        )));
                    }
                    let eraw = self
                        .db
                        .get_evt(&pre, ldig)?
                        .ok_or_else(|| KeriError::ValueError(format!("missing event {ldig}")))?;
                    // the receipter's establishment event provides the keys
                    let sraw = self
                        .db
                        .get_evt(&sprefixer.qb64(), &ssaider.qb64())?
                        .ok_or_else(|| {
                            KeriError::ValidationError(format!(
                                "missing receipter est event = {}",
                                ssaider.qb64()
                            ))
                        })?;
                    let sserder = Serder::from_raw(&sraw)?;
                    let sverfers = sserder.verfers()?;
                    let dgkey = dg_key(&pre, ldig);
                    for siger in sigers {
                        let index = siger.index() as usize;
                        if index >= sverfers.len() {
                            debug!(%pre, sn, index, "dropped trans receipt with bad index");
                            continue;
                        }
                        if sverfers[index].verify(siger.raw(), &eraw)? {
                            let mut quad = sprefixer.qb64b();
                            quad.extend_from_slice(&sseqner.qb64b());
                            quad.extend_from_slice(ssaider.qb64().as_bytes());
                            quad.extend_from_slice(&siger.qb64b());
                            self.db.vrcs.add(&dgkey, &quad)?;
                        }
                    }
                }
                _ => {
                    // either the event or the receipter's KEL is unseen
                    for siger in sigers {
                        let mut quint = said.as_bytes().to_vec();
                        quint.extend_from_slice(&sprefixer.qb64b());
                        quint.extend_from_slice(&sseqner.qb64b());
                        quint.extend_from_slice(ssaider.qb64().as_bytes());
                        quint.extend_from_slice(&siger.qb64b());
                        self.db.vres.add(sn_key(&pre, sn), &quint)?;
                    }
                    self.db.dtss.put(
                        dg_key(&pre, &said),
                        help::now_iso8601().as_bytes(),
                    )?;
                    return Err(KeriError::UnverifiedTransferableReceiptError(format!(
                        "transferable receipt with unseen dependency at pre = {pre} sn = {sn}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Effective witness set for an event, whether accepted or still
    /// escrowed.
    fn wits_for_event(&self, serder: &Serder) -> Result<Vec<String>> {
        let pre = serder.pre().unwrap_or_default();
        match serder.ilk()? {
            Ilk::Icp | Ilk::Dip => Ok(serder.backs()),
            Ilk::Rot | Ilk::Drt => {
                let prior = self.fetch_witness_state(pre, serder.sn()?.saturating_sub(1))?;
                crate::core::eventing::rotate::apply_cuts_adds(
                    &prior,
                    &serder.cuts(),
                    &serder.adds(),
                )
            }
            _ => self.fetch_witness_state(pre, serder.sn()?),
        }
    }

    /// Reconstructs the effective witness set at (pre, sn) by replaying
    /// the establishment events up to sn in first-seen order.
    fn fetch_witness_state(&self, pre: &str, sn: u64) -> Result<Vec<String>> {
        let mut wits: Vec<String> = Vec::new();
        for (_, dig) in self.db.fels.items(format!("{pre}."))? {
            let dig = String::from_utf8_lossy(&dig).to_string();
            let raw = match self.db.get_evt(pre, &dig)? {
                Some(raw) => raw,
                None => continue,
            };
            let eserder = Serder::from_raw(&raw)?;
            if eserder.sn()? > sn {
                break;
            }
            match eserder.ilk()? {
                Ilk::Icp | Ilk::Dip => wits = eserder.backs(),
                Ilk::Rot | Ilk::Drt => {
                    wits = crate::core::eventing::rotate::apply_cuts_adds(
                        &wits,
                        &eserder.cuts(),
                        &eserder.adds(),
                    )?;
                }
                _ => {}
            }
        }
        Ok(wits)
    }

    /// Handles query messages: `logs` and `ksn` are served with cues,
    /// anything else goes to a registered handler.
    pub fn process_query(&mut self, serder: &Serder, atc: &Attachments) -> Result<()> {
        let route = serder.route().unwrap_or_default().to_string();
        match route.as_str() {
            "logs" | "ksn" => {
                let qry = serder
                    .ked()
                    .get("q")
                    .and_then(crate::core::serdering::Sad::as_object)
                    .ok_or_else(|| KeriError::ValueError("missing q section".to_string()))?;
                let pre = qry
                    .get("i")
                    .and_then(crate::core::serdering::Sad::as_str)
                    .ok_or_else(|| KeriError::ValueError("missing i in q section".to_string()))?
                    .to_string();
                if self.db.states.get(pre.as_bytes())?.is_none() {
                    return Err(KeriError::QueryNotFoundError(format!(
                        "no key state for pre = {pre}"
                    )));
                }
                let kin = if route == "logs" { "replay" } else { "reply" };
                self.cues.push_back(Cue {
                    kin: kin.to_string(),
                    serder: serder.clone(),
                });
                Ok(())
            }
            _ => self.process_routed(serder, atc),
        }
    }

    /// Dispatches a routed message to the handler registered for the
    /// longest matching route base.
    fn process_routed(&mut self, serder: &Serder, atc: &Attachments) -> Result<()> {
        let route = serder.route().unwrap_or_default().to_string();
        let key = self
            .handlers
            .keys()
            .filter(|base| route.starts_with(base.as_str()))
            .max_by_key(|base| base.len())
            .cloned();
        match key {
            Some(base) => {
                let handler = self.handlers.get_mut(&base).expect("key exists");
                handler(serder, atc)
            }
            None => {
                info!(%route, ilk = %serder.ilk()?, "dropped message with unhandled route");
                Ok(())
            }
        }
    }

    /// Re-attempts every escrow category in fixed order.
    pub fn process_escrows(&mut self) -> Result<()> {
        self.process_escrow_out_of_orders()?;
        self.process_escrow_partial_signeds()?;
        self.process_escrow_partial_witnessed()?;
        self.process_escrow_unverified_nontrans()?;
        self.process_escrow_unverified_trans()?;
        self.process_escrow_unverified_witness()?;
        self.process_escrow_delegables()?;
        self.process_escrow_duplicitous()?;
        Ok(())
    }

    /// True when the escrow stamp for (pre, dig) is older than `timeout`
    /// seconds.
    fn stale(&self, pre: &str, dig: &str, timeout: i64) -> Result<bool> {
        match self.db.dtss.get(dg_key(pre, dig))? {
            Some(dts) => {
                let dts = String::from_utf8_lossy(&dts).to_string();
                let then = help::from_iso8601(&dts)?;
                let now = help::from_iso8601(&help::now_iso8601())?;
                Ok((now - then).num_seconds() > timeout)
            }
            None => Ok(false),
        }
    }

    /// Loads an escrowed event with its stored material.
    fn load_escrowed(
        &self,
        pre: &str,
        dig: &str,
    ) -> Result<Option<(Serder, Vec<Siger>, Vec<Siger>, Option<(Seqner, Saider)>)>> {
        let dgkey = dg_key(pre, dig);
        let raw = match self.db.evts.get(&dgkey)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let serder = Serder::from_raw(&raw)?;
        let sigers = self
            .db
            .sigs
            .get(&dgkey)?
            .iter()
            .filter_map(|s| Siger::from_qb64(&String::from_utf8_lossy(s)).ok())
            .collect();
        let wigers = self
            .db
            .wigs
            .get(&dgkey)?
            .iter()
            .filter_map(|s| Siger::from_qb64(&String::from_utf8_lossy(s)).ok())
            .collect();
        let couple = match self.db.pdes.get(&dgkey)? {
            Some(val) => {
                let text = String::from_utf8_lossy(&val).to_string();
                let (seqner, size) = Seqner::extract(text.as_bytes())?;
                let saider = Saider::from_qb64(&text[size..])?;
                Some((seqner, saider))
            }
            None => None,
        };
        Ok(Some((serder, sigers, wigers, couple)))
    }

    /// Generic retry over an event escrow category. Promoted or dead
    /// entries are removed; missing-dependency failures are kept.
    fn retry_event_escrow(&mut self, subkey: &str, timeout: i64) -> Result<()> {
        let escrow = match subkey {
            "ooes" => self.db.ooes.clone(),
            "pses" => self.db.pses.clone(),
            "pwes" => self.db.pwes.clone(),
            "ldes" => self.db.ldes.clone(),
            other => {
                return Err(KeriError::ValueError(format!(
                    "unknown escrow subkey = {other}"
                )))
            }
        };
        for (key, dig) in escrow.items(b"")? {
            let (pre, sn) = split_key_on(&key)?;
            let pre = String::from_utf8_lossy(&pre).to_string();
            let dig = String::from_utf8_lossy(&dig).to_string();

            if self.stale(&pre, &dig, timeout)? {
                escrow.rem(&key, Some(dig.as_bytes()))?;
                warn!(%pre, sn, %dig, subkey, "stale escrow entry discarded");
                continue;
            }
            let (serder, sigers, wigers, couple) = match self.load_escrowed(&pre, &dig)? {
                Some(loaded) => loaded,
                None => {
                    escrow.rem(&key, Some(dig.as_bytes()))?;
                    continue;
                }
            };
            match self.process_event(&serder, sigers, wigers, couple) {
                Ok(()) => {
                    escrow.rem(&key, Some(dig.as_bytes()))?;
                    info!(%pre, sn, %dig, subkey, "escrowed event promoted");
                }
                Err(
                    KeriError::OutOfOrderError(_)
                    | KeriError::MissingSignatureError(_)
                    | KeriError::MissingWitnessSignatureError(_)
                    | KeriError::MissingDelegationError(_),
                ) => {
                    // dependency still missing, retry later
                }
                Err(err) => {
                    escrow.rem(&key, Some(dig.as_bytes()))?;
                    warn!(%pre, sn, %dig, subkey, %err, "escrowed event discarded");
                }
            }
        }
        Ok(())
    }

    pub fn process_escrow_out_of_orders(&mut self) -> Result<()> {
        self.retry_event_escrow("ooes", TIMEOUT_OOE)
    }

    pub fn process_escrow_partial_signeds(&mut self) -> Result<()> {
        self.retry_event_escrow("pses", TIMEOUT_PSE)
    }

    pub fn process_escrow_partial_witnessed(&mut self) -> Result<()> {
        self.retry_event_escrow("pwes", TIMEOUT_PWE)
    }

    pub fn process_escrow_delegables(&mut self) -> Result<()> {
        self.retry_event_escrow("ldes", TIMEOUT_LDE)
    }

    /// Retries unverified non-transferable receipt triples.
    pub fn process_escrow_unverified_nontrans(&mut self) -> Result<()> {
        let escrow = self.db.ures.clone();
        for (key, triple) in escrow.items(b"")? {
            let (pre, sn) = split_key_on(&key)?;
            let pre = String::from_utf8_lossy(&pre).to_string();
            let text = String::from_utf8_lossy(&triple).to_string();
            let (dig, rest) = match split_front_dig(&text) {
                Some(parts) => parts,
                None => {
                    escrow.rem(&key, Some(triple.as_slice()))?;
                    continue;
                }
            };
            if self.stale(&pre, &dig, TIMEOUT_URE)? {
                escrow.rem(&key, Some(triple.as_slice()))?;
                warn!(%pre, sn, %dig, "stale unverified receipt discarded");
                continue;
            }
            let ldig = match self.db.get_ke_last(&sn_key(&pre, sn))? {
                Some(ldig) => ldig,
                None => continue, // event still unseen
            };
            escrow.rem(&key, Some(triple.as_slice()))?;
            if ldig != dig {
                debug!(%pre, sn, %dig, "dropped receipt for superseded event");
                continue;
            }
            let eraw = match self.db.get_evt(&pre, &ldig)? {
                Some(raw) => raw,
                None => continue,
            };
            if let Ok((verfer, cigar_text)) = split_verfer(rest) {
                if let Ok(cigar) = Cigar::from_qb64(cigar_text, Some(verfer.clone())) {
                    if !verfer.is_transferable() && verfer.verify(cigar.raw(), &eraw)? {
                        let mut couple = verfer.qb64b();
                        couple.extend_from_slice(&cigar.qb64b());
                        self.db.rcts.add(dg_key(&pre, &ldig), &couple)?;
                        info!(%pre, sn, "unverified receipt promoted");
                    }
                }
            }
        }
        Ok(())
    }

    /// Retries unverified transferable receipt quintuples.
    pub fn process_escrow_unverified_trans(&mut self) -> Result<()> {
        let escrow = self.db.vres.clone();
        for (key, quint) in escrow.items(b"")? {
            let (pre, sn) = split_key_on(&key)?;
            let pre = String::from_utf8_lossy(&pre).to_string();
            let text = String::from_utf8_lossy(&quint).to_string();
            let (dig, rest) = match split_front_dig(&text) {
                Some(parts) => parts,
                None => {
                    escrow.rem(&key, Some(quint.as_slice()))?;
                    continue;
                }
            };
            if self.stale(&pre, &dig, TIMEOUT_VRE)? {
                escrow.rem(&key, Some(quint.as_slice()))?;
                warn!(%pre, sn, %dig, "stale unverified trans receipt discarded");
                continue;
            }
            let quadruple = match parse_receipt_quadruple(rest) {
                Ok(q) => q,
                Err(_) => {
                    escrow.rem(&key, Some(quint.as_slice()))?;
                    continue;
                }
            };
            let (sprefixer, sseqner, ssaider, siger) = quadruple;
            let ldig = match self.db.get_ke_last(&sn_key(&pre, sn))? {
                Some(l) => l,
                None => continue,
            };
            if self
                .db
                .get_ke_last(&sn_key(&sprefixer.qb64(), sseqner.sn()))?
                .is_none()
            {
                continue; // receipter KEL still unseen
            }
            escrow.rem(&key, Some(quint.as_slice()))?;
            if ldig != dig {
                continue;
            }
            let serder = match self.db.get_evt(&pre, &ldig)? {
                Some(raw) => Serder::from_raw(&raw)?,
                None => continue,
            };
            let receipt = crate::core::eventing::receipt(
                &pre,
                sn,
                serder.said().unwrap_or_default(),
                serder.kind(),
            )?;
            let group = vec![(sprefixer, sseqner, ssaider, vec![siger])];
            if let Err(err) = self.process_receipt_quadruples(&receipt, &group) {
                debug!(%pre, sn, %err, "escrowed trans receipt still unverified");
            } else {
                info!(%pre, sn, "unverified trans receipt promoted");
            }
        }
        Ok(())
    }

    /// Retries unverified witness receipt couples.
    pub fn process_escrow_unverified_witness(&mut self) -> Result<()> {
        let escrow = self.db.uwes.clone();
        for (key, couple) in escrow.items(b"")? {
            let (pre, sn) = split_key_on(&key)?;
            let pre = String::from_utf8_lossy(&pre).to_string();
            let text = String::from_utf8_lossy(&couple).to_string();
            let (dig, rest) = match split_front_dig(&text) {
                Some(parts) => parts,
                None => {
                    escrow.rem(&key, Some(couple.as_slice()))?;
                    continue;
                }
            };
            if self.stale(&pre, &dig, TIMEOUT_UWE)? {
                escrow.rem(&key, Some(couple.as_slice()))?;
                warn!(%pre, sn, %dig, "stale unverified witness receipt discarded");
                continue;
            }
            let ldig = match self.db.get_ke_last(&sn_key(&pre, sn))? {
                Some(l) => l,
                None => continue,
            };
            escrow.rem(&key, Some(couple.as_slice()))?;
            if ldig != dig {
                continue;
            }
            let eraw = match self.db.get_evt(&pre, &ldig)? {
                Some(raw) => raw,
                None => continue,
            };
            let wits = self.fetch_witness_state(&pre, sn)?;
            if let Ok(wiger) = Siger::from_qb64(rest) {
                let index = wiger.index() as usize;
                if index < wits.len() {
                    let verfer = crate::cesr::verfer::Verfer::from_qb64(&wits[index])?;
                    if verfer.verify(wiger.raw(), &eraw)? {
                        self.db.wigs.add(dg_key(&pre, &ldig), &wiger.qb64b())?;
                        info!(%pre, sn, "unverified witness receipt promoted");
                    }
                }
            }
        }
        Ok(())
    }

    /// Reports recorded likely-duplicitous events as cues for the
    /// embedder; the record itself is retained as evidence.
    pub fn process_escrow_duplicitous(&mut self) -> Result<()> {
        for (key, dig) in self.db.dups.items(b"")? {
            let (pre, sn) = split_key_on(&key)?;
            let pre = String::from_utf8_lossy(&pre).to_string();
            let dig = String::from_utf8_lossy(&dig).to_string();
            if let Some(raw) = self.db.get_evt(&pre, &dig)? {
                if let Ok(serder) = Serder::from_raw(&raw) {
                    debug!(%pre, sn, %dig, "likely duplicitous event on record");
                    self.cues.push_back(Cue {
                        kin: "duplicitous".to_string(),
                        serder,
                    });
                }
            }
        }
        Ok(())
    }

    fn escrow_oo_event(
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
        self.db
            .dtss
            .put(&dgkey, help::now_iso8601().as_bytes())?;
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
        self.db
            .ooes
            .add(sn_key(pre, serder.sn()?), said.as_bytes())?;
        debug!(pre, said, "escrowed out-of-order event");
        Ok(())
    }

    fn escrow_ld_event(&self, serder: &Serder, sigers: &[Siger]) -> Result<()> {
        let pre = serder.pre().unwrap_or_default();
        let said = serder.said().unwrap_or_default();
        let dgkey = dg_key(pre, said);
        self.db
            .dtss
            .put(&dgkey, help::now_iso8601().as_bytes())?;
        for siger in sigers {
            self.db.sigs.add(&dgkey, &siger.qb64b())?;
        }
        self.db.evts.put(&dgkey, serder.raw())?;
        self.db
            .dups
            .add(sn_key(pre, serder.sn()?), said.as_bytes())?;
        debug!(pre, said, "recorded likely duplicitous event");
        Ok(())
    }
}

/// Splits a leading qb64 digest from a concatenation.
fn split_front_dig(text: &str) -> Option<(String, &str)> {
    let (_, size) = BaseMatter::extract(text.as_bytes()).ok()?;
    Some((text[..size].to_string(), &text[size..]))
}

fn split_verfer(text: &str) -> Result<(crate::cesr::verfer::Verfer, &str)> {
    let (_, size) = BaseMatter::extract(text.as_bytes())?;
    let verfer = crate::cesr::verfer::Verfer::from_qb64(&text[..size])?;
    Ok((verfer, &text[size..]))
}

/// Parses a qb64 concatenation of (prefixer, seqner, saider, siger).
fn parse_receipt_quadruple(text: &str) -> Result<(Prefixer, Seqner, Saider, Siger)> {
    let (_, size) = BaseMatter::extract(text.as_bytes())?;
    let prefixer = Prefixer::from_qb64(&text[..size])?;
    let rest = &text[size..];
    let (seqner, size) = Seqner::extract(rest.as_bytes())?;
    let rest = &rest[size..];
    let (_, size) = BaseMatter::extract(rest.as_bytes())?;
    let saider = Saider::from_qb64(&rest[..size])?;
    let siger = Siger::from_qb64(&rest[size..])?;
    Ok((prefixer, seqner, saider, siger))
}
