//! Revery: replay-safe latest-wins store of signed reply records.
//!
//! A reply record is identified by the natural key of its route, not its
//! SAID. Acceptance follows best-available-data: a record is replaced
//! only by one with a strictly later datetime (or later key state for
//! transferable authorizers), and the prior record's artifacts are
//! removed on replacement.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cesr::cigar::Cigar;
use crate::cesr::dater::Dater;
use crate::cesr::indexing::Siger;
use crate::cesr::prefixer::Prefixer;
use crate::cesr::saider::Saider;
use crate::cesr::seqner::Seqner;
use crate::cesr::Matter;
use crate::core::eventing::kevery::{Attachments, Cue};
use crate::core::eventing::validate_sigs;
use crate::core::routing::Router;
use crate::core::serdering::{Sad, Serder};
use crate::db::basing::{Baser, LocationRecord};
use crate::db::dbing::sn_key;
use crate::db::subing::tokey;
use crate::errors::{KeriError, Result};
use crate::help;

/// Reply escrow timeout in seconds.
const TIMEOUT_RPE: i64 = 3600;

/// Roles an endpoint provider may be authorized for.
pub const ROLES: &[&str] = &[
    "controller",
    "witness",
    "registrar",
    "watcher",
    "judge",
    "juror",
    "peer",
    "mailbox",
];

/// Latest-wins reply processor over the shared store.
pub struct Revery {
    pub db: Arc<Baser>,
    pub cues: VecDeque<Cue>,
    pub rtr: Router,
    pub lax: bool,
    pub local: bool,
}

impl Revery {
    pub fn new(db: Arc<Baser>) -> Self {
        Revery {
            db,
            cues: VecDeque::new(),
            rtr: Router::new(),
            lax: false,
            local: false,
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

    /// Verifies and routes one reply message with its attached
    /// signatures. Latest-establishment groups are resolved against the
    /// local key state.
    pub fn process_reply(
        &mut self,
        serder: &Serder,
        cigars: &[Cigar],
        tsgs: &[(Prefixer, Seqner, Saider, Vec<Siger>)],
        tlgs: &[(Prefixer, Vec<Siger>)],
    ) -> Result<()> {
        let said = serder
            .said()
            .ok_or_else(|| KeriError::ValueError("missing d field in reply".to_string()))?;
        let saider = Saider::from_qb64(said)?;
        if !saider.verify(serder.ked(), serder.kind(), "d") {
            return Err(KeriError::ValidationError(format!(
                "invalid said = {said} for reply"
            )));
        }

        let mut tsgs = tsgs.to_vec();
        for (prefixer, sigers) in tlgs {
            match self.db.states.get(prefixer.qb64().as_bytes())? {
                Some(state) => {
                    let seqner = Seqner::from_snh(&state.ee.s)?;
                    let ssaider = Saider::from_qb64(&state.ee.d)?;
                    tsgs.push((prefixer.clone(), seqner, ssaider, sigers.clone()));
                }
                None => {
                    debug!(
                        pre = %prefixer.qb64(),
                        "dropped latest-est signature group with unknown key state"
                    );
                    self.cues.push_back(Cue {
                        kin: "query".to_string(),
                        serder: serder.clone(),
                    });
                }
            }
        }

        let route = serder.route().unwrap_or_default().to_string();
        if route.starts_with("/end/role") {
            self.process_end_role(serder, &saider, &route, cigars, &tsgs)
        } else if route.starts_with("/loc/scheme") {
            self.process_loc_scheme(serder, &saider, &route, cigars, &tsgs)
        } else {
            let atc = Attachments {
                cigars: cigars.to_vec(),
                trqs: tsgs.clone(),
                ..Default::default()
            };
            self.rtr.dispatch(serder, &atc)?;
            Ok(())
        }
    }

    /// Applies an `/end/role/add` or `/end/role/cut` authorization.
    fn process_end_role(
        &mut self,
        serder: &Serder,
        saider: &Saider,
        route: &str,
        cigars: &[Cigar],
        tsgs: &[(Prefixer, Seqner, Saider, Vec<Siger>)],
    ) -> Result<()> {
        let allowed = match route {
            "/end/role/add" => true,
            "/end/role/cut" => false,
            other => {
                return Err(KeriError::ValidationError(format!(
                    "invalid end role route = {other}"
                )))
            }
        };
        let data = serder
            .data()
            .and_then(Sad::as_object)
            .ok_or_else(|| KeriError::ValueError("missing a section in reply".to_string()))?;
        let cid = data
            .get("cid")
            .and_then(Sad::as_str)
            .ok_or_else(|| KeriError::ValueError("missing cid in end role reply".to_string()))?
            .to_string();
        let role = data
            .get("role")
            .and_then(Sad::as_str)
            .ok_or_else(|| KeriError::ValueError("missing role in end role reply".to_string()))?
            .to_string();
        let eid = data
            .get("eid")
            .and_then(Sad::as_str)
            .ok_or_else(|| KeriError::ValueError("missing eid in end role reply".to_string()))?
            .to_string();
        if !ROLES.contains(&role.as_str()) {
            return Err(KeriError::ValidationError(format!(
                "invalid role = {role} in end role reply"
            )));
        }

        // the controller of cid authorizes its endpoint providers
        let keys = tokey(&[&cid, &role, &eid]);
        let osaider = self
            .db
            .eans
            .get(&keys)?
            .map(|v| Saider::from_qb64(&String::from_utf8_lossy(&v)))
            .transpose()?;

        let accepted = self.accept_reply(
            serder,
            saider,
            route,
            &cid,
            osaider.as_ref(),
            cigars,
            tsgs,
        )?;
        if accepted {
            self.db.eans.pin(&keys, saider.qb64().as_bytes())?;
            let mut record = self.db.ends.get(&keys)?.unwrap_or_default();
            record.allowed = Some(allowed);
            self.db.ends.pin(&keys, &record)?;
            info!(%cid, %role, %eid, allowed, "end role authorization updated");
        }
        Ok(())
    }

    /// Applies a `/loc/scheme` url record.
    fn process_loc_scheme(
        &mut self,
        serder: &Serder,
        saider: &Saider,
        route: &str,
        cigars: &[Cigar],
        tsgs: &[(Prefixer, Seqner, Saider, Vec<Siger>)],
    ) -> Result<()> {
        let data = serder
            .data()
            .and_then(Sad::as_object)
            .ok_or_else(|| KeriError::ValueError("missing a section in reply".to_string()))?;
        let eid = data
            .get("eid")
            .and_then(Sad::as_str)
            .ok_or_else(|| KeriError::ValueError("missing eid in loc reply".to_string()))?
            .to_string();
        let scheme = data
            .get("scheme")
            .and_then(Sad::as_str)
            .ok_or_else(|| KeriError::ValueError("missing scheme in loc reply".to_string()))?
            .to_string();
        let url = data
            .get("url")
            .and_then(Sad::as_str)
            .ok_or_else(|| KeriError::ValueError("missing url in loc reply".to_string()))?
            .to_string();

        // the endpoint provider authorizes its own location
        let keys = tokey(&[&eid, &scheme]);
        let osaider = self
            .db
            .lans
            .get(&keys)?
            .map(|v| Saider::from_qb64(&String::from_utf8_lossy(&v)))
            .transpose()?;

        let accepted = self.accept_reply(
            serder,
            saider,
            route,
            &eid,
            osaider.as_ref(),
            cigars,
            tsgs,
        )?;
        if accepted {
            self.db.lans.pin(&keys, saider.qb64().as_bytes())?;
            self.db.locs.pin(&keys, &LocationRecord { url: url.clone() })?;
            info!(%eid, %scheme, %url, "location record updated");
        }
        Ok(())
    }

    /// Best-available-data acceptance of a reply against the prior
    /// record at the same natural key.
    #[allow(clippy::too_many_arguments)]
    fn accept_reply(
        &mut self,
        serder: &Serder,
        saider: &Saider,
        route: &str,
        aid: &str,
        osaider: Option<&Saider>,
        cigars: &[Cigar],
        tsgs: &[(Prefixer, Seqner, Saider, Vec<Siger>)],
    ) -> Result<bool> {
        let mut accepted = false;
        let dts = serder
            .stamp()
            .ok_or_else(|| KeriError::ValueError("missing dt field in reply".to_string()))?;
        let dater = Dater::from_dts(dts)?;
        let odater = match osaider {
            Some(osaider) => self
                .db
                .sdts
                .get(osaider.qb64().as_bytes())?
                .map(|v| Dater::from_dts(&String::from_utf8_lossy(&v)))
                .transpose()?,
            None => None,
        };

        for cigar in cigars {
            let verfer = match cigar.verfer() {
                Some(v) => v,
                None => {
                    debug!("skipped cigar with no verfer on reply");
                    continue;
                }
            };
            if verfer.is_transferable() {
                debug!("skipped transferable verfer cigar on reply");
                continue;
            }
            if verfer.qb64() != aid {
                debug!(aid, "skipped cigar not from authorizer on reply");
                continue;
            }
            if let Some(ref odater) = odater {
                if dater.dt()? <= odater.dt()? {
                    debug!(aid, %route, "skipped stale reply update");
                    continue;
                }
            }
            if !verfer.verify(cigar.raw(), serder.raw())? {
                debug!(aid, %route, "skipped non-verifying cigar on reply");
                continue;
            }
            self.update_reply(serder, saider, &dater, Some(cigar), None)?;
            if let Some(osaider) = osaider {
                self.remove_reply(osaider)?;
            }
            accepted = true;
            break;
        }

        for (prefixer, seqner, ssaider, sigers) in tsgs {
            if prefixer.qb64() != aid {
                debug!(aid, "skipped signature group not from authorizer");
                continue;
            }
            // stale key state or datetime checks against the prior record
            if let Some(osaider) = osaider {
                let otsgs = self.db.fetch_tsgs(&osaider.qb64())?;
                if let Some((_, oseqner, _, _)) = otsgs.first() {
                    if seqner.sn() < oseqner.sn() {
                        debug!(aid, "skipped reply with stale key state");
                        continue;
                    }
                    if seqner.sn() == oseqner.sn() {
                        if let Some(ref odater) = odater {
                            if dater.dt()? <= odater.dt()? {
                                debug!(aid, "skipped stale reply datetime");
                                continue;
                            }
                        }
                    }
                }
            }

            // the authorizer's establishment event must be in its KEL
            let sdig = self.db.get_ke_last(&sn_key(aid, seqner.sn()))?;
            if sdig.is_none() {
                info!(aid, %route, "escrowing reply without key state");
                self.escrow_reply(serder, saider, &dater, route, prefixer, seqner, ssaider, sigers)?;
                self.cues.push_back(Cue {
                    kin: "query".to_string(),
                    serder: serder.clone(),
                });
                continue;
            }
            let sraw = self
                .db
                .get_evt(aid, &ssaider.qb64())?
                .ok_or_else(|| {
                    KeriError::ValidationError(format!(
                        "bad trans signature group est event = {}",
                        ssaider.qb64()
                    ))
                })?;
            let sserder = Serder::from_raw(&sraw)?;
            if sserder.sn()? != seqner.sn() {
                return Err(KeriError::ValidationError(format!(
                    "mismatch sn = {} of est event = {}",
                    seqner.sn(),
                    ssaider.qb64()
                )));
            }
            let sverfers = sserder.verfers()?;
            let tholder = sserder.tholder()?.ok_or_else(|| {
                KeriError::ValidationError("no threshold at signer's est event".to_string())
            })?;

            // combine with any previously escrowed signatures
            let mut all_sigers = sigers.clone();
            for (eprefixer, eseqner, esaider, esigers) in self.db.fetch_tsgs(&saider.qb64())? {
                if eprefixer.qb64() == prefixer.qb64()
                    && eseqner.sn() == seqner.sn()
                    && esaider.qb64() == ssaider.qb64()
                {
                    all_sigers.extend(esigers);
                }
            }

            let (valid_sigers, valid) =
                validate_sigs(serder.raw(), all_sigers, &sverfers, &tholder)?;
            if valid {
                self.update_reply(
                    serder,
                    saider,
                    &dater,
                    None,
                    Some((prefixer, seqner, ssaider, &valid_sigers)),
                )?;
                if let Some(osaider) = osaider {
                    self.remove_reply(osaider)?;
                }
                accepted = true;
            } else {
                info!(aid, %route, "escrowing reply below signing threshold");
                self.escrow_reply(serder, saider, &dater, route, prefixer, seqner, ssaider, sigers)?;
            }
        }

        Ok(accepted)
    }

    /// Writes the accepted reply and its signature artifacts.
    fn update_reply(
        &mut self,
        serder: &Serder,
        saider: &Saider,
        dater: &Dater,
        cigar: Option<&Cigar>,
        tsg: Option<(&Prefixer, &Seqner, &Saider, &[Siger])>,
    ) -> Result<()> {
        let said = saider.qb64();
        self.db.rpys.pin(said.as_bytes(), serder.raw())?;
        self.db.sdts.pin(said.as_bytes(), dater.dts().as_bytes())?;
        if let Some(cigar) = cigar {
            let verfer = cigar
                .verfer()
                .ok_or_else(|| KeriError::ValueError("cigar missing verfer".to_string()))?;
            let mut couple = verfer.qb64b();
            couple.extend_from_slice(&cigar.qb64b());
            self.db.scgs.add(said.as_bytes(), &couple)?;
        }
        if let Some((prefixer, seqner, ssaider, sigers)) = tsg {
            for siger in sigers {
                let mut quad = prefixer.qb64b();
                quad.extend_from_slice(&seqner.qb64b());
                quad.extend_from_slice(ssaider.qb64().as_bytes());
                quad.extend_from_slice(&siger.qb64b());
                self.db.ssgs.add(said.as_bytes(), &quad)?;
            }
        }
        Ok(())
    }

    /// Removes a superseded reply and all of its artifacts.
    fn remove_reply(&mut self, saider: &Saider) -> Result<()> {
        let said = saider.qb64();
        self.db.rpys.rem(said.as_bytes())?;
        self.db.sdts.rem(said.as_bytes())?;
        self.db.scgs.rem(said.as_bytes(), None)?;
        self.db.ssgs.rem(said.as_bytes(), None)?;
        Ok(())
    }

    /// Escrows a reply whose authorizer KEL or signatures are not yet
    /// sufficient, keyed by the route base.
    #[allow(clippy::too_many_arguments)]
    fn escrow_reply(
        &mut self,
        serder: &Serder,
        saider: &Saider,
        dater: &Dater,
        route: &str,
        prefixer: &Prefixer,
        seqner: &Seqner,
        ssaider: &Saider,
        sigers: &[Siger],
    ) -> Result<()> {
        let said = saider.qb64();
        self.db.rpys.pin(said.as_bytes(), serder.raw())?;
        self.db.sdts.pin(said.as_bytes(), dater.dts().as_bytes())?;
        for siger in sigers {
            let mut quad = prefixer.qb64b();
            quad.extend_from_slice(&seqner.qb64b());
            quad.extend_from_slice(ssaider.qb64().as_bytes());
            quad.extend_from_slice(&siger.qb64b());
            self.db.ssgs.add(said.as_bytes(), &quad)?;
        }
        let base = route_base(route);
        self.db.rpes.add(base.as_bytes(), said.as_bytes())?;
        Ok(())
    }

    /// Re-attempts escrowed replies; called whenever new KEL material
    /// has been seen.
    pub fn process_escrow_reply(&mut self) -> Result<()> {
        for (base, said) in self.db.rpes.items(b"")? {
            let base = String::from_utf8_lossy(&base).to_string();
            let said = String::from_utf8_lossy(&said).to_string();
            match self.process_single_escrow(&said) {
                Ok(true) => {
                    self.db.rpes.rem(base.as_bytes(), Some(said.as_bytes()))?;
                    info!(%said, "escrowed reply promoted");
                }
                Ok(false) => {
                    // still waiting on key state
                    if self.escrow_stale(&said)? {
                        self.db.rpes.rem(base.as_bytes(), Some(said.as_bytes()))?;
                        self.remove_reply(&Saider::from_qb64(&said)?)?;
                        warn!(%said, "stale reply escrow discarded");
                    }
                }
                Err(err) => {
                    self.db.rpes.rem(base.as_bytes(), Some(said.as_bytes()))?;
                    self.remove_reply(&Saider::from_qb64(&said)?)?;
                    warn!(%said, %err, "bad reply escrow discarded");
                }
            }
        }
        Ok(())
    }

    fn escrow_stale(&self, said: &str) -> Result<bool> {
        match self.db.sdts.get(said.as_bytes())? {
            Some(dts) => {
                let then = help::from_iso8601(&String::from_utf8_lossy(&dts))?;
                let now = help::from_iso8601(&help::now_iso8601())?;
                Ok((now - then).num_seconds() > TIMEOUT_RPE)
            }
            None => Ok(true),
        }
    }

    /// Retries one escrowed reply. Returns true when accepted.
    fn process_single_escrow(&mut self, said: &str) -> Result<bool> {
        let raw = match self.db.rpys.get(said.as_bytes())? {
            Some(raw) => raw,
            None => return Err(KeriError::ValueError(format!("missing reply {said}"))),
        };
        let serder = Serder::from_raw(&raw)?;
        let tsgs = self.db.fetch_tsgs(said)?;
        if tsgs.is_empty() {
            return Err(KeriError::ValueError(format!(
                "no signatures for escrowed reply {said}"
            )));
        }
        // check that the authorizer's key state has arrived before
        // re-dispatching
        let available = tsgs.iter().any(|(prefixer, seqner, _, _)| {
            self.db
                .get_ke_last(&sn_key(&prefixer.qb64(), seqner.sn()))
                .ok()
                .flatten()
                .is_some()
        });
        if !available {
            return Ok(false);
        }
        self.process_reply(&serder, &[], &tsgs, &[])?;
        // accepted when the natural key index now points at this said
        let accepted = match serder.route() {
            Some(route) if route.starts_with("/end/role") => {
                let data = serder.data().and_then(Sad::as_object);
                match data {
                    Some(data) => {
                        let keys = tokey(&[
                            data.get("cid").and_then(Sad::as_str).unwrap_or_default(),
                            data.get("role").and_then(Sad::as_str).unwrap_or_default(),
                            data.get("eid").and_then(Sad::as_str).unwrap_or_default(),
                        ]);
                        self.db.eans.get(&keys)?.as_deref() == Some(said.as_bytes())
                    }
                    None => false,
                }
            }
            Some(route) if route.starts_with("/loc/scheme") => {
                let data = serder.data().and_then(Sad::as_object);
                match data {
                    Some(data) => {
                        let keys = tokey(&[
                            data.get("eid").and_then(Sad::as_str).unwrap_or_default(),
                            data.get("scheme").and_then(Sad::as_str).unwrap_or_default(),
                        ]);
                        self.db.lans.get(&keys)?.as_deref() == Some(said.as_bytes())
                    }
                    None => false,
                }
            }
            _ => true,
        };
        Ok(accepted)
    }
}

/// The escrow key for a route: its base without the trailing verb.
pub fn route_base(route: &str) -> String {
    if route.starts_with("/end/role") {
        "/end/role".to_string()
    } else if route.starts_with("/loc/scheme") {
        "/loc/scheme".to_string()
    } else {
        route.to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cesr::nexter::Nexter;
    use crate::cesr::signer::Signer;
    use crate::core::eventing::incept::InceptBuilder;
    use crate::core::eventing::kevery::Kevery;
    use crate::core::eventing::reply::{end_role_data, loc_scheme_data};
    use crate::core::eventing::reply::reply;
    use crate::core::eventing::test_kit::{signers, witness_signers};
    use crate::core::serdering::Serder;
    use crate::core::Kinds;
    use crate::db::basing::Baser;
    use crate::db::dbing::MemDBer;
    use std::sync::Arc;

    const DT0: &str = "2021-01-01T00:00:00.000000+00:00";
    const DT1: &str = "2021-01-01T00:00:01.000000+00:00";

    fn baser() -> Arc<Baser> {
        Arc::new(Baser::new(Arc::new(MemDBer::new("test"))))
    }

    /// Incepts a transferable controller KEL into the store and returns
    /// (prefix, inception serder).
    fn controller_kel(db: Arc<Baser>, signer: &Signer) -> (String, Serder) {
        let nxt = Nexter::new(None, &[signer.verfer().qb64()]).unwrap();
        let serder = InceptBuilder::new(vec![signer.verfer().qb64()])
            .with_nxt(&nxt.qb64())
            .build()
            .unwrap();
        let mut kvy = Kevery::new(db);
        let siger = signer.sign_indexed(serder.raw(), 0).unwrap();
        kvy.process_event(&serder, vec![siger], vec![], None).unwrap();
        (serder.pre().unwrap().to_string(), serder)
    }

    /// Builds the transferable signature group for a reply signed at the
    /// controller's inception.
    fn tsg_for(
        serder: &Serder,
        icp: &Serder,
        signer: &Signer,
    ) -> (Prefixer, Seqner, Saider, Vec<Siger>) {
        (
            Prefixer::from_qb64(icp.pre().unwrap()).unwrap(),
            Seqner::new(0),
            Saider::from_qb64(icp.said().unwrap()).unwrap(),
            vec![signer.sign_indexed(serder.raw(), 0).unwrap()],
        )
    }

    #[test]
    fn test_reply_end_role_latest_wins() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let sgrs = signers(1);
        let signer = &sgrs[0];
        let (cid, icp) = controller_kel(db.clone(), signer);
        let eid = witness_signers(1)[0].verfer().qb64();
        let mut rvy = Revery::new(db.clone());

        // add at dt0 accepted
        let add = reply(
            "/end/role/add",
            end_role_data(&cid, "watcher", &eid),
            Some(DT0),
            Kinds::Json,
        )
        .unwrap();
        rvy.process_reply(&add, &[], &[tsg_for(&add, &icp, signer)], &[])
            .unwrap();
        let keys = tokey(&[&cid, "watcher", &eid]);
        assert_eq!(
            db.eans.get(&keys).unwrap().unwrap(),
            add.said().unwrap().as_bytes()
        );
        assert_eq!(db.ends.get(&keys).unwrap().unwrap().allowed, Some(true));

        // cut at the same datetime is not strictly later: dropped
        let cut_same = reply(
            "/end/role/cut",
            end_role_data(&cid, "watcher", &eid),
            Some(DT0),
            Kinds::Json,
        )
        .unwrap();
        rvy.process_reply(&cut_same, &[], &[tsg_for(&cut_same, &icp, signer)], &[])
            .unwrap();
        assert_eq!(
            db.eans.get(&keys).unwrap().unwrap(),
            add.said().unwrap().as_bytes()
        );
        assert_eq!(db.ends.get(&keys).unwrap().unwrap().allowed, Some(true));

        // cut one second later wins and removes the prior artifacts
        let cut = reply(
            "/end/role/cut",
            end_role_data(&cid, "watcher", &eid),
            Some(DT1),
            Kinds::Json,
        )
        .unwrap();
        rvy.process_reply(&cut, &[], &[tsg_for(&cut, &icp, signer)], &[])
            .unwrap();
        assert_eq!(
            db.eans.get(&keys).unwrap().unwrap(),
            cut.said().unwrap().as_bytes()
        );
        assert_eq!(db.ends.get(&keys).unwrap().unwrap().allowed, Some(false));
        let old = add.said().unwrap();
        assert!(db.rpys.get(old.as_bytes()).unwrap().is_none());
        assert!(db.sdts.get(old.as_bytes()).unwrap().is_none());
        assert!(db.ssgs.get(old.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_reply_loc_scheme_with_cigar() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let wsgrs = witness_signers(1);
        let wsigner = &wsgrs[0];
        let eid = wsigner.verfer().qb64();
        let mut rvy = Revery::new(db.clone());

        let loc = reply(
            "/loc/scheme",
            loc_scheme_data(&eid, "http", "http://localhost:8080/witness/wok"),
            Some(DT0),
            Kinds::Json,
        )
        .unwrap();
        let cigar = wsigner.sign(loc.raw()).unwrap();
        rvy.process_reply(&loc, &[cigar], &[], &[]).unwrap();

        let keys = tokey(&[&eid, "http"]);
        assert_eq!(
            db.locs.get(&keys).unwrap().unwrap().url,
            "http://localhost:8080/witness/wok"
        );

        // nullify with an empty url strictly later
        let null = reply(
            "/loc/scheme",
            loc_scheme_data(&eid, "http", ""),
            Some(DT1),
            Kinds::Json,
        )
        .unwrap();
        let cigar = wsigner.sign(null.raw()).unwrap();
        rvy.process_reply(&null, &[cigar], &[], &[]).unwrap();
        assert!(db.locs.get(&keys).unwrap().unwrap().is_nullified());
    }

    #[test]
    fn test_reply_rejects_wrong_authorizer_and_bad_said() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let sgrs = signers(1);
        let signer = &sgrs[0];
        let sgrs2 = signers(2);
        let other = &sgrs2[1];
        let (cid, icp) = controller_kel(db.clone(), signer);
        let eid = witness_signers(1)[0].verfer().qb64();
        let mut rvy = Revery::new(db.clone());

        // signature group from a different prefix than the authorizer
        let add = reply(
            "/end/role/add",
            end_role_data(&cid, "watcher", &eid),
            Some(DT0),
            Kinds::Json,
        )
        .unwrap();
        let onxt = Nexter::new(None, &[other.verfer().qb64()]).unwrap();
        let oicp = InceptBuilder::new(vec![other.verfer().qb64()])
            .with_nxt(&onxt.qb64())
            .build()
            .unwrap();
        rvy.process_reply(&add, &[], &[tsg_for(&add, &oicp, other)], &[])
            .unwrap();
        let keys = tokey(&[&cid, "watcher", &eid]);
        assert!(db.eans.get(&keys).unwrap().is_none());

        // tampered said is rejected outright
        let mut sad = add.ked().clone();
        sad.insert(
            "d".to_string(),
            crate::core::serdering::Sad::from("EcBCalw7Oe2ohLDra2ovwlv72PrlQZdQdaoSZ1Vvk5P4"),
        );
        let forged = Serder::from_sad(sad, Kinds::Json).unwrap();
        let result = rvy.process_reply(&forged, &[], &[tsg_for(&forged, &icp, signer)], &[]);
        assert!(matches!(result, Err(KeriError::ValidationError(_))));
    }

    #[test]
    fn test_reply_escrow_promotes_after_kel_arrives() {
        sodiumoxide::init().unwrap();
        let db = baser();
        let sgrs = signers(1);
        let signer = &sgrs[0];
        let eid = witness_signers(1)[0].verfer().qb64();
        let mut rvy = Revery::new(db.clone());

        // the controller's KEL is not yet known here: build it separately
        let nxt = Nexter::new(None, &[signer.verfer().qb64()]).unwrap();
        let icp = InceptBuilder::new(vec![signer.verfer().qb64()])
            .with_nxt(&nxt.qb64())
            .build()
            .unwrap();
        let cid = icp.pre().unwrap().to_string();

        let add = reply(
            "/end/role/add",
            end_role_data(&cid, "watcher", &eid),
            Some(DT0),
            Kinds::Json,
        )
        .unwrap();
        rvy.process_reply(&add, &[], &[tsg_for(&add, &icp, signer)], &[])
            .unwrap();

        let keys = tokey(&[&cid, "watcher", &eid]);
        assert!(db.eans.get(&keys).unwrap().is_none());
        assert_eq!(db.rpes.cnt(b"/end/role").unwrap(), 1);
        assert!(rvy.cues.iter().any(|c| c.kin == "query"));

        // now the controller's KEL arrives
        let mut kvy = Kevery::new(db.clone());
        let siger = signer.sign_indexed(icp.raw(), 0).unwrap();
        kvy.process_event(&icp, vec![siger], vec![], None).unwrap();

        rvy.process_escrow_reply().unwrap();
        assert_eq!(db.rpes.cnt(b"/end/role").unwrap(), 0);
        assert_eq!(
            db.eans.get(&keys).unwrap().unwrap(),
            add.said().unwrap().as_bytes()
        );
        assert_eq!(db.ends.get(&keys).unwrap().unwrap().allowed, Some(true));
    }
}
