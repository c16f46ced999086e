//! Key event generation and validation support.

pub mod incept;
pub mod interact;
pub mod kever;
pub mod kevery;
pub mod query;
pub mod receipt;
pub mod reply;
pub mod rotate;
pub mod state;

pub use incept::{delcept, incept, InceptBuilder};
pub use interact::interact;
pub use kever::{Kever, LastEstLoc};
pub use kevery::{Attachments, Cue, Kevery};
pub use query::query;
pub use receipt::receipt;
pub use reply::reply;
pub use rotate::{deltate, rotate, RotateBuilder};
pub use state::state;

use crate::cesr::cigar::Cigar;
use crate::cesr::counting::{ctr_dex, Counter};
use crate::cesr::indexing::Siger;
use crate::cesr::seqner::Seqner;
use crate::cesr::tholder::Tholder;
use crate::cesr::verfer::Verfer;
use crate::cesr::Matter;
use crate::core::serdering::Serder;
use crate::errors::{KeriError, Result};

/// Configuration trait codes (the `c` field of inception events).
pub mod trait_dex {
    /// Only establishment events are allowed in the KEL.
    pub const EST_ONLY: &str = "EO";
    /// The identifier must not delegate.
    pub const DO_NOT_DELEGATE: &str = "DND";
}

/// Event seal referencing another event by prefix, sequence number, and
/// SAID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealEvent {
    pub i: String,
    pub s: String,
    pub d: String,
}

/// Seal referencing the latest establishment event of a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealLast {
    pub i: String,
}

/// Seal used when endorsing a message with transferable keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachSeal {
    Event(SealEvent),
    Last(SealLast),
}

/// Simple majority: more than half, capped by the set size.
pub fn simple(n: i64) -> u64 {
    let n = n.max(0) as u64;
    std::cmp::min(n, n / 2 + 1)
}

/// Sufficient (immune) majority of `n` witnesses tolerating `f` faults.
/// When `f` is None the maximum tolerable fault count is assumed. `weak`
/// folds to the least sufficient count, otherwise the greatest.
pub fn ample(n: i64, f: Option<i64>, weak: bool) -> Result<u64> {
    let n = n.max(0) as u64;
    match f {
        None => {
            let f1 = std::cmp::max(1, std::cmp::max(0, n.saturating_sub(1)) / 3);
            let f2 = std::cmp::max(1, n.div_ceil(3));
            if weak {
                Ok([n, (n + f1 + 1).div_ceil(2), (n + f2 + 1).div_ceil(2)]
                    .into_iter()
                    .min()
                    .expect("nonempty"))
            } else {
                Ok(std::cmp::min(
                    n,
                    std::cmp::max(n.saturating_sub(f1), (n + f2 + 1).div_ceil(2)),
                ))
            }
        }
        Some(f) => {
            let f = f.max(0) as u64;
            let m1 = (n + f + 1).div_ceil(2);
            let m2 = n.saturating_sub(f);
            if m2 < m1 && n > 0 {
                return Err(KeriError::ValueError(format!(
                    "invalid f = {f} is too big for n = {n}"
                )));
            }
            if weak {
                Ok([n, m1, m2].into_iter().min().expect("nonempty"))
            } else {
                Ok(std::cmp::min(n, std::cmp::max(m1, m2)))
            }
        }
    }
}

/// Verifies indexed signatures over `raw` against `verfers`, attaching
/// each verfer by index. Returns the verified sigers and their distinct
/// indices. A signature with an index beyond the key list is an error;
/// a non-verifying signature is dropped.
pub fn verify_sigs(
    raw: &[u8],
    sigers: Vec<Siger>,
    verfers: &[Verfer],
) -> Result<(Vec<Siger>, Vec<u32>)> {
    let mut verified = Vec::new();
    let mut indices = Vec::new();
    for mut siger in sigers {
        let index = siger.index() as usize;
        if index >= verfers.len() {
            return Err(KeriError::ValidationError(format!(
                "index = {index} beyond key list of length {}",
                verfers.len()
            )));
        }
        let verfer = verfers[index].clone();
        siger.set_verfer(verfer.clone());
        if verfer.verify(siger.raw(), raw)? {
            if !indices.contains(&siger.index()) {
                indices.push(siger.index());
                verified.push(siger);
            }
        }
    }
    Ok((verified, indices))
}

/// Verifies sigers and checks the threshold. Returns the verified sigers
/// and whether the threshold is satisfied.
pub fn validate_sigs(
    raw: &[u8],
    sigers: Vec<Siger>,
    verfers: &[Verfer],
    tholder: &Tholder,
) -> Result<(Vec<Siger>, bool)> {
    let (verified, indices) = verify_sigs(raw, sigers, verfers)?;
    Ok((verified, tholder.satisfy(&indices)))
}

/// Composes a wire message: event bytes followed by attachment groups.
/// A seal wraps the controller signatures in a transferable indexed
/// signature group. Pipelined mode prepends the attachment quadlet count.
pub fn messagize(
    serder: &Serder,
    sigers: Option<&[Siger]>,
    seal: Option<&AttachSeal>,
    wigers: Option<&[Siger]>,
    cigars: Option<&[Cigar]>,
    pipelined: bool,
) -> Result<Vec<u8>> {
    let mut atc: Vec<u8> = Vec::new();

    if let Some(sigers) = sigers {
        if sigers.is_empty() {
            return Err(KeriError::ValueError("missing attached sigers".to_string()));
        }
        match seal {
            Some(AttachSeal::Event(seal)) => {
                atc.extend_from_slice(
                    &Counter::new(ctr_dex::TRANS_RECEIPT_QUADRUPLES, 1)?.qb64b(),
                );
                atc.extend_from_slice(seal.i.as_bytes());
                atc.extend_from_slice(Seqner::from_snh(&seal.s)?.qb64b().as_slice());
                atc.extend_from_slice(seal.d.as_bytes());
            }
            Some(AttachSeal::Last(seal)) => {
                atc.extend_from_slice(
                    &Counter::new(ctr_dex::TRANS_LAST_IDX_SIG_GROUPS, 1)?.qb64b(),
                );
                atc.extend_from_slice(seal.i.as_bytes());
            }
            None => {}
        }
        atc.extend_from_slice(
            &Counter::new(ctr_dex::CONTROLLER_IDX_SIGS, sigers.len() as u64)?.qb64b(),
        );
        for siger in sigers {
            atc.extend_from_slice(&siger.qb64b());
        }
    }

    if let Some(wigers) = wigers {
        if !wigers.is_empty() {
            atc.extend_from_slice(
                &Counter::new(ctr_dex::WITNESS_IDX_SIGS, wigers.len() as u64)?.qb64b(),
            );
            for wiger in wigers {
                atc.extend_from_slice(&wiger.qb64b());
            }
        }
    }

    if let Some(cigars) = cigars {
        if !cigars.is_empty() {
            atc.extend_from_slice(
                &Counter::new(ctr_dex::NON_TRANS_RECEIPT_COUPLES, cigars.len() as u64)?.qb64b(),
            );
            for cigar in cigars {
                let verfer = cigar.verfer().ok_or_else(|| {
                    KeriError::ValueError("cigar missing verfer for couple".to_string())
                })?;
                if verfer.is_transferable() {
                    return Err(KeriError::ValueError(
                        "attached cigar verfer must be non-transferable".to_string(),
                    ));
                }
                atc.extend_from_slice(verfer.qb64().as_bytes());
                atc.extend_from_slice(&cigar.qb64b());
            }
        }
    }

    let mut msg = serder.raw().to_vec();
    if pipelined {
        if atc.len() % 4 != 0 {
            return Err(KeriError::ValueError(format!(
                "invalid attachment length = {}, not whole quadlets",
                atc.len()
            )));
        }
        msg.extend_from_slice(
            &Counter::new(ctr_dex::ATTACHED_MATERIAL_QUADLETS, (atc.len() / 4) as u64)?.qb64b(),
        );
    }
    msg.extend_from_slice(&atc);
    Ok(msg)
}
