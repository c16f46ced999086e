//! Parser: extracts framed messages and their attached CESR groups from
//! a byte stream.
//!
//! A message is the event bytes of the declared size followed by zero or
//! more attachment groups, each introduced by a Counter. In pipelined
//! mode a single attachment-quadlets counter sizes the whole region. A
//! shortage anywhere leaves the buffer untouched so the caller can
//! append more bytes and retry.

use tracing::{debug, warn};

use crate::cesr::cigar::Cigar;
use crate::cesr::counting::{ctr_dex, Counter};
use crate::cesr::indexing::Siger;
use crate::cesr::prefixer::Prefixer;
use crate::cesr::saider::Saider;
use crate::cesr::seqner::Seqner;
use crate::cesr::verfer::Verfer;
use crate::cesr::BaseMatter;
use crate::core::eventing::kevery::{Attachments, Kevery};
use crate::core::routing::Revery;
use crate::core::serdering::Serder;
use crate::core::Ilk;
use crate::errors::{KeriError, MatterError, Result};

/// Stream parser feeding a Kevery and optionally a Revery.
pub struct Parser {
    /// Treat attachment groups as belonging to the preceding message.
    pub framed: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser { framed: true }
    }

    /// Consumes as many complete messages as are available, leaving any
    /// partial remainder in `ims`. Processing failures are logged and do
    /// not stop the stream.
    pub fn parse(
        &self,
        ims: &mut Vec<u8>,
        kvy: &mut Kevery,
        mut rvy: Option<&mut Revery>,
    ) -> Result<()> {
        loop {
            match self.parse_one(ims, kvy, rvy.as_deref_mut()) {
                Ok(true) => continue,
                Ok(false) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Extracts and applies a single framed message. Returns false when
    /// the buffer holds no complete message yet.
    pub fn parse_one(
        &self,
        ims: &mut Vec<u8>,
        kvy: &mut Kevery,
        rvy: Option<&mut Revery>,
    ) -> Result<bool> {
        if ims.is_empty() {
            return Ok(false);
        }
        let serder = match Serder::from_raw(ims) {
            Ok(serder) => serder,
            Err(KeriError::ShortageError { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };
        let (atc, consumed) = match self.extract_attachments(&ims[serder.size()..]) {
            Ok(parts) => parts,
            Err(KeriError::ShortageError { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };
        ims.drain(..serder.size() + consumed);

        let result = match serder.ilk() {
            Ok(Ilk::Rpy) => match rvy {
                Some(rvy) => rvy.process_reply(&serder, &atc.cigars, &atc.trqs, &atc.tlgs),
                None => {
                    debug!("dropped reply message without reply processor");
                    Ok(())
                }
            },
            Ok(_) => kvy.process_message(&serder, &atc),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            // escrow-bound and invalid messages alike must not stall the
            // stream
            warn!(%err, "message dropped or escrowed");
        }
        Ok(true)
    }

    /// Extracts consecutive attachment groups from the head of `atc`.
    fn extract_attachments(&self, atc: &[u8]) -> Result<(Attachments, usize)> {
        let mut out = Attachments::default();
        let mut offset = 0usize;

        while offset < atc.len() && atc[offset] == b'-' {
            let (counter, size) = Counter::extract(&atc[offset..]).map_err(shortage)?;
            match counter.code() {
                ctr_dex::ATTACHED_MATERIAL_QUADLETS | ctr_dex::BIG_ATTACHED_MATERIAL_QUADLETS => {
                    // pipelined size hint: the declared region must be
                    // complete before any of it is parsed
                    let region = (counter.count() as usize) * 4;
                    let start = offset + size;
                    if atc.len() < start + region {
                        return Err(KeriError::ShortageError {
                            needed: start + region - atc.len(),
                        });
                    }
                    let (inner, inner_size) = self.extract_attachments(&atc[start..start + region])?;
                    if inner_size != region {
                        return Err(KeriError::DeserializeError(format!(
                            "pipelined attachment region size mismatch: {inner_size} != {region}"
                        )));
                    }
                    merge(&mut out, inner);
                    offset = start + region;
                }
                ctr_dex::CONTROLLER_IDX_SIGS => {
                    let mut cursor = offset + size;
                    for _ in 0..counter.count() {
                        let (siger, used) = Siger::extract(&atc[cursor..]).map_err(shortage)?;
                        out.sigers.push(siger);
                        cursor += used;
                    }
                    offset = cursor;
                }
                ctr_dex::WITNESS_IDX_SIGS => {
                    let mut cursor = offset + size;
                    for _ in 0..counter.count() {
                        let (wiger, used) = Siger::extract(&atc[cursor..]).map_err(shortage)?;
                        out.wigers.push(wiger);
                        cursor += used;
                    }
                    offset = cursor;
                }
                ctr_dex::NON_TRANS_RECEIPT_COUPLES => {
                    let mut cursor = offset + size;
                    for _ in 0..counter.count() {
                        let (verfer, used) = extract_verfer(&atc[cursor..])?;
                        cursor += used;
                        let (_, used) = BaseMatter::extract(&atc[cursor..]).map_err(shortage)?;
                        let text = std::str::from_utf8(&atc[cursor..cursor + used]).map_err(|_| {
                            KeriError::DeserializeError("non-utf8 attachment".to_string())
                        })?;
                        cursor += used;
                        let cigar = Cigar::from_qb64(text, Some(verfer))?;
                        out.cigars.push(cigar);
                    }
                    offset = cursor;
                }
                ctr_dex::SEAL_SOURCE_COUPLES => {
                    let mut cursor = offset + size;
                    for _ in 0..counter.count() {
                        let (seqner, used) = Seqner::extract(&atc[cursor..]).map_err(shortage)?;
                        cursor += used;
                        let (saider, used) = extract_saider(&atc[cursor..])?;
                        cursor += used;
                        out.sscs.push((seqner, saider));
                    }
                    offset = cursor;
                }
                ctr_dex::TRANS_RECEIPT_QUADRUPLES => {
                    let mut cursor = offset + size;
                    for _ in 0..counter.count() {
                        let (prefixer, used) = extract_prefixer(&atc[cursor..])?;
                        cursor += used;
                        let (seqner, used) = Seqner::extract(&atc[cursor..]).map_err(shortage)?;
                        cursor += used;
                        let (saider, used) = extract_saider(&atc[cursor..])?;
                        cursor += used;
                        let (sigers, used) = self.extract_sig_group(&atc[cursor..])?;
                        cursor += used;
                        out.trqs.push((prefixer, seqner, saider, sigers));
                    }
                    offset = cursor;
                }
                ctr_dex::TRANS_LAST_IDX_SIG_GROUPS => {
                    let mut cursor = offset + size;
                    for _ in 0..counter.count() {
                        let (prefixer, used) = extract_prefixer(&atc[cursor..])?;
                        cursor += used;
                        let (sigers, used) = self.extract_sig_group(&atc[cursor..])?;
                        cursor += used;
                        out.tlgs.push((prefixer, sigers));
                    }
                    offset = cursor;
                }
                other => {
                    return Err(KeriError::DeserializeError(format!(
                        "unsupported attachment group code = {other}"
                    )));
                }
            }
            if !self.framed {
                break;
            }
        }
        Ok((out, offset))
    }

    /// Extracts a nested controller signature group.
    fn extract_sig_group(&self, atc: &[u8]) -> Result<(Vec<Siger>, usize)> {
        let (counter, size) = Counter::extract(atc).map_err(shortage)?;
        if counter.code() != ctr_dex::CONTROLLER_IDX_SIGS {
            return Err(KeriError::DeserializeError(format!(
                "expected controller signature group, got {}",
                counter.code()
            )));
        }
        let mut cursor = size;
        let mut sigers = Vec::new();
        for _ in 0..counter.count() {
            let (siger, used) = Siger::extract(&atc[cursor..]).map_err(shortage)?;
            sigers.push(siger);
            cursor += used;
        }
        Ok((sigers, cursor))
    }
}

fn merge(out: &mut Attachments, inner: Attachments) {
    out.sigers.extend(inner.sigers);
    out.wigers.extend(inner.wigers);
    out.cigars.extend(inner.cigars);
    out.trqs.extend(inner.trqs);
    out.tlgs.extend(inner.tlgs);
    out.sscs.extend(inner.sscs);
}

fn shortage(err: MatterError) -> KeriError {
    match err {
        MatterError::Shortage { needed } => KeriError::ShortageError { needed },
        other => KeriError::MatterError(other),
    }
}

fn extract_verfer(atc: &[u8]) -> Result<(Verfer, usize)> {
    let (_, size) = BaseMatter::extract(atc).map_err(shortage)?;
    let text = std::str::from_utf8(&atc[..size])
        .map_err(|_| KeriError::DeserializeError("non-utf8 attachment".to_string()))?;
    Ok((Verfer::from_qb64(text)?, size))
}

fn extract_prefixer(atc: &[u8]) -> Result<(Prefixer, usize)> {
    let (_, size) = BaseMatter::extract(atc).map_err(shortage)?;
    let text = std::str::from_utf8(&atc[..size])
        .map_err(|_| KeriError::DeserializeError("non-utf8 attachment".to_string()))?;
    Ok((Prefixer::from_qb64(text)?, size))
}

fn extract_saider(atc: &[u8]) -> Result<(Saider, usize)> {
    let (_, size) = BaseMatter::extract(atc).map_err(shortage)?;
    let text = std::str::from_utf8(&atc[..size])
        .map_err(|_| KeriError::DeserializeError("non-utf8 attachment".to_string()))?;
    Ok((Saider::from_qb64(text)?, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cesr::Matter;
    use crate::core::eventing::test_kit::{signers, witness_signers};
    use crate::core::eventing::{incept, messagize};
    use crate::core::Kinds;
    use crate::db::basing::Baser;
    use crate::db::dbing::MemDBer;
    use std::sync::Arc;

    fn kevery() -> Kevery {
        Kevery::new(Arc::new(Baser::new(Arc::new(MemDBer::new("test")))))
    }

    #[test]
    fn test_parse_inception_message() {
        let sgrs = signers(1);
        let signer = &sgrs[0];
        let serder = incept(&[signer.verfer().qb64()], Kinds::Json).unwrap();
        let siger = signer.sign_indexed(serder.raw(), 0).unwrap();
        let msg = messagize(&serder, Some(&[siger]), None, None, None, false).unwrap();

        let mut kvy = kevery();
        let parser = Parser::new();
        let mut ims = msg.clone();
        parser.parse(&mut ims, &mut kvy, None).unwrap();
        assert!(ims.is_empty());
        assert!(kvy.kevers.contains_key(serder.pre().unwrap()));
        assert_eq!(kvy.cues.len(), 1);
    }

    #[test]
    fn test_parse_partial_stream_resumes() {
        let sgrs = signers(1);
        let signer = &sgrs[0];
        let serder = incept(&[signer.verfer().qb64()], Kinds::Json).unwrap();
        let siger = signer.sign_indexed(serder.raw(), 0).unwrap();
        let msg = messagize(&serder, Some(&[siger]), None, None, None, false).unwrap();

        let mut kvy = kevery();
        let parser = Parser::new();

        // deliver in two fragments; nothing is consumed until complete
        let split = serder.size() + 10;
        let mut ims = msg[..split].to_vec();
        parser.parse(&mut ims, &mut kvy, None).unwrap();
        assert_eq!(ims.len(), split);
        assert!(kvy.kevers.is_empty());

        ims.extend_from_slice(&msg[split..]);
        parser.parse(&mut ims, &mut kvy, None).unwrap();
        assert!(ims.is_empty());
        assert!(kvy.kevers.contains_key(serder.pre().unwrap()));
    }

    #[test]
    fn test_parse_pipelined_message() {
        let sgrs = signers(1);
        let signer = &sgrs[0];
        let serder = incept(&[signer.verfer().qb64()], Kinds::Json).unwrap();
        let siger = signer.sign_indexed(serder.raw(), 0).unwrap();
        let msg = messagize(&serder, Some(&[siger]), None, None, None, true).unwrap();

        let mut kvy = kevery();
        let parser = Parser::new();
        let mut ims = msg;
        parser.parse(&mut ims, &mut kvy, None).unwrap();
        assert!(ims.is_empty());
        assert!(kvy.kevers.contains_key(serder.pre().unwrap()));
    }

    #[test]
    fn test_parse_receipt_couples() {
        let sgrs = signers(1);
        let signer = &sgrs[0];
        let wsgrs = witness_signers(1);
        let wsigner = &wsgrs[0];
        let serder = incept(&[signer.verfer().qb64()], Kinds::Json).unwrap();
        let siger = signer.sign_indexed(serder.raw(), 0).unwrap();

        let mut kvy = kevery();
        let parser = Parser::new();
        let mut ims = messagize(&serder, Some(&[siger]), None, None, None, false).unwrap();
        parser.parse(&mut ims, &mut kvy, None).unwrap();

        // receipt for the accepted inception with one couple
        let rct = crate::core::eventing::receipt(
            serder.pre().unwrap(),
            0,
            serder.said().unwrap(),
            Kinds::Json,
        )
        .unwrap();
        let cigar = wsigner.sign(serder.raw()).unwrap();
        let mut ims = messagize(&rct, None, None, None, Some(&[cigar]), false).unwrap();
        parser.parse(&mut ims, &mut kvy, None).unwrap();
        assert!(ims.is_empty());

        let dgkey = crate::db::dbing::dg_key(serder.pre().unwrap(), serder.said().unwrap());
        assert_eq!(kvy.db.rcts.cnt(&dgkey).unwrap(), 1);
    }

    #[test]
    fn test_parse_two_messages_in_one_stream() {
        let sigs = signers(2);
        let serder0 = incept(&[sigs[0].verfer().qb64()], Kinds::Json).unwrap();
        let serder1 = incept(&[sigs[1].verfer().qb64()], Kinds::Json).unwrap();
        let mut ims = Vec::new();
        for (serder, signer) in [(&serder0, &sigs[0]), (&serder1, &sigs[1])] {
            let siger = signer.sign_indexed(serder.raw(), 0).unwrap();
            ims.extend(messagize(serder, Some(&[siger]), None, None, None, false).unwrap());
        }

        let mut kvy = kevery();
        Parser::new().parse(&mut ims, &mut kvy, None).unwrap();
        assert!(ims.is_empty());
        assert_eq!(kvy.kevers.len(), 2);
    }
}
