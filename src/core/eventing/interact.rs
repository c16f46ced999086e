//! Interaction event builder.

use crate::cesr::saider::{Saider, DUMMY};
use crate::core::serdering::{Sad, Sadder, Serder};
use crate::core::{Ilk, Kinds};
use crate::errors::{KeriError, Result};

/// Builds an interaction (`ixn`) event anchoring `data` seals.
pub fn interact(
    pre: &str,
    dig: &str,
    sn: u64,
    data: Vec<Sad>,
    kind: Kinds,
) -> Result<Serder> {
    if sn < 1 {
        return Err(KeriError::ValueError(format!("invalid sn = {sn} for ixn")));
    }
    let mut sad = Sadder::new();
    sad.insert("v".to_string(), Sad::from(""));
    sad.insert("t".to_string(), Sad::from(Ilk::Ixn.as_str()));
    sad.insert("d".to_string(), Sad::String(DUMMY.to_string().repeat(44)));
    sad.insert("i".to_string(), Sad::from(pre));
    sad.insert("s".to_string(), Sad::String(format!("{sn:x}")));
    sad.insert("p".to_string(), Sad::from(dig));
    sad.insert("a".to_string(), Sad::Array(data));

    let sized = Serder::from_sad(sad, kind)?;
    let (_, filled) = Saider::saidify(sized.ked(), kind, None, "d")?;
    Serder::from_sad(filled, kind)
}
