//! Receipt message builder.

use crate::core::serdering::{Sad, Sadder, Serder};
use crate::core::{Ilk, Kinds};
use crate::errors::Result;

/// Builds a receipt (`rct`) for the event at (pre, sn) with SAID `said`.
/// The receipt body carries no signatures; attestations are attached as
/// CESR groups.
pub fn receipt(pre: &str, sn: u64, said: &str, kind: Kinds) -> Result<Serder> {
    let mut sad = Sadder::new();
    sad.insert("v".to_string(), Sad::from(""));
    sad.insert("t".to_string(), Sad::from(Ilk::Rct.as_str()));
    sad.insert("d".to_string(), Sad::from(said));
    sad.insert("i".to_string(), Sad::from(pre));
    sad.insert("s".to_string(), Sad::String(format!("{sn:x}")));
    Serder::from_sad(sad, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt() {
        let said = "E4hrx06bab0CN3rZoT-9NMtidfOH8PnIP0IvqsuUQOZ0";
        let serder = receipt(
            "DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc",
            2,
            said,
            Kinds::Json,
        )
        .unwrap();
        assert_eq!(serder.ilk().unwrap(), Ilk::Rct);
        // the d field is the receipted event's said, not a said of the
        // receipt body
        assert_eq!(serder.said().unwrap(), said);
        assert_eq!(serder.sn().unwrap(), 2);
        let keys: Vec<&String> = serder.ked().keys().collect();
        assert_eq!(keys, ["v", "t", "d", "i", "s"]);
    }
}
