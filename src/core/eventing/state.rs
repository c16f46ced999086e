//! Key state notice builder.

use crate::core::serdering::{Sad, Sadder, Serder};
use crate::core::Kinds;
use crate::db::basing::KeyStateRecord;
use crate::errors::Result;

/// Builds a key state notice (`ksn`) message from a state record. The
/// `d` field carries the SAID of the latest accepted event, so the body
/// is not separately self-addressed.
pub fn state(ksr: &KeyStateRecord, kind: Kinds) -> Result<Serder> {
    let mut sad = Sadder::new();
    sad.insert("v".to_string(), Sad::from(""));
    sad.insert("i".to_string(), Sad::from(ksr.i.as_str()));
    sad.insert("s".to_string(), Sad::from(ksr.s.as_str()));
    sad.insert("p".to_string(), Sad::from(ksr.p.as_str()));
    sad.insert("d".to_string(), Sad::from(ksr.d.as_str()));
    sad.insert("f".to_string(), Sad::from(ksr.f.as_str()));
    sad.insert("dt".to_string(), Sad::from(ksr.dt.as_str()));
    sad.insert("et".to_string(), Sad::from(ksr.et.as_str()));
    sad.insert("kt".to_string(), Sad::from_json(&ksr.kt));
    sad.insert("k".to_string(), Sad::from_strings(ksr.k.clone()));
    sad.insert("n".to_string(), Sad::from(ksr.n.as_str()));
    sad.insert("bt".to_string(), Sad::from(ksr.bt.as_str()));
    sad.insert("b".to_string(), Sad::from_strings(ksr.b.clone()));
    sad.insert("c".to_string(), Sad::from_strings(ksr.c.clone()));
    let mut ee = indexmap::IndexMap::new();
    ee.insert("s".to_string(), Sad::from(ksr.ee.s.as_str()));
    ee.insert("d".to_string(), Sad::from(ksr.ee.d.as_str()));
    ee.insert("br".to_string(), Sad::from_strings(ksr.ee.br.clone()));
    ee.insert("ba".to_string(), Sad::from_strings(ksr.ee.ba.clone()));
    sad.insert("ee".to_string(), Sad::Object(ee));
    sad.insert("di".to_string(), Sad::from(ksr.di.as_str()));
    Serder::from_sad(sad, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::basing::StateEERecord;

    #[test]
    fn test_state_field_order() {
        let ksr = KeyStateRecord {
            i: "D3pYGFaqnrALTyejaJaGAVhNpSCtqyerPqWVK9ZBNZk0".to_string(),
            s: "4".to_string(),
            p: "EUskHI462CuIMS_gNkcl_QewzrRSKH2p9zHQIO132Z30".to_string(),
            d: "EgNkcl_QewzrRSKH2p9zUskHI462CuIMS_HQIO132Z30".to_string(),
            f: "4".to_string(),
            dt: "2021-01-01T00:00:00.000000+00:00".to_string(),
            et: "ixn".to_string(),
            kt: serde_json::Value::String("1".to_string()),
            k: vec!["D3pYGFaqnrALTyejaJaGAVhNpSCtqyerPqWVK9ZBNZk0".to_string()],
            n: "E9GdMuF9rZZ9uwTjqgiCGA8r2mRsC5SQDHCyOpsW5AqQ".to_string(),
            bt: "2".to_string(),
            b: vec![],
            c: vec![],
            ee: StateEERecord {
                s: "3".to_string(),
                d: "EUskHI462CuIMS_gNkcl_QewzrRSKH2p9zHQIO132Z30".to_string(),
                br: vec![],
                ba: vec![],
            },
            di: String::new(),
        };
        let serder = state(&ksr, Kinds::Json).unwrap();
        let keys: Vec<&String> = serder.ked().keys().collect();
        assert_eq!(
            keys,
            ["v", "i", "s", "p", "d", "f", "dt", "et", "kt", "k", "n", "bt", "b", "c", "ee", "di"]
        );
        assert_eq!(
            serder.said().unwrap(),
            "EgNkcl_QewzrRSKH2p9zUskHI462CuIMS_HQIO132Z30"
        );
        assert_eq!(serder.sn().unwrap(), 4);
    }
}
