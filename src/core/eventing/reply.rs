//! Reply message builder.

use crate::cesr::saider::{Saider, DUMMY};
use crate::core::serdering::{Sad, Sadder, Serder};
use crate::core::{Ilk, Kinds};
use crate::errors::Result;
use crate::help;

/// Builds a reply (`rpy`) message for `route` carrying payload `data`.
/// The datetime stamp orders replies at the same natural key: strictly
/// later wins.
pub fn reply(route: &str, data: Sad, stamp: Option<&str>, kind: Kinds) -> Result<Serder> {
    let dt = stamp
        .map(|s| s.to_string())
        .unwrap_or_else(help::now_iso8601);
    let mut sad = Sadder::new();
    sad.insert("v".to_string(), Sad::from(""));
    sad.insert("t".to_string(), Sad::from(Ilk::Rpy.as_str()));
    sad.insert("d".to_string(), Sad::String(DUMMY.to_string().repeat(44)));
    sad.insert("dt".to_string(), Sad::String(dt));
    sad.insert("r".to_string(), Sad::from(route));
    sad.insert("a".to_string(), data);

    let sized = Serder::from_sad(sad, kind)?;
    let (_, filled) = Saider::saidify(sized.ked(), kind, None, "d")?;
    Serder::from_sad(filled, kind)
}

/// Builds the payload for an `/end/role/add` or `/end/role/cut` reply.
pub fn end_role_data(cid: &str, role: &str, eid: &str) -> Sad {
    let mut a = indexmap::IndexMap::new();
    a.insert("cid".to_string(), Sad::from(cid));
    a.insert("role".to_string(), Sad::from(role));
    a.insert("eid".to_string(), Sad::from(eid));
    Sad::Object(a)
}

/// Builds the payload for a `/loc/scheme` reply.
pub fn loc_scheme_data(eid: &str, scheme: &str, url: &str) -> Sad {
    let mut a = indexmap::IndexMap::new();
    a.insert("eid".to_string(), Sad::from(eid));
    a.insert("scheme".to_string(), Sad::from(scheme));
    a.insert("url".to_string(), Sad::from(url));
    Sad::Object(a)
}
