//! Query message builder.

use crate::cesr::saider::{Saider, DUMMY};
use crate::core::serdering::{Sad, Sadder, Serder};
use crate::core::{Ilk, Kinds};
use crate::errors::Result;
use crate::help;

/// Builds a query (`qry`) message for `route` with route-specific
/// parameters `qry` and return route `rr`.
pub fn query(
    route: &str,
    rr: &str,
    qry: Sad,
    stamp: Option<&str>,
    kind: Kinds,
) -> Result<Serder> {
    let dt = stamp
        .map(|s| s.to_string())
        .unwrap_or_else(help::now_iso8601);
    let mut sad = Sadder::new();
    sad.insert("v".to_string(), Sad::from(""));
    sad.insert("t".to_string(), Sad::from(Ilk::Qry.as_str()));
    sad.insert("d".to_string(), Sad::String(DUMMY.to_string().repeat(44)));
    sad.insert("dt".to_string(), Sad::String(dt));
    sad.insert("r".to_string(), Sad::from(route));
    sad.insert("rr".to_string(), Sad::from(rr));
    sad.insert("q".to_string(), qry);

    let sized = Serder::from_sad(sad, kind)?;
    let (_, filled) = Saider::saidify(sized.ked(), kind, None, "d")?;
    Serder::from_sad(filled, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_query() {
        let mut q = IndexMap::new();
        q.insert(
            "i".to_string(),
            Sad::from("DWzwEHHzq7K0gzQPYGGwTmuupUhPx5_yZ-Wk1x4ejhcc"),
        );
        let serder = query(
            "logs",
            "log/processor",
            Sad::Object(q),
            Some("2021-01-01T00:00:00.000000+00:00"),
            Kinds::Json,
        )
        .unwrap();
        assert_eq!(serder.ilk().unwrap(), Ilk::Qry);
        assert_eq!(serder.route().unwrap(), "logs");
        let keys: Vec<&String> = serder.ked().keys().collect();
        assert_eq!(keys, ["v", "t", "d", "dt", "r", "rr", "q"]);
        let saider = Saider::from_qb64(serder.said().unwrap()).unwrap();
        assert!(saider.verify(serder.ked(), Kinds::Json, "d"));
    }
}
