//! Persistence: abstract ordered key/value store, namespaced sub-database
//! wrappers, and the Baser aggregate holding every named sub-database.

pub mod basing;
pub mod dbing;
pub mod koming;
pub mod subing;
