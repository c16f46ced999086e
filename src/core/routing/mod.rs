//! Reply message routing: the route table and the latest-wins reply
//! store.

pub mod revery;
pub mod router;

pub use revery::Revery;
pub use router::Router;
