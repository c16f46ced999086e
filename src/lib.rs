//! KERI (Key Event Receipt Infrastructure) core library.
//!
//! Provides the CESR primitives, event serialization, the Kever/Kevery
//! key event validation machinery with escrows, receipts, and the
//! latest-wins reply store, over an abstract ordered key/value store.

mod errors;

pub use crate::errors::{KeriError, MatterError};

pub mod cesr;
pub mod core;
pub mod db;
pub mod help;

pub use crate::cesr::Matter;

/// Initializes the underlying crypto library. Must be called once before
/// any signing or verification.
pub fn init() -> Result<(), KeriError> {
    sodiumoxide::init()
        .map_err(|_| KeriError::ValueError("failed to initialize sodiumoxide".to_string()))
}
