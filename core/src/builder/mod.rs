//! # Builders
//!
//! Challenge script, tree, address and transaction builders.

pub mod address;
pub mod script;
pub mod sighash;
pub mod transaction;
