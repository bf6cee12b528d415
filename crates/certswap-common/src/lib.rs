//! Shared vocabulary for the certswap crates: error codes, default paths,
//! JSON persistence and credential redaction.

pub mod error;
pub mod paths;
pub mod persist;
pub mod redact;
pub mod test;
