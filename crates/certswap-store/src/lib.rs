//! certswap store: the appliance configuration store as an abstract capability.
//!
//! The rotation core talks to a [`ConfigStore`] only. Two implementations
//! live here: [`panos::PanosClient`] for the PAN-OS XML API over HTTPS, and
//! [`memory::MemoryStore`], an in-memory tree with a call log used for tests
//! and rehearsals.

pub mod error;
pub mod memory;
pub mod panos;
pub mod path;
pub mod store;
pub mod tree;

pub use error::StoreError;
pub use path::ConfigPath;
pub use store::{
    CommitScope, CommitSubmission, ConfigStore, ExportCategory, ImportCategory, ImportRequest,
    JobHandle, JobState, SystemInfo, WriteMode,
};
pub use tree::ConfigNode;
