//! certswap rotation: replace a TLS certificate across an appliance's
//! configuration without leaving it half-updated.
//!
//! The [`WorkflowOrchestrator`] drives backup, selection, usage discovery,
//! upload, consumer updates, an operator-scoped commit and a read-back,
//! tracking every outcome in a [`RotationState`].

pub mod audit;
pub mod backup;
pub mod commit;
pub mod config;
pub mod error;
pub mod inventory;
pub mod layout;
pub mod orchestrator;
pub mod report;
pub mod state;
pub mod update;
pub mod upload;
pub mod usage;
pub mod verify;

pub use config::RotationConfig;
pub use error::{ReferenceUpdateError, RotationError, UploadError};
pub use inventory::{
    CertificateInventory, CertificateSelector, CertificateSummary, CommonNameSelector,
    NamedSelector, Selection,
};
pub use orchestrator::WorkflowOrchestrator;
pub use report::{RotationReport, RunOutcome};
pub use state::{
    RotationState, TargetIdentity, UpdateOutcome, UsageKind, UsageReference, UsageSet,
    WorkflowPhase,
};
pub use upload::CertificateMaterial;
