//! wgprov-service - Provisioning Facade
//!
//! Wires the profile store, credential generator and peer reconciler
//! into the two user-facing flows (provision, reissue), reports every
//! outcome to an [`AuditSink`], and owns process-level concerns:
//! settings loading and logging bootstrap.
//!
//! The chat-bot front end, authentication and role resolution live
//! outside this workspace and call in through [`ProvisioningService`].

mod audit;
mod logging;
mod provisioner;
mod settings;

pub use audit::{AuditEvent, AuditSink, MemoryAudit, TracingAudit};
pub use logging::init as init_logging;
pub use provisioner::{ProvisionOutcome, ProvisioningService, ServiceError};
pub use settings::{Settings, SettingsError};
