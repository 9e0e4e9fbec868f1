// Domain Layer - Pure business logic and entities

pub mod activity;
pub mod command;
pub mod error;
pub mod event;
pub mod snapshot;
pub mod stage;

// Re-exports
pub use activity::{ActivityEntry, ActivityLevel};
pub use command::{CommandResponse, JobCommand};
pub use error::DomainError;
pub use event::JobEvent;
pub use snapshot::{HistoryEntry, JobId, JobSnapshot, JobStatus, QueueMeta, StageUnits};
pub use stage::{weighted_percent, StageDescriptor, StageId};
