// Port Layer - Interfaces for external collaborators

pub mod channel;
pub mod durable_store;
pub mod id_provider;
pub mod stage_executor;
pub mod time_provider;

// Re-exports
pub use channel::{ChannelError, EventChannel};
pub use durable_store::{DurableStore, StoreError};
pub use id_provider::{IdProvider, UuidProvider};
pub use stage_executor::{
    cancel_pair, CancelHandle, CancelToken, FnStageExecutor, StageContext, StageError,
    StageExecutor, StageHooks, StageOutcome, StageRegistry,
};
pub use time_provider::{SystemTimeProvider, TimeProvider};
