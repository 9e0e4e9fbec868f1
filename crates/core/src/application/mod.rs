// Application layer - orchestration over domain types and ports

pub mod bus;
pub mod debounce;
pub mod recovery;
pub mod runner;
pub mod store;
pub mod system;

pub use bus::{BusConfig, ChannelInfo, JobBus};
pub use debounce::DebouncedWriter;
pub use recovery::{RecoveryAction, RecoveryService};
pub use runner::{JobRunner, RunnerConfig};
pub use store::{JobStore, StorageStats, StoreConfig};
pub use system::{JobSystem, SystemConfig};
