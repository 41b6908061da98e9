pub mod runner;
pub mod state;

pub use runner::{DrainOutcome, SkipReason, SyncRunner, SyncTrigger};
pub use state::{SyncHandle, SyncState};
