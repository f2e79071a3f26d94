//! Training run orchestration: classification, progress, rewards, and the
//! per-(user, bot) session state machine.

pub mod analyzer;
pub mod coordinator;
pub mod progress;
pub mod rewards;

pub use coordinator::TrainingCoordinator;
