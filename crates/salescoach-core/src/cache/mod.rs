//! Runtime caches: the per-user cooldown guard for expensive LLM tasks.

pub mod cooldown;

pub use cooldown::{AcquireOutcome, CooldownGuard, CooldownPermit};
