//! LLM abstraction layer: provider trait, dynamic dispatch, task routing.

pub mod box_provider;
pub mod provider;
pub mod router;

pub use box_provider::BoxLlmProvider;
pub use provider::LlmProvider;
pub use router::TaskRouter;
