//! Observability: tracing subscriber setup and GenAI span attribute
//! constants shared across the workspace.

pub mod genai_attrs;
pub mod tracing_setup;
