//! Infrastructure layer for Salescoach.
//!
//! Contains implementations of the repository traits defined in
//! `salescoach-core` (SQLite storage), the concrete LLM providers behind
//! the task router, and configuration loading.

pub mod config;
pub mod llm;
pub mod sqlite;
