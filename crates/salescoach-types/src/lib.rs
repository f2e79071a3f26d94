//! Shared domain types for Salescoach.
//!
//! This crate contains the core domain types used across the Salescoach
//! platform: users, training sessions, access grants, promo codes, scenario
//! configuration, and the LLM request/response shapes.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod access;
pub mod error;
pub mod llm;
pub mod promo;
pub mod scenario;
pub mod session;
pub mod user;
