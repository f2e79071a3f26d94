//! Business logic and repository trait definitions for Salescoach.
//!
//! This crate defines the "ports" (store traits) that the infrastructure
//! layer implements. It depends only on `salescoach-types` -- never on
//! `salescoach-infra` or any database/IO crate.

pub mod cache;
pub mod llm;
pub mod store;
pub mod training;
