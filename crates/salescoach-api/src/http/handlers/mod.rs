//! HTTP request handlers for the REST API.

pub mod access;
pub mod profile;
pub mod promo;
pub mod run;
pub mod status;
