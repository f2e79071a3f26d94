//! Store trait definitions ("ports") implemented by salescoach-infra.
//!
//! All traits use native async fn in traits (RPITIT, Rust 2024 edition)
//! and return `RepositoryError` results.

pub mod access;
pub mod badge;
pub mod promo;
pub mod session;
pub mod user;

pub use access::AccessStore;
pub use badge::BadgeStore;
pub use promo::PromoStore;
pub use session::SessionStore;
pub use user::UserStore;
