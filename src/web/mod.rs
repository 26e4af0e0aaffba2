//! HTTP surface: token endpoint and OIDC discovery.

pub mod handler;
pub mod metadata;
pub mod server;

pub use server::{create_router, AppState};
