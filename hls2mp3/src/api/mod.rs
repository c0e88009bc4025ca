//! HTTP API.
//!
//! Exposes job submission, status polling and artifact download on top of
//! the conversion manager.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
