//! Monitoring HTTP surface
//!
//! An axum [`Router`](axum::Router) exposing queue stats, health and the
//! administrative actions (pause, resume, retry, remove, sweep) behind HTTP
//! Basic auth. The binary decides where to serve it.

mod auth;
mod routes;

pub use auth::{basic_auth, Credentials, REALM};
pub use routes::{router, AdminState, ApiError};
