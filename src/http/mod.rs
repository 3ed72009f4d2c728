//! HTTP interface: webhook intake and subscription verification.
//!
//! The surface is deliberately small. `GET /webhooks` answers the platform's
//! subscription handshake; `POST /webhooks` verifies, enqueues, and
//! acknowledges deliveries. All rule processing happens off the request path
//! in the delivery task.

/// Shared request state.
pub mod context;

pub(crate) mod handle_webhooks;

/// Router construction and middleware.
pub mod server;

pub use context::*;
pub use server::*;
