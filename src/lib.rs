//! # replyflow
//!
//! replyflow is a webhook-driven social automation service built in Rust. It
//! receives signed webhook deliveries from a social platform, normalizes them
//! into canonical events, matches those events against user-defined
//! automation rules, and dispatches the configured responses (direct
//! messages, comment replies, likes, follows, story replies).
//!
//! ## Architecture Overview
//!
//! The service is a pipeline of small, independently testable stages:
//!
//! ### Intake
//! - `GET /webhooks` answers the platform's subscription verification
//!   handshake
//! - `POST /webhooks` verifies the HMAC delivery signature over the raw
//!   body, enqueues the envelope, and acknowledges immediately
//!
//! ### Processing
//! - **Normalizer**: fans a delivery envelope out into canonical events,
//!   isolating malformed entries
//! - **Matcher**: selects active rules by scope and trigger, ordered by
//!   priority then age
//! - **Conditions**: per-rule eligibility checks (keyword excludes, user
//!   lists, time windows, follower ranges)
//! - **Gate**: cooldown and trailing-24h cap enforcement backed by an
//!   injectable cooldown store and the execution log
//! - **Executor**: dispatches each action independently, with optional
//!   deferred delivery, and records every attempt
//!
//! ## Configuration
//!
//! The service is configured via environment variables. Key variables:
//! - `WEBHOOK_APP_SECRET`: HMAC secret for delivery signatures
//! - `WEBHOOK_VERIFY_TOKEN`: subscription handshake token
//! - `DATABASE_URL`: PostgreSQL connection string
//! - `PLATFORM_ACCESS_TOKEN`: bearer token for outbound platform API calls
//! - `COOLDOWN_STORE`: `memory` or `redis` (requires `REDIS_URL`)
//! - `CONDITION_TIMEZONE`: IANA timezone for time-of-day conditions
//!
//! ## Error Handling
//!
//! All error strings use the format: `error-replyflow-<domain>-<number>
//! <message>: <details>`

/// Per-rule eligibility checks evaluated after trigger matching.
pub mod conditions;

/// Configuration management, loaded from environment variables.
pub mod config;

pub(crate) mod constants;

/// Error types, one enum per domain.
pub mod errors;

/// Canonical event model and the closed trigger/action kind enums.
pub mod event;

/// Action dispatch against the platform API.
pub mod executor;

/// Cooldown and daily-cap enforcement.
pub mod gate;

/// HTTP server: webhook intake and subscription verification.
pub mod http;

/// Rule matching by scope and trigger.
pub mod matcher;

/// Webhook payload normalization into canonical events.
pub mod normalizer;

/// End-to-end delivery processing.
pub mod pipeline;

/// Queue adapter abstractions for the delivery work queue.
pub mod queue_adapter;

/// Delivery signature verification and the subscription handshake.
pub mod signature;

/// Storage layer: rules and the append-only execution log.
pub mod storage;

/// Background task management and the delivery consumer.
pub mod tasks;

#[cfg(test)]
pub mod test_helpers;
