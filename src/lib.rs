//! relay - provider migration and resilience controller for outbound
//! messaging.
//!
//! Routes outbound messages to one of two interchangeable backend
//! providers while tolerating transient provider failures, shifting live
//! traffic between providers gradually and reversibly, and surfacing
//! degraded provider health automatically.
//!
//! The core pieces, leaf to root:
//!
//! - [`reliability`] - error classification, circuit breaking, retries
//! - [`routing`] - percentage-based sticky traffic routing
//! - [`migration`] - persistent flags, state machine, audit trail
//! - [`health`] - metrics counters, threshold alerts, rollback monitor
//! - [`dispatch`] - the per-message control flow tying them together
//! - [`daemon`] - the HTTP operator API served by `relay serve`

pub mod commands;
pub mod config;
pub mod constants;
pub mod daemon;
pub mod dispatch;
pub mod health;
pub mod migration;
pub mod provider;
pub mod reliability;
pub mod routing;
