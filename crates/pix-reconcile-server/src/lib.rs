//! HTTP surface for the PIX payment trust boundary.
//!
//! Accepts signed PIX processor webhooks, runs magic-link admin login with
//! encrypted session cookies, and exposes on-chain reconciliation. All of
//! the security-relevant logic lives in [`pix_reconcile`]; this crate wires
//! it to actix-web.
//!
//! # Modules
//!
//! - [`routes`]: HTTP endpoints (health, metrics, webhook, auth, reconcile)
//! - [`config`]: environment configuration, validated once at startup
//! - [`bootstrap`]: builds [`AppState`](state::AppState) from the config
//! - [`auth`]: session cookie handling and admin checks
//! - [`delivery`]: signed hand-off of magic links to the mail relay
//! - [`error`]: handler errors and their HTTP mapping
//! - [`metrics`]: Prometheus counters and histograms

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
