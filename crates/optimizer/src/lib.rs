//! Volume optimizer service
//!
//! Exposes the decision engine over HTTP together with health and
//! Prometheus endpoints.

pub mod api;
pub mod config;
