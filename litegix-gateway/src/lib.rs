//! HTTP host adapter for the litegix Firecracker task driver.
//!
//! Exposes the driver's task lifecycle operations as a JSON API so an
//! orchestrator agent can drive microVM tasks over HTTP.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod routes;
