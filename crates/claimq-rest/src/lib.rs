//! # Claimq REST
//!
//! Administrative REST API using Axum.
//! Provides endpoints to feed the queue, drive the processor, inspect the
//! store, plus health checks and Prometheus metrics.

pub mod controllers;
pub mod middleware;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;
