//! # Claimq Core
//!
//! Error definitions and logging setup shared by every claimq crate.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::*;
