//! # Claimq Server Library
//!
//! Wires the job store, the processor and the admin API together, plus the
//! HTTP adapters for the extraction and persistence services.

pub mod app;
pub mod clients;

pub use app::{build, build_store, Application};
pub use clients::{HttpExtractor, HttpResultSink};
