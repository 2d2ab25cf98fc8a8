//! forecast-eval — evaluation harness for a probabilistic forecaster.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod dataset;
pub mod scoring;
pub mod engine;
pub mod forecaster;
pub mod tracking;
