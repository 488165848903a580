//! Observability utilities for injection-driven tests.
//!
//! This module provides subscriber setup for the engine's `tracing` output.

mod tracing;

pub use self::tracing::TracingConfig;
