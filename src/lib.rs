//! Latencytest - round-trip audio latency tester
//!
//! This library re-exports the latency harness, host backends, configuration
//! and result summaries from `latencytest-core`.

pub use latencytest_core::audio;
pub use latencytest_core::config;
pub use latencytest_core::stats;

pub use latencytest_core::{AudioLatencyHarness, HarnessConfig, HarnessError, StartOutcome};
pub use latencytest_core::{BUILD_DATE, VERSION};
