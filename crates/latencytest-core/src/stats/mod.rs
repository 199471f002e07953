//! Latency results storage and summaries

pub mod ring;
pub mod summary;
