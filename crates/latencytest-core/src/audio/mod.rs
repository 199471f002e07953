//! Audio processing module
//!
//! This module contains the latency measurement pipeline:
//! - Tone clip synthesis ([`tone`])
//! - Integer up-sampling of the clip to the output rate ([`resample`])
//! - Ping-pong capture buffer bookkeeping ([`cycler`])
//! - Debounced amplitude onset detection ([`onset`])
//! - The session state machine driven by stream completions ([`session`])
//! - Host collaborator traits ([`host`]) with a cpal backend ([`cpal_host`])
//!   and a deterministic simulated backend ([`sim`])
//! - The caller-facing harness ([`engine`])

pub mod cpal_host;
pub mod cycler;
pub mod engine;
pub mod host;
pub mod onset;
pub mod resample;
pub mod session;
pub mod sim;
pub mod tone;
