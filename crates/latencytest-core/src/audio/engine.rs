//! Latency harness: host streams wired to a [`LatencySession`]
//!
//! Owns the platform host, the synthesized tone clip and both streams. The
//! caller sets it up in three steps (engine, playback stream, capture stream)
//! and can then run sessions with [`AudioLatencyHarness::start`] and poll
//! [`AudioLatencyHarness::fetch_results`].

use std::sync::Arc;

use thiserror::Error;

use super::host::{AudioHost, CaptureStream, Clock, MonotonicClock, PcmFormat, PlaybackStream};
use super::resample::{self, PlaybackBuffer};
use super::tone::ToneClip;
use crate::config::HarnessConfig;
use crate::stats::summary::LatencyReport;

pub use super::host::StreamError;
pub use super::session::{LatencySession, StartOutcome};

/// Errors that can occur while driving the harness
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    #[error("Audio engine has not been created")]
    EngineNotCreated,

    #[error("{0} stream has not been created")]
    StreamNotReady(&'static str),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Round-trip latency harness over an [`AudioHost`]
pub struct AudioLatencyHarness<H: AudioHost> {
    host: H,
    config: HarnessConfig,
    clip: ToneClip,
    session: Arc<LatencySession>,
    playback: Option<Arc<dyn PlaybackStream>>,
    capture: Option<Arc<dyn CaptureStream>>,
    /// Rate the playback stream actually runs at
    playback_rate: u32,
    engine_created: bool,
}

impl<H: AudioHost> AudioLatencyHarness<H> {
    /// Create a harness using the monotonic system clock
    pub fn new(host: H, config: HarnessConfig) -> Self {
        Self::with_clock(host, config, Arc::new(MonotonicClock::new()))
    }

    /// Create a harness with an explicit time source
    pub fn with_clock(host: H, config: HarnessConfig, clock: Arc<dyn Clock>) -> Self {
        let config = config.sanitized();
        let clip = ToneClip::synthesize(config.clip_frames, config.tone_hz, config.synthesis_rate_hz);
        let session = Arc::new(LatencySession::new(&config, clock));
        Self {
            host,
            config,
            clip,
            session,
            playback: None,
            capture: None,
            playback_rate: 0,
            engine_created: false,
        }
    }

    /// Initialize the platform audio engine. Repeated calls are no-ops.
    pub fn create_engine(&mut self) -> Result<(), HarnessError> {
        if self.engine_created {
            return Ok(());
        }
        self.host.create_engine()?;
        self.engine_created = true;
        tracing::info!(device = ?self.host.device_name(), "Audio engine created");
        Ok(())
    }

    /// Open the playback stream
    ///
    /// `sample_rate_hz == 0` opens it at the clip's native rate. The rate the
    /// host actually granted is remembered so [`start`](Self::start) can
    /// up-sample the clip to it.
    pub fn create_playback_stream(
        &mut self,
        sample_rate_hz: u32,
        buffer_hint_bytes: u32,
    ) -> Result<(), HarnessError> {
        if !self.engine_created {
            return Err(HarnessError::EngineNotCreated);
        }

        let stream_rate = if sample_rate_hz == 0 {
            self.config.clip_rate_hz
        } else {
            sample_rate_hz
        };

        let session = Arc::clone(&self.session);
        let stream = self.host.open_playback(
            PcmFormat::mono(stream_rate),
            buffer_hint_bytes,
            Box::new(move |queue: &dyn PlaybackStream, drained: Arc<[i16]>| {
                session.on_playback_complete(queue, drained)
            }),
        )?;

        let effective_rate = stream.sample_rate();
        if effective_rate != stream_rate {
            tracing::warn!(
                requested = stream_rate,
                effective = effective_rate,
                "Playback stream opened at a different rate"
            );
        }
        self.playback = Some(stream);
        self.playback_rate = effective_rate;
        tracing::info!(
            sample_rate = effective_rate,
            buffer_hint_bytes,
            "Playback stream created"
        );
        Ok(())
    }

    /// Open the capture stream at the configured window rate
    pub fn create_capture_stream(&mut self) -> Result<(), HarnessError> {
        if !self.engine_created {
            return Err(HarnessError::EngineNotCreated);
        }

        let session = Arc::clone(&self.session);
        let result = self.host.open_capture(
            PcmFormat::mono(self.config.capture_rate_hz),
            self.session.buffers(),
            Box::new(move |queue: &dyn CaptureStream| {
                session.on_capture_complete(queue)
            }),
        );

        match result {
            Ok(stream) => {
                self.capture = Some(stream);
                tracing::info!(
                    sample_rate = self.config.capture_rate_hz,
                    window_frames = self.config.capture_frames,
                    "Capture stream created"
                );
                Ok(())
            }
            Err(e) => {
                self.capture = None;
                tracing::error!(error = %e, "Failed to create capture stream");
                Err(e.into())
            }
        }
    }

    /// Begin a latency session
    ///
    /// Returns [`StartOutcome::Busy`] if a session is already in flight; the
    /// playback buffer is only adapted once admission is won.
    pub fn start(&self) -> Result<StartOutcome, HarnessError> {
        let playback = self
            .playback
            .as_deref()
            .ok_or(HarnessError::StreamNotReady("Playback"))?;
        let capture = self
            .capture
            .as_deref()
            .ok_or(HarnessError::StreamNotReady("Capture"))?;

        Ok(self
            .session
            .start(capture, playback, || self.playback_buffer())?)
    }

    fn playback_buffer(&self) -> PlaybackBuffer {
        if self.playback_rate == self.config.clip_rate_hz {
            return PlaybackBuffer::from_clip(&self.clip);
        }
        match resample::adapt(&self.clip, self.config.clip_rate_hz, self.playback_rate) {
            Some(buffer) => buffer,
            None => {
                tracing::warn!(
                    clip_rate = self.config.clip_rate_hz,
                    playback_rate = self.playback_rate,
                    "Playback rate is not an integer multiple of the clip rate, playing clip unadapted"
                );
                PlaybackBuffer::from_clip(&self.clip)
            }
        }
    }

    /// Snapshot of the results ring (always `result_capacity` long, zeros unused)
    pub fn fetch_results(&self) -> Vec<i64> {
        self.session.fetch_results()
    }

    /// Onsets detected in the current or last session
    pub fn onset_count(&self) -> usize {
        self.session.results().onset_count()
    }

    /// Whether a session currently holds admission
    pub fn is_running(&self) -> bool {
        self.session.is_active()
    }

    /// Suppress onset reporting while `muted`
    pub fn set_muted(&self, muted: bool) {
        self.session.set_muted(muted);
    }

    /// The shared session state
    pub fn session(&self) -> &Arc<LatencySession> {
        &self.session
    }

    /// The synthesized tone clip
    pub fn clip(&self) -> &ToneClip {
        &self.clip
    }

    /// Active configuration (after sanitizing)
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The platform host
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Summarize the current or last session
    pub fn report(&self) -> LatencyReport {
        LatencyReport::new(self.host.device_name(), self.fetch_results(), self.onset_count())
    }

    /// Abort any session and destroy every stream and the engine
    ///
    /// Safe to call repeatedly and without a prior setup.
    pub fn shutdown(&mut self) {
        self.session.force_release();
        self.capture = None;
        self.playback = None;
        self.host.destroy();
        if self.engine_created {
            self.engine_created = false;
            tracing::info!("Audio engine shut down");
        }
    }
}

impl<H: AudioHost> Drop for AudioLatencyHarness<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
