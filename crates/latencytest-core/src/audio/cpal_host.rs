//! cpal-backed [`AudioHost`]
//!
//! Buffer queues are emulated on top of cpal's pull callbacks:
//!
//! - Output: the callback drains queued `i16` buffers into every channel of
//!   the device frame and fires the completion callback each time a buffer is
//!   fully consumed. An empty queue plays silence.
//! - Input: channel 0 of each device frame is written into the capture slot at
//!   the head of the queue. When the slot is full it is dequeued and the
//!   completion callback runs before filling continues.
//!
//! Queued buffers reach the device callbacks over bounded `crossbeam_channel`
//! queues, and the play/fill cursors live inside the callback closures, so the
//! device threads never wait on a lock. `clear()` bumps a generation counter
//! and drains the channel; buffers tagged with an older generation, including
//! one the callback is part-way through, are dropped without notification.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::cycler::{CaptureBuffers, CaptureSlot};
use super::host::{
    AudioHost, CaptureCallback, CaptureStream, PcmFormat, PlaybackCallback, PlaybackStream,
    StreamError,
};

fn build_error(e: cpal::BuildStreamError) -> StreamError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            StreamError::DeviceUnavailable("device disconnected".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            StreamError::UnsupportedFormat("stream config not supported".to_string())
        }
        other => StreamError::Backend(other.to_string()),
    }
}

fn play_error(e: cpal::PlayStreamError) -> StreamError {
    StreamError::Backend(e.to_string())
}

fn to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Default input device of the host
    pub is_default_input: bool,
    /// Default output device of the host
    pub is_default_output: bool,
    /// Number of input channels
    pub input_channels: u16,
    /// Number of output channels
    pub output_channels: u16,
    /// Default sample rate, if the device reports one
    pub default_sample_rate: Option<u32>,
}

/// List the devices of the default cpal host
pub fn list_devices() -> Result<Vec<DeviceInfo>, StreamError> {
    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .devices()
        .map_err(|e| StreamError::Backend(e.to_string()))?;

    let mut infos = Vec::new();
    for device in devices {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let input = device.default_input_config().ok();
        let output = device.default_output_config().ok();

        infos.push(DeviceInfo {
            is_default_input: default_input.as_deref() == Some(name.as_str()),
            is_default_output: default_output.as_deref() == Some(name.as_str()),
            input_channels: input.as_ref().map(|c| c.channels()).unwrap_or(0),
            output_channels: output.as_ref().map(|c| c.channels()).unwrap_or(0),
            default_sample_rate: output.or(input).map(|c| c.sample_rate().0),
            name,
        });
    }
    Ok(infos)
}

/// Depth of the hand-off channels between callers and the device callbacks
const QUEUE_DEPTH: usize = 8;

/// Output buffer queue drained by the cpal output callback
///
/// Each queued buffer carries the clear generation it was queued under; the
/// callback drops anything older than the current generation.
pub struct CpalPlaybackQueue {
    tx: Sender<(u64, Arc<[i16]>)>,
    rx: Receiver<(u64, Arc<[i16]>)>,
    generation: AtomicU64,
    sample_rate: u32,
}

impl CpalPlaybackQueue {
    fn new(sample_rate: u32) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(QUEUE_DEPTH);
        Self {
            tx,
            rx,
            generation: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Buffers waiting to play, not counting the one being played
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

impl PlaybackStream for CpalPlaybackQueue {
    fn enqueue(&self, buffer: Arc<[i16]>) -> Result<(), StreamError> {
        let generation = self.generation.load(Ordering::Acquire);
        self.tx.try_send((generation, buffer)).map_err(|e| match e {
            TrySendError::Full(_) => StreamError::Backend("playback queue full".to_string()),
            TrySendError::Disconnected(_) => {
                StreamError::Backend("playback queue closed".to_string())
            }
        })
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clear(&self) -> Result<(), StreamError> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }
}

/// Output callback state, owned by the cpal closure
struct PlaybackRenderer {
    queue: Arc<CpalPlaybackQueue>,
    on_complete: Arc<PlaybackCallback>,
    current: Option<(u64, Arc<[i16]>)>,
    position: usize,
}

impl PlaybackRenderer {
    fn new(queue: Arc<CpalPlaybackQueue>, on_complete: Arc<PlaybackCallback>) -> Self {
        Self {
            queue,
            on_complete,
            current: None,
            position: 0,
        }
    }

    /// Next sample, plus the buffer it finished if any
    fn next_sample(&mut self) -> (i16, Option<Arc<[i16]>>) {
        let generation = self.queue.generation.load(Ordering::Acquire);
        if matches!(&self.current, Some((tag, _)) if *tag != generation) {
            self.current = None;
        }
        while self.current.is_none() {
            match self.queue.rx.try_recv() {
                Ok((tag, buffer)) if tag == generation => {
                    self.current = Some((tag, buffer));
                    self.position = 0;
                }
                Ok(_) => continue,
                Err(_) => return (0, None),
            }
        }

        let Some((_, buffer)) = &self.current else {
            return (0, None);
        };
        let sample = buffer.get(self.position).copied().unwrap_or(0);
        self.position += 1;
        if self.position >= buffer.len() {
            self.position = 0;
            return (sample, self.current.take().map(|(_, buffer)| buffer));
        }
        (sample, None)
    }

    fn render(&mut self, data: &mut [f32], channels: usize) {
        for frame in data.chunks_mut(channels.max(1)) {
            let (sample, finished) = self.next_sample();
            frame.fill(to_f32(sample));
            if let Some(buffer) = finished {
                (*self.on_complete)(&*self.queue, buffer);
            }
        }
    }
}

/// Input buffer queue filled by the cpal input callback
pub struct CpalCaptureQueue {
    tx: Sender<(u64, CaptureSlot)>,
    rx: Receiver<(u64, CaptureSlot)>,
    generation: AtomicU64,
    recording: AtomicBool,
}

impl CpalCaptureQueue {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(QUEUE_DEPTH);
        Self {
            tx,
            rx,
            generation: AtomicU64::new(0),
            recording: AtomicBool::new(false),
        }
    }

    /// Whether the recorder is running
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }
}

impl CaptureStream for CpalCaptureQueue {
    fn enqueue(&self, slot: CaptureSlot) -> Result<(), StreamError> {
        let generation = self.generation.load(Ordering::Acquire);
        self.tx.try_send((generation, slot)).map_err(|e| match e {
            TrySendError::Full(_) => StreamError::Backend("capture queue full".to_string()),
            TrySendError::Disconnected(_) => {
                StreamError::Backend("capture queue closed".to_string())
            }
        })
    }

    fn clear(&self) -> Result<(), StreamError> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    fn set_recording(&self, recording: bool) -> Result<(), StreamError> {
        self.recording.store(recording, Ordering::Release);
        Ok(())
    }
}

/// Input callback state, owned by the cpal closure
struct CaptureWriter {
    queue: Arc<CpalCaptureQueue>,
    buffers: Arc<CaptureBuffers>,
    on_complete: Arc<CaptureCallback>,
    current: Option<(u64, CaptureSlot)>,
    position: usize,
}

impl CaptureWriter {
    fn new(
        queue: Arc<CpalCaptureQueue>,
        buffers: Arc<CaptureBuffers>,
        on_complete: Arc<CaptureCallback>,
    ) -> Self {
        Self {
            queue,
            buffers,
            on_complete,
            current: None,
            position: 0,
        }
    }

    fn ingest(&mut self, data: &[f32], channels: usize) {
        let mut frames = data.chunks(channels.max(1));
        loop {
            if !self.queue.is_recording() {
                self.current = None;
                return;
            }
            let Some(slot) = self.head_slot() else {
                return;
            };
            if !self.fill(slot, &mut frames) {
                return;
            }
            self.current = None;
            (*self.on_complete)(&*self.queue);
        }
    }

    /// Slot being filled, pulling the next one off the queue when needed
    fn head_slot(&mut self) -> Option<CaptureSlot> {
        let generation = self.queue.generation.load(Ordering::Acquire);
        if let Some((tag, slot)) = self.current {
            if tag == generation {
                return Some(slot);
            }
            self.current = None;
        }
        while let Ok((tag, slot)) = self.queue.rx.try_recv() {
            if tag == generation {
                self.current = Some((tag, slot));
                self.position = 0;
                return Some(slot);
            }
        }
        None
    }

    /// Copy frames into `slot`; `true` when it became full
    fn fill<'a>(&mut self, slot: CaptureSlot, frames: &mut impl Iterator<Item = &'a [f32]>) -> bool {
        let start = self.position;
        let written = self.buffers.try_write(slot, |samples| {
            let mut position = start;
            while position < samples.len() {
                let Some(frame) = frames.next() else { break };
                samples[position] = to_i16(frame.first().copied().unwrap_or(0.0));
                position += 1;
            }
            (position, samples.len())
        });

        match written {
            Some((position, frames_per_slot)) => {
                self.position = position;
                position >= frames_per_slot
            }
            None => {
                tracing::debug!(?slot, "capture buffer busy, input dropped");
                false
            }
        }
    }
}

/// [`AudioHost`] over the default cpal host and its default devices
#[derive(Default)]
pub struct CpalHost {
    output_device: Option<Device>,
    device_name: Option<String>,
    output_stream: Option<Stream>,
    input_stream: Option<Stream>,
}

impl CpalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try the requested rate first, then the device default
    fn rates_to_try(requested: u32, device_default: Option<u32>) -> Vec<u32> {
        match device_default {
            Some(rate) if rate != requested => vec![requested, rate],
            _ => vec![requested],
        }
    }
}

impl AudioHost for CpalHost {
    fn create_engine(&mut self) -> Result<(), StreamError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| StreamError::DeviceUnavailable("no default output device".to_string()))?;

        self.device_name = device.name().ok();
        tracing::info!(
            host = ?host.id(),
            device = self.device_name.as_deref().unwrap_or("unknown"),
            "cpal host ready"
        );
        self.output_device = Some(device);
        Ok(())
    }

    fn open_playback(
        &mut self,
        format: PcmFormat,
        buffer_hint_bytes: u32,
        on_complete: PlaybackCallback,
    ) -> Result<Arc<dyn PlaybackStream>, StreamError> {
        let device = self
            .output_device
            .as_ref()
            .ok_or(StreamError::EngineNotCreated)?;

        let default_config = device.default_output_config().ok();
        let channels = default_config.as_ref().map(|c| c.channels()).unwrap_or(2);
        let default_rate = default_config.as_ref().map(|c| c.sample_rate().0);

        let on_complete = Arc::new(on_complete);
        let mut last_error = StreamError::UnsupportedFormat(format!("{} Hz", format.sample_rate));

        for rate in Self::rates_to_try(format.sample_rate, default_rate) {
            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(rate),
                buffer_size: BufferSize::Default,
            };
            let queue = Arc::new(CpalPlaybackQueue::new(rate));
            // Renderer is moved into the closure (lock-free hot path)
            let mut renderer = PlaybackRenderer::new(Arc::clone(&queue), Arc::clone(&on_complete));
            let num_channels = channels as usize;

            match device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render(data, num_channels);
                },
                |err| tracing::error!("Output stream error: {}", err),
                None,
            ) {
                Ok(stream) => {
                    stream.play().map_err(play_error)?;
                    if rate != format.sample_rate {
                        tracing::warn!(
                            requested = format.sample_rate,
                            effective = rate,
                            "Playback rate unsupported, using device default"
                        );
                    }
                    tracing::info!(sample_rate = rate, channels, buffer_hint_bytes, "Output stream started");
                    self.output_stream = Some(stream);
                    return Ok(queue);
                }
                Err(e) => {
                    tracing::warn!("Output rate {} Hz failed: {}", rate, e);
                    last_error = build_error(e);
                }
            }
        }

        Err(last_error)
    }

    fn open_capture(
        &mut self,
        format: PcmFormat,
        buffers: Arc<CaptureBuffers>,
        on_complete: CaptureCallback,
    ) -> Result<Arc<dyn CaptureStream>, StreamError> {
        if self.output_device.is_none() {
            return Err(StreamError::EngineNotCreated);
        }
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| StreamError::DeviceUnavailable("no default input device".to_string()))?;

        let default_config = device.default_input_config().ok();
        let channels = default_config.as_ref().map(|c| c.channels()).unwrap_or(1);
        let default_rate = default_config.as_ref().map(|c| c.sample_rate().0);

        let queue = Arc::new(CpalCaptureQueue::new());
        let on_complete = Arc::new(on_complete);
        let mut last_error = StreamError::UnsupportedFormat(format!("{} Hz", format.sample_rate));

        for rate in Self::rates_to_try(format.sample_rate, default_rate) {
            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(rate),
                buffer_size: BufferSize::Default,
            };
            // Writer is moved into the closure (lock-free hot path)
            let mut writer = CaptureWriter::new(
                Arc::clone(&queue),
                Arc::clone(&buffers),
                Arc::clone(&on_complete),
            );
            let num_channels = channels as usize;

            match device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    writer.ingest(data, num_channels);
                },
                |err| tracing::error!("Input stream error: {}", err),
                None,
            ) {
                Ok(stream) => {
                    stream.play().map_err(play_error)?;
                    if rate != format.sample_rate {
                        tracing::warn!(
                            requested = format.sample_rate,
                            effective = rate,
                            "Capture rate unsupported, windows will be shorter than 1ms"
                        );
                    }
                    tracing::info!(sample_rate = rate, channels, "Input stream started");
                    self.input_stream = Some(stream);
                    return Ok(queue);
                }
                Err(e) => {
                    tracing::warn!("Input rate {} Hz failed: {}", rate, e);
                    last_error = build_error(e);
                }
            }
        }

        Err(last_error)
    }

    fn destroy(&mut self) {
        self.input_stream = None;
        self.output_stream = None;
        if self.output_device.take().is_some() {
            tracing::info!("cpal streams closed");
        }
    }

    fn device_name(&self) -> Option<String> {
        self.device_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_sample_conversion() {
        assert_eq!(to_i16(1.0), 32767);
        assert_eq!(to_i16(-2.0), -32767);
        assert_eq!(to_i16(0.0), 0);
        assert!((to_f32(16384) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rates_to_try() {
        assert_eq!(CpalHost::rates_to_try(16000, Some(48000)), vec![16000, 48000]);
        assert_eq!(CpalHost::rates_to_try(48000, Some(48000)), vec![48000]);
        assert_eq!(CpalHost::rates_to_try(8000, None), vec![8000]);
    }

    fn counting_playback() -> (Arc<PlaybackCallback>, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let on_complete: PlaybackCallback = Box::new(move |_: &dyn PlaybackStream, _: Arc<[i16]>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (Arc::new(on_complete), fired)
    }

    fn counting_capture() -> (Arc<CaptureCallback>, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let on_complete: CaptureCallback = Box::new(move |_: &dyn CaptureStream| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (Arc::new(on_complete), fired)
    }

    #[test]
    fn test_render_drains_queue_into_all_channels() {
        let queue = Arc::new(CpalPlaybackQueue::new(48000));
        let (on_complete, fired) = counting_playback();
        let mut renderer = PlaybackRenderer::new(Arc::clone(&queue), on_complete);
        queue.enqueue(Arc::from(vec![16384i16, -16384])).unwrap();
        assert_eq!(queue.sample_rate(), 48000);

        let mut data = vec![1.0f32; 6];
        renderer.render(&mut data, 2);

        assert_eq!(data, vec![0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(queue.queued(), 0);
    }

    #[test]
    fn test_render_hands_back_buffer_for_requeue() {
        let queue = Arc::new(CpalPlaybackQueue::new(8000));
        let on_complete: PlaybackCallback = Box::new(|stream: &dyn PlaybackStream, drained: Arc<[i16]>| {
            stream.enqueue(drained).unwrap();
        });
        let mut renderer = PlaybackRenderer::new(Arc::clone(&queue), Arc::new(on_complete));
        queue.enqueue(Arc::from(vec![100i16, 200])).unwrap();

        let mut data = vec![0.0f32; 5];
        renderer.render(&mut data, 1);
        assert_eq!(data, vec![to_f32(100), to_f32(200), to_f32(100), to_f32(200), to_f32(100)]);
        assert_eq!(queue.queued(), 0);
    }

    #[test]
    fn test_clear_drops_partly_played_buffer() {
        let queue = Arc::new(CpalPlaybackQueue::new(8000));
        let (on_complete, fired) = counting_playback();
        let mut renderer = PlaybackRenderer::new(Arc::clone(&queue), on_complete);
        queue.enqueue(Arc::from(vec![1000i16; 4])).unwrap();

        let mut data = vec![0.0f32; 2];
        renderer.render(&mut data, 1);
        queue.clear().unwrap();
        queue.enqueue(Arc::from(vec![2000i16])).unwrap();

        renderer.render(&mut data, 1);
        assert_eq!(data, vec![to_f32(2000), 0.0]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_playback_queue_is_bounded() {
        let queue = CpalPlaybackQueue::new(8000);
        for _ in 0..QUEUE_DEPTH {
            queue.enqueue(Arc::from(vec![0i16])).unwrap();
        }
        assert!(matches!(
            queue.enqueue(Arc::from(vec![0i16])),
            Err(StreamError::Backend(_))
        ));
        queue.clear().unwrap();
        assert_eq!(queue.queued(), 0);
    }

    #[test]
    fn test_ingest_fills_slots_in_order() {
        let buffers = Arc::new(CaptureBuffers::new(2));
        let queue = Arc::new(CpalCaptureQueue::new());
        let (on_complete, fired) = counting_capture();
        let mut writer = CaptureWriter::new(Arc::clone(&queue), Arc::clone(&buffers), on_complete);
        queue.enqueue(CaptureSlot::A).unwrap();
        queue.enqueue(CaptureSlot::B).unwrap();

        // not recording: input is dropped
        writer.ingest(&[0.5; 4], 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        queue.set_recording(true).unwrap();
        // stereo input: only channel 0 is kept
        writer.ingest(&[0.5, 0.9, 0.25, 0.9, -0.5, 0.9], 2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(
            buffers.read(CaptureSlot::A, |s| s.to_vec()),
            vec![to_i16(0.5), to_i16(0.25)]
        );

        // the partially filled B slot resumes where it stopped
        writer.ingest(&[-0.25, 0.9], 2);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(
            buffers.read(CaptureSlot::B, |s| s.to_vec()),
            vec![to_i16(-0.5), to_i16(-0.25)]
        );
    }

    #[test]
    fn test_ingest_stops_when_queue_empty() {
        let buffers = Arc::new(CaptureBuffers::new(1));
        let queue = Arc::new(CpalCaptureQueue::new());
        let (on_complete, fired) = counting_capture();
        let mut writer = CaptureWriter::new(Arc::clone(&queue), buffers, on_complete);
        queue.set_recording(true).unwrap();
        queue.enqueue(CaptureSlot::A).unwrap();

        writer.ingest(&[0.1; 8], 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ingest_requeue_from_callback() {
        let buffers = Arc::new(CaptureBuffers::new(1));
        let queue = Arc::new(CpalCaptureQueue::new());
        let on_complete: CaptureCallback = Box::new(|stream: &dyn CaptureStream| {
            stream.enqueue(CaptureSlot::A).unwrap();
        });
        let mut writer = CaptureWriter::new(Arc::clone(&queue), Arc::clone(&buffers), Arc::new(on_complete));
        queue.set_recording(true).unwrap();
        queue.enqueue(CaptureSlot::A).unwrap();

        writer.ingest(&[0.1, 0.2, 0.3], 1);
        assert_eq!(buffers.read(CaptureSlot::A, |s| s[0]), to_i16(0.3));
        // the slot re-queued by the last completion is already at the head
        assert_eq!(queue.rx.len(), 0);
        assert_eq!(writer.current.map(|(_, slot)| slot), Some(CaptureSlot::A));
    }

    #[test]
    fn test_clear_abandons_partly_filled_slot() {
        let buffers = Arc::new(CaptureBuffers::new(2));
        let queue = Arc::new(CpalCaptureQueue::new());
        let (on_complete, fired) = counting_capture();
        let mut writer = CaptureWriter::new(Arc::clone(&queue), Arc::clone(&buffers), on_complete);
        queue.set_recording(true).unwrap();
        queue.enqueue(CaptureSlot::A).unwrap();

        writer.ingest(&[0.5], 1);
        queue.clear().unwrap();
        queue.enqueue(CaptureSlot::B).unwrap();
        writer.ingest(&[0.25, 0.25], 1);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(buffers.read(CaptureSlot::B, |s| s.to_vec()), vec![to_i16(0.25); 2]);
    }

    #[test]
    fn test_list_devices_does_not_panic() {
        // CI machines usually have no audio devices
        match list_devices() {
            Ok(devices) => {
                for device in &devices {
                    println!(
                        "  - {} (in:{}, out:{})",
                        device.name, device.input_channels, device.output_channels
                    );
                }
            }
            Err(e) => println!("No audio devices available: {}", e),
        }
    }
}
