//! Agent speech playback via rodio.
//!
//! [`Playback`] is the session-owned half: it places chunks on the gapless
//! timeline, tracks what is still pending, and flushes on barge-in. The
//! speaker itself lives behind [`AudioOutput`]; the rodio implementation
//! runs a dedicated thread that owns the `OutputStream` and a `Sink`, and
//! reports end-of-chunk through an `EmptyCallback` queued after each chunk.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use tokio::sync::mpsc;

use super::analyser::Spectrum;
use super::codec::PlaybackChunk;
use super::ring_buffer::TapProducer;
use super::scheduler::{ChunkId, Clock, PlaybackScheduler, ScheduledChunk};
use crate::error::AudioError;

/// Upper bound on how long opening the speaker may hold up the caller.
pub const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Invoked (on the audio thread) when a chunk has been fully played.
pub type ChunkFinished = Arc<dyn Fn(ChunkId) + Send + Sync>;

/// An opened speaker.
pub trait AudioOutput: Send {
    /// Queue a chunk right behind whatever is already queued.
    fn play(&mut self, id: ChunkId, chunk: PlaybackChunk);

    /// Stop and discard everything queued or playing.
    fn flush(&mut self);
}

/// Something that can open a speaker for one session.
pub trait OutputDevice: Send {
    /// Called from the session controller task. Blocks until the device
    /// reports ready, which is normally a few milliseconds; the rodio
    /// implementation gives up after [`DEVICE_OPEN_TIMEOUT`].
    fn open(
        &mut self,
        tap: TapProducer,
        on_finished: ChunkFinished,
    ) -> Result<Box<dyn AudioOutput>, AudioError>;
}

// ── Session-side pipeline ───────────────────────────────────────────

/// Playback state for one session.
pub struct Playback {
    scheduler: PlaybackScheduler,
    clock: Box<dyn Clock>,
    output: Box<dyn AudioOutput>,
    spectrum: Spectrum,
}

impl Playback {
    pub fn new(output: Box<dyn AudioOutput>, clock: Box<dyn Clock>, spectrum: Spectrum) -> Self {
        Self {
            scheduler: PlaybackScheduler::new(),
            clock,
            output,
            spectrum,
        }
    }

    /// Schedule a chunk at `max(next_playback_time, now)` and hand it to
    /// the speaker.
    pub fn enqueue(&mut self, chunk: PlaybackChunk) -> ScheduledChunk {
        let now = self.clock.now();
        let placed = self.scheduler.schedule(chunk.duration(), now);
        tracing::trace!(
            id = placed.id,
            start_ms = placed.start.as_millis() as u64,
            duration_ms = placed.duration.as_millis() as u64,
            "Chunk scheduled"
        );
        self.output.play(placed.id, chunk);
        placed
    }

    /// Record end-of-play for a chunk. Returns `true` when it was the last
    /// pending one.
    pub fn chunk_finished(&mut self, id: ChunkId) -> bool {
        self.scheduler.finish(id)
    }

    /// Drop everything scheduled or playing and restart the timeline now.
    pub fn flush(&mut self) -> usize {
        self.output.flush();
        self.spectrum.reset();
        let dropped = self.scheduler.flush(self.clock.now());
        if dropped > 0 {
            tracing::debug!(dropped, "Playback flushed");
        }
        dropped
    }

    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn next_playback_time(&self) -> Duration {
        self.scheduler.next_playback_time()
    }
}

// ── rodio speaker ───────────────────────────────────────────────────

enum OutputCommand {
    Play { id: ChunkId, chunk: PlaybackChunk },
    Flush,
    Shutdown,
}

/// Default or named output device, opened through rodio.
#[derive(Debug, Clone)]
pub struct RodioDevice {
    device_name: Option<String>,
    volume: f32,
}

impl RodioDevice {
    pub fn new(device_name: Option<String>, volume: f32) -> Self {
        Self {
            device_name,
            volume: volume.clamp(0.0, 2.0),
        }
    }
}

impl OutputDevice for RodioDevice {
    fn open(
        &mut self,
        tap: TapProducer,
        on_finished: ChunkFinished,
    ) -> Result<Box<dyn AudioOutput>, AudioError> {
        let output = RodioOutput::spawn(self.device_name.clone(), self.volume, tap, on_finished)?;
        Ok(Box::new(output))
    }
}

/// Handle to the playback thread.
struct RodioOutput {
    tx: mpsc::UnboundedSender<OutputCommand>,
}

impl RodioOutput {
    fn spawn(
        device_name: Option<String>,
        volume: f32,
        tap: TapProducer,
        on_finished: ChunkFinished,
    ) -> Result<Self, AudioError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        thread::Builder::new()
            .name("astra-playback".into())
            .spawn(move || {
                run_output_thread(device_name, volume, rx, ready_tx, tap, on_finished);
            })
            .map_err(|e| AudioError::DeviceUnavailable(format!("playback thread: {}", e)))?;

        wait_ready(&ready_rx, DEVICE_OPEN_TIMEOUT)?;
        Ok(Self { tx })
    }
}

/// Wait for the playback thread's startup report. On timeout the thread is
/// abandoned; it exits on its own once the command sender is dropped.
fn wait_ready(
    ready_rx: &std::sync::mpsc::Receiver<Result<(), String>>,
    timeout: Duration,
) -> Result<(), AudioError> {
    use std::sync::mpsc::RecvTimeoutError;

    match ready_rx.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AudioError::DeviceUnavailable(e)),
        Err(RecvTimeoutError::Timeout) => Err(AudioError::DeviceUnavailable(format!(
            "output device did not open within {:?}",
            timeout
        ))),
        Err(RecvTimeoutError::Disconnected) => Err(AudioError::DeviceUnavailable(
            "playback thread exited during startup".into(),
        )),
    }
}

impl AudioOutput for RodioOutput {
    fn play(&mut self, id: ChunkId, chunk: PlaybackChunk) {
        if self.tx.send(OutputCommand::Play { id, chunk }).is_err() {
            tracing::warn!(id, "Playback thread gone, dropping chunk");
        }
    }

    fn flush(&mut self) {
        let _ = self.tx.send(OutputCommand::Flush);
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        // Fire and forget: the thread stops the sink and exits on its own.
        let _ = self.tx.send(OutputCommand::Shutdown);
    }
}

/// Open the audio output stream for a named or default device.
fn open_output_stream(
    output_device_name: Option<&str>,
) -> Result<(OutputStream, OutputStreamHandle), String> {
    if let Some(name) = output_device_name {
        let host = cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| format!("Failed to enumerate output devices: {}", e))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));

        match device {
            Some(dev) => {
                tracing::info!(device = %name, "Using configured output device");
                OutputStream::try_from_device(&dev)
                    .map_err(|e| format!("Failed to open output device '{}': {}", name, e))
            }
            None => {
                tracing::warn!(
                    device = %name,
                    "Configured output device not found, falling back to default"
                );
                OutputStream::try_default()
                    .map_err(|e| format!("No audio output device available: {}", e))
            }
        }
    } else {
        OutputStream::try_default().map_err(|e| format!("No audio output device available: {}", e))
    }
}

fn new_sink(handle: &OutputStreamHandle, volume: f32) -> Result<Sink, String> {
    let sink = Sink::try_new(handle).map_err(|e| format!("Failed to create audio sink: {}", e))?;
    sink.set_volume(volume);
    Ok(sink)
}

/// Body of the playback thread. Owns the (non-`Send`) output stream.
fn run_output_thread(
    device_name: Option<String>,
    volume: f32,
    mut rx: mpsc::UnboundedReceiver<OutputCommand>,
    ready_tx: std::sync::mpsc::Sender<Result<(), String>>,
    tap: TapProducer,
    on_finished: ChunkFinished,
) {
    let opened = open_output_stream(device_name.as_deref())
        .and_then(|(stream, handle)| new_sink(&handle, volume).map(|sink| (stream, handle, sink)));

    let (_stream, handle, mut sink) = match opened {
        Ok(parts) => {
            let _ = ready_tx.send(Ok(()));
            parts
        }
        Err(e) => {
            tracing::error!("Playback device failed to open: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    tracing::info!("Playback output ready");

    let tap = Arc::new(Mutex::new(tap));

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            OutputCommand::Play { id, chunk } => {
                let source = SamplesBuffer::new(
                    chunk.channel_count(),
                    chunk.sample_rate(),
                    chunk.interleaved(),
                );
                sink.append(Tapped::new(source, Arc::clone(&tap)));
                let cb = Arc::clone(&on_finished);
                sink.append(EmptyCallback::<f32>::new(Box::new(move || cb(id))));
            }
            OutputCommand::Flush => {
                sink.stop();
                // A fresh sink guarantees nothing from the old queue resumes.
                match new_sink(&handle, volume) {
                    Ok(fresh) => sink = fresh,
                    Err(e) => tracing::error!("Failed to recreate sink after flush: {}", e),
                }
            }
            OutputCommand::Shutdown => break,
        }
    }

    sink.stop();
    tracing::debug!("Playback thread exiting");
}

/// Source adapter that copies the first channel into the analyser tap as
/// the device pulls samples.
struct Tapped<S> {
    inner: S,
    tap: Arc<Mutex<TapProducer>>,
    channels: u16,
    index: usize,
    batch: Vec<f32>,
}

const TAP_BATCH: usize = 256;

impl<S: Source<Item = f32>> Tapped<S> {
    fn new(inner: S, tap: Arc<Mutex<TapProducer>>) -> Self {
        let channels = inner.channels().max(1);
        Self {
            inner,
            tap,
            channels,
            index: 0,
            batch: Vec::with_capacity(TAP_BATCH),
        }
    }

    fn flush_batch(&mut self) {
        // Never wait on the audio thread; a missed batch only dims the bars.
        if let Ok(mut tap) = self.tap.try_lock() {
            tap.push_slice(&self.batch);
        }
        self.batch.clear();
    }
}

impl<S: Source<Item = f32>> Iterator for Tapped<S> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let Some(sample) = self.inner.next() else {
            if !self.batch.is_empty() {
                self.flush_batch();
            }
            return None;
        };
        if self.index % self.channels as usize == 0 {
            self.batch.push(sample);
            if self.batch.len() >= TAP_BATCH {
                self.flush_batch();
            }
        }
        self.index += 1;
        Some(sample)
    }
}

impl<S: Source<Item = f32>> Source for Tapped<S> {
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}
