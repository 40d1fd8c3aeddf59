//! Microphone capture via cpal.
//!
//! Opens the default (or named) input device at its native rate, down-mixes
//! to mono, resamples to 16 kHz and hands out fixed 4096-sample frames.
//! Frames are delivered from cpal's audio thread through a callback; once a
//! stream is stopped the callback is never invoked again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{error, info};

use super::codec::{AudioFrame, FRAME_SAMPLES, INPUT_SAMPLE_RATE};
use crate::error::AudioError;

/// Receives each completed frame.
pub type FrameCallback = Box<dyn FnMut(AudioFrame) + Send>;

/// A source of microphone audio.
pub trait InputDevice: Send {
    /// Open the device and start delivering frames to `on_frame`.
    fn start(&mut self, on_frame: FrameCallback) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// A running capture. Dropping it also stops it.
pub trait CaptureStream: Send {
    /// Stop delivering frames and release the device. Idempotent.
    fn stop(&mut self);
}

/// List available input device names.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// List available output device names.
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

// ── Frame assembly ──────────────────────────────────────────────────

/// Turns arbitrary device callbacks into fixed-size 16 kHz mono frames.
pub struct FrameAssembler {
    channels: u16,
    resampler: LinearResampler,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(native_rate: u32, channels: u16) -> Self {
        Self {
            channels: channels.max(1),
            resampler: LinearResampler::new(native_rate, INPUT_SAMPLE_RATE),
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
        }
    }

    /// Feed one interleaved device buffer; returns every frame it completed.
    pub fn push(&mut self, data: &[f32]) -> Vec<AudioFrame> {
        let mono = to_mono(data, self.channels);
        self.resampler.process(&mono, &mut self.pending);

        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_SAMPLES {
            frames.push(AudioFrame::new(self.pending.drain(..FRAME_SAMPLES).collect()));
        }
        frames
    }

    /// Samples waiting for the next frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Streaming linear resampler for mono f32 audio.
///
/// The read position and the last input sample carry over between calls,
/// so splitting a signal into buffers of any size yields the same output as
/// resampling it in one piece.
struct LinearResampler {
    /// Input samples per output sample.
    step: f64,
    /// Position of the next output sample, relative to the start of the
    /// next input buffer. Lies in `[-1, 0)` once a sample has been seen.
    pos: f64,
    /// Last sample of the previous buffer; index -1 of the next one.
    last: Option<f32>,
}

impl LinearResampler {
    fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if from_rate == 0 || to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };
        Self {
            step,
            pos: 0.0,
            last: None,
        }
    }

    /// Resample `input` and append the result to `out`.
    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        if self.step == 1.0 {
            out.extend_from_slice(input);
            return;
        }

        let len = input.len() as f64;
        let sample = |i: i64| -> f32 {
            if i < 0 {
                self.last.unwrap_or(input[0])
            } else {
                input[(i as usize).min(input.len() - 1)]
            }
        };

        let mut pos = self.pos;
        while pos <= len - 1.0 {
            let idx0 = pos.floor();
            let frac = (pos - idx0) as f32;
            let s0 = sample(idx0 as i64);
            let s1 = sample(idx0 as i64 + 1);
            out.push(s0 + frac * (s1 - s0));
            pos += self.step;
        }

        self.pos = pos - len;
        self.last = input.last().copied();
    }
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

// ── cpal microphone ─────────────────────────────────────────────────

/// Wrapper to make `cpal::Stream` Send.
///
/// `cpal::Stream` is `!Send` on some platforms due to internal raw pointers,
/// but it is only held to keep capture alive and dropped on stop.
struct SendStream(cpal::Stream);

// SAFETY: the stream is never accessed from another thread; it is only
// stored and eventually dropped.
unsafe impl Send for SendStream {}

/// Default or named microphone.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

/// Resolved info about the audio input we will use.
struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
}

fn resolve_device(device_name: Option<&str>) -> Result<CaptureConfig, AudioError> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| {
                AudioError::DeviceUnavailable(format!("Failed to enumerate input devices: {e}"))
            })?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceUnavailable(format!("Input device not found: {name}")))?
    } else {
        host.default_input_device().ok_or_else(|| {
            AudioError::DeviceUnavailable("No default input device available".to_string())
        })?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device.default_input_config().map_err(|e| {
        AudioError::DeviceUnavailable(format!("Failed to get default input config: {e}"))
    })?;

    let stream_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        native_rate = stream_config.sample_rate.0,
        channels = stream_config.channels,
        "Input device config (will resample to {}Hz mono if needed)",
        INPUT_SAMPLE_RATE,
    );

    Ok(CaptureConfig {
        device,
        stream_config,
    })
}

impl InputDevice for CpalMicrophone {
    fn start(&mut self, mut on_frame: FrameCallback) -> Result<Box<dyn CaptureStream>, AudioError> {
        let cfg = resolve_device(self.device_name.as_deref())?;
        let mut assembler =
            FrameAssembler::new(cfg.stream_config.sample_rate.0, cfg.stream_config.channels);

        let open = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&open);

        let stream = cfg
            .device
            .build_input_stream(
                &cfg.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if !gate.load(Ordering::Acquire) {
                        return;
                    }
                    for frame in assembler.push(data) {
                        // Re-check so a stop between frames drops the rest.
                        if !gate.load(Ordering::Acquire) {
                            return;
                        }
                        on_frame(frame);
                    }
                },
                move |err| {
                    error!("Audio input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to start input stream: {e}")))?;

        info!("Audio capture started");
        Ok(Box::new(CpalCapture {
            open,
            stream: Some(SendStream(stream)),
        }))
    }
}

struct CpalCapture {
    open: Arc<AtomicBool>,
    stream: Option<SendStream>,
}

impl CaptureStream for CpalCapture {
    fn stop(&mut self) {
        self.open.store(false, Ordering::Release);
        if let Some(SendStream(stream)) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("Failed to pause input stream: {}", e);
            }
            drop(stream);
            info!("Audio capture stopped");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_mono_averages_channels() {
        assert_eq!(to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    fn resample(input: &[f32], from_rate: u32) -> Vec<f32> {
        let mut out = Vec::new();
        LinearResampler::new(from_rate, INPUT_SAMPLE_RATE).process(input, &mut out);
        out
    }

    #[test]
    fn test_resample_48k_to_16k() {
        let input: Vec<f32> = (0..48).map(|i| i as f32).collect();
        let out = resample(&input, 48_000);
        assert_eq!(out.len(), 16);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 3.0);
        assert_eq!(out[15], 45.0);
        assert_eq!(resample(&input, INPUT_SAMPLE_RATE), input);
    }

    #[test]
    fn test_resample_is_continuous_across_buffers() {
        // A ramp resamples exactly, so output k must equal k * step.
        let input: Vec<f32> = (0..44_100).map(|i| i as f32 * 0.001).collect();
        let step = 44_100.0 / INPUT_SAMPLE_RATE as f64;

        let mut resampler = LinearResampler::new(44_100, INPUT_SAMPLE_RATE);
        let mut out = Vec::new();
        for buffer in input.chunks(512) {
            resampler.process(buffer, &mut out);
        }

        let whole = resample(&input, 44_100);
        assert!((out.len() as i64 - 16_000).abs() <= 1, "got {}", out.len());
        assert!((out.len() as i64 - whole.len() as i64).abs() <= 1);
        for (k, &s) in out.iter().enumerate() {
            let expected = (k as f64 * step * 0.001) as f32;
            assert!((s - expected).abs() < 1e-3, "sample {k}: {s} != {expected}");
        }
    }

    #[test]
    fn test_assembler_emits_full_frames_only() {
        let mut asm = FrameAssembler::new(INPUT_SAMPLE_RATE, 1);
        assert!(asm.push(&vec![0.1; FRAME_SAMPLES - 1]).is_empty());
        assert_eq!(asm.buffered(), FRAME_SAMPLES - 1);

        let frames = asm.push(&vec![0.2; FRAME_SAMPLES + 10]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_SAMPLES);
        assert_eq!(frames[0].samples()[FRAME_SAMPLES - 1], 0.2);
        assert_eq!(asm.buffered(), 11);
    }

    #[test]
    fn test_assembler_downmixes_and_resamples() {
        // One second of 48 kHz stereo becomes 16000 mono samples.
        let mut asm = FrameAssembler::new(48_000, 2);
        let mut frames = Vec::new();
        for _ in 0..10 {
            frames.extend(asm.push(&vec![0.5; 4800 * 2]));
        }
        assert_eq!(frames.len(), 16_000 / FRAME_SAMPLES);
        assert_eq!(frames.len() * FRAME_SAMPLES + asm.buffered(), 16_000);
        assert!(frames[0].samples().iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }
}
