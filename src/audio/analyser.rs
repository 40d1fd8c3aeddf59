//! Live output spectrum for the UI visualizer.
//!
//! Mirrors the behaviour of a browser `AnalyserNode`: a 256-point FFT over
//! the most recent output samples, Blackman window, 0.8 smoothing, and
//! magnitudes mapped from [-100 dB, -30 dB] onto 0..=255. Reads are cheap
//! enough to run once per display refresh and never touch playback state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::ring_buffer::{analyser_tap, TapConsumer, TapProducer};

/// FFT window length.
pub const FFT_SIZE: usize = 256;

/// Number of magnitude bins returned per read.
pub const BIN_COUNT: usize = FFT_SIZE / 2;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

struct AnalyserState {
    tap: Option<TapConsumer>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    blackman: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

struct Shared {
    state: Mutex<AnalyserState>,
    live: AtomicBool,
}

/// Cloneable, thread-safe handle for polling the spectrum.
#[derive(Clone)]
pub struct Spectrum {
    shared: Arc<Shared>,
}

impl Spectrum {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let state = AnalyserState {
            tap: None,
            window: Vec::with_capacity(FFT_SIZE * 2),
            smoothed: vec![0.0; BIN_COUNT],
            blackman: blackman_window(FFT_SIZE),
            fft,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                live: AtomicBool::new(false),
            }),
        }
    }

    /// Start a fresh tap for a newly opened output device. Samples still
    /// buffered from a previous device are discarded.
    pub fn attach(&self) -> TapProducer {
        let (producer, consumer) = analyser_tap(None);
        match self.shared.state.lock() {
            Ok(mut state) => {
                state.tap = Some(consumer);
                state.clear_history();
            }
            Err(e) => tracing::error!("Failed to lock analyser state: {}", e),
        }
        producer
    }

    /// Whether a session is listening or speaking. While not live, reads
    /// return the idle breathing pattern.
    pub fn set_live(&self, live: bool) {
        self.shared.live.store(live, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Current magnitude bins, one byte per bin.
    pub fn read(&self) -> Vec<u8> {
        if !self.is_live() {
            return idle_pattern(now_ms(), BIN_COUNT);
        }
        match self.shared.state.lock() {
            Ok(mut state) => state.analyse(),
            Err(e) => {
                tracing::error!("Failed to lock analyser state: {}", e);
                vec![0; BIN_COUNT]
            }
        }
    }

    /// Drop any buffered samples and smoothing history (after a flush).
    pub fn reset(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            if let Some(tap) = state.tap.as_mut() {
                tap.clear();
            }
            state.clear_history();
        }
    }
}

impl Default for Spectrum {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyserState {
    fn clear_history(&mut self) {
        self.window.clear();
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }

    fn analyse(&mut self) -> Vec<u8> {
        if let Some(tap) = self.tap.as_mut() {
            tap.drain_into(&mut self.window, FFT_SIZE);
        }

        // Zero-pad at the front until a full window has been played.
        let pad = FFT_SIZE - self.window.len();
        let mut buffer: Vec<Complex<f32>> = (0..FFT_SIZE)
            .map(|i| {
                let sample = if i < pad { 0.0 } else { self.window[i - pad] };
                Complex::new(sample * self.blackman[i], 0.0)
            })
            .collect();
        self.fft.process(&mut buffer);

        let scale = 1.0 / FFT_SIZE as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        self.smoothed
            .iter_mut()
            .zip(buffer.iter())
            .map(|(prev, bin)| {
                let magnitude = bin.norm() * scale;
                *prev = SMOOTHING * *prev + (1.0 - SMOOTHING) * magnitude;
                let db = if *prev > 0.0 {
                    20.0 * prev.log10()
                } else {
                    f32::NEG_INFINITY
                };
                (255.0 * (db - MIN_DECIBELS) / range).clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

fn blackman_window(len: usize) -> Vec<f32> {
    let n = len as f32;
    (0..len)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / n;
            0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
        })
        .collect()
}

/// Gentle pulse shown while no session is active.
pub fn idle_pattern(t_ms: f64, bins: usize) -> Vec<u8> {
    (0..bins)
        .map(|i| (10.0 + (t_ms / 200.0 + i as f64).sin() * 5.0) as u8)
        .collect()
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}
