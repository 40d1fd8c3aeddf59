//! Lock-free SPSC tap between the output device and the analyser.
//!
//! The playback thread writes every sample it hands to the speaker; the
//! analyser drains whatever has accumulated when the UI polls for a
//! spectrum. If the UI stops polling, the tap fills up and new samples are
//! dropped instead of blocking the audio thread.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Half a second of 24 kHz output is plenty for a 256-point window.
const DEFAULT_CAPACITY: usize = 12_000;

/// Writer half, lives on the playback thread.
pub struct TapProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Reader half, lives inside the analyser.
pub struct TapConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a matched producer/consumer pair.
pub fn analyser_tap(capacity: Option<usize>) -> (TapProducer, TapConsumer) {
    let cap = capacity.unwrap_or(DEFAULT_CAPACITY);
    let rb = HeapRb::<f32>::new(cap);
    let (prod, cons) = rb.split();
    (TapProducer { inner: prod }, TapConsumer { inner: cons })
}

impl TapProducer {
    /// Push one sample; returns `false` if the tap is full.
    pub fn push(&mut self, sample: f32) -> bool {
        self.inner.try_push(sample).is_ok()
    }

    /// Push a slice, returning how many samples fit.
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

impl TapConsumer {
    /// Number of samples waiting.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Move everything waiting into `window`, keeping only the newest
    /// `window_len` samples.
    pub fn drain_into(&mut self, window: &mut Vec<f32>, window_len: usize) {
        let n = self.available();
        if n == 0 {
            return;
        }
        let mut buf = vec![0.0f32; n];
        let read = self.inner.pop_slice(&mut buf);
        buf.truncate(read);
        window.extend_from_slice(&buf);
        if window.len() > window_len {
            let excess = window.len() - window_len;
            window.drain(..excess);
        }
    }

    /// Throw away everything waiting.
    pub fn clear(&mut self) {
        let n = self.available();
        self.inner.skip(n);
    }
}
