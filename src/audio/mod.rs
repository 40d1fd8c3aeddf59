//! Audio capture, playback scheduling, codec and output analysis.

pub mod analyser;
pub mod capture;
pub mod codec;
pub mod playback;
pub mod ring_buffer;
pub mod scheduler;

pub use analyser::Spectrum;
pub use capture::{list_input_devices, list_output_devices, CaptureStream, CpalMicrophone, InputDevice};
pub use codec::{AudioFrame, PlaybackChunk};
pub use playback::{AudioOutput, OutputDevice, Playback, RodioDevice};
pub use scheduler::{ChunkId, Clock, MonotonicClock};
