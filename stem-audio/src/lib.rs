//! Audio engine for stems - synchronized multitrack playback
//!
//! This module provides the playback pipeline:
//! - Decoder: Track bytes to PCM via Symphonia, resampled with Rubato
//! - Cache: Bounded, all-or-nothing store of decoded songs
//! - Mixer: Per-track gain stages with volume, mute and solo
//! - Transport: Play/pause/stop/seek on one shared timeline
//! - Render: Software audio graph driven by the output callback

mod buffer;
mod cache;
mod context;
mod decoder;
mod engine;
mod error;
mod mix;
mod mixer;
mod render;
mod transport;

#[cfg(test)]
mod test_support;

pub use buffer::{DecodedBuffer, DecodedTrack, SongBuffers};
pub use cache::DecodeCache;
pub use context::{AudioContext, GainNode, PlaybackSource};
pub use decoder::{AudioDecoder, DecodeError, SymphoniaDecoder};
pub use engine::{AudioEngine, EngineConfig, PreloadHandle};
pub use error::EngineError;
pub use mix::{compose_gains, effective_gain, TrackMixState};
pub use mixer::MixingGraph;
pub use render::{GraphContext, GraphRenderer, GraphSource};
pub use transport::{PlaybackState, Transport};
