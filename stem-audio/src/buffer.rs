//! Decoded PCM buffers shared between the cache and the render thread

use stem_library::SongId;
use std::sync::Arc;

/// PCM audio decoded from one track
///
/// Samples are interleaved stereo f32. Immutable once created; shared by
/// reference between the decode cache and every voice playing it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl DecodedBuffer {
    /// Channel count of every decoded buffer
    pub const CHANNELS: usize = 2;

    /// Wrap interleaved stereo samples
    ///
    /// A trailing half frame is dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        samples.truncate(samples.len() - samples.len() % Self::CHANNELS);
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / Self::CHANNELS
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Left/right sample pair at `frame`
    #[inline]
    pub fn frame(&self, frame: usize) -> (f32, f32) {
        let i = frame * Self::CHANNELS;
        (self.samples[i], self.samples[i + 1])
    }
}

/// One decoded track of a song, addressed by its track key
#[derive(Debug, Clone)]
pub struct DecodedTrack {
    pub key: String,
    pub buffer: Arc<DecodedBuffer>,
}

/// All decoded tracks of one song, in catalog order
#[derive(Debug, Clone)]
pub struct SongBuffers {
    song_id: SongId,
    tracks: Vec<DecodedTrack>,
}

impl SongBuffers {
    pub fn new(song_id: SongId, tracks: Vec<DecodedTrack>) -> Self {
        Self { song_id, tracks }
    }

    pub fn song_id(&self) -> SongId {
        self.song_id
    }

    pub fn get(&self, key: &str) -> Option<&Arc<DecodedBuffer>> {
        self.tracks.iter().find(|t| t.key == key).map(|t| &t.buffer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecodedTrack> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Song length in seconds
    ///
    /// Every track is assumed to be the same length, so the first one is
    /// authoritative.
    pub fn duration(&self) -> f64 {
        self.tracks
            .first()
            .map(|t| t.buffer.duration())
            .unwrap_or(0.0)
    }
}
