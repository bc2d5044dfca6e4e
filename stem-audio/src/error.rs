//! Engine error type

use crate::decoder::DecodeError;
use stem_library::{SongId, StoreError};
use thiserror::Error;

/// Errors surfaced by the audio engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// A track of the song has no bytes in the track store
    #[error("Track {filename} of song {song_id} is not in the track store")]
    TrackMissing { song_id: SongId, filename: String },

    /// A track's bytes could not be decoded
    #[error("Failed to decode {filename}: {source}")]
    Decode {
        filename: String,
        #[source]
        source: DecodeError,
    },

    /// Playback requested with no decoded song active
    #[error("No audio loaded")]
    NoAudioLoaded,

    #[error("Track store error: {0}")]
    Store(#[from] StoreError),

    /// The cache was cleared while this song was decoding
    #[error("Decode of song {0} discarded by a cache clear")]
    Discarded(SongId),

    #[error("Audio engine has been disposed")]
    Disposed,
}
