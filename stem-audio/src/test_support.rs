//! In-memory store and decoders shared by the unit tests

use crate::buffer::DecodedBuffer;
use crate::decoder::{AudioDecoder, DecodeError};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stem_library::{SongId, StoreError, Track, TrackCategory, TrackStore};

pub const SAMPLE_RATE: u32 = 48000;

/// Track store backed by a map
#[derive(Default)]
pub struct MemoryStore {
    tracks: Mutex<HashMap<(SongId, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, song_id: SongId, key: &str, bytes: Vec<u8>) {
        self.tracks.lock().insert((song_id, key.to_string()), bytes);
    }

    /// Store a song whose tracks all decode to `seconds` of audio
    pub fn insert_song(&self, song_id: SongId, keys: &[&str], seconds: f64) -> Vec<Track> {
        for key in keys {
            self.insert(song_id, key, tone(seconds));
        }
        tracks(keys)
    }
}

impl TrackStore for MemoryStore {
    fn track_bytes(&self, song_id: SongId, filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tracks.lock().get(&(song_id, filename.to_string())).cloned())
    }
}

pub fn track(key: &str) -> Track {
    Track {
        original_filename: key.to_string(),
        converted_filename: key.to_string(),
        display_name: key.to_string(),
        category: TrackCategory::default(),
        size_mb: 0.0,
        duration_seconds: 0.0,
        url: format!("https://assets.test/{key}"),
    }
}

pub fn tracks(keys: &[&str]) -> Vec<Track> {
    keys.iter().map(|k| track(k)).collect()
}

/// Bytes [`ToneDecoder`] turns into `seconds` of constant signal
pub fn tone(seconds: f64) -> Vec<u8> {
    let frames = (seconds * SAMPLE_RATE as f64).round() as usize;
    format!("tone:{frames}").into_bytes()
}

/// Bytes [`ToneDecoder`] refuses
pub fn corrupt() -> Vec<u8> {
    b"corrupt".to_vec()
}

/// Decodes `tone:<frames>` payloads and counts calls
#[derive(Default)]
pub struct ToneDecoder {
    decodes: AtomicUsize,
}

impl ToneDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl AudioDecoder for ToneDecoder {
    fn decode(&self, bytes: &[u8], _hint: Option<&str>) -> Result<DecodedBuffer, DecodeError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);

        let text = std::str::from_utf8(bytes).map_err(|e| DecodeError::Decode(e.to_string()))?;
        let frames: usize = text
            .strip_prefix("tone:")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| DecodeError::Decode(format!("bad payload {text:?}")))?;
        if frames == 0 {
            return Err(DecodeError::Empty);
        }

        Ok(DecodedBuffer::new(vec![0.1; frames * 2], SAMPLE_RATE))
    }
}

/// [`ToneDecoder`] that reports each decode and then holds until released
pub struct GatedDecoder {
    inner: ToneDecoder,
    started: Sender<()>,
    gate: Receiver<()>,
}

impl GatedDecoder {
    /// Returns the decoder, a receiver of start notices and a release sender
    pub fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let decoder = Self {
            inner: ToneDecoder::new(),
            started: started_tx,
            gate: gate_rx,
        };
        (decoder, started_rx, gate_tx)
    }

    pub fn decodes(&self) -> usize {
        self.inner.decodes()
    }
}

impl AudioDecoder for GatedDecoder {
    fn decode(&self, bytes: &[u8], hint: Option<&str>) -> Result<DecodedBuffer, DecodeError> {
        let _ = self.started.send(());
        let _ = self.gate.recv_timeout(Duration::from_secs(2));
        self.inner.decode(bytes, hint)
    }
}
