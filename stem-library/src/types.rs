//! Song, track and setlist records

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Catalog identifier of a song
pub type SongId = u64;

/// Musical role of a stem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackCategory {
    #[default]
    Rhythm,
    Vocal,
    Harmonic,
}

impl TrackCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            TrackCategory::Rhythm => "rhythm",
            TrackCategory::Vocal => "vocal",
            TrackCategory::Harmonic => "harmonic",
        }
    }
}

/// One encoded audio stem of a song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub original_filename: String,
    /// Filename of the converted asset; this is the track's key everywhere
    pub converted_filename: String,
    pub display_name: String,
    #[serde(rename = "type", default)]
    pub category: TrackCategory,
    #[serde(default)]
    pub size_mb: f64,
    #[serde(default)]
    pub duration_seconds: f64,
    pub url: String,
}

impl Track {
    /// Key used by the track store, decode cache and mixer
    pub fn key(&self) -> &str {
        &self.converted_filename
    }
}

/// Sheet music attachments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pdfs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chords_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics_url: Option<String>,
}

/// A song split into stems
///
/// All tracks share the same zero point and are expected to have the same
/// length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub slug: String,
    pub title: String,
    pub song_name: String,
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub time_signature: Option<String>,
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub pdfs: Pdfs,
    #[serde(default)]
    pub total_size_mb: f64,
}

impl Song {
    /// Sum of the track sizes, used when the catalog omits `total_size_mb`
    pub fn tracks_size_mb(&self) -> f64 {
        self.tracks.iter().map(|t| t.size_mb).sum()
    }
}

/// User-curated ordered list of songs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setlist {
    pub id: String,
    pub name: String,
    pub song_slugs: Vec<String>,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    /// Unix timestamp (seconds)
    pub updated_at: u64,
}

impl Setlist {
    /// Create a new setlist with a time-derived id
    pub fn new(name: impl Into<String>, song_slugs: Vec<String>) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        Self {
            id: format!("{:x}", now.as_nanos()),
            name: name.into(),
            song_slugs,
            created_at: now.as_secs(),
            updated_at: now.as_secs(),
        }
    }

    /// Append songs to the end of the list
    pub fn add_songs(&mut self, slugs: impl IntoIterator<Item = String>) {
        self.song_slugs.extend(slugs);
    }

    /// Remove the first occurrence of `slug`. False if it was not listed.
    pub fn remove_song(&mut self, slug: &str) -> bool {
        match self.song_slugs.iter().position(|s| s == slug) {
            Some(index) => {
                self.song_slugs.remove(index);
                true
            }
            None => false,
        }
    }

    /// Mark the setlist as modified now
    pub fn touch(&mut self) {
        self.updated_at = unix_now();
    }
}

/// Song record persisted once all of its tracks are stored
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSong {
    pub id: SongId,
    pub slug: String,
    pub song_name: String,
    /// JSON-serialized [`Song`]
    pub metadata: String,
    pub cached_at: u64,
    pub total_size_mb: f64,
}

impl CachedSong {
    /// Parse the stored song metadata
    pub fn song(&self) -> Result<Song, serde_json::Error> {
        serde_json::from_str(&self.metadata)
    }
}

/// Raw encoded bytes of one stored track
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTrack {
    pub song_id: SongId,
    pub track_filename: String,
    pub audio_data: Vec<u8>,
    pub cached_at: u64,
}

/// Current unix time in seconds
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_category_from_json() {
        let json = r#"{
            "original_filename": "Drums.wav",
            "converted_filename": "drums.mp3",
            "display_name": "Drums",
            "type": "rhythm",
            "size_mb": 4.5,
            "duration_seconds": 212.0,
            "url": "https://example.com/drums.mp3"
        }"#;

        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.category, TrackCategory::Rhythm);
        assert_eq!(track.key(), "drums.mp3");
    }

    #[test]
    fn test_song_size_from_tracks() {
        let track = |name: &str, size| Track {
            original_filename: name.into(),
            converted_filename: name.into(),
            display_name: name.into(),
            category: TrackCategory::Vocal,
            size_mb: size,
            duration_seconds: 10.0,
            url: String::new(),
        };
        let song = Song {
            id: 1,
            slug: "a".into(),
            title: "A".into(),
            song_name: "A".into(),
            bpm: None,
            key: None,
            time_signature: None,
            tracks: vec![track("v1", 1.5), track("v2", 2.0)],
            pdfs: Pdfs::default(),
            total_size_mb: 0.0,
        };
        assert!((song.tracks_size_mb() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_setlist_new_sets_timestamps() {
        let setlist = Setlist::new("Sunday", vec!["a".into(), "b".into()]);
        assert!(!setlist.id.is_empty());
        assert_eq!(setlist.created_at, setlist.updated_at);
        assert_eq!(setlist.song_slugs.len(), 2);
    }

    #[test]
    fn test_setlist_edits() {
        let mut setlist = Setlist::new("Sunday", vec!["a".into(), "b".into(), "a".into()]);
        setlist.updated_at = 0;

        setlist.add_songs(["c".to_string()]);
        assert!(setlist.remove_song("a"));
        assert!(!setlist.remove_song("zzz"));
        assert_eq!(setlist.song_slugs, vec!["b", "a", "c"]);

        setlist.touch();
        assert!(setlist.updated_at >= setlist.created_at);
    }
}
