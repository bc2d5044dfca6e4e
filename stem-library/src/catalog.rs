//! Song catalog client with offline fallback
//!
//! Songs come from a WordPress REST endpoint. The last full listing is kept
//! on disk so the library stays browsable without a connection.

use crate::types::{unix_now, Pdfs, Song, SongId, Track};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while talking to the catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error! status: {0}")]
    Http(u16),
    #[error("Invalid catalog response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ureq::Error> for CatalogError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(status, _) => CatalogError::Http(status),
            ureq::Error::Transport(t) => CatalogError::Network(t.to_string()),
        }
    }
}

/// Result of resolving a list of slugs against the catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlugLookup {
    /// Songs found, in the order their slugs were given
    pub songs: Vec<Song>,
    /// Slugs with no matching song
    pub missing_slugs: Vec<String>,
}

/// Listing persisted for offline use
#[derive(Debug, Serialize, Deserialize)]
struct CatalogSnapshot {
    fetched_at: u64,
    songs: Vec<Song>,
}

#[derive(Debug, Deserialize)]
struct WpItem {
    id: SongId,
    slug: String,
    title: WpTitle,
    #[serde(default)]
    track_data: Value,
}

#[derive(Debug, Deserialize)]
struct WpTitle {
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct WpTrackData {
    #[serde(default)]
    song_name: String,
    #[serde(default)]
    bpm: Value,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    time_signature: Option<String>,
    #[serde(default)]
    tracks: Vec<Track>,
    #[serde(default)]
    pdfs: Option<Pdfs>,
    #[serde(default)]
    total_size_mb: Value,
}

/// Client for the song catalog API
pub struct SongCatalog {
    agent: ureq::Agent,
    endpoint: String,
    cache_path: Option<PathBuf>,
    cache_ttl: Duration,
}

impl SongCatalog {
    /// Default lifetime of the offline listing
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Largest page the API serves
    const PER_PAGE: &'static str = "100";

    /// Create a catalog client for the given site
    pub fn new(base_url: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(15))
                .build(),
            endpoint: format!(
                "{}/wp-json/wp/v2/rehearsal_materials",
                base_url.trim_end_matches('/')
            ),
            cache_path: None,
            cache_ttl: Self::DEFAULT_CACHE_TTL,
        }
    }

    /// Keep the last listing at `path` and fall back to it when offline
    pub fn with_offline_cache(mut self, path: PathBuf, ttl: Duration) -> Self {
        self.cache_path = Some(path);
        self.cache_ttl = ttl;
        self
    }

    /// Endpoint URL used for requests
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch every song that has playable tracks
    ///
    /// Falls back to the offline listing if the request fails and the
    /// listing is younger than the cache lifetime.
    pub fn fetch_all_songs(&self) -> Result<Vec<Song>, CatalogError> {
        match self.fetch_all_remote() {
            Ok(songs) => {
                self.write_snapshot(&songs);
                Ok(songs)
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch songs, trying offline catalog");
                match self.read_snapshot() {
                    Some(songs) => {
                        info!(count = songs.len(), "using offline catalog");
                        Ok(songs)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Fetch a single song by slug
    ///
    /// Never fails: network and parse errors fall back to the offline
    /// listing, and `None` means the song could not be found anywhere.
    pub fn fetch_song_by_slug(&self, slug: &str) -> Option<Song> {
        let remote = self
            .get_items(&[("slug", slug)])
            .map(|items| parse_items(items, false).into_iter().next());

        match remote {
            Ok(song) => song,
            Err(e) => {
                warn!(slug, error = %e, "failed to fetch song, trying offline catalog");
                self.read_snapshot()?.into_iter().find(|s| s.slug == slug)
            }
        }
    }

    /// Fetch the songs with the given ids
    pub fn fetch_songs_by_ids(&self, ids: &[SongId]) -> Result<Vec<Song>, CatalogError> {
        let include = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let items = self.get_items(&[("include", include.as_str()), ("per_page", Self::PER_PAGE)])?;
        Ok(parse_items(items, false))
    }

    /// Resolve slugs to songs, preserving order and reporting unknown slugs
    pub fn fetch_songs_by_slugs(&self, slugs: &[String]) -> Result<SlugLookup, CatalogError> {
        let all = self.fetch_all_songs()?;
        Ok(resolve_slugs(&all, slugs))
    }

    fn fetch_all_remote(&self) -> Result<Vec<Song>, CatalogError> {
        let items = self.get_items(&[("per_page", Self::PER_PAGE)])?;
        Ok(parse_items(items, true))
    }

    fn get_items(&self, query: &[(&str, &str)]) -> Result<Vec<WpItem>, CatalogError> {
        let mut request = self.agent.get(&self.endpoint);
        for (key, value) in query {
            request = request.query(key, value);
        }

        let body = request.call()?.into_string()?;
        Ok(serde_json::from_str(&body)?)
    }

    fn read_snapshot(&self) -> Option<Vec<Song>> {
        let path = self.cache_path.as_deref()?;
        match load_snapshot(path) {
            Ok(snapshot) => {
                let age = unix_now().saturating_sub(snapshot.fetched_at);
                if age > self.cache_ttl.as_secs() {
                    debug!(age, "offline catalog expired");
                    return None;
                }
                Some(snapshot.songs)
            }
            Err(e) => {
                debug!(error = %e, "no usable offline catalog");
                None
            }
        }
    }

    fn write_snapshot(&self, songs: &[Song]) {
        let Some(path) = self.cache_path.as_deref() else {
            return;
        };
        if let Err(e) = save_snapshot(path, songs) {
            warn!(error = %e, "failed to save offline catalog");
        }
    }
}

fn load_snapshot(path: &Path) -> Result<CatalogSnapshot, CatalogError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save_snapshot(path: &Path, songs: &[Song]) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let snapshot = CatalogSnapshot {
        fetched_at: unix_now(),
        songs: songs.to_vec(),
    };
    std::fs::write(path, serde_json::to_string(&snapshot)?)?;
    Ok(())
}

/// Convert API items to songs, skipping items without usable track data
fn parse_items(items: Vec<WpItem>, require_tracks: bool) -> Vec<Song> {
    items
        .into_iter()
        .filter_map(|item| {
            let data: WpTrackData = match serde_json::from_value(item.track_data) {
                Ok(data) => data,
                Err(_) => {
                    debug!(slug = %item.slug, "skipping item without track data");
                    return None;
                }
            };

            if require_tracks && data.tracks.is_empty() {
                return None;
            }

            Some(Song {
                id: item.id,
                slug: item.slug,
                title: item.title.rendered,
                song_name: data.song_name,
                bpm: lenient_f64(&data.bpm),
                key: data.key,
                time_signature: data.time_signature,
                tracks: data.tracks,
                pdfs: data.pdfs.unwrap_or_default(),
                total_size_mb: lenient_f64(&data.total_size_mb).unwrap_or(0.0),
            })
        })
        .collect()
}

/// Accept numbers and numeric strings; CMS fields are loosely typed
fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Look up each slug in `songs`, preserving the order of `slugs`
pub fn resolve_slugs(songs: &[Song], slugs: &[String]) -> SlugLookup {
    let by_slug: HashMap<&str, &Song> = songs.iter().map(|s| (s.slug.as_str(), s)).collect();

    let mut lookup = SlugLookup::default();
    for slug in slugs {
        match by_slug.get(slug.as_str()) {
            Some(song) => lookup.songs.push((*song).clone()),
            None => lookup.missing_slugs.push(slug.clone()),
        }
    }
    lookup
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"[
        {
            "id": 11,
            "slug": "amazing-grace",
            "title": { "rendered": "Amazing Grace" },
            "track_data": {
                "song_name": "Amazing Grace",
                "bpm": "72",
                "key": "G",
                "time_signature": "3/4",
                "tracks": [
                    {
                        "original_filename": "Click.wav",
                        "converted_filename": "click.mp3",
                        "display_name": "Click",
                        "type": "rhythm",
                        "size_mb": 1.2,
                        "duration_seconds": 240.0,
                        "url": "https://cdn.test/click.mp3"
                    }
                ],
                "pdfs": { "chords": "grace-chords.pdf" },
                "total_size_mb": 1.2
            }
        },
        {
            "id": 12,
            "slug": "no-tracks",
            "title": { "rendered": "No Tracks" },
            "track_data": { "song_name": "No Tracks", "tracks": [] }
        },
        {
            "id": 13,
            "slug": "draft",
            "title": { "rendered": "Draft" },
            "track_data": false
        }
    ]"#;

    fn items() -> Vec<WpItem> {
        serde_json::from_str(LISTING).unwrap()
    }

    #[test]
    fn test_parse_requires_tracks_for_listing() {
        let songs = parse_items(items(), true);
        assert_eq!(songs.len(), 1);

        let song = &songs[0];
        assert_eq!(song.id, 11);
        assert_eq!(song.title, "Amazing Grace");
        assert_eq!(song.bpm, Some(72.0));
        assert_eq!(song.time_signature.as_deref(), Some("3/4"));
        assert_eq!(song.pdfs.chords.as_deref(), Some("grace-chords.pdf"));
        assert_eq!(song.tracks[0].key(), "click.mp3");
    }

    #[test]
    fn test_parse_single_lookup_keeps_empty_track_data() {
        let songs = parse_items(items(), false);
        let slugs: Vec<_> = songs.iter().map(|s| s.slug.as_str()).collect();
        assert_eq!(slugs, vec!["amazing-grace", "no-tracks"]);
    }

    #[test]
    fn test_resolve_slugs_preserves_order() {
        let songs = parse_items(items(), false);
        let lookup = resolve_slugs(
            &songs,
            &[
                "no-tracks".to_string(),
                "gone".to_string(),
                "amazing-grace".to_string(),
            ],
        );

        let found: Vec<_> = lookup.songs.iter().map(|s| s.id).collect();
        assert_eq!(found, vec![12, 11]);
        assert_eq!(lookup.missing_slugs, vec!["gone".to_string()]);
    }

    #[test]
    fn test_lenient_f64() {
        assert_eq!(lenient_f64(&serde_json::json!(120)), Some(120.0));
        assert_eq!(lenient_f64(&serde_json::json!(" 98.5 ")), Some(98.5));
        assert_eq!(lenient_f64(&serde_json::json!("fast")), None);
        assert_eq!(lenient_f64(&Value::Null), None);
    }

    #[test]
    fn test_offline_snapshot_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        save_snapshot(&path, &parse_items(items(), true)).unwrap();

        // Nothing listens on port 9 so every request fails
        let catalog = SongCatalog::new("http://127.0.0.1:9")
            .with_offline_cache(path, SongCatalog::DEFAULT_CACHE_TTL);

        let songs = catalog.fetch_all_songs().unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(catalog.fetch_song_by_slug("amazing-grace").map(|s| s.id), Some(11));
        assert!(catalog.fetch_song_by_slug("missing").is_none());
    }

    #[test]
    fn test_expired_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let stale = CatalogSnapshot {
            fetched_at: 0,
            songs: parse_items(items(), true),
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let catalog = SongCatalog::new("http://127.0.0.1:9")
            .with_offline_cache(path, SongCatalog::DEFAULT_CACHE_TTL);

        assert!(catalog.fetch_all_songs().is_err());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let catalog = SongCatalog::new("https://music.test/");
        assert_eq!(
            catalog.endpoint(),
            "https://music.test/wp-json/wp/v2/rehearsal_materials"
        );
    }
}
