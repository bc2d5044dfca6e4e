//! SQLite store for downloaded track audio, song records and setlists
//!
//! Raw encoded bytes are kept per (song, track filename) so songs can be
//! played offline. Audio is never decoded here.

use crate::download::{DownloadProgress, TrackFetcher};
use crate::types::{unix_now, CachedSong, CachedTrack, Setlist, Song, SongId};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Failed to download {url}: HTTP {status}")]
    Http { url: String, status: u16 },
    #[error("Metadata error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read access to stored track bytes
///
/// This is the only view of the store the audio engine needs.
pub trait TrackStore: Send + Sync {
    /// Raw encoded bytes of a track, or `None` if the track was never stored
    fn track_bytes(&self, song_id: SongId, filename: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Library database backed by SQLite
pub struct LibraryDb {
    conn: Mutex<Connection>,
}

impl LibraryDb {
    /// SQL schema for the library tables
    const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS cached_tracks (
            id INTEGER PRIMARY KEY,
            song_id INTEGER NOT NULL,
            track_filename TEXT NOT NULL,
            audio_data BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            UNIQUE (song_id, track_filename)
        );
        CREATE INDEX IF NOT EXISTS idx_tracks_song ON cached_tracks(song_id);

        CREATE TABLE IF NOT EXISTS cached_songs (
            id INTEGER PRIMARY KEY,
            slug TEXT NOT NULL,
            song_name TEXT NOT NULL,
            metadata TEXT NOT NULL,
            cached_at INTEGER NOT NULL,
            total_size_mb REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_songs_slug ON cached_songs(slug);

        CREATE TABLE IF NOT EXISTS setlists (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            song_slugs TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_setlists_updated ON setlists(updated_at);
    "#;

    /// Open or create a library database at the given path
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Check if a song and all of its tracks are stored
    pub fn is_song_cached(&self, song_id: SongId) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM cached_songs WHERE id = ?1",
                [song_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Get the stored record for a song
    pub fn get_cached_song(&self, song_id: SongId) -> Result<Option<CachedSong>, StoreError> {
        let song = self
            .conn
            .lock()
            .query_row(
                "SELECT id, slug, song_name, metadata, cached_at, total_size_mb
                 FROM cached_songs WHERE id = ?1",
                [song_id],
                |row| {
                    Ok(CachedSong {
                        id: row.get(0)?,
                        slug: row.get(1)?,
                        song_name: row.get(2)?,
                        metadata: row.get(3)?,
                        cached_at: row.get(4)?,
                        total_size_mb: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(song)
    }

    /// Get every stored song, most recently downloaded first
    pub fn get_cached_songs(&self) -> Result<Vec<CachedSong>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, slug, song_name, metadata, cached_at, total_size_mb
             FROM cached_songs ORDER BY cached_at DESC, id DESC",
        )?;

        let songs = stmt
            .query_map([], |row| {
                Ok(CachedSong {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    song_name: row.get(2)?,
                    metadata: row.get(3)?,
                    cached_at: row.get(4)?,
                    total_size_mb: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(songs)
    }

    /// Get every stored track of a song
    pub fn get_cached_song_tracks(&self, song_id: SongId) -> Result<Vec<CachedTrack>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT song_id, track_filename, audio_data, cached_at
             FROM cached_tracks WHERE song_id = ?1 ORDER BY id ASC",
        )?;

        let tracks = stmt
            .query_map([song_id], |row| {
                Ok(CachedTrack {
                    song_id: row.get(0)?,
                    track_filename: row.get(1)?,
                    audio_data: row.get(2)?,
                    cached_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tracks)
    }

    /// Store a song record together with the bytes of all its tracks
    ///
    /// Runs in a single transaction: either the song and every track are
    /// written, or nothing is.
    pub fn store_song(&self, song: &Song, tracks: &[(String, Vec<u8>)]) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(song)?;
        let now = unix_now();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for (filename, bytes) in tracks {
            tx.execute(
                r#"INSERT OR REPLACE INTO cached_tracks
                   (song_id, track_filename, audio_data, cached_at)
                   VALUES (?1, ?2, ?3, ?4)"#,
                params![song.id, filename, bytes, now],
            )?;
        }

        tx.execute(
            r#"INSERT OR REPLACE INTO cached_songs
               (id, slug, song_name, metadata, cached_at, total_size_mb)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                song.id,
                song.slug,
                song.song_name,
                metadata,
                now,
                song.tracks_size_mb(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Download every track of a song and store it for offline use
    ///
    /// Progress is reported through the channel. A failed download aborts
    /// before anything is written.
    pub fn cache_song(
        &self,
        fetcher: &dyn TrackFetcher,
        song: &Song,
        progress_tx: Option<Sender<DownloadProgress>>,
    ) -> Result<(), StoreError> {
        let total = song.tracks.len();

        if let Some(ref tx) = progress_tx {
            let _ = tx.send(DownloadProgress::Started { total });
        }

        let mut downloaded = Vec::with_capacity(total);
        for (i, track) in song.tracks.iter().enumerate() {
            if let Some(ref tx) = progress_tx {
                let _ = tx.send(DownloadProgress::Track {
                    current: i + 1,
                    total,
                    filename: track.converted_filename.clone(),
                });
            }

            let bytes = fetcher.fetch(&track.url)?;
            debug!(song_id = song.id, track = %track.converted_filename, bytes = bytes.len(), "downloaded track");
            downloaded.push((track.converted_filename.clone(), bytes));
        }

        self.store_song(song, &downloaded)?;

        let total_size_mb = song.tracks_size_mb();
        info!(song_id = song.id, slug = %song.slug, total_size_mb, "song cached for offline use");

        if let Some(ref tx) = progress_tx {
            let _ = tx.send(DownloadProgress::Complete {
                song_id: song.id,
                total_size_mb,
            });
        }

        Ok(())
    }

    /// Remove a song and all of its tracks
    pub fn delete_cached_song(&self, song_id: SongId) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cached_tracks WHERE song_id = ?1", [song_id])?;
        let affected = tx.execute("DELETE FROM cached_songs WHERE id = ?1", [song_id])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    /// Total size of all stored songs in megabytes
    pub fn get_storage_used(&self) -> Result<f64, StoreError> {
        let total: f64 = self.conn.lock().query_row(
            "SELECT COALESCE(SUM(total_size_mb), 0.0) FROM cached_songs",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Clear all stored songs and tracks (setlists are kept)
    pub fn clear_all_cache(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cached_tracks", [])?;
        conn.execute("DELETE FROM cached_songs", [])?;
        Ok(())
    }

    /// Save a setlist, replacing any existing one with the same id
    ///
    /// `updated_at` is set to the current time before writing.
    pub fn save_setlist(&self, setlist: &mut Setlist) -> Result<(), StoreError> {
        setlist.touch();
        let slugs = serde_json::to_string(&setlist.song_slugs)?;
        self.conn.lock().execute(
            r#"INSERT OR REPLACE INTO setlists
               (id, name, song_slugs, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                setlist.id,
                setlist.name,
                slugs,
                setlist.created_at,
                setlist.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get all setlists, most recently updated first (latest write wins a tie)
    pub fn get_setlists(&self) -> Result<Vec<Setlist>, StoreError> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, name, song_slugs, created_at, updated_at
                 FROM setlists ORDER BY updated_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u64>(3)?,
                        row.get::<_, u64>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter()
            .map(|(id, name, slugs, created_at, updated_at)| {
                Ok(Setlist {
                    id,
                    name,
                    song_slugs: serde_json::from_str(&slugs)?,
                    created_at,
                    updated_at,
                })
            })
            .collect()
    }

    /// Get a single setlist by id
    pub fn get_setlist(&self, id: &str) -> Result<Option<Setlist>, StoreError> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT id, name, song_slugs, created_at, updated_at
                 FROM setlists WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u64>(3)?,
                        row.get::<_, u64>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, name, slugs, created_at, updated_at)| {
            Ok(Setlist {
                id,
                name,
                song_slugs: serde_json::from_str(&slugs)?,
                created_at,
                updated_at,
            })
        })
        .transpose()
    }

    /// Delete a setlist
    pub fn delete_setlist(&self, id: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn
            .lock()
            .execute("DELETE FROM setlists WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }
}

impl TrackStore for LibraryDb {
    fn track_bytes(&self, song_id: SongId, filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let bytes = self
            .conn
            .lock()
            .query_row(
                "SELECT audio_data FROM cached_tracks
                 WHERE song_id = ?1 AND track_filename = ?2",
                params![song_id, filename],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes)
    }
}
