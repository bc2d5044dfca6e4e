//! Song library for stems - catalog, offline track store, and setlists

mod catalog;
mod config;
mod download;
mod store;
mod types;

pub use catalog::{resolve_slugs, CatalogError, SlugLookup, SongCatalog};
pub use config::{Config, API_URL_ENV};
pub use download::{DownloadProgress, HttpFetcher, TrackFetcher};
pub use store::{LibraryDb, StoreError, TrackStore};
pub use types::{CachedSong, CachedTrack, Pdfs, Setlist, Song, SongId, Track, TrackCategory};
