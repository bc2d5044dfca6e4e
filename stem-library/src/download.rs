//! Track asset downloads

use crate::store::StoreError;
use crate::types::SongId;
use std::io::Read;
use std::time::Duration;

/// Progress updates while a song is being downloaded
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadProgress {
    /// Download started
    Started {
        /// Number of tracks to fetch
        total: usize,
    },
    /// Currently fetching a track
    Track {
        /// Current track number (1-indexed)
        current: usize,
        /// Total number of tracks
        total: usize,
        /// Filename being fetched
        filename: String,
    },
    /// All tracks fetched and stored
    Complete { song_id: SongId, total_size_mb: f64 },
}

/// Source of raw track bytes by URL
pub trait TrackFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError>;
}

/// Fetches track assets over HTTP
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_agent(
            ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(10))
                .build(),
        )
    }

    /// Use a preconfigured agent (shared connection pool, proxies)
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

impl TrackFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(status, _) => StoreError::Http {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(t) => StoreError::Network(t.to_string()),
        })?;

        let mut bytes = Vec::new();
        response.into_reader().read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}
