//! Simple configuration persistence for stems
//!
//! Stores the catalog location, library database path and cache sizing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the catalog base URL
pub const API_URL_ENV: &str = "STEMS_API_URL";

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the song catalog site
    pub api_url: String,
    /// Number of decoded songs kept in memory
    pub cache_capacity: usize,
    /// Library database location (None = default data dir)
    pub db_path: Option<PathBuf>,
    /// Lifetime of the offline catalog listing in hours
    pub catalog_ttl_hours: u64,
    /// Position polling interval while playing
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            cache_capacity: 10,
            db_path: None,
            catalog_ttl_hours: 24,
            poll_interval_ms: 100,
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be parsed.
    /// `STEMS_API_URL` overrides the stored catalog URL.
    pub fn load() -> Self {
        let path = Self::config_path();
        let mut config = Self::load_from(&path).unwrap_or_default();

        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                config.api_url = url.trim().to_string();
            }
        }

        config
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = self.serialize();
        fs::write(path, content)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stems")
            .join("config.txt")
    }

    /// Directory for the library database and offline catalog
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stems")
    }

    /// Library database path, falling back to the data dir
    pub fn library_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("library.db"))
    }

    /// Offline catalog listing path
    pub fn catalog_cache_path(&self) -> PathBuf {
        Self::data_dir().join("catalog.json")
    }

    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_hours * 60 * 60)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Parse config from simple key=value format
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                match key {
                    "api_url" => {
                        if !value.is_empty() {
                            config.api_url = value.to_string();
                        }
                    }
                    "cache_capacity" => {
                        if let Ok(n) = value.parse::<usize>() {
                            config.cache_capacity = n.max(1);
                        }
                    }
                    "db_path" => {
                        if !value.is_empty() {
                            config.db_path = Some(PathBuf::from(value));
                        }
                    }
                    "catalog_ttl_hours" => {
                        if let Ok(n) = value.parse() {
                            config.catalog_ttl_hours = n;
                        }
                    }
                    "poll_interval_ms" => {
                        if let Ok(n) = value.parse::<u64>() {
                            config.poll_interval_ms = n.max(10);
                        }
                    }
                    _ => {} // Ignore unknown keys
                }
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let mut lines = Vec::new();
        lines.push("# Stems Configuration".to_string());
        lines.push(format!("api_url={}", self.api_url));
        lines.push(format!("cache_capacity={}", self.cache_capacity));

        if let Some(ref path) = self.db_path {
            lines.push(format!("db_path={}", path.display()));
        }

        lines.push(format!("catalog_ttl_hours={}", self.catalog_ttl_hours));
        lines.push(format!("poll_interval_ms={}", self.poll_interval_ms));

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let config = Config::parse("");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_values() {
        let config = Config::parse(
            "api_url=https://music.test\ncache_capacity=4\ndb_path=/tmp/lib.db\npoll_interval_ms=250",
        );
        assert_eq!(config.api_url, "https://music.test");
        assert_eq!(config.cache_capacity, 4);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/lib.db")));
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_with_comments_and_garbage() {
        let content = "# Comment\ncache_capacity=lots\nunknown=1\n# Another comment";
        let config = Config::parse(content);
        assert_eq!(config.cache_capacity, 10);
    }

    #[test]
    fn test_cache_capacity_floor() {
        let config = Config::parse("cache_capacity=0");
        assert_eq!(config.cache_capacity, 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.txt");

        let config = Config {
            api_url: "https://music.test".to_string(),
            cache_capacity: 6,
            db_path: Some(PathBuf::from("/data/stems.db")),
            catalog_ttl_hours: 12,
            poll_interval_ms: 50,
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }
}
