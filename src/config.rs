use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

/// Where the recognition service keeps its bundled matcher.
pub const DEFAULT_CORE_MATCHER: &str = "/system/product/etc/ambient/matcher_tah.leveldb";

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bundled core matcher. Loads continue without it if it is missing.
    pub core_matcher_path: Option<PathBuf>,
    /// End offset of the core matcher's entry region, if already known.
    pub core_end_offset: Option<u64>,
    /// Superpack index directory holding matcher shards.
    pub superpacks_dir: Option<PathBuf>,
    /// Directory of shard track files.
    pub shard_tracks_dir: Option<PathBuf>,
    /// Directory of installed superpack manifests.
    pub manifests_dir: Option<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of parallel decode workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            core_matcher_path: Some(PathBuf::from(DEFAULT_CORE_MATCHER)),
            core_end_offset: None,
            superpacks_dir: None,
            shard_tracks_dir: None,
            manifests_dir: None,
            db_path: None,
            workers: 0,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/matcherdb/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                return Self::default();
            }
        };
        match toml::from_str::<AppConfig>(&contents) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn superpacks_dir(&self) -> PathBuf {
        self.superpacks_dir
            .clone()
            .unwrap_or_else(|| data_subdir(crate::SUPERPACK_AMBIENT_MUSIC_INDEX))
    }

    pub fn shard_tracks_dir(&self) -> PathBuf {
        self.shard_tracks_dir
            .clone()
            .unwrap_or_else(|| data_subdir("shard_tracks"))
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.manifests_dir
            .clone()
            .unwrap_or_else(|| data_subdir("manifests"))
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn data_subdir(name: &str) -> PathBuf {
    match ProjectDirs::from("", "", crate::APP_NAME) {
        Some(dirs) => dirs.data_dir().join(name),
        None => PathBuf::from(name),
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("matcherdb.db")
    } else {
        // Fallback: current directory
        PathBuf::from("matcherdb.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.core_matcher_path, Some(PathBuf::from(DEFAULT_CORE_MATCHER)));
        assert_eq!(config.workers, 0);
        assert!(config.resolve_workers() >= 1);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            superpacks_dir = "/data/superpacks"
            core_end_offset = 2023152
            workers = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.superpacks_dir(), PathBuf::from("/data/superpacks"));
        assert_eq!(config.core_end_offset, Some(2023152));
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.core_matcher_path, Some(PathBuf::from(DEFAULT_CORE_MATCHER)));
    }

    #[test]
    fn test_unparseable_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();
        assert_eq!(AppConfig::load_from(&path).workers, 0);
    }
}
