use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for quaver.
///
/// Loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (QUAVER_* prefix)
/// 3. Config file (~/.config/quaver/config.toml)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data root: holds the database, the media store, the journal, seed
    /// files, and credential files.
    ///
    /// Can be set via:
    /// - CLI: --root /path/to/root
    /// - ENV: QUAVER_DATA_DIR
    /// - Config: data_dir = "/path/to/root"
    /// - Default: ~/.local/share/quaver
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Spotify API credential ring, a JSON list of
    /// `{"client_id": "...", "client_secret": "..."}` objects.
    ///
    /// - ENV: QUAVER_SPOTIFY_CREDS
    /// - Config: spotify_creds = "/path/to/spotify_api_creds.json"
    /// - Default: <data_dir>/spotify_api_creds.json
    pub spotify_creds: Option<PathBuf>,

    /// YouTube API key list, a JSON list of strings. Keys are loaded into
    /// the database-backed pool on first use.
    ///
    /// - ENV: QUAVER_YOUTUBE_KEYS
    /// - Config: youtube_keys = "/path/to/youtube_api_keys.json"
    /// - Default: <data_dir>/youtube_api_keys.json
    pub youtube_keys: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            spotify_creds: None,
            youtube_keys: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// # Errors
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new().context("failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("quaver");
        builder
            .add_env(env_opts)
            .context("failed to load environment variables")?;

        let config: Self = builder.build().context("failed to build configuration")?;
        Ok(config)
    }

    /// Load configuration with the data root overridden from the CLI.
    pub fn load_with_root(root: PathBuf) -> Result<Self> {
        let mut config = Self::load()?;
        config.data_dir = root;
        Ok(config)
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("quaver.db")
    }

    #[must_use]
    pub fn spotify_creds_path(&self) -> PathBuf {
        self.spotify_creds
            .clone()
            .unwrap_or_else(|| self.data_dir.join("spotify_api_creds.json"))
    }

    #[must_use]
    pub fn youtube_keys_path(&self) -> PathBuf {
        self.youtube_keys
            .clone()
            .unwrap_or_else(|| self.data_dir.join("youtube_api_keys.json"))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quaver")
}

/// Config file path: ~/.config/quaver/config.toml (or platform equivalent).
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quaver")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_derive_from_root() {
        let config = Config {
            data_dir: PathBuf::from("/tmp/qv"),
            ..Config::default()
        };
        assert_eq!(config.database_path(), PathBuf::from("/tmp/qv/quaver.db"));
        assert_eq!(
            config.spotify_creds_path(),
            PathBuf::from("/tmp/qv/spotify_api_creds.json")
        );
    }

    #[test]
    fn explicit_cred_paths_win() {
        let config = Config {
            data_dir: PathBuf::from("/tmp/qv"),
            spotify_creds: Some(PathBuf::from("/etc/quaver/creds.json")),
            youtube_keys: None,
        };
        assert_eq!(
            config.spotify_creds_path(),
            PathBuf::from("/etc/quaver/creds.json")
        );
    }
}
