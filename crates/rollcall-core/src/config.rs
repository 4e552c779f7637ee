use crate::gallery::GalleryPaths;
use crate::liveness::DEFAULT_EAR_THRESHOLD;
use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// ArcFace embedding width.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Runtime configuration shared by the daemon and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root directory for the gallery and the attendance ledger.
    pub data_dir: PathBuf,
    /// Embedding width produced by the upstream model.
    pub embedding_dim: usize,
    /// Minimum inner-product score for a positive match.
    pub match_threshold: f32,
    /// Eye aspect ratio below which an eye counts as closed.
    pub ear_threshold: f32,
    /// Attendance CSV. Defaults to `<data_dir>/attendance.csv`.
    pub ledger_path: Option<PathBuf>,
}

/// Optional settings read from the TOML file named by `ROLLCALL_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    embedding_dim: Option<usize>,
    match_threshold: Option<f32>,
    ear_threshold: Option<f32>,
    ledger_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            ledger_path: None,
        }
    }
}

impl Config {
    /// Defaults, then the optional `ROLLCALL_CONFIG` TOML file, then `ROLLCALL_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge(file);
        Ok(())
    }

    fn merge(&mut self, file: FileConfig) {
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.embedding_dim {
            self.embedding_dim = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.ear_threshold {
            self.ear_threshold = v;
        }
        if file.ledger_path.is_some() {
            self.ledger_path = file.ledger_path;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = Some(PathBuf::from(path));
        }
        self.embedding_dim = env_parse("ROLLCALL_EMBEDDING_DIM", self.embedding_dim);
        self.match_threshold = env_parse("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.ear_threshold = env_parse("ROLLCALL_EAR_THRESHOLD", self.ear_threshold);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid {
                key: "embedding_dim",
                reason: "must be greater than zero".into(),
            });
        }
        for (key, value) in [
            ("match_threshold", self.match_threshold),
            ("ear_threshold", self.ear_threshold),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("{value} is not a finite number"),
                });
            }
        }
        Ok(())
    }

    pub fn gallery_paths(&self) -> GalleryPaths {
        GalleryPaths::in_dir(&self.data_dir.join("vector_db"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("attendance.csv"))
    }
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            default
        }),
        Err(_) => default,
    }
}
