// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load a TOML config file. A missing file yields `T::default()`.
pub fn load_config<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(T::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Like [`load_config`] but logs and falls back to defaults on any error.
pub fn load_config_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    load_config(path).unwrap_or_else(|e| {
        tracing::warn!("config: {e}; falling back to defaults");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        count: u32,
    }

    fn scratch(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("prism-core-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cfg.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("prism-core-definitely-missing.toml");
        let cfg: Sample = load_config(&path).unwrap();
        assert_eq!(cfg, Sample::default());
    }

    #[test]
    fn parses_partial_table() {
        let path = scratch("partial", "count = 3\n");
        let cfg: Sample = load_config(&path).unwrap();
        assert_eq!(cfg.count, 3);
        assert_eq!(cfg.name, "");
    }

    #[test]
    fn malformed_file_is_an_error_but_fallback_recovers() {
        let path = scratch("broken", "count = [\n");
        assert!(matches!(
            load_config::<Sample>(&path),
            Err(ConfigError::Parse { .. })
        ));
        let cfg: Sample = load_config_or_default(&path);
        assert_eq!(cfg, Sample::default());
    }
}
