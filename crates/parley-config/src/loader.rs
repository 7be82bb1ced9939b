use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::schema::ParleyConfig;
use parley_core::{ParleyError, Result};

/// Loads the Parley configuration from disk with env-var overrides.
pub struct ConfigLoader {
    config: ParleyConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > PARLEY_CONFIG env >
    /// ~/.parley/parley.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("PARLEY_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".parley")
            .join("parley.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<ParleyConfig>(&raw).map_err(|e| ParleyError::InvalidConfig {
                field: config_path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            ParleyConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(ParleyError::InvalidConfig {
                    field: "parley.toml".into(),
                    reason: e,
                });
            }
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Get a snapshot of the loaded config.
    pub fn get(&self) -> ParleyConfig {
        self.config.clone()
    }

    /// Path the config was resolved from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (PARLEY_MODEL, PARLEY_LOG_LEVEL, API keys).
    fn apply_env_overrides(mut config: ParleyConfig) -> ParleyConfig {
        if let Ok(v) = std::env::var("PARLEY_MODEL") {
            config.llm.model = v;
        }
        if let Ok(v) = std::env::var("PARLEY_PROVIDER") {
            config.llm.provider = v;
        }
        if let Ok(v) = std::env::var("PARLEY_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("PARLEY_DB_PATH") {
            config.storage.db_path = PathBuf::from(v);
        }
        // API keys: config file takes priority, env is the fallback.
        if config.llm.anthropic_api_key.is_none() {
            if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
                config.llm.anthropic_api_key = Some(v);
            }
        }
        if config.llm.openai_api_key.is_none() {
            if let Ok(v) = std::env::var("OPENAI_API_KEY") {
                config.llm.openai_api_key = Some(v);
            }
        }
        config
    }
}
