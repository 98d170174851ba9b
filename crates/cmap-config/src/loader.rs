use std::path::{Path, PathBuf};
use tracing::{info, warn};

use cmap_core::{AgencyError, Result};

use crate::schema::AgencyConfig;

/// Loads the agency configuration once at startup.
pub struct ConfigLoader {
    config: AgencyConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > CMAP_CONFIG env > ./agency.toml > ~/.cmap/agency.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CMAP_CONFIG") {
            return PathBuf::from(p);
        }
        let local = PathBuf::from("agency.toml");
        if local.exists() {
            return local;
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cmap")
            .join("agency.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw).map_err(|e| {
                AgencyError::Config(format!("failed to parse {}: {}", config_path.display(), e))
            })?
        } else {
            info!(?config_path, "config file not found, using defaults");
            AgencyConfig::default()
        };

        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(AgencyError::Config(e)),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Parse a TOML document into a config.
    pub fn parse(raw: &str) -> std::result::Result<AgencyConfig, toml::de::Error> {
        toml::from_str::<AgencyConfig>(raw)
    }

    /// Get a copy of the loaded config.
    pub fn get(&self) -> AgencyConfig {
        self.config.clone()
    }

    /// Path the config was resolved from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply environment overrides. `lookup` abstracts the environment for tests.
    ///
    /// `CLONEMAP_LOG_LEVEL=info` selects info logging, any other value selects
    /// error logging. `CLONEMAP_LOGGING=ON` forwards platform logs to the
    /// central logger, `OFF` prints them locally.
    pub fn apply_env_overrides(
        mut config: AgencyConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AgencyConfig {
        if let Some(v) = lookup("CLONEMAP_LOG_LEVEL") {
            config.logging.level = if v.eq_ignore_ascii_case("info") {
                "info".into()
            } else {
                "error".into()
            };
        }
        if let Some(v) = lookup("CLONEMAP_LOGGING") {
            config.logger.enabled = v.eq_ignore_ascii_case("on");
        }
        if let Some(v) = lookup("CMAP_HOSTNAME") {
            config.agency.hostname = Some(v);
        }
        if let Some(v) = lookup("CMAP_DIRECTORY_URL") {
            config.directory.url = v;
        }
        if let Some(v) = lookup("CMAP_LOGGER_URL") {
            config.logger.url = v;
        }
        if let Some(v) = lookup("CMAP_DF_URL") {
            config.df.url = v;
        }
        if let Some(v) = lookup("CMAP_AGENT_ISOLATION") {
            config.agency.isolation = v;
        }
        if let Some(v) = lookup("CMAP_DEFAULT_BEHAVIOR") {
            config.agency.default_behavior = v;
        }
        if let Some(v) = lookup("CMAP_SERVER_LISTEN") {
            config.server.listen = v;
        }
        config
    }
}
