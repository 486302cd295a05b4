use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use tracing::debug;

/// Environment variable prefix; `__` separates nested keys,
/// e.g. `STRANGLE_BROKER__API_KEY`.
pub const ENV_PREFIX: &str = "STRANGLE_";

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from a TOML file overlaid with environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a required key is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        debug!(path = %path.as_ref().display(), "Loading configuration");
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Loads configuration with a profile overlay.
    ///
    /// The overlay `Config.{profile}.toml` is looked up next to `path` and
    /// overrides keys of the base file.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read or a required key is missing.
    pub fn load_with_profile(path: impl AsRef<Path>, profile: &str) -> Result<AppConfig> {
        let path = path.as_ref();
        let overlay = profile_path(path, profile);
        debug!(path = %path.display(), overlay = %overlay.display(), "Loading configuration");
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Toml::file(overlay))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

fn profile_path(base: &Path, profile: &str) -> PathBuf {
    base.with_file_name(format!("Config.{profile}.toml"))
}
