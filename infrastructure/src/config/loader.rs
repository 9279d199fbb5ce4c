//! Configuration file discovery and merging

use super::file_config::FileConfig;
use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use std::path::PathBuf;

/// Project-level config file names, checked in order.
const PROJECT_FILES: [&str; 2] = ["ragline.toml", ".ragline.toml"];

/// Discovers config files and merges them into a [`FileConfig`].
pub struct ConfigLoader;

impl ConfigLoader {
    /// Merge all configuration sources, later sources winning per key.
    ///
    /// Order (lowest to highest): built-in defaults, the global
    /// `ragline/config.toml` under the platform config directory, a
    /// project `ragline.toml` / `.ragline.toml` in the working directory,
    /// and finally an explicit `--config` path. Every file uses the same
    /// flat `[inference]` / `[retrieval]` / `[pipeline]` / `[logging]`
    /// sections, so a project file can override a single key of the
    /// global one without restating the rest.
    pub fn load(config_path: Option<&PathBuf>) -> Result<FileConfig, Box<figment::Error>> {
        let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
        for path in Self::source_paths(config_path) {
            figment = figment.merge(Toml::file(path));
        }
        figment.extract().map_err(Box::new)
    }

    /// Built-in defaults only, for `--no-config`.
    pub fn load_defaults() -> FileConfig {
        FileConfig::default()
    }

    /// Global config path: `$XDG_CONFIG_HOME/ragline/config.toml`, or the
    /// platform equivalent.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ragline").join("config.toml"))
    }

    /// Project config file in the working directory, if one exists.
    pub fn project_config_path() -> Option<PathBuf> {
        PROJECT_FILES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Existing config files in merge order, lowest priority first.
    fn source_paths(explicit: Option<&PathBuf>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(global) = Self::global_config_path()
            && global.exists()
        {
            paths.push(global);
        }
        if let Some(project) = Self::project_config_path() {
            paths.push(project);
        }
        if let Some(path) = explicit {
            paths.push(path.clone());
        }
        paths
    }
}
