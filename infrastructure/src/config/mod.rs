//! Configuration file loading for ragline
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. `--config <path>` specified file
//! 2. Project root: `./ragline.toml` or `./.ragline.toml`
//! 3. XDG config: `$XDG_CONFIG_HOME/ragline/config.toml`
//! 4. Fallback: `~/.config/ragline/config.toml`
//! 5. Default values

mod file_config;
mod loader;

pub use file_config::{
    ConfigValidationError, FileConfig, FileInferenceConfig, FileLoggingConfig, FilePipelineConfig,
    FileRetrievalConfig,
};
pub use loader::ConfigLoader;
