// Configuration management module
// TOML settings for the encoder, the retriever and the generation service

pub mod settings;
pub mod show;


pub use settings::{Config, ConfigError, EncoderConfig, GenerationServiceConfig, RetrieverConfig};
pub use show::{show_config, write_default_config};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
