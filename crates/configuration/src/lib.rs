use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{
    Config, DatabaseSettings, LogFormat, LoggingSettings, SchedulerSettings, ValidationSettings,
};

/// Environment variables with this prefix override file values,
/// e.g. `CADENCE__SCHEDULER__CUTOFF=14:30:00`.
const ENV_PREFIX: &str = "CADENCE";

/// Loads the application configuration from the `config.toml` file.
///
/// This function is the primary entry point for this crate. It reads the configuration file,
/// layers environment overrides on top, deserializes the result into our strongly-typed
/// `Config` struct and checks it for internal consistency.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config.toml")
}

/// Same as [`load_config`], but reads the given file. A missing file falls back to defaults.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let builder = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    tracing::debug!(path = %path.display(), "Configuration loaded.");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("cadence-{}-{}.toml", name, std::process::id()));
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn file_values_override_defaults() {
        let path = write_config("override", "[scheduler]\nworker_pool_size = 2\n");
        let config: Config = load_config_from(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.scheduler.worker_pool_size, 2);
        assert_eq!(config.scheduler.max_attempts, 3);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config_from("does-not-exist.toml").unwrap();
        assert_eq!(config.scheduler.retry_offsets_minutes, vec![120, 60]);
    }

    #[test]
    fn inconsistent_file_is_rejected() {
        let path = write_config("invalid", "[scheduler]\nworker_pool_size = 0\n");
        let result = load_config_from(&path);
        fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
