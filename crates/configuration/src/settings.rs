use crate::error::ConfigError;
use chrono::{Duration, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerSettings,
    pub validation: ValidationSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

impl Config {
    /// Checks the settings for combinations that would make the scheduler misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.validation.validate()?;
        Ok(())
    }
}

/// Contains parameters for the daily execution run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Business-local time at which the first attempt for each due plan is made.
    pub day_start: NaiveTime,
    /// Business-local time after which no attempt is made for the day.
    pub cutoff: NaiveTime,
    /// Total attempts per plan per due date, including the first.
    pub max_attempts: u32,
    /// Minutes before the cut-off at which each retry fires, one per retry, in order.
    /// `[120, 60]` means the second attempt runs two hours before cut-off, the third one hour before.
    pub retry_offsets_minutes: Vec<u32>,
    /// Upper bound on attempts running at once. Plans waiting for a retry slot do not count.
    pub worker_pool_size: usize,
    /// Saturdays and Sundays are not business days.
    pub skip_weekends: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            day_start: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            cutoff: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or(NaiveTime::MIN),
            max_attempts: 3,
            retry_offsets_minutes: vec![120, 60],
            worker_pool_size: 8,
            skip_weekends: true,
        }
    }
}

impl SchedulerSettings {
    /// The business-local times of every retry after the first attempt.
    pub fn retry_times(&self) -> Vec<NaiveTime> {
        self.retry_offsets_minutes
            .iter()
            .map(|offset| self.cutoff - Duration::minutes(i64::from(*offset)))
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.max_attempts must be at least 1".to_string(),
            ));
        }
        let retries = (self.max_attempts - 1) as usize;
        if self.retry_offsets_minutes.len() != retries {
            return Err(ConfigError::ValidationError(format!(
                "scheduler.retry_offsets_minutes must list {} offset(s), one per retry, found {}",
                retries,
                self.retry_offsets_minutes.len()
            )));
        }
        if self.day_start >= self.cutoff {
            return Err(ConfigError::ValidationError(
                "scheduler.day_start must be earlier than scheduler.cutoff".to_string(),
            ));
        }
        let mut previous = self.day_start;
        for (offset, slot) in self.retry_offsets_minutes.iter().zip(self.retry_times()) {
            if *offset == 0 || slot <= previous || slot >= self.cutoff {
                return Err(ConfigError::ValidationError(format!(
                    "scheduler.retry_offsets_minutes: retry at {} must fall after {} and before the cut-off",
                    slot, previous
                )));
            }
            previous = slot;
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.worker_pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunables for the validation rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Allowed deviation of the nominee percentage total from 100.
    pub percentage_tolerance: Decimal,
    /// Nominees younger than this need a guardian.
    pub majority_age: u32,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            percentage_tolerance: dec!(0.01),
            majority_age: 18,
        }
    }
}

impl ValidationSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.percentage_tolerance <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "validation.percentage_tolerance must be greater than 0".to_string(),
            ));
        }
        if self.majority_age == 0 {
            return Err(ConfigError::ValidationError(
                "validation.majority_age must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the plan store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Falls back to the `DATABASE_URL` environment variable when unset.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap()
    }

    #[test]
    fn defaults_are_consistent() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.scheduler.retry_times(),
            vec![
                NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(14, 0, 0).unwrap()
            ]
        );
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = parse(
            r#"
            [scheduler]
            cutoff = "14:30:00"
            worker_pool_size = 2

            [logging]
            format = "json"
            "#,
        );
        assert_eq!(config.scheduler.cutoff, NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.scheduler.worker_pool_size, 2);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.validation.majority_age, 18);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn offsets_must_match_retry_count() {
        let mut config = Config::default();
        config.scheduler.max_attempts = 4;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn retry_slots_must_move_towards_the_cutoff() {
        let mut config = Config::default();
        config.scheduler.retry_offsets_minutes = vec![60, 120];
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_slots_must_follow_the_day_start() {
        let mut config = Config::default();
        config.scheduler.day_start = NaiveTime::from_hms_opt(13, 30, 0).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn single_attempt_needs_no_offsets() {
        let mut config = Config::default();
        config.scheduler.max_attempts = 1;
        config.scheduler.retry_offsets_minutes.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tolerance_must_be_positive() {
        let mut config = Config::default();
        config.validation.percentage_tolerance = Decimal::ZERO;
        assert!(config.validate().is_err());
    }
}
