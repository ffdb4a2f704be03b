use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flags::EnableEpochsConfig;
use crate::rating::RatingsConfig;
use crate::rewards::RewardsConfig;
use crate::Epoch;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration io error: {0}")]
    Io(#[from] io::Error),
    #[error("{label}: {message}")]
    Parse { label: String, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }

    fn parse(label: &str, message: impl ToString) -> Self {
        ConfigError::Parse {
            label: label.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigValidation {
    /// Unknown keys are ignored.
    Relaxed,
    /// Unknown keys are rejected.
    Strict,
}

fn parse_toml<T: DeserializeOwned>(
    content: &str,
    label: &str,
    validation: ConfigValidation,
) -> ConfigResult<T> {
    match validation {
        ConfigValidation::Relaxed => {
            toml::from_str(content).map_err(|err| ConfigError::parse(label, err))
        }
        ConfigValidation::Strict => {
            let mut unknown_keys = Vec::new();
            let deserializer = toml::de::Deserializer::new(content);

            let value = serde_ignored::deserialize(deserializer, |path| {
                unknown_keys.push(path.to_string());
            })
            .map_err(|err| ConfigError::parse(label, err))?;

            if !unknown_keys.is_empty() {
                return Err(ConfigError::parse(
                    label,
                    format!("unknown configuration key(s): {}", unknown_keys.join(", ")),
                ));
            }

            Ok(value)
        }
    }
}

/// Settings of the validator statistics processor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorStatsConfig {
    pub genesis_nonce: u64,
    pub num_shards: u32,
    /// Upper bound of missed rounds for which every skipped round's group is
    /// recomputed. Longer gaps are spread over the whole eligible list.
    pub max_computable_rounds: u64,
    pub max_consecutive_rounds_of_rating_decrease: u64,
    pub rating_enable_epoch: Epoch,
    pub ratings: RatingsConfig,
    pub enable_epochs: EnableEpochsConfig,
    pub rewards: RewardsConfig,
}

impl Default for ValidatorStatsConfig {
    fn default() -> Self {
        Self {
            genesis_nonce: 0,
            num_shards: 3,
            max_computable_rounds: 1_000,
            max_consecutive_rounds_of_rating_decrease: 600,
            rating_enable_epoch: 1,
            ratings: RatingsConfig::default(),
            enable_epochs: EnableEpochsConfig::default(),
            rewards: RewardsConfig::default(),
        }
    }
}

impl ValidatorStatsConfig {
    const PARSE_LABEL: &'static str = "validator stats configuration parse error";

    pub fn load_from_path_with_validation(
        path: &Path,
        validation: ConfigValidation,
    ) -> ConfigResult<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content, validation),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        Self::load_from_path_with_validation(path, ConfigValidation::Strict)
    }

    pub fn from_toml_str(content: &str, validation: ConfigValidation) -> ConfigResult<Self> {
        let config: Self = parse_toml(content, Self::PARSE_LABEL, validation)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ConfigError::parse("validator stats configuration encode error", err))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.num_shards == 0 {
            return Err(ConfigError::invalid("num_shards must be greater than 0"));
        }
        if self.max_computable_rounds == 0 {
            return Err(ConfigError::invalid(
                "max_computable_rounds must be greater than 0",
            ));
        }
        if self.max_consecutive_rounds_of_rating_decrease == 0 {
            return Err(ConfigError::invalid(
                "max_consecutive_rounds_of_rating_decrease must be greater than 0",
            ));
        }
        self.ratings.validate()?;
        self.rewards.validate()?;
        Ok(())
    }
}
