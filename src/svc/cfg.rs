//! # Configuration module
//!
//! This module provides utilities and helpers to interact with the
//! configuration, following the same layered `config`-crate strategy
//! (defaults, then an optional file, then the `ALFA_*` environment) as the
//! reference operator's configuration module, adapted to the fields this
//! operator needs (SPEC_FULL.md §10.2).

use std::{
    convert::TryFrom,
    env::{self, VarError},
    path::PathBuf,
};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// -----------------------------------------------------------------------------
// Constants

pub const OPERATOR_LISTEN: &str = "0.0.0.0:8000";
pub const DEFAULT_API_ENDPOINT: &str = "http://localhost:8001";
pub const DEFAULT_COOLDOWN: u64 = 5;
pub const DEFAULT_REGEX: &str = ".*";

// -----------------------------------------------------------------------------
// Api structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Api {
    #[serde(rename = "endpoint")]
    pub endpoint: String,
}

// -----------------------------------------------------------------------------
// Operator structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Operator {
    #[serde(rename = "listen")]
    pub listen: String,
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load configuration, {0}")]
    Build(ConfigError),
    #[error("failed to deserialize configuration, {0}")]
    Deserialize(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
    #[error("failed to retrieve environment variable '{0}', {1}")]
    EnvironmentVariable(&'static str, VarError),
    #[error("'parent' must be set, pass --parent or set ALFA_PARENT")]
    MissingParent,
    #[error("failed to compile regular expression for key '{0}', {1}")]
    Regex(&'static str, regex::Error),
}

// -----------------------------------------------------------------------------
// Configuration structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    /// The single parent kind this operator instance services.
    #[serde(rename = "parent", default)]
    pub parent: String,
    #[serde(rename = "api")]
    pub api: Api,
    #[serde(rename = "operator")]
    pub operator: Operator,
    /// Debounce window, in seconds, of the template consumer's cooldown gate.
    #[serde(rename = "cooldown", default = "Configuration::default_cooldown")]
    pub cooldown: u64,
    #[serde(
        rename = "templateNameRegex",
        default = "Configuration::default_regex"
    )]
    pub template_name_regex: String,
    #[serde(rename = "appNameRegex", default = "Configuration::default_regex")]
    pub app_name_regex: String,
    /// When set, every aggregation stage and every reconciled object body is
    /// dumped under this directory (SPEC_FULL.md §6/§10.9).
    #[serde(rename = "dump", default)]
    pub dump: Option<PathBuf>,
    /// Run every stage up to and including dumping, but never issue
    /// POST/PUT (SPEC_FULL.md §9 Open Questions).
    #[serde(rename = "dryRun", default)]
    pub dry_run: bool,
}

impl Configuration {
    fn default_cooldown() -> u64 {
        DEFAULT_COOLDOWN
    }

    fn default_regex() -> String {
        DEFAULT_REGEX.to_string()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, Error> {
        Ok(Config::builder()
            .set_default("parent", "")
            .map_err(|err| Error::Default("parent".into(), err))?
            .set_default("api.endpoint", DEFAULT_API_ENDPOINT)
            .map_err(|err| Error::Default("api.endpoint".into(), err))?
            .set_default("operator.listen", OPERATOR_LISTEN)
            .map_err(|err| Error::Default("operator.listen".into(), err))?
            .set_default("cooldown", DEFAULT_COOLDOWN)
            .map_err(|err| Error::Default("cooldown".into(), err))?
            .set_default("templateNameRegex", DEFAULT_REGEX)
            .map_err(|err| Error::Default("templateNameRegex".into(), err))?
            .set_default("appNameRegex", DEFAULT_REGEX)
            .map_err(|err| Error::Default("appNameRegex".into(), err))?
            .set_default("dryRun", false)
            .map_err(|err| Error::Default("dryRun".into(), err))?
            .add_source(Environment::with_prefix("ALFA")))
    }
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::builder()?
            .add_source(File::from(path).required(true))
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Deserialize)
    }
}

impl Configuration {
    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn try_default() -> Result<Self, Error> {
        Self::builder()?
            .add_source(File::from(PathBuf::from("/etc/alfa-operator/config")).required(false))
            .add_source(
                File::from(PathBuf::from(format!(
                    "{}/.config/alfa-operator/config",
                    env::var("HOME").map_err(|err| Error::EnvironmentVariable("HOME", err))?,
                )))
                .required(false),
            )
            .add_source(File::from(PathBuf::from("config")).required(false))
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Deserialize)
    }

    /// Validates the template-name and app-name regular expressions compile
    /// and that a parent kind was configured.
    pub fn validate(&self) -> Result<(), Error> {
        if self.parent.is_empty() {
            return Err(Error::MissingParent);
        }

        regex::Regex::new(&self.template_name_regex)
            .map_err(|err| Error::Regex("templateNameRegex", err))?;
        regex::Regex::new(&self.app_name_regex).map_err(|err| Error::Regex("appNameRegex", err))?;

        Ok(())
    }

    /// Prints a message about missing value for configuration key
    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn help(&self) {
        #[cfg(feature = "metrics")]
        info!("Build with 'metrics' feature flag");

        if self.parent.is_empty() {
            warn!("Configuration key 'parent' has an empty value");
        }

        if let Some(dump) = &self.dump {
            info!(dump = %dump.display(), "Dump facility is enabled");
        }

        if self.dry_run {
            info!("Running in dry-run mode, no POST/PUT will be issued");
        }
    }
}
