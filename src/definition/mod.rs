//! Build configuration document.
//!
//! A build configuration is a YAML document with a required `Multistrap`
//! section and an optional `Configure` section. It is loaded and validated
//! once; the builder only reads it afterwards.

pub mod configure;
pub mod multistrap;

use anyhow::Result;
use serde_yaml::Value;
use std::fs;
use std::path::Path;

pub use configure::{ConfigureStep, GroupSpec, ManifestSpec, OptionFlag, UserSpec};
pub use multistrap::{ConfigSink, MultistrapConfig, RenderedConfig};

use crate::error::{BuildError, ConfigError, Stage};

/// A loaded and validated build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfiguration {
    pub multistrap: MultistrapConfig,
    pub configure: Vec<ConfigureStep>,
}

impl BuildConfiguration {
    /// Load a configuration file.
    ///
    /// Missing or unparseable files yield [`ConfigError`]; structural
    /// problems yield a [`BuildError`] from [`Stage::Validate`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()).into());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_value(&value)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, BuildError> {
        let root = value.as_mapping().ok_or_else(|| {
            BuildError::new(Stage::Validate, "The configuration must be a mapping.")
        })?;

        let multistrap = root.get("Multistrap").ok_or_else(|| {
            BuildError::new(
                Stage::Validate,
                "The Multistrap configuration section is missing.",
            )
        })?;
        let multistrap = MultistrapConfig::from_yaml(multistrap)?;

        let configure = match root.get("Configure") {
            Some(section) => configure::parse_steps(section)?,
            None => Vec::new(),
        };

        Ok(Self {
            multistrap,
            configure,
        })
    }
}
