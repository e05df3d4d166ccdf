//! Build and configuration-load errors.
//!
//! Internal code returns `anyhow::Result`. Failures that end a build are
//! wrapped in [`BuildError`] at the stage boundary so the CLI can tell which
//! stage failed without parsing messages.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage a [`BuildError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Configuration validation and host tool checks.
    Validate,
    /// Local package pre-build.
    PackageBuild,
    Multistrap,
    DpkgConfigure,
    Configure,
    Update,
    Install,
    Cpio,
    Squash,
    /// Mounting or unmounting inside the target tree.
    Mount,
    EnableRoot,
    /// Missing or conflicting command-line input.
    Usage,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::PackageBuild => "package-build",
            Stage::Multistrap => "multistrap",
            Stage::DpkgConfigure => "dpkg-configure",
            Stage::Configure => "configure",
            Stage::Update => "update",
            Stage::Install => "install",
            Stage::Cpio => "cpio",
            Stage::Squash => "squash",
            Stage::Mount => "mount",
            Stage::EnableRoot => "enable-root",
            Stage::Usage => "usage",
        };
        f.write_str(name)
    }
}

/// A fatal failure in one build stage.
#[derive(Debug, Error)]
#[error("[{stage}] {message}")]
pub struct BuildError {
    pub stage: Stage,
    pub message: String,
}

impl BuildError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Failure to load the build configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file '{}' does not exist.", .0.display())]
    Missing(PathBuf),
    #[error("Could not read configuration file '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse configuration file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Converts any failure into a [`BuildError`] for `stage`.
pub trait StageContext<T> {
    fn stage<F, M>(self, stage: Stage, message: F) -> Result<T, BuildError>
    where
        F: FnOnce() -> M,
        M: fmt::Display;
}

impl<T> StageContext<T> for anyhow::Result<T> {
    fn stage<F, M>(self, stage: Stage, message: F) -> Result<T, BuildError>
    where
        F: FnOnce() -> M,
        M: fmt::Display,
    {
        self.map_err(|err| match err.downcast::<BuildError>() {
            // Already attributed to a stage.
            Ok(build) => build,
            Err(err) => BuildError::new(stage, format!("{}: {:#}", message(), err)),
        })
    }
}

/// The stage of a build failure, if `err` carries one.
pub fn failed_stage(err: &anyhow::Error) -> Option<Stage> {
    err.downcast_ref::<BuildError>().map(|e| e.stage)
}
