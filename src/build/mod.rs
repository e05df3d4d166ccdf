//! Root filesystem build pipeline.
//!
//! [`RfsBuilder`] owns one loaded configuration and drives the stages in
//! order. Each stage is its own method so the CLI can run any subset:
//!
//! 1. package pre-build (`build_packages`)
//! 2. bootstrap (`multistrap`)
//! 3. configure (dpkg-configure, then the `Configure` steps)
//! 4. extra packages (`update`, `install`)
//! 5. packaging (`make_cpio`, `make_squash`)
//!
//! Every external tool runs through the builder's [`Runner`].

mod bootstrap;
mod configure;
mod dpkg;
pub mod etc;
pub mod filesystem;
pub mod manifest;
mod packages;
pub mod users;

use anyhow::Result;
use std::io::Write;
use std::path::Path;

use crate::arch::Arch;
use crate::artifact;
use crate::config::Settings;
use crate::definition::{BuildConfiguration, ConfigSink, RenderedConfig};
use crate::error::{BuildError, Stage};
use crate::mounts::{self, MountGuard};
use crate::process::Runner;

pub use dpkg::CONFIGURE_SCRIPT;

/// Orchestrates one build invocation.
pub struct RfsBuilder<'r> {
    config: BuildConfiguration,
    arch: Arch,
    settings: Settings,
    runner: &'r dyn Runner,
}

impl<'r> RfsBuilder<'r> {
    /// Load `config_path` and check the host tools needed for `arch`.
    pub fn load(
        config_path: &Path,
        arch: Arch,
        settings: Settings,
        runner: &'r dyn Runner,
    ) -> Result<Self> {
        let config = BuildConfiguration::load(config_path)?;
        Ok(Self::new(config, arch, settings, runner)?)
    }

    /// Wrap an already loaded configuration.
    pub fn new(
        config: BuildConfiguration,
        arch: Arch,
        settings: Settings,
        runner: &'r dyn Runner,
    ) -> Result<Self, BuildError> {
        check_host_tools(&settings, &arch)?;
        Ok(Self {
            config,
            arch,
            settings,
            runner,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Every section's packages, in section order.
    pub fn packages(&self) -> Vec<String> {
        self.config.multistrap.packages()
    }

    /// Render the multistrap configuration to `sink`.
    pub fn write_msconfig(
        &self,
        sink: ConfigSink<'_>,
        stdout: &mut dyn Write,
    ) -> Result<RenderedConfig> {
        self.config.multistrap.write_to(sink, stdout)
    }

    /// Archive the tree as a cpio image.
    pub fn make_cpio(&self, dir: &Path, output: &Path) -> Result<()> {
        artifact::create_cpio(self.runner, &self.settings, dir, output)
    }

    /// Pack the tree into a squashfs image.
    pub fn make_squash(&self, dir: &Path, output: &Path) -> Result<()> {
        artifact::create_squashfs(self.runner, dir, output)
    }

    fn with_mounts<T, F>(&self, dir: &Path, manage_resolv: bool, body: F) -> Result<T>
    where
        F: FnOnce(&MountGuard<'_>) -> Result<T>,
    {
        mounts::with_mounts(
            self.runner,
            dir,
            manage_resolv,
            &self.settings.host_resolv_conf,
            body,
        )
    }
}

/// Fail if the bootstrap tool or the emulator `arch` needs is absent.
pub fn check_host_tools(settings: &Settings, arch: &Arch) -> Result<(), BuildError> {
    let mut required = vec![settings.multistrap.clone()];
    if let Some(emulator) = arch.emulator() {
        required.push(settings.emulator(emulator));
    }

    for tool in required {
        if !tool.exists() {
            return Err(BuildError::new(
                Stage::Validate,
                format!("{} is missing.", tool.display()),
            ));
        }
    }
    Ok(())
}
