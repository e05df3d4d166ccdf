//! Package pre-build and the multistrap bootstrap.

use anyhow::Result;
use std::fs;
use std::path::Path;

use super::RfsBuilder;
use crate::error::{BuildError, Stage, StageContext};
use crate::process::Cmd;
use crate::timing::StageTimer;

/// multistrap's exit status when apt fails inside the bootstrap.
const MULTISTRAP_APT_FAILURE: i32 = 100;

impl RfsBuilder<'_> {
    /// Build every locally provided package the configuration requires.
    pub fn build_packages(&self) -> Result<()> {
        let timer = StageTimer::start(Stage::PackageBuild, "Building required packages");
        let onlpm = self
            .settings
            .package_manager()
            .stage(Stage::PackageBuild, || "Cannot locate the package manager")?;
        Cmd::new(onlpm.to_string_lossy())
            .args(["--try-arches", self.arch.as_str(), "all", "--skip-missing", "--require"])
            .args(self.packages())
            .run_on(self.runner)
            .stage(Stage::PackageBuild, || "Failed to build all required packages")?;
        timer.finish();
        Ok(())
    }

    /// Bootstrap a fresh tree at `dir`. An existing `dir` is removed first.
    pub fn multistrap(&self, dir: &Path) -> Result<()> {
        let timer = StageTimer::start(Stage::Multistrap, "Running multistrap");
        // The temporary file must outlive the multistrap run.
        let (conf, rendered) = self
            .config
            .multistrap
            .write_temp()
            .stage(Stage::Multistrap, || "Could not write multistrap configuration")?;

        if !self.settings.skip_package_scan {
            for repo in &rendered.local_repos {
                log::info!("Updating {}", repo.display());
                if repo.join("Makefile").exists() {
                    Cmd::new("make")
                        .arg("-C")
                        .arg_path(repo)
                        .run_on(self.runner)
                        .stage(Stage::Multistrap, || {
                            format!("Could not update local repository {}", repo.display())
                        })?;
                }
            }
        }

        if fs::symlink_metadata(dir).is_ok() {
            Cmd::new("rm")
                .arg("-rf")
                .arg_path(dir)
                .run_on(self.runner)
                .stage(Stage::Multistrap, || "Could not remove target directory")?;
        }

        let result = Cmd::new(self.settings.multistrap.to_string_lossy())
            .arg("-d")
            .arg_path(dir)
            .arg("-f")
            .arg_path(conf.path())
            .allow_fail()
            .interactive()
            .run_on(self.runner)
            .stage(Stage::Multistrap, || "Could not run multistrap")?;

        match result.code() {
            0 => {}
            MULTISTRAP_APT_FAILURE => {
                return Err(BuildError::new(Stage::Multistrap, "Multistrap APT failure.").into())
            }
            code => {
                return Err(BuildError::new(
                    Stage::Multistrap,
                    format!("Multistrap failed (exit code {}).", code),
                )
                .into())
            }
        }

        if self.settings.multistrap_debug {
            return Err(BuildError::new(Stage::Multistrap, "Multistrap debug.").into());
        }

        timer.finish();
        Ok(())
    }
}
