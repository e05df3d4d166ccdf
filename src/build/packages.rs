//! Extra packages layered onto a configured tree.
//!
//! Package specs come from repeated `--update`/`--install` flags and may
//! each hold a comma-separated list.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::RfsBuilder;
use crate::error::{BuildError, Stage, StageContext};
use crate::process::Cmd;
use crate::timing::StageTimer;

/// Flatten repeated, comma-separated package specs.
pub fn split_specs(specs: &[String]) -> Vec<&str> {
    specs
        .iter()
        .flat_map(|spec| spec.split(','))
        .map(str::trim)
        .filter(|pkg| !pkg.is_empty())
        .collect()
}

impl RfsBuilder<'_> {
    fn onlpm(&self, stage: Stage) -> Result<String, BuildError> {
        let path = self
            .settings
            .package_manager()
            .stage(stage, || "Cannot locate the package manager")?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Extract package contents straight into the tree.
    pub fn update(&self, dir: &Path, specs: &[String]) -> Result<()> {
        let onlpm = self.onlpm(Stage::Update)?;
        let timer = StageTimer::start(Stage::Update, "Updating packages");

        self.with_mounts(dir, true, |_| {
            for pkg in split_specs(specs) {
                log::info!("updating {} into {}", pkg, dir.display());
                Cmd::new(&onlpm)
                    .args(["--verbose", "--extract-dir", pkg])
                    .arg_path(dir)
                    .run_on(self.runner)
                    .stage(Stage::Update, || format!("update of {} failed", pkg))?;
            }
            Ok(())
        })?;

        timer.finish();
        Ok(())
    }

    /// Install packages with the tree's own dpkg and apt.
    ///
    /// Stops at the first package that cannot be found or installed.
    pub fn install(&self, dir: &Path, specs: &[String]) -> Result<()> {
        let onlpm = self.onlpm(Stage::Install)?;
        let timer = StageTimer::start(Stage::Install, "Installing packages");

        self.with_mounts(dir, true, |_| {
            for pkg in split_specs(specs) {
                self.install_one(&onlpm, dir, pkg)?;
            }
            Ok(())
        })?;

        timer.finish();
        Ok(())
    }

    fn install_one(&self, onlpm: &str, dir: &Path, pkg: &str) -> Result<()> {
        let lookup = Cmd::new(onlpm)
            .args(["--lookup", pkg])
            .run_on(self.runner)
            .stage(Stage::Install, || format!("cannot find {}", pkg))?;

        let artifact = lookup_artifact(pkg, &lookup.stdout)?;
        let Some(name) = artifact.file_name() else {
            return Err(BuildError::new(
                Stage::Install,
                format!("unusable lookup result for {}: {}", pkg, artifact.display()),
            )
            .into());
        };

        let tmp = dir.join("tmp");
        fs::create_dir_all(&tmp)
            .map_err(anyhow::Error::from)
            .and_then(|()| {
                fs::copy(&artifact, tmp.join(name))
                    .with_context(|| format!("Could not copy {}", artifact.display()))
            })
            .stage(Stage::Install, || format!("install of {} failed", pkg))?;
        let in_tree = Path::new("/tmp").join(name);

        log::info!("installing {} into {}", pkg, dir.display());
        Cmd::chroot(dir, "/usr/bin/rfs-dpkg")
            .arg("-i")
            .arg_path(&in_tree)
            .run_on(self.runner)
            .stage(Stage::Install, || format!("install of {} failed", pkg))?;

        let (base, _) = pkg.split_once(':').unwrap_or((pkg, ""));
        log::info!("updating dependencies for {}", pkg);
        Cmd::chroot(dir, "/usr/bin/rfs-apt-get")
            .args(["-f", "install", base])
            .run_on(self.runner)
            .stage(Stage::Install, || format!("install of {} failed", pkg))?;
        Ok(())
    }
}

/// First line of the package manager's lookup output.
fn lookup_artifact(pkg: &str, stdout: &str) -> Result<PathBuf, BuildError> {
    let first = stdout.lines().map(str::trim).find(|l| !l.is_empty());
    match first {
        None => Err(BuildError::new(Stage::Install, format!("cannot find {}", pkg))),
        Some(line) => Ok(PathBuf::from(line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_specs() {
        let specs = vec!["a,b".to_string(), "c".to_string(), "d, ,e".to_string()];
        assert_eq!(split_specs(&specs), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_lookup_artifact() {
        assert_eq!(
            lookup_artifact("onl-kernel", "/repo/onl-kernel_1.0_amd64.deb\nextra\n").unwrap(),
            PathBuf::from("/repo/onl-kernel_1.0_amd64.deb")
        );
        let err = lookup_artifact("missing", "  \n").unwrap_err();
        assert_eq!(err.stage, Stage::Install);
        assert_eq!(err.message, "cannot find missing");
    }
}
