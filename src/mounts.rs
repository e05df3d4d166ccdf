//! Scoped `/dev`, `/proc` and `resolv.conf` setup inside a target tree.
//!
//! Chrooted package tools need device nodes and procfs, and network access
//! needs the host resolver. [`MountGuard`] acquires these and releases them
//! when dropped, so every exit path (early `?` returns, panics) tears them
//! down. Use [`with_mounts`] for the common enter/body/exit shape.

use anyhow::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Stage};
use crate::process::{Cmd, Runner};

/// Suffix of the saved resolver file while the host copy is installed.
const RESOLV_BACKUP_SUFFIX: &str = ".rfsgen";

/// What one activation has acquired so far.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MountState {
    pub dev_mounted: bool,
    pub proc_mounted: bool,
    /// Host resolv.conf has been copied into the tree.
    pub resolv_installed: bool,
    /// Where the tree's own resolv.conf was moved, if it had one.
    pub resolv_backup: Option<PathBuf>,
}

/// Active mounts in a target tree. Released on drop.
pub struct MountGuard<'a> {
    runner: &'a dyn Runner,
    root: PathBuf,
    manage_resolv: bool,
    host_resolv: PathBuf,
    state: MountState,
    released: bool,
}

impl<'a> MountGuard<'a> {
    /// Mount `dev` and `proc` under `root` and, if `manage_resolv`, swap in
    /// the host resolver configuration.
    ///
    /// On failure everything acquired so far is released before the error
    /// is returned.
    pub fn enter(
        runner: &'a dyn Runner,
        root: &Path,
        manage_resolv: bool,
        host_resolv: &Path,
    ) -> Result<Self> {
        let mut guard = Self {
            runner,
            root: root.to_path_buf(),
            manage_resolv,
            host_resolv: host_resolv.to_path_buf(),
            state: MountState::default(),
            released: false,
        };

        // An early return drops `guard`, which unwinds the partial state.
        guard.mount("devtmpfs", "dev")?;
        guard.state.dev_mounted = true;
        guard.mount("proc", "proc")?;
        guard.state.proc_mounted = true;

        if manage_resolv {
            guard.install_resolv_conf()?;
        }

        Ok(guard)
    }

    pub fn state(&self) -> &MountState {
        &self.state
    }

    fn resolv_conf(&self) -> PathBuf {
        self.root.join("etc/resolv.conf")
    }

    fn mount(&self, fstype: &str, name: &str) -> Result<()> {
        Cmd::new("mount")
            .args(["-t", fstype, name])
            .arg_path(&self.root.join(name))
            .run_on(self.runner)
            .map_err(|e| {
                BuildError::new(Stage::Mount, format!("Could not mount {} in rfs: {:#}", name, e))
            })?;
        Ok(())
    }

    fn install_resolv_conf(&mut self) -> Result<()> {
        let target = self.resolv_conf();

        if exists_or_symlink(&target) {
            let backup = backup_path(&target);
            fs::rename(&target, &backup).map_err(|e| {
                BuildError::new(Stage::Mount, format!("Could not backup resolv.conf: {}", e))
            })?;
            self.state.resolv_backup = Some(backup);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BuildError::new(
                    Stage::Mount,
                    format!("Could not create {}: {}", parent.display(), e),
                )
            })?;
        }
        // Mark first: a partially written copy must still be removed on exit.
        self.state.resolv_installed = true;
        fs::copy(&self.host_resolv, &target).map_err(|e| {
            BuildError::new(
                Stage::Mount,
                format!("Could not install new resolv.conf: {}", e),
            )
        })?;
        Ok(())
    }

    /// Release everything, reporting the first failure.
    ///
    /// Prefer this over dropping on the success path so cleanup failures
    /// surface as errors.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let errors = self.teardown();
        match errors.into_iter().next() {
            Some(first) => Err(BuildError::new(Stage::Mount, first).into()),
            None => Ok(()),
        }
    }

    /// Undo acquired state in reverse order. Every step is attempted.
    fn teardown(&mut self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut mounted = Vec::new();
        if self.state.dev_mounted {
            mounted.push(self.root.join("dev"));
        }
        if self.state.proc_mounted {
            mounted.push(self.root.join("proc"));
        }
        if !mounted.is_empty() {
            let mut cmd = Cmd::new("umount").arg("-l");
            for path in &mounted {
                cmd = cmd.arg_path(path);
            }
            match cmd.run_on(self.runner) {
                Ok(_) => {
                    self.state.dev_mounted = false;
                    self.state.proc_mounted = false;
                }
                Err(e) => errors.push(format!("Could not unmount dev and proc: {:#}", e)),
            }
        }

        if self.manage_resolv {
            let target = self.resolv_conf();
            if self.state.resolv_installed {
                match remove_if_present(&target) {
                    Ok(()) => self.state.resolv_installed = false,
                    Err(e) => errors.push(format!("Could not remove new resolv.conf: {}", e)),
                }
            }
            if let Some(backup) = self.state.resolv_backup.take() {
                if let Err(e) = fs::rename(&backup, &target) {
                    errors.push(format!("Could not restore resolv.conf: {}", e));
                    self.state.resolv_backup = Some(backup);
                }
            }
        }

        errors
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for err in self.teardown() {
            log::warn!("cleanup of {}: {}", self.root.display(), err);
        }
    }
}

/// Run `body` with `/dev`, `/proc` (and optionally `resolv.conf`) set up in
/// `root`.
///
/// Teardown always runs. A failure from `body` wins over teardown failures,
/// which are then only logged.
pub fn with_mounts<T, F>(
    runner: &dyn Runner,
    root: &Path,
    manage_resolv: bool,
    host_resolv: &Path,
    body: F,
) -> Result<T>
where
    F: FnOnce(&MountGuard<'_>) -> Result<T>,
{
    let guard = MountGuard::enter(runner, root, manage_resolv, host_resolv)?;
    match body(&guard) {
        Ok(value) => {
            guard.release()?;
            Ok(value)
        }
        // Dropping the guard logs teardown problems without replacing `err`.
        Err(err) => {
            drop(guard);
            Err(err)
        }
    }
}

fn exists_or_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(RESOLV_BACKUP_SUFFIX);
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/rfs/etc/resolv.conf")),
            PathBuf::from("/rfs/etc/resolv.conf.rfsgen")
        );
    }

    #[test]
    fn test_remove_if_present_tolerates_missing() {
        assert!(remove_if_present(Path::new("/nonexistent/resolv.conf")).is_ok());
    }
}
