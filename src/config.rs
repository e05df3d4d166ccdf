//! Process-level settings for rfsgen.
//!
//! Reads configuration from the environment (after `.env` has been loaded by
//! `main`). Everything the builder would otherwise look up globally is
//! collected here once and handed to [`crate::build::RfsBuilder`].

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{BuildError, Stage};

/// Default location of the bootstrap tool.
pub const DEFAULT_MULTISTRAP: &str = "/usr/sbin/multistrap";

/// Directory holding the `qemu-*-static` user-mode emulators.
pub const DEFAULT_EMULATOR_DIR: &str = "/usr/bin";

/// Host resolver configuration copied into the tree while configuring.
pub const DEFAULT_HOST_RESOLV_CONF: &str = "/etc/resolv.conf";

/// rfsgen settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Install root of the surrounding build tree (`ONL`). Sibling tooling
    /// (package manager, cpio script, dpkg fix-ups) is found under it.
    pub install_root: Option<PathBuf>,
    /// Skip running `make` in local package repositories before bootstrap.
    pub skip_package_scan: bool,
    /// Skip the configure stage, dpkg-configure included.
    pub skip_dpkg_configure: bool,
    /// Skip the multistrap stage.
    pub skip_multistrap: bool,
    /// Stop with an error right after multistrap for inspection.
    pub multistrap_debug: bool,
    /// Running with effective uid 0. Mounts, chroot and the in-tree edits
    /// all need it.
    pub is_root: bool,
    pub multistrap: PathBuf,
    pub emulator_dir: PathBuf,
    pub host_resolv_conf: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            install_root: None,
            skip_package_scan: false,
            skip_dpkg_configure: false,
            skip_multistrap: false,
            multistrap_debug: false,
            is_root: false,
            multistrap: PathBuf::from(DEFAULT_MULTISTRAP),
            emulator_dir: PathBuf::from(DEFAULT_EMULATOR_DIR),
            host_resolv_conf: PathBuf::from(DEFAULT_HOST_RESOLV_CONF),
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let is_root = unsafe { libc::geteuid() } == 0;
        Self::from_vars(std::env::vars(), is_root)
    }

    /// Build settings from an explicit set of variables.
    ///
    /// `is_root` is the effective-uid check, passed in so tests can choose.
    pub fn from_vars<I, K, V>(vars: I, is_root: bool) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env_vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let defaults = Self::default();

        // Presence switches: any value, even empty, turns them on.
        let present = |key: &str| env_vars.contains_key(key);
        // Value switches: any non-empty value turns them on, "0" included.
        let enabled = |key: &str| env_vars.get(key).is_some_and(|v| !v.is_empty());

        Self {
            install_root: env_vars
                .get("ONL")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            skip_package_scan: present("ONLRFS_NO_PACKAGE_SCAN"),
            skip_dpkg_configure: enabled("NO_DPKG_CONFIGURE"),
            skip_multistrap: enabled("NO_MULTISTRAP"),
            multistrap_debug: enabled("MULTISTRAP_DEBUG"),
            is_root,
            host_resolv_conf: env_vars
                .get("RFS_HOST_RESOLV_CONF")
                .map(PathBuf::from)
                .unwrap_or(defaults.host_resolv_conf),
            ..defaults
        }
    }

    /// Fail unless running as root.
    pub fn require_root(&self) -> Result<(), BuildError> {
        if self.is_root {
            return Ok(());
        }
        Err(BuildError::new(
            Stage::Usage,
            "rfsgen must run as root to modify the target tree (try sudo -E).",
        ))
    }

    /// Resolve a path below the install root.
    pub fn tool_path(&self, relative: &str) -> Result<PathBuf> {
        match &self.install_root {
            Some(root) => Ok(root.join(relative)),
            None => bail!(
                "ONL is not set; cannot locate '{}'. Export ONL to the build tree root.",
                relative
            ),
        }
    }

    /// `tools/onlpm.py` below the install root.
    pub fn package_manager(&self) -> Result<PathBuf> {
        self.tool_path("tools/onlpm.py")
    }

    /// Path of the emulator binary `name`.
    pub fn emulator(&self, name: &str) -> PathBuf {
        self.emulator_dir.join(name)
    }
}
