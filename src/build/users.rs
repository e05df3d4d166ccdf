//! Account provisioning inside the target tree.
//!
//! `groupadd`, `useradd`, `usermod` and `passwd` run chrooted so they use
//! the tree's own account database and login.defs. Deleting a user is done
//! by filtering `etc/passwd` and `etc/shadow` directly: `userdel` refuses to
//! remove accounts whose uid is in use on the host.

use anyhow::{anyhow, Context, Result};
use sha_crypt::{sha512_simple, Sha512Params};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::definition::{GroupSpec, UserSpec};
use crate::process::{Cmd, Runner};

/// True if the tree's `etc/group` has an entry named `group`.
fn group_exists(root: &Path, group: &str) -> Result<bool> {
    let path = root.join("etc/group");
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    Ok(content
        .lines()
        .any(|line| line.split(':').next() == Some(group)))
}

/// SHA-512 crypt hash (`$6$...`) with a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    sha512_simple(password, &Sha512Params::default())
        .map_err(|e| anyhow!("Failed to hash password: {:?}", e))
}

/// Account operations against one tree.
pub struct SystemAdmin<'a> {
    root: &'a Path,
    runner: &'a dyn Runner,
}

impl<'a> SystemAdmin<'a> {
    pub fn new(root: &'a Path, runner: &'a dyn Runner) -> Self {
        Self { root, runner }
    }

    fn chroot(&self, program: &str) -> Cmd {
        Cmd::chroot(self.root, program)
    }

    /// Remove `username` from passwd and shadow. Missing files are ignored.
    pub fn userdel(&self, username: &str) -> Result<()> {
        let prefix = format!("{}:", username);
        for name in ["etc/passwd", "etc/shadow"] {
            let path = self.root.join(name);
            if !path.exists() {
                continue;
            }
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let kept: String = content
                .split_inclusive('\n')
                .filter(|line| !line.starts_with(&prefix))
                .collect();
            fs::write(&path, kept).with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }

    /// Create a group. Returns false if it already existed.
    pub fn groupadd(&self, group: &GroupSpec) -> Result<bool> {
        if group_exists(self.root, &group.name)? {
            log::info!("group {} already exists", group.name);
            return Ok(false);
        }

        let mut cmd = self.chroot("groupadd");
        if group.force {
            cmd = cmd.arg("--force");
        }
        if group.system {
            cmd = cmd.arg("--system");
        }
        if !group.unique {
            cmd = cmd.arg("--non-unique");
        }
        if let Some(password) = &group.password {
            cmd = cmd.args(["--password", password.as_str()]);
        }
        if let Some(gid) = &group.gid {
            cmd = cmd.args(["--gid", gid.0.as_str()]);
        }
        cmd.arg(&group.name)
            .error_msg(format!("Adding group '{}' failed", group.name))
            .run_on(self.runner)?;

        log::info!("added group {}", group.name);
        Ok(true)
    }

    /// Create a user account.
    pub fn useradd(&self, user: &UserSpec) -> Result<()> {
        let mut cmd = self.chroot("useradd").arg("--create-home");

        if let Some(uid) = &user.uid {
            cmd = cmd.args(["--non-unique", "--uid", uid.0.as_str()]);
        }
        if let Some(gid) = &user.gid {
            cmd = cmd.args(["--gid", gid.0.as_str()]);
        }
        if let Some(password) = &user.password {
            cmd = cmd.arg("-p").arg(hash_password(password)?);
        }
        if let Some(shell) = &user.shell {
            cmd = cmd.args(["--shell", shell.as_str()]);
        }
        if let Some(home) = &user.home {
            cmd = cmd.args(["--home", home.as_str()]);
        }
        if !user.groups.is_empty() {
            cmd = cmd.arg("--groups").arg(user.groups.join(","));
        }

        if user.delete_first {
            self.userdel(&user.name)?;
        }

        cmd.arg(&user.name)
            .error_msg(format!("Adding user '{}' failed", user.name))
            .run_on(self.runner)?;

        if user.password.is_none() {
            self.chroot("passwd")
                .args(["-d", user.name.as_str()])
                .error_msg(format!("Error deleting password for user '{}'", user.name))
                .run_on(self.runner)?;
        }

        if user.sudo {
            self.write_sudoer(&user.name)?;
        }

        log::info!("added user {}", user.name);
        Ok(())
    }

    fn write_sudoer(&self, username: &str) -> Result<()> {
        let dir = self.root.join("etc/sudoers.d");
        fs::create_dir_all(&dir)?;
        let sudoer = dir.join(username);
        fs::write(&sudoer, format!("{} ALL=(ALL:ALL) NOPASSWD:ALL\n", username))
            .with_context(|| format!("Failed to write {}", sudoer.display()))?;
        fs::set_permissions(&sudoer, fs::Permissions::from_mode(0o440))?;
        Ok(())
    }

    /// Replace the password of an existing account.
    pub fn user_password_set(&self, username: &str, password: &str) -> Result<()> {
        log::info!("setting password for user {}", username);
        self.chroot("usermod")
            .arg("-p")
            .arg(hash_password(password)?)
            .arg(username)
            .error_msg(format!("Error setting password for user '{}'", username))
            .run_on(self.runner)?;
        Ok(())
    }
}
