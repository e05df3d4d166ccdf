//! Enable root login on an existing tree.

use anyhow::Result;
use std::path::Path;

use crate::build::etc;
use crate::build::users::SystemAdmin;
use crate::config::Settings;
use crate::error::{Stage, StageContext};
use crate::process::Runner;

/// Set the root password and allow root SSH login.
pub fn cmd_enable_root(
    runner: &dyn Runner,
    settings: &Settings,
    dir: &Path,
    password: &str,
) -> Result<()> {
    settings.require_root()?;
    SystemAdmin::new(dir, runner)
        .user_password_set("root", password)
        .stage(Stage::EnableRoot, || "Could not set the root password")?;
    etc::enable_root_login(dir).stage(Stage::EnableRoot, || "Could not update sshd_config")?;
    Ok(())
}
