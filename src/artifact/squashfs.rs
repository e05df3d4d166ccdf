//! Compressed read-only image of the tree.

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::error::{BuildError, Stage, StageContext};
use crate::process::{Cmd, Runner};
use crate::timing::StageTimer;

/// gzip decompression is available in every kernel we boot.
const SQUASHFS_COMPRESSION: &str = "gzip";

/// Create a squashfs image of `dir` at `output`.
///
/// An existing image is replaced. If mksquashfs fails, whatever it wrote
/// is removed.
pub fn create_squashfs(runner: &dyn Runner, dir: &Path, output: &Path) -> Result<()> {
    let timer = StageTimer::start(Stage::Squash, "Creating squashfs");

    remove_existing(output).stage(Stage::Squash, || "Could not remove old image")?;

    let result = Cmd::new("mksquashfs")
        .arg_path(dir)
        .arg_path(output)
        .args(["-no-progress", "-noappend", "-comp", SQUASHFS_COMPRESSION])
        .allow_fail()
        .interactive()
        .run_on(runner);

    let failed = match &result {
        Ok(r) => !r.success(),
        Err(e) => {
            log::error!("{:#}", e);
            true
        }
    };
    if failed {
        if let Err(e) = remove_existing(output) {
            log::warn!("Could not remove partial image {}: {:#}", output.display(), e);
        }
        return Err(BuildError::new(Stage::Squash, "Squash creation failed.").into());
    }

    if let Ok(meta) = fs::metadata(output) {
        log::info!("Squashfs created: {} MB", meta.len() / 1024 / 1024);
    }
    timer.finish();
    Ok(())
}

fn remove_existing(path: &Path) -> Result<()> {
    if fs::symlink_metadata(path).is_ok() {
        fs::remove_file(path)?;
    }
    Ok(())
}
