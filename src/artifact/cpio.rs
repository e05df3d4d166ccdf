//! cpio archive of the tree, for initramfs-style loading.

use anyhow::Result;
use std::path::Path;

use crate::config::Settings;
use crate::error::{BuildError, Stage, StageContext};
use crate::process::{Cmd, Runner};
use crate::timing::StageTimer;

const MAKE_CPIO: &str = "tools/scripts/make-cpio.sh";

/// Archive `dir` into `output` with the build tree's cpio script.
pub fn create_cpio(runner: &dyn Runner, settings: &Settings, dir: &Path, output: &Path) -> Result<()> {
    let script = settings
        .tool_path(MAKE_CPIO)
        .stage(Stage::Cpio, || "Cannot locate make-cpio.sh")?;
    let timer = StageTimer::start(Stage::Cpio, "Creating cpio archive");

    let result = Cmd::new(script.to_string_lossy())
        .arg_path(dir)
        .arg_path(output)
        .allow_fail()
        .interactive()
        .run_on(runner)
        .stage(Stage::Cpio, || "cpio creation failed")?;
    if !result.success() {
        return Err(BuildError::new(Stage::Cpio, "cpio creation failed.").into());
    }

    timer.finish();
    Ok(())
}
