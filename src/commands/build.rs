//! Build command - runs the selected pipeline stages in order.

use anyhow::Result;
use std::path::PathBuf;

use crate::build::RfsBuilder;
use crate::error::{BuildError, Stage};

/// Which stages one invocation runs.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub dir: Option<PathBuf>,
    pub no_build_packages: bool,
    pub only_build_packages: bool,
    pub multistrap_only: bool,
    pub no_multistrap: bool,
    pub no_configure: bool,
    pub update: Vec<String>,
    pub install: Vec<String>,
    pub cpio: Option<PathBuf>,
    pub squash: Option<PathBuf>,
}

/// Execute the build command.
pub fn cmd_build(builder: &RfsBuilder<'_>, request: &BuildRequest) -> Result<()> {
    let dir = request
        .dir
        .as_deref()
        .ok_or_else(|| BuildError::new(Stage::Usage, "argument --dir is required"))?;

    if !request.no_build_packages {
        builder.build_packages()?;
        if request.only_build_packages {
            return Ok(());
        }
    }

    // Every later stage writes into the tree.
    builder.settings().require_root()?;

    if request.multistrap_only {
        return builder.multistrap(dir);
    }

    if request.no_multistrap || builder.settings().skip_multistrap {
        log::info!("Skipping multistrap");
    } else {
        builder.multistrap(dir)?;
    }

    if request.no_configure || builder.settings().skip_dpkg_configure {
        log::info!("Skipping configure");
    } else {
        builder.configure(dir)?;
    }

    if !request.update.is_empty() {
        builder.update(dir, &request.update)?;
    }

    if !request.install.is_empty() {
        builder.install(dir, &request.install)?;
    }

    if let Some(cpio) = &request.cpio {
        builder.make_cpio(dir, cpio)?;
    }

    if let Some(squash) = &request.squash {
        builder.make_squash(dir, squash)?;
    }

    log::info!("Root filesystem ready: {}", dir.display());
    Ok(())
}
