//! Listing commands that stop before any build stage.

use anyhow::Result;
use std::io::Write;
use std::path::Path;

use crate::build::RfsBuilder;
use crate::definition::ConfigSink;

/// Print the flattened package list on one line.
pub fn cmd_show_packages(builder: &RfsBuilder<'_>, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}", builder.packages().join(" "))?;
    Ok(())
}

/// Write the rendered multistrap configuration to `target` (`-` for `out`).
pub fn cmd_msconfig(builder: &RfsBuilder<'_>, target: &Path, out: &mut dyn Write) -> Result<()> {
    let sink = ConfigSink::parse(target);
    let rendered = builder.write_msconfig(sink, out)?;
    if let ConfigSink::Path(path) = sink {
        log::info!("Wrote {}", path.display());
    }
    for repo in &rendered.local_repos {
        log::debug!("local repository {}", repo.display());
    }
    Ok(())
}
