//! First-boot package configuration of a freshly bootstrapped tree.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::RfsBuilder;
use crate::error::{Stage, StageContext};
use crate::process::Cmd;
use crate::timing::StageTimer;

/// Script run inside the chroot.
///
/// The first `dpkg --configure -a` may fail (ordering between packages);
/// the second may not. `policy-rc.d` is only removed when both passes
/// succeed, so a failed build keeps service starts blocked.
pub const CONFIGURE_SCRIPT: &str = r##"#!/bin/bash -ex
/bin/echo -e "#!/bin/sh\nexit 101" >/usr/sbin/policy-rc.d
chmod +x /usr/sbin/policy-rc.d
export DEBIAN_FRONTEND=noninteractive
export DEBCONF_NONINTERACTIVE_SEEN=true
echo "127.0.0.1 localhost" >/etc/hosts
touch /etc/fstab
echo "localhost" >/etc/hostname
if [ -f /var/lib/dpkg/info/dash.preinst ]; then
    /var/lib/dpkg/info/dash.preinst install
fi
if [ -f /usr/sbin/locale-gen ]; then
    echo "en_US.UTF-8 UTF-8" >/etc/locale.gen
    /usr/sbin/locale-gen
    update-locale LANG=en_US.UTF-8
fi

dpkg --configure -a || true
dpkg --configure -a # configure any packages that failed the first time and abort on failure.

rm -f /usr/sbin/policy-rc.d
"##;

/// Replacement for base-files' postinst, which fails under emulation.
const BASE_FILES_POSTINST: &str = "tools/scripts/base-files.postinst";

impl RfsBuilder<'_> {
    /// Run `dpkg --configure -a` inside `dir`.
    ///
    /// The caller provides the `/dev` and `/proc` mounts.
    pub(super) fn dpkg_configure(&self, dir: &Path) -> Result<()> {
        let timer = StageTimer::start(Stage::DpkgConfigure, "dpkg-configure filesystem");

        if let Some(emulator) = self.arch.emulator() {
            let src = self.settings.emulator(emulator);
            let dest = dir.join("usr/bin").join(emulator);
            copy_into_tree(&src, &dest).stage(Stage::DpkgConfigure, || "Emulator setup failed")?;
        }

        let postinst = self
            .settings
            .tool_path(BASE_FILES_POSTINST)
            .stage(Stage::DpkgConfigure, || "Cannot locate base-files.postinst")?;
        let dest = dir.join("var/lib/dpkg/info/base-files.postinst");
        copy_into_tree(&postinst, &dest)
            .stage(Stage::DpkgConfigure, || "base-files fix-up failed")?;

        let script = dir.join("tmp/configure.sh");
        write_script(&script).stage(Stage::DpkgConfigure, || "Could not write configure script")?;

        Cmd::chroot(dir, "/tmp/configure.sh")
            .interactive()
            .run_on(self.runner)
            .stage(Stage::DpkgConfigure, || "Post Configuration failed")?;
        fs::remove_file(&script)
            .with_context(|| format!("Failed to remove {}", script.display()))
            .stage(Stage::DpkgConfigure, || "Could not remove configure script")?;

        timer.finish();
        Ok(())
    }
}

fn copy_into_tree(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::copy(src, dest).with_context(|| format!("Could not copy {} into the tree", src.display()))?;
    Ok(())
}

fn write_script(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, CONFIGURE_SCRIPT)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}
