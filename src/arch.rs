//! Target architectures and their user-mode emulators.

use std::fmt;

/// Debian architecture name of the filesystem being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arch(String);

impl Arch {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Static `qemu-*` binary needed to run target executables inside a
    /// chroot, or `None` for architectures the build host runs natively.
    pub fn emulator(&self) -> Option<&'static str> {
        match self.0.as_str() {
            "powerpc" => Some("qemu-ppc-static"),
            "armel" | "armhf" => Some("qemu-arm-static"),
            "arm64" => Some("qemu-aarch64-static"),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
