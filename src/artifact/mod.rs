//! Images built from a finished tree.

mod cpio;
mod squashfs;

pub use cpio::create_cpio;
pub use squashfs::create_squashfs;
