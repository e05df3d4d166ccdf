//! CLI command handlers.
//!
//! - `build` - run the build pipeline stages selected on the command line
//! - `show` - render the multistrap configuration or list packages
//! - `enable_root` - open root login on an existing tree

pub mod build;
pub mod enable_root;
pub mod show;

pub use build::{cmd_build, BuildRequest};
pub use enable_root::cmd_enable_root;
pub use show::{cmd_msconfig, cmd_show_packages};
