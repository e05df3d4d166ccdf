//! rfsgen library exports.
//!
//! The binary is a thin CLI over these modules; integration tests drive the
//! same API with a recording [`process::Runner`].

pub mod arch;
pub mod artifact;
pub mod build;
pub mod commands;
pub mod config;
pub mod definition;
pub mod error;
pub mod mounts;
pub mod process;
pub mod timing;
