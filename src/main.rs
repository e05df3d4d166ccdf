//! rfsgen - root filesystem generator.
//!
//! Bootstraps a Debian-based tree with multistrap, configures it in a
//! chroot, and optionally packs it as a cpio archive or squashfs image.

use anyhow::Result;
use clap::Parser;
use std::io;
use std::path::PathBuf;

use rfsgen::arch::Arch;
use rfsgen::build::RfsBuilder;
use rfsgen::commands::{self, BuildRequest};
use rfsgen::config::Settings;
use rfsgen::error::{BuildError, ConfigError, Stage};
use rfsgen::process::HostRunner;

#[derive(Parser)]
#[command(name = "rfsgen")]
#[command(about = "Root filesystem generator")]
#[command(
    after_help = "EXAMPLES:\n  rfsgen --config rfs.yml --arch amd64 --dir build/rfs --squash rfs.sqsh\n  rfsgen --config rfs.yml --arch arm64 --show-packages\n  rfsgen --dir build/rfs --enable-root secret"
)]
struct Cli {
    /// Build configuration (YAML)
    #[arg(long, required_unless_present = "enable_root")]
    config: Option<PathBuf>,

    /// Target architecture (amd64, arm64, armhf, armel, powerpc)
    #[arg(long, required_unless_present = "enable_root")]
    arch: Option<String>,

    /// Target directory for the root filesystem
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Print the packages the configuration installs and exit
    #[arg(long)]
    show_packages: bool,

    /// Skip building required local packages
    #[arg(long)]
    no_build_packages: bool,

    /// Build required local packages and exit
    #[arg(long)]
    only_build_packages: bool,

    /// Write the rendered multistrap configuration ('-' for stdout) and exit
    #[arg(long, value_name = "PATH")]
    msconfig: Option<PathBuf>,

    /// Run multistrap and exit
    #[arg(long)]
    multistrap_only: bool,

    /// Reuse the existing tree instead of bootstrapping
    #[arg(long)]
    no_multistrap: bool,

    /// Skip the configure stage
    #[arg(long)]
    no_configure: bool,

    /// Extract package contents into the tree (repeatable, comma-separated)
    #[arg(long, value_name = "PKGS")]
    update: Vec<String>,

    /// Install packages into the tree (repeatable, comma-separated)
    #[arg(long, value_name = "PKGS")]
    install: Vec<String>,

    /// Write a cpio archive of the tree
    #[arg(long, value_name = "PATH")]
    cpio: Option<PathBuf>,

    /// Write a squashfs image of the tree
    #[arg(long, value_name = "PATH")]
    squash: Option<PathBuf>,

    /// Set the root password of --dir, allow root SSH login, and exit
    #[arg(long, value_name = "PASSWORD")]
    enable_root: Option<String>,
}

fn main() -> Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match run(cli, settings) {
        Ok(()) => Ok(()),
        Err(err) if err.is::<BuildError>() || err.is::<ConfigError>() => {
            log::error!("{}", err);
            std::process::exit(1);
        }
        Err(err) => Err(err),
    }
}

fn run(cli: Cli, settings: Settings) -> Result<()> {
    let runner = HostRunner;

    if let Some(password) = &cli.enable_root {
        let dir = cli.dir.as_deref().ok_or_else(missing_dir)?;
        return commands::cmd_enable_root(&runner, &settings, dir, password);
    }

    let (Some(config), Some(arch)) = (&cli.config, &cli.arch) else {
        return Err(BuildError::new(Stage::Usage, "--config and --arch are required").into());
    };
    let builder = RfsBuilder::load(config, Arch::new(arch.as_str()), settings, &runner)?;

    if let Some(target) = &cli.msconfig {
        return commands::cmd_msconfig(&builder, target, &mut io::stdout().lock());
    }

    if cli.show_packages {
        return commands::cmd_show_packages(&builder, &mut io::stdout().lock());
    }

    let request = BuildRequest {
        dir: cli.dir,
        no_build_packages: cli.no_build_packages,
        only_build_packages: cli.only_build_packages,
        multistrap_only: cli.multistrap_only,
        no_multistrap: cli.no_multistrap,
        no_configure: cli.no_configure,
        update: cli.update,
        install: cli.install,
        cpio: cli.cpio,
        squash: cli.squash,
    };
    commands::cmd_build(&builder, &request)
}

fn missing_dir() -> BuildError {
    BuildError::new(Stage::Usage, "argument --dir is required")
}
