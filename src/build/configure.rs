//! The configure stage: dpkg-configure, then the `Configure` steps.

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use super::users::SystemAdmin;
use super::{etc, filesystem, manifest, RfsBuilder};
use crate::definition::configure::{AsrSpec, RFS_TOKEN};
use crate::definition::{ConfigureStep, OptionFlag, UserSpec};
use crate::error::{Stage, StageContext};
use crate::process::Cmd;
use crate::timing::StageTimer;

/// In-chroot commands for `options.clean`.
const CLEAN_COMMANDS: [&[&str]; 4] = [
    &["/usr/bin/apt-get", "clean"],
    &["/usr/sbin/localepurge"],
    &["find", "/usr/share/doc", "-type", "f", "-not", "-name", "asr.json", "-delete"],
    &["find", "/usr/share/man", "-type", "f", "-delete"],
];

const ASR_TOOL: &str = "sm/infra/tools/asr.py";

impl RfsBuilder<'_> {
    /// Configure the bootstrapped tree at `dir`.
    pub fn configure(&self, dir: &Path) -> Result<()> {
        if self.settings.skip_dpkg_configure {
            log::info!("Skipping dpkg-configure");
        } else {
            self.with_mounts(dir, false, |_| self.dpkg_configure(dir))
                .stage(Stage::DpkgConfigure, || "dpkg-configure failed")?;
        }

        let timer = StageTimer::start(Stage::Configure, "Configuring filesystem");
        self.with_mounts(dir, true, |_| {
            let os_release = etc::write_os_release_json(dir)
                .stage(Stage::Configure, || "Could not convert os-release")?;
            for step in &self.config.configure {
                self.apply_step(dir, step, &os_release)
                    .stage(Stage::Configure, || format!("{} failed", step.label()))?;
            }
            Ok(())
        })?;
        timer.finish();
        Ok(())
    }

    fn apply_step(
        &self,
        dir: &Path,
        step: &ConfigureStep,
        os_release: &Map<String, Value>,
    ) -> Result<()> {
        match step {
            ConfigureStep::RunCommand(command) => {
                let mut words = command.split_whitespace();
                let Some(program) = words.next() else {
                    bail!("empty command");
                };
                Cmd::chroot(dir, program)
                    .args(words)
                    .run_on(self.runner)?;
            }
            ConfigureStep::Overlay(overlay) => {
                log::info!("Overlay {}...", overlay.display());
                let placed = filesystem::copy_overlay(overlay, dir)?;
                log::debug!("{} entries from {}", placed, overlay.display());
            }
            ConfigureStep::UpdateRcD(args) => {
                Cmd::chroot(dir, "/usr/sbin/update-rc.d")
                    .args(args.split_whitespace())
                    .run_on(self.runner)?;
            }
            ConfigureStep::RegisterModule(module) => {
                etc::append_line(&dir.join("etc/modules"), module)?;
            }
            ConfigureStep::Script(script) => {
                log::info!("Configuration script {}...", script.display());
                Cmd::new(script.to_string_lossy())
                    .arg_path(dir)
                    .run_on(self.runner)?;
            }
            ConfigureStep::ShellCommand(command) => {
                let command = command.replace(RFS_TOKEN, &dir.to_string_lossy());
                log::info!("Configuration command '{}'...", command);
                Cmd::shell(command).run_on(self.runner)?;
            }
            ConfigureStep::Group(group) => {
                SystemAdmin::new(dir, self.runner).groupadd(group)?;
            }
            ConfigureStep::User(user) => self.provision_user(dir, user)?,
            ConfigureStep::Option(flag) => self.apply_option(dir, flag)?,
            ConfigureStep::Manifest(spec) => {
                manifest::write_manifest(dir, spec, &self.arch, os_release)?;
            }
            ConfigureStep::FileAdd { path, source } => {
                filesystem::add_file(dir, path, source)?;
            }
            ConfigureStep::FileRemove(path) => {
                if filesystem::remove_path(dir, path)? {
                    log::info!("Removed {}", path);
                }
            }
            ConfigureStep::Issue(text) => etc::write_issue(dir, text)?,
        }
        Ok(())
    }

    /// `root` only ever gets its password replaced; other users are
    /// recreated.
    fn provision_user(&self, dir: &Path, user: &UserSpec) -> Result<()> {
        let admin = SystemAdmin::new(dir, self.runner);
        if user.name == "root" {
            if let Some(password) = &user.password {
                admin.user_password_set("root", password)?;
            }
            return Ok(());
        }
        admin.useradd(user)
    }

    fn apply_option(&self, dir: &Path, flag: &OptionFlag) -> Result<()> {
        let inittab = dir.join("etc/inittab");

        match flag {
            OptionFlag::Clean => {
                log::info!("Cleaning Filesystem...");
                for command in CLEAN_COMMANDS {
                    Cmd::chroot(dir, command[0])
                        .args(&command[1..])
                        .run_on(self.runner)?;
                }
            }
            OptionFlag::PermitRootLogin(value) => {
                etc::set_permit_root_login(dir, value)?;
            }
            OptionFlag::DisableSecuretty => {
                let securetty = dir.join("etc/securetty");
                if securetty.exists() {
                    log::info!("Removing {}", securetty.display());
                    fs::remove_file(&securetty)?;
                }
            }
            OptionFlag::DisableTtys => {
                if inittab.exists() {
                    log::info!("Clearing {} ttys...", inittab.display());
                    etc::comment_out_ttys(&inittab)?;
                }
            }
            OptionFlag::SerialConsole => {
                if inittab.exists() {
                    log::info!("Configuring Console Access in {}", inittab.display());
                    etc::append_line(&inittab, etc::SERIAL_CONSOLE_LINE)?;
                }
            }
            OptionFlag::Asr(spec) => self.gather_asr(dir, spec)?,
        }
        Ok(())
    }

    fn gather_asr(&self, dir: &Path, spec: &AsrSpec) -> Result<()> {
        log::info!("Gathering ASR documentation...");
        let tool = self.settings.tool_path(ASR_TOOL)?;
        let output = filesystem::tree_path(dir, &spec.file);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        Cmd::new(tool.to_string_lossy())
            .arg("--merge")
            .arg_path(dir)
            .args(["--format", spec.format.as_str()])
            .arg("--out")
            .arg_path(&output)
            .run_on(self.runner)?;
        Ok(())
    }
}
