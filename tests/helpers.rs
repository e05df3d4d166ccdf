//! Shared test utilities for rfsgen tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tempfile::TempDir;

use rfsgen::arch::Arch;
use rfsgen::build::RfsBuilder;
use rfsgen::config::Settings;
use rfsgen::process::{Cmd, CommandResult, Runner};

struct Response {
    needle: String,
    code: i32,
    stdout: String,
    creates: Option<PathBuf>,
}

/// Fake runner: records every command line and answers from scripted
/// responses. The first response whose needle occurs in the command line
/// wins; unmatched commands succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<String>>,
    responses: Vec<Response>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `needle` exit with `code` and print `stdout`.
    pub fn respond(mut self, needle: &str, code: i32, stdout: &str) -> Self {
        self.responses.push(Response {
            needle: needle.to_string(),
            code,
            stdout: stdout.to_string(),
            creates: None,
        });
        self
    }

    /// Like [`respond`](Self::respond), and also leaves a file at `path`
    /// as a partially written output would.
    pub fn respond_creating(mut self, needle: &str, code: i32, path: &Path) -> Self {
        self.responses.push(Response {
            needle: needle.to_string(),
            code,
            stdout: String::new(),
            creates: Some(path.to_path_buf()),
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Index of the first recorded command containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.calls.borrow().iter().position(|c| c.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }
}

impl Runner for RecordingRunner {
    fn execute(&self, cmd: &Cmd) -> io::Result<CommandResult> {
        let line = cmd.command_line();
        self.calls.borrow_mut().push(line.clone());

        let response = self.responses.iter().find(|r| line.contains(&r.needle));
        let (code, stdout) = match response {
            Some(r) => {
                if let Some(path) = &r.creates {
                    fs::write(path, "partial")?;
                }
                (r.code, r.stdout.clone())
            }
            None => (0, String::new()),
        };

        Ok(CommandResult {
            status: ExitStatus::from_raw(code << 8),
            stdout,
            stderr: String::new(),
        })
    }
}

/// Scratch layout: a target tree, a fake `$ONL` install root, fake host
/// tools, and a host resolv.conf.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Target tree
    pub tree: PathBuf,
    /// Fake `$ONL`
    pub onl: PathBuf,
    /// Holds the fake multistrap and emulators
    pub tools: PathBuf,
    pub host_resolv: PathBuf,
    pub base_dir: PathBuf,
}

pub const HOST_RESOLV: &str = "nameserver 10.0.0.1\n";

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path().to_path_buf();

        let tree = base.join("rfs");
        let onl = base.join("onl");
        let tools = base.join("tools");
        for dir in [&tree, &tools, &onl.join("tools/scripts")] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }
        for dir in ["etc", "tmp", "dev", "proc", "usr/bin", "var/lib/dpkg/info"] {
            fs::create_dir_all(tree.join(dir)).expect("Failed to create tree dir");
        }

        fs::write(tools.join("multistrap"), "").expect("Failed to create multistrap");
        fs::write(onl.join("tools/onlpm.py"), "").expect("Failed to create onlpm");
        fs::write(onl.join("tools/scripts/base-files.postinst"), "#!/bin/sh\n")
            .expect("Failed to create postinst");
        fs::write(onl.join("tools/scripts/make-cpio.sh"), "").expect("Failed to create cpio script");

        let host_resolv = base.join("host-resolv.conf");
        fs::write(&host_resolv, HOST_RESOLV).expect("Failed to write host resolv.conf");

        Self {
            _temp_dir: temp_dir,
            tree,
            onl,
            tools,
            host_resolv,
            base_dir: base,
        }
    }

    /// Settings pointing at the fake tools, as if running as root.
    pub fn settings(&self) -> Settings {
        Settings {
            install_root: Some(self.onl.clone()),
            is_root: true,
            multistrap: self.tools.join("multistrap"),
            emulator_dir: self.tools.clone(),
            host_resolv_conf: self.host_resolv.clone(),
            ..Settings::default()
        }
    }

    /// Create an empty fake emulator binary.
    pub fn add_emulator(&self, name: &str) {
        fs::write(self.tools.join(name), "qemu").expect("Failed to create emulator");
    }

    /// Write a configuration file and return its path.
    pub fn write_config(&self, yaml: &str) -> PathBuf {
        let path = self.base_dir.join("rfs.yml");
        fs::write(&path, yaml).expect("Failed to write config");
        path
    }

    pub fn builder<'r>(
        &self,
        yaml: &str,
        arch: &str,
        settings: Settings,
        runner: &'r RecordingRunner,
    ) -> RfsBuilder<'r> {
        let path = self.write_config(yaml);
        RfsBuilder::load(&path, Arch::new(arch), settings, runner).expect("builder should load")
    }

    /// Path of `rel` inside the tree.
    pub fn tree_file(&self, rel: &str) -> PathBuf {
        self.tree.join(rel)
    }
}

/// Minimal valid configuration for amd64.
pub const MINIMAL_CONFIG: &str = r#"
Multistrap:
  General:
    arch: amd64
    debootstrap: Debian
    aptsources: Debian
  Debian:
    packages: [openssh-server, sudo]
    source: http://deb.debian.org/debian
    suite: bookworm
"#;

/// Assert that a file exists with the given content.
pub fn assert_file_content(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert_eq!(content, expected, "unexpected content in {}", path.display());
}
