//! The configure stage and enable-root against a scratch tree.

mod helpers;

use helpers::{assert_file_content, RecordingRunner, TestEnv};
use rfsgen::build::CONFIGURE_SCRIPT;
use rfsgen::commands::cmd_enable_root;
use rfsgen::error::{failed_stage, Stage};
use std::fs;
use std::os::unix::fs::PermissionsExt;

const MULTISTRAP: &str = r#"
Multistrap:
  General:
    arch: amd64
    debootstrap: Debian
    aptsources: Debian
  Debian:
    packages: openssh-server
    source: http://deb.debian.org/debian
    suite: bookworm
"#;

fn seed_tree(env: &TestEnv) {
    fs::create_dir_all(env.tree_file("etc/ssh")).unwrap();
    fs::write(
        env.tree_file("etc/passwd"),
        "root:x:0:0:root:/root:/bin/bash\nadmin:x:0:0::/root:/bin/sh\n",
    )
    .unwrap();
    fs::write(env.tree_file("etc/shadow"), "root:*:19000::::::\nadmin:*:19000::::::\n").unwrap();
    fs::write(env.tree_file("etc/group"), "root:x:0:\nnetadmin:x:900:\n").unwrap();
    fs::write(
        env.tree_file("etc/inittab"),
        "id:2:initdefault:\n1:2345:respawn:/sbin/getty 38400 tty1\n",
    )
    .unwrap();
    fs::write(
        env.tree_file("etc/ssh/sshd_config"),
        "Port 22\n#PermitRootLogin prohibit-password\n",
    )
    .unwrap();
    fs::write(env.tree_file("etc/securetty"), "console\n").unwrap();
    fs::write(env.tree_file("etc/os-release"), "ID=debian\nVERSION_ID=\"12\"\n").unwrap();
    fs::write(env.tree_file("etc/resolv.conf"), "nameserver 1.1.1.1\n").unwrap();
}

#[test]
fn test_configure_steps_applied_in_order() {
    let env = TestEnv::new();
    seed_tree(&env);

    let overlay = env.base_dir.join("overlay");
    fs::create_dir_all(overlay.join("etc/init.d")).unwrap();
    fs::write(overlay.join("etc/init.d/onl"), "#!/bin/sh\n").unwrap();
    let version = env.base_dir.join("version.json");
    fs::write(&version, r#"{"BUILD_ID": "7"}"#).unwrap();

    let config = format!(
        r#"{MULTISTRAP}
Configure:
  issue: Open Network Linux
  commands:
    - "touch %(__rfs__)s/etc/stamp"
  run:
    - /usr/bin/apt-get update
  overlays:
    - {overlay}
  update-rc.d:
    - onl defaults
  modules: [tun]
  groups:
    netadmin: {{gid: 900}}
    operators: {{system: true}}
  users:
    root: {{password: onl}}
    admin:
      groups: [operators]
      sudo: true
  options:
    PermitRootLogin: "yes"
    securetty: false
  manifests:
    /etc/onl/manifest.json:
      version: {version}
      platforms: x86-64-generic
  files:
    add:
      /etc/motd: Welcome
    remove: [/etc/securetty.d]
"#,
        overlay = overlay.display(),
        version = version.display(),
    );

    let runner = RecordingRunner::new();
    let mut settings = env.settings();
    settings.skip_dpkg_configure = true;
    let builder = env.builder(&config, "amd64", settings, &runner);
    builder.configure(&env.tree).unwrap();

    let tree = env.tree.display().to_string();
    let run = runner
        .position(&format!("chroot {} /usr/bin/apt-get update", tree))
        .unwrap();
    let rcd = runner
        .position(&format!("chroot {} /usr/sbin/update-rc.d onl defaults", tree))
        .unwrap();
    let shell = runner
        .position(&format!("sh -c touch {}/etc/stamp", tree))
        .unwrap();
    let group = runner.position("groupadd --system operators").unwrap();
    let root_pw = runner.position("usermod -p $6$").unwrap();
    let user = runner.position("useradd --create-home").unwrap();
    assert!(run < rcd && rcd < shell && shell < group && group < root_pw && root_pw < user);

    // netadmin already exists.
    assert_eq!(runner.count("netadmin"), 0);
    assert!(runner.calls()[root_pw].ends_with(" root"));
    assert!(runner.calls()[user].ends_with("--shell /bin/bash --groups operators admin"));
    // No password given, so login by password is disabled.
    assert!(runner.position(&format!("chroot {} passwd -d admin", tree)).is_some());

    // Mount scope with resolv.conf swapped back.
    assert_eq!(runner.count("umount -l"), 1);
    assert_file_content(&env.tree_file("etc/resolv.conf"), "nameserver 1.1.1.1\n");

    assert_file_content(&env.tree_file("etc/init.d/onl"), "#!/bin/sh\n");
    assert_file_content(&env.tree_file("etc/modules"), "tun\n");
    assert_file_content(
        &env.tree_file("etc/passwd"),
        "root:x:0:0:root:/root:/bin/bash\n",
    );
    assert_file_content(&env.tree_file("etc/shadow"), "root:*:19000::::::\n");

    let sudoer = env.tree_file("etc/sudoers.d/admin");
    assert_file_content(&sudoer, "admin ALL=(ALL:ALL) NOPASSWD:ALL\n");
    assert_eq!(
        fs::metadata(&sudoer).unwrap().permissions().mode() & 0o777,
        0o440
    );

    assert_file_content(
        &env.tree_file("etc/ssh/sshd_config"),
        "Port 22\nPermitRootLogin yes\n",
    );
    assert!(!env.tree_file("etc/securetty").exists());
    assert_file_content(
        &env.tree_file("etc/inittab"),
        "id:2:initdefault:\n#1:2345:respawn:/sbin/getty 38400 tty1\nT0:23:respawn:/sbin/pgetty\n",
    );

    assert_file_content(
        &env.tree_file("etc/os-release.json"),
        r#"{"ID":"debian","VERSION_ID":"12"}"#,
    );
    let manifest: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(env.tree_file("etc/onl/manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["version"]["BUILD_ID"], "7");
    assert_eq!(manifest["arch"], "amd64");
    assert_eq!(manifest["os-release"]["VERSION_ID"], "12");
    assert_eq!(manifest["platforms"][0], "x86-64-generic");

    assert_file_content(&env.tree_file("etc/motd"), "Welcome\n");
    assert_file_content(&env.tree_file("etc/issue"), "Open Network Linux\n\n");
    assert_file_content(&env.tree_file("etc/issue.net"), "Open Network Linux\n");
}

#[test]
fn test_failed_step_is_named() {
    let env = TestEnv::new();
    seed_tree(&env);
    let config = format!(
        "{MULTISTRAP}\nConfigure:\n  run: [/bin/false]\n  issue: never written\n"
    );

    let runner = RecordingRunner::new().respond("/bin/false", 1, "");
    let mut settings = env.settings();
    settings.skip_dpkg_configure = true;
    let builder = env.builder(&config, "amd64", settings, &runner);

    let err = builder.configure(&env.tree).unwrap_err();
    assert_eq!(failed_stage(&err), Some(Stage::Configure));
    assert!(err.to_string().contains("run command '/bin/false' failed"));
    assert!(!env.tree_file("etc/issue").exists());
    assert_eq!(runner.count("umount -l"), 1);
    assert_file_content(&env.tree_file("etc/resolv.conf"), "nameserver 1.1.1.1\n");
}

#[test]
fn test_dpkg_configure_runs_script_in_chroot() {
    let env = TestEnv::new();
    seed_tree(&env);
    env.add_emulator("qemu-aarch64-static");
    let config = MULTISTRAP.replace("arch: amd64", "arch: arm64");

    let runner = RecordingRunner::new();
    let builder = env.builder(&config, "arm64", env.settings(), &runner);
    builder.configure(&env.tree).unwrap();

    let tree = env.tree.display().to_string();
    let script = runner
        .position(&format!("chroot {} /tmp/configure.sh", tree))
        .expect("configure script run");
    // dpkg-configure has its own mount scope before the configure steps.
    let umounts: Vec<usize> = runner
        .calls()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with("umount -l"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(umounts.len(), 2);
    assert!(script < umounts[0]);

    assert!(env.tree_file("usr/bin/qemu-aarch64-static").exists());
    assert_file_content(
        &env.tree_file("var/lib/dpkg/info/base-files.postinst"),
        "#!/bin/sh\n",
    );
    assert!(!env.tree_file("tmp/configure.sh").exists());
}

#[test]
fn test_dpkg_configure_failure_keeps_script() {
    let env = TestEnv::new();
    seed_tree(&env);

    let runner = RecordingRunner::new().respond("/tmp/configure.sh", 1, "");
    let builder = env.builder(MULTISTRAP, "amd64", env.settings(), &runner);

    let err = builder.configure(&env.tree).unwrap_err();
    assert_eq!(failed_stage(&err), Some(Stage::DpkgConfigure));
    assert_file_content(&env.tree_file("tmp/configure.sh"), CONFIGURE_SCRIPT);
    assert_eq!(runner.count("umount -l"), 1);
}

#[test]
fn test_enable_root() {
    let env = TestEnv::new();
    seed_tree(&env);
    fs::write(
        env.tree_file("etc/ssh/sshd_config"),
        "Port 22\nPermitRootLogin without-password\n#PermitRootLogin no\n",
    )
    .unwrap();

    let runner = RecordingRunner::new();
    cmd_enable_root(&runner, &env.settings(), &env.tree, "secret").unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with(&format!("chroot {} usermod -p $6$", env.tree.display())));
    assert!(!calls[0].contains("secret"));
    assert_file_content(
        &env.tree_file("etc/ssh/sshd_config"),
        "Port 22\nPermitRootLogin Yes\n#PermitRootLogin no\n",
    );
}

#[test]
fn test_enable_root_usermod_failure() {
    let env = TestEnv::new();
    seed_tree(&env);
    let runner = RecordingRunner::new().respond("usermod", 1, "");

    let err = cmd_enable_root(&runner, &env.settings(), &env.tree, "secret").unwrap_err();
    assert_eq!(failed_stage(&err), Some(Stage::EnableRoot));
    assert_file_content(
        &env.tree_file("etc/ssh/sshd_config"),
        "Port 22\n#PermitRootLogin prohibit-password\n",
    );
}

#[test]
fn test_enable_root_requires_root() {
    let env = TestEnv::new();
    seed_tree(&env);
    let runner = RecordingRunner::new();
    let mut settings = env.settings();
    settings.is_root = false;

    let err = cmd_enable_root(&runner, &settings, &env.tree, "secret").unwrap_err();
    assert_eq!(failed_stage(&err), Some(Stage::Usage));
    assert!(runner.calls().is_empty());
    assert_file_content(
        &env.tree_file("etc/ssh/sshd_config"),
        "Port 22\n#PermitRootLogin prohibit-password\n",
    );
}

#[test]
fn test_dpkg_configure_setup_failure_is_staged() {
    let env = TestEnv::new();
    seed_tree(&env);
    // A file where the dpkg info directory should be.
    fs::remove_dir_all(env.tree_file("var/lib/dpkg/info")).unwrap();
    fs::write(env.tree_file("var/lib/dpkg/info"), "").unwrap();

    let runner = RecordingRunner::new();
    let builder = env.builder(MULTISTRAP, "amd64", env.settings(), &runner);

    let err = builder.configure(&env.tree).unwrap_err();
    assert_eq!(failed_stage(&err), Some(Stage::DpkgConfigure));
    assert_eq!(runner.count("/tmp/configure.sh"), 0);
    assert_eq!(runner.count("umount -l"), 1);
}
