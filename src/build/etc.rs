//! Edits to /etc files inside the target tree.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Getty line added for the serial console.
pub const SERIAL_CONSOLE_LINE: &str = "T0:23:respawn:/sbin/pgetty";

/// Parse `etc/os-release` into a JSON object and write it next to it as
/// `os-release.json`.
///
/// Returns the parsed mapping, empty when the tree has no os-release.
pub fn write_os_release_json(root: &Path) -> Result<Map<String, Value>> {
    let os_release = root.join("etc/os-release");
    if !os_release.exists() {
        return Ok(Map::new());
    }

    let content = fs::read_to_string(&os_release)
        .with_context(|| format!("Failed to read {}", os_release.display()))?;
    let parsed = parse_os_release(&content);

    let json_path = root.join("etc/os-release.json");
    fs::write(&json_path, serde_json::to_string(&parsed)?)
        .with_context(|| format!("Failed to write {}", json_path.display()))?;
    Ok(parsed)
}

/// `KEY=value` lines; comments and blank lines skipped, quotes removed.
pub fn parse_os_release(content: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            map.insert(key.trim().to_string(), Value::String(value.to_string()));
        }
    }
    map
}

/// Replace lines starting with `prefix` in sshd_config by
/// `PermitRootLogin <value>`. Returns how many lines changed.
fn rewrite_permit_root_login(root: &Path, prefix: &str, value: &str) -> Result<usize> {
    let config = root.join("etc/ssh/sshd_config");
    let content = fs::read_to_string(&config)
        .with_context(|| format!("Failed to read {}", config.display()))?;

    let mut changed = 0;
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        if line.starts_with(prefix) {
            out.push_str(&format!("PermitRootLogin {}\n", value));
            changed += 1;
        } else {
            out.push_str(line);
        }
    }

    fs::write(&config, out).with_context(|| format!("Failed to write {}", config.display()))?;
    Ok(changed)
}

/// Set the commented-out default `#PermitRootLogin` to `value`.
pub fn set_permit_root_login(root: &Path, value: &str) -> Result<usize> {
    log::info!("Setting PermitRootLogin to {}", value);
    rewrite_permit_root_login(root, "#PermitRootLogin", value)
}

/// Force an active `PermitRootLogin` line to `Yes`.
pub fn enable_root_login(root: &Path) -> Result<usize> {
    log::info!("Setting PermitRootLogin to Yes");
    rewrite_permit_root_login(root, "PermitRootLogin", "Yes")
}

/// Comment out the `1:` .. `6:` getty lines in inittab.
pub fn comment_out_ttys(inittab: &Path) -> Result<()> {
    let content = fs::read_to_string(inittab)
        .with_context(|| format!("Failed to read {}", inittab.display()))?;

    let mut out = String::with_capacity(content.len() + 8);
    for line in content.split_inclusive('\n') {
        let bytes = line.as_bytes();
        if bytes.len() >= 2 && (b'1'..=b'6').contains(&bytes[0]) && bytes[1] == b':' {
            out.push('#');
        }
        out.push_str(line);
    }

    fs::write(inittab, out).with_context(|| format!("Failed to write {}", inittab.display()))?;
    Ok(())
}

/// Append a line to `path`, creating it if needed.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Write `etc/issue` and `etc/issue.net`.
pub fn write_issue(root: &Path, text: &str) -> Result<()> {
    let etc = root.join("etc");
    fs::create_dir_all(&etc)?;
    fs::write(etc.join("issue"), format!("{}\n\n", text))?;
    fs::write(etc.join("issue.net"), format!("{}\n", text))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_os_release() {
        let map = parse_os_release(
            "# comment\nNAME=\"Debian GNU/Linux\"\nVERSION_ID='12'\n\nID=debian\n",
        );
        assert_eq!(map["NAME"], "Debian GNU/Linux");
        assert_eq!(map["VERSION_ID"], "12");
        assert_eq!(map["ID"], "debian");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_os_release_json_written() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/os-release"), "ID=debian\n").unwrap();

        let map = write_os_release_json(dir.path()).unwrap();
        assert_eq!(map["ID"], "debian");
        let json = fs::read_to_string(dir.path().join("etc/os-release.json")).unwrap();
        assert_eq!(json, r#"{"ID":"debian"}"#);
    }

    #[test]
    fn test_os_release_absent() {
        let dir = TempDir::new().unwrap();
        assert!(write_os_release_json(dir.path()).unwrap().is_empty());
        assert!(!dir.path().join("etc/os-release.json").exists());
    }

    #[test]
    fn test_permit_root_login_variants() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("etc/ssh")).unwrap();
        let cfg = dir.path().join("etc/ssh/sshd_config");
        fs::write(&cfg, "Port 22\n#PermitRootLogin prohibit-password\nUsePAM yes\n").unwrap();

        assert_eq!(set_permit_root_login(dir.path(), "yes").unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&cfg).unwrap(),
            "Port 22\nPermitRootLogin yes\nUsePAM yes\n"
        );

        assert_eq!(enable_root_login(dir.path()).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&cfg).unwrap(),
            "Port 22\nPermitRootLogin Yes\nUsePAM yes\n"
        );
    }

    #[test]
    fn test_comment_out_ttys() {
        let dir = TempDir::new().unwrap();
        let inittab = dir.path().join("inittab");
        fs::write(
            &inittab,
            "id:2:initdefault:\n1:2345:respawn:/sbin/getty 38400 tty1\n6:23:respawn:/sbin/getty 38400 tty6\n7:x\n",
        )
        .unwrap();
        comment_out_ttys(&inittab).unwrap();
        assert_eq!(
            fs::read_to_string(&inittab).unwrap(),
            "id:2:initdefault:\n#1:2345:respawn:/sbin/getty 38400 tty1\n#6:23:respawn:/sbin/getty 38400 tty6\n7:x\n"
        );
    }

    #[test]
    fn test_issue_files() {
        let dir = TempDir::new().unwrap();
        write_issue(dir.path(), "Switch OS").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/issue")).unwrap(),
            "Switch OS\n\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/issue.net")).unwrap(),
            "Switch OS\n"
        );
    }

    #[test]
    fn test_append_line() {
        let dir = TempDir::new().unwrap();
        let modules = dir.path().join("etc/modules");
        append_line(&modules, "tun").unwrap();
        append_line(&modules, "i2c-dev").unwrap();
        assert_eq!(fs::read_to_string(&modules).unwrap(), "tun\ni2c-dev\n");
    }
}
