//! Build manifests written into the tree.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use super::filesystem::tree_path;
use crate::arch::Arch;
use crate::definition::ManifestSpec;

/// Assemble the manifest document for `spec`.
///
/// Keys: `version` (the parsed version file), `arch`, `os-release`,
/// `platforms`, then `spec.keys` merged on top. A key that already holds an
/// object is merged into; anything else is replaced.
pub fn build_manifest(
    spec: &ManifestSpec,
    arch: &Arch,
    os_release: &Map<String, Value>,
) -> Result<Value> {
    let version_text = fs::read_to_string(&spec.version)
        .with_context(|| format!("Failed to read version file {}", spec.version.display()))?;
    let version: Value = serde_json::from_str(&version_text)
        .with_context(|| format!("Invalid version file {}", spec.version.display()))?;

    let mut md = Map::new();
    md.insert("version".to_string(), version);
    md.insert("arch".to_string(), Value::String(arch.to_string()));
    md.insert("os-release".to_string(), Value::Object(os_release.clone()));
    md.insert("platforms".to_string(), platforms(&spec.platforms)?);

    for (key, value) in &spec.keys {
        match (md.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(update)) => {
                existing.extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            _ => {
                md.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(Value::Object(md))
}

/// Contents of a platforms YAML file, or a comma-separated list.
fn platforms(spec: &str) -> Result<Value> {
    let path = Path::new(spec);
    if path.is_file() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read platforms file {}", spec))?;
        let value: Value = serde_yaml::from_str(&text)
            .with_context(|| format!("Invalid platforms file {}", spec))?;
        return Ok(value);
    }
    Ok(Value::Array(
        spec.split(',')
            .map(|p| Value::String(p.to_string()))
            .collect(),
    ))
}

/// Write the manifest for `spec` into the tree rooted at `root`.
pub fn write_manifest(
    root: &Path,
    spec: &ManifestSpec,
    arch: &Arch,
    os_release: &Map<String, Value>,
) -> Result<()> {
    log::info!("Configuring manifest {}...", spec.path);
    let manifest = build_manifest(spec, arch, os_release)?;

    let dest = tree_path(root, &spec.path);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&dest, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("Failed to write manifest {}", dest.display()))?;
    Ok(())
}
