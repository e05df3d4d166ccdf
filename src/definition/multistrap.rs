//! Multistrap configuration: validation and rendering.
//!
//! The `Multistrap` section of a build configuration maps section names to
//! flat field mappings. After validation:
//!
//! - `General.debootstrap` and `General.aptsources` name only sections that
//!   exist and apply to `General.arch`
//! - sections whose `arches` exclude the target architecture are gone
//! - every `packages` field is a single space-joined string
//!
//! Rendering produces multistrap's INI format:
//!
//! ```text
//! [General]
//! arch=arm64
//! debootstrap=Debian Local
//!
//! [Local]
//! source=copy:/work/repo ./
//! ```

use anyhow::{Context, Result};
use serde_yaml::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{BuildError, Stage};

/// Name of the mandatory section.
pub const GENERAL: &str = "General";

/// `General` fields that reference other sections.
const SECTION_LISTS: [&str; 2] = ["debootstrap", "aptsources"];

/// A multistrap field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    List(Vec<FieldValue>),
}

impl FieldValue {
    fn from_yaml(section: &str, key: &str, value: &Value) -> Result<Self, BuildError> {
        Ok(match value {
            Value::Null => FieldValue::Text(String::new()),
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => FieldValue::Text(n.to_string()),
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Sequence(items) => FieldValue::List(
                items
                    .iter()
                    .map(|v| FieldValue::from_yaml(section, key, v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Mapping(_) | Value::Tagged(_) => {
                return Err(invalid(format!(
                    "Field '{}' in multistrap section '{}' must be a scalar or a list.",
                    key, section
                )))
            }
        })
    }

    /// Flattened tokens. Text values are kept whole.
    fn tokens(&self) -> Vec<String> {
        match self {
            FieldValue::Text(s) => vec![s.clone()],
            FieldValue::Bool(b) => vec![b.to_string()],
            FieldValue::List(items) => items.iter().flat_map(FieldValue::tokens).collect(),
        }
    }

    /// Value as it appears after `key=`.
    fn render(&self) -> String {
        match self {
            FieldValue::Bool(true) => "true".to_string(),
            FieldValue::Bool(false) => "false".to_string(),
            other => other.tokens().join(" "),
        }
    }

    /// Whitespace-separated words, flattening lists.
    fn words(&self) -> Vec<String> {
        self.tokens()
            .iter()
            .flat_map(|t| t.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }
}

/// One `[name]` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub fields: Vec<(String, FieldValue)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn set(&mut self, key: &str, value: FieldValue) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }
}

/// Output of one rendering pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub text: String,
    /// `source` paths that exist locally, in render order.
    pub local_repos: Vec<PathBuf>,
}

/// Where [`MultistrapConfig::write_to`] puts the rendered text.
#[derive(Debug, Clone, Copy)]
pub enum ConfigSink<'a> {
    Path(&'a Path),
    Stdout,
}

impl<'a> ConfigSink<'a> {
    /// `-` and `stdout` select standard output.
    pub fn parse(path: &'a Path) -> Self {
        match path.to_str() {
            Some("-") | Some("stdout") => ConfigSink::Stdout,
            _ => ConfigSink::Path(path),
        }
    }
}

/// A validated multistrap configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultistrapConfig {
    sections: Vec<Section>,
}

impl MultistrapConfig {
    /// Parse and validate the `Multistrap` mapping of a build configuration.
    pub fn from_yaml(value: &Value) -> Result<Self, BuildError> {
        let mapping = value.as_mapping().ok_or_else(|| {
            invalid("The Multistrap configuration section must be a mapping.")
        })?;

        let mut sections = Vec::with_capacity(mapping.len());
        for (name, fields) in mapping {
            let name = scalar_key(name)
                .ok_or_else(|| invalid("Multistrap section names must be strings."))?;
            let mut section = Section::new(name.clone());
            match fields {
                Value::Null => {}
                Value::Mapping(fields) => {
                    for (key, value) in fields {
                        let key = scalar_key(key).ok_or_else(|| {
                            invalid(format!(
                                "Field names in multistrap section '{}' must be strings.",
                                name
                            ))
                        })?;
                        let value = FieldValue::from_yaml(&name, &key, value)?;
                        section.fields.push((key, value));
                    }
                }
                _ => {
                    return Err(invalid(format!(
                        "Multistrap section '{}' must be a mapping.",
                        name
                    )))
                }
            }
            sections.push(section);
        }

        Self::new(sections)
    }

    /// Validate `sections`, pruning the ones that do not apply to the
    /// configured architecture.
    pub fn new(mut sections: Vec<Section>) -> Result<Self, BuildError> {
        let general = sections
            .iter()
            .find(|s| s.name == GENERAL)
            .ok_or_else(|| {
                invalid("Section 'General' is missing from the multistrap configuration.")
            })?;

        let arch = match general.get("arch") {
            Some(v) => v.render(),
            None => return Err(invalid("Option 'arch' is missing from the General section.")),
        };
        if general.get("debootstrap").is_none() {
            return Err(invalid(
                "Option 'debootstrap' is missing from the General section.",
            ));
        }

        // Drop every section that declares arches excluding ours.
        let mut dropped = Vec::new();
        sections.retain(|s| {
            if s.name == GENERAL {
                return true;
            }
            match s.get("arches") {
                Some(arches) if !arches.words().iter().any(|a| *a == arch) => {
                    log::debug!("section '{}' does not apply to {}, dropping", s.name, arch);
                    dropped.push(s.name.clone());
                    false
                }
                _ => true,
            }
        });

        let names: Vec<String> = sections.iter().map(|s| s.name.clone()).collect();

        let general_idx = sections
            .iter()
            .position(|s| s.name == GENERAL)
            .ok_or_else(|| invalid("Section 'General' is missing from the multistrap configuration."))?;

        for entry in SECTION_LISTS {
            let Some(list) = sections[general_idx].get(entry) else {
                continue;
            };
            let mut kept = Vec::new();
            for name in list.words() {
                if dropped.contains(&name) {
                    continue;
                }
                if !names.contains(&name) {
                    return Err(invalid(format!(
                        "Section '{}' is specified in the {} option but does not exist in the configuration.",
                        name, entry
                    )));
                }
                kept.push(name);
            }
            sections[general_idx].set(entry, FieldValue::Text(kept.join(" ")));
        }

        for section in &mut sections {
            if let Some(packages @ FieldValue::List(_)) = section.get("packages") {
                let joined = packages.tokens().join(" ");
                section.set("packages", FieldValue::Text(joined));
            }
        }

        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Architecture named in `General`.
    pub fn arch(&self) -> Option<String> {
        self.section(GENERAL)?.get("arch").map(FieldValue::render)
    }

    /// Every `packages` entry across all sections, in section order.
    pub fn packages(&self) -> Vec<String> {
        self.sections
            .iter()
            .flat_map(|s| s.fields.iter())
            .filter(|(k, _)| k == "packages")
            .flat_map(|(_, v)| v.words())
            .collect()
    }

    /// Render to multistrap's INI format.
    pub fn render(&self) -> Result<RenderedConfig, BuildError> {
        let mut text = String::new();
        let mut local_repos = Vec::new();

        for section in &self.sections {
            text.push_str(&format!("[{}]\n", section.name));
            for (key, value) in &section.fields {
                if key == "packages" && matches!(value, FieldValue::List(_)) {
                    return Err(invalid(format!(
                        "packages={:?} in section '{}' must be a string.",
                        value.tokens(),
                        section.name
                    )));
                }

                let mut rendered = value.render();
                if key == "source" && Path::new(&rendered).exists() {
                    local_repos.push(PathBuf::from(&rendered));
                    rendered = format!("copy:{} ./", rendered);
                }

                text.push_str(&format!("{}={}\n", key, rendered));
            }
            text.push('\n');
        }

        Ok(RenderedConfig { text, local_repos })
    }

    /// Render and write to `sink`. [`ConfigSink::Stdout`] goes to `stdout`.
    pub fn write_to(
        &self,
        sink: ConfigSink<'_>,
        stdout: &mut dyn Write,
    ) -> Result<RenderedConfig> {
        let rendered = self.render()?;
        match sink {
            ConfigSink::Stdout => {
                stdout.write_all(rendered.text.as_bytes())?;
                stdout.flush()?;
            }
            ConfigSink::Path(path) => {
                fs::write(path, &rendered.text)
                    .with_context(|| format!("Could not write {}", path.display()))?;
            }
        }
        Ok(rendered)
    }

    /// Render into a fresh temporary file, deleted when the handle drops.
    pub fn write_temp(&self) -> Result<(NamedTempFile, RenderedConfig)> {
        let rendered = self.render()?;
        let mut file = tempfile::Builder::new()
            .prefix("multistrap-")
            .suffix(".conf")
            .tempfile()?;
        file.write_all(rendered.text.as_bytes())?;
        file.flush()?;
        Ok((file, rendered))
    }
}

fn invalid(message: impl Into<String>) -> BuildError {
    BuildError::new(Stage::Validate, message)
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
