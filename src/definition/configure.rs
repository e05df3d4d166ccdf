//! Post-bootstrap configuration steps.
//!
//! The `Configure` mapping is turned into an ordered list of
//! [`ConfigureStep`]s at load time. The order is fixed by key, not by the
//! order keys appear in the document:
//!
//! `run`, `overlays`, `update-rc.d`, `modules`, `scripts`, `commands`,
//! `groups`, `users`, `options`, `manifests`, `files.add`, `files.remove`,
//! `issue`.
//!
//! Within one key, entries keep their declaration order.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

use crate::error::{BuildError, Stage};

/// Token in `commands` entries replaced by the target directory.
pub const RFS_TOKEN: &str = "%(__rfs__)s";

/// A scalar that may be written as a string, number or boolean.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "ScalarRepr")]
pub struct Scalar(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarRepr {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<ScalarRepr> for Scalar {
    fn from(repr: ScalarRepr) -> Self {
        match repr {
            ScalarRepr::Str(s) => Scalar(s),
            ScalarRepr::Int(i) => Scalar(i.to_string()),
            ScalarRepr::Bool(b) => Scalar(if b { "yes" } else { "no" }.to_string()),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_shell() -> Option<String> {
    Some("/bin/bash".to_string())
}

/// `groups.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub gid: Option<Scalar>,
    #[serde(default = "default_true")]
    pub unique: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub password: Option<String>,
}

/// `users.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSpec {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub uid: Option<Scalar>,
    #[serde(default)]
    pub gid: Option<Scalar>,
    #[serde(default)]
    pub password: Option<String>,
    /// `null` in the document means no `--shell` argument.
    #[serde(default = "default_shell")]
    pub shell: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub sudo: bool,
    /// Remove an existing account of the same name before creating it.
    #[serde(default = "default_true", rename = "deleteFirst")]
    pub delete_first: bool,
}

impl UserSpec {
    /// A user with default settings.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: None,
            gid: None,
            password: None,
            shell: default_shell(),
            home: None,
            groups: Vec::new(),
            sudo: false,
            delete_first: true,
        }
    }
}

/// `options.asr`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AsrSpec {
    pub file: String,
    pub format: String,
}

#[derive(Debug, Deserialize)]
struct Options {
    #[serde(default)]
    clean: bool,
    #[serde(default, rename = "PermitRootLogin")]
    permit_root_login: Option<Scalar>,
    #[serde(default = "default_true")]
    securetty: bool,
    #[serde(default)]
    ttys: bool,
    #[serde(default = "default_true")]
    console: bool,
    #[serde(default)]
    asr: Option<AsrSpec>,
}

/// One effect of the `options` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionFlag {
    /// Drop apt caches, locales, docs and man pages.
    Clean,
    /// Uncomment and set `PermitRootLogin` in sshd_config.
    PermitRootLogin(String),
    /// Remove `/etc/securetty`.
    DisableSecuretty,
    /// Comment out the getty lines of `/etc/inittab`.
    DisableTtys,
    /// Add a serial console getty to `/etc/inittab`.
    SerialConsole,
    /// Generate the syslog reference document.
    Asr(AsrSpec),
}

/// `manifests.<path>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSpec {
    /// Destination inside the tree.
    pub path: String,
    /// JSON file holding the version record.
    pub version: PathBuf,
    /// YAML file listing platforms, or a comma-separated list.
    pub platforms: String,
    /// Extra top-level keys merged into the manifest.
    pub keys: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ManifestFields {
    version: PathBuf,
    platforms: String,
    #[serde(default)]
    keys: serde_json::Map<String, serde_json::Value>,
}

/// A single post-bootstrap action.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigureStep {
    /// Command run inside the chroot.
    RunCommand(String),
    /// Directory copied over the tree.
    Overlay(PathBuf),
    /// Arguments to `update-rc.d` inside the chroot.
    UpdateRcD(String),
    /// Module name appended to `/etc/modules`.
    RegisterModule(String),
    /// Host script invoked with the tree path.
    Script(PathBuf),
    /// Host shell command, with [`RFS_TOKEN`] substituted.
    ShellCommand(String),
    Group(GroupSpec),
    User(UserSpec),
    Option(OptionFlag),
    Manifest(ManifestSpec),
    /// Create `path` from a host file or literal text.
    FileAdd { path: String, source: String },
    FileRemove(String),
    /// Login banner text.
    Issue(String),
}

impl ConfigureStep {
    /// Short label used in logs and error messages.
    pub fn label(&self) -> String {
        match self {
            ConfigureStep::RunCommand(cmd) => format!("run command '{}'", cmd),
            ConfigureStep::Overlay(dir) => format!("overlay '{}'", dir.display()),
            ConfigureStep::UpdateRcD(args) => format!("update-rc.d {}", args),
            ConfigureStep::RegisterModule(m) => format!("module '{}'", m),
            ConfigureStep::Script(s) => format!("script '{}'", s.display()),
            ConfigureStep::ShellCommand(c) => format!("command '{}'", c),
            ConfigureStep::Group(g) => format!("group '{}'", g.name),
            ConfigureStep::User(u) => format!("user '{}'", u.name),
            ConfigureStep::Option(flag) => format!("option {:?}", flag),
            ConfigureStep::Manifest(m) => format!("manifest '{}'", m.path),
            ConfigureStep::FileAdd { path, .. } => format!("file add '{}'", path),
            ConfigureStep::FileRemove(path) => format!("file remove '{}'", path),
            ConfigureStep::Issue(_) => "issue".to_string(),
        }
    }
}

/// Parse the `Configure` mapping.
pub fn parse_steps(value: &Value) -> Result<Vec<ConfigureStep>, BuildError> {
    let map = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Mapping(map) => map,
        _ => return Err(invalid("The Configure section must be a mapping.")),
    };

    let mut steps = Vec::new();

    for cmd in string_list(map, "run")? {
        steps.push(ConfigureStep::RunCommand(cmd));
    }
    for dir in string_list(map, "overlays")? {
        steps.push(ConfigureStep::Overlay(PathBuf::from(dir)));
    }
    for args in string_list(map, "update-rc.d")? {
        steps.push(ConfigureStep::UpdateRcD(args));
    }
    for module in string_list(map, "modules")? {
        steps.push(ConfigureStep::RegisterModule(module));
    }
    for script in string_list(map, "scripts")? {
        steps.push(ConfigureStep::Script(PathBuf::from(script)));
    }
    for cmd in string_list(map, "commands")? {
        steps.push(ConfigureStep::ShellCommand(cmd));
    }

    for (name, fields) in entries(map, "groups")? {
        let mut group: GroupSpec = from_fields(fields, "groups", &name)?;
        group.name = name;
        steps.push(ConfigureStep::Group(group));
    }
    for (name, fields) in entries(map, "users")? {
        let mut user: UserSpec = from_fields(fields, "users", &name)?;
        user.name = name;
        steps.push(ConfigureStep::User(user));
    }

    if let Some(options) = map.get("options") {
        steps.extend(parse_options(options)?.into_iter().map(ConfigureStep::Option));
    }

    for (path, fields) in entries(map, "manifests")? {
        let fields: ManifestFields = from_fields(fields, "manifests", &path)?;
        steps.push(ConfigureStep::Manifest(ManifestSpec {
            path,
            version: fields.version,
            platforms: fields.platforms,
            keys: fields.keys,
        }));
    }

    if let Some(files) = map.get("files") {
        let files = match files {
            Value::Null => Mapping::new(),
            Value::Mapping(m) => m.clone(),
            _ => return Err(invalid("Configure.files must be a mapping.")),
        };
        for (path, source) in entries(&files, "add")? {
            let source = scalar_string(&source).ok_or_else(|| {
                invalid(format!("files.add entry '{}' must be a string.", path))
            })?;
            steps.push(ConfigureStep::FileAdd { path, source });
        }
        for path in string_list(&files, "remove")? {
            steps.push(ConfigureStep::FileRemove(path));
        }
    }

    if let Some(issue) = map.get("issue") {
        // An empty banner is treated as absent.
        match scalar_string(issue) {
            Some(text) if !text.is_empty() => steps.push(ConfigureStep::Issue(text)),
            Some(_) => {}
            None => return Err(invalid("Configure.issue must be a string.")),
        }
    }

    Ok(steps)
}

fn parse_options(value: &Value) -> Result<Vec<OptionFlag>, BuildError> {
    let options: Options = match value {
        Value::Null => from_value(Value::Mapping(Mapping::new()), "options")?,
        other => from_value(other.clone(), "options")?,
    };

    let mut flags = Vec::new();
    if options.clean {
        flags.push(OptionFlag::Clean);
    }
    if let Some(Scalar(v)) = options.permit_root_login {
        flags.push(OptionFlag::PermitRootLogin(v));
    }
    if !options.securetty {
        flags.push(OptionFlag::DisableSecuretty);
    }
    if !options.ttys {
        flags.push(OptionFlag::DisableTtys);
    }
    if options.console {
        flags.push(OptionFlag::SerialConsole);
    }
    if let Some(asr) = options.asr {
        flags.push(OptionFlag::Asr(asr));
    }
    Ok(flags)
}

fn invalid(message: impl Into<String>) -> BuildError {
    BuildError::new(Stage::Validate, message)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A list of strings under `key`; a single string counts as a one-item list.
fn string_list(map: &Mapping, key: &str) -> Result<Vec<String>, BuildError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| {
                scalar_string(item)
                    .ok_or_else(|| invalid(format!("Configure.{} entries must be strings.", key)))
            })
            .collect(),
        Some(other) => scalar_string(other)
            .map(|s| vec![s])
            .ok_or_else(|| invalid(format!("Configure.{} must be a list.", key))),
    }
}

/// Name/value pairs of the mapping under `key`.
fn entries(map: &Mapping, key: &str) -> Result<Vec<(String, Value)>, BuildError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Mapping(inner)) => inner
            .iter()
            .map(|(k, v)| {
                scalar_string(k)
                    .map(|k| (k, v.clone()))
                    .ok_or_else(|| invalid(format!("Configure.{} keys must be strings.", key)))
            })
            .collect(),
        Some(_) => Err(invalid(format!("Configure.{} must be a mapping.", key))),
    }
}

fn from_fields<T: for<'de> Deserialize<'de>>(
    fields: Value,
    key: &str,
    name: &str,
) -> Result<T, BuildError> {
    let fields = match fields {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    };
    from_value(fields, &format!("{}.{}", key, name))
}

fn from_value<T: for<'de> Deserialize<'de>>(value: Value, what: &str) -> Result<T, BuildError> {
    serde_yaml::from_value(value)
        .map_err(|e| invalid(format!("Invalid Configure.{}: {}", what, e)))
}
