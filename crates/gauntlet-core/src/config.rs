use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use tracing::warn;

use crate::constants::{INSTALLER_DEFAULT, PYPROJECT_FILE, WORKDIR_DEFAULT};
use crate::environment::{EnvConfig, EnvTable, ResolvedEnv};
use crate::ini::{IniDocument, IniError, IniSection};

const TOX_SECTION: &str = "tox";
const BASE_ENV_SECTION: &str = "testenv";
const ENV_SECTION_PREFIX: &str = "testenv:";
const COVERAGE_RUN_SECTION: &str = "coverage:run";
const COVERAGE_PATHS_SECTION: &str = "coverage:paths";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Ini(#[from] IniError),
    #[error("key '{key}': invalid boolean '{value}' (expected true/false)")]
    InvalidBool { key: String, value: String },
    #[error("invalid setenv entry '{entry}': expected NAME = value")]
    InvalidSetenv { entry: String },
    #[error("unknown environment '{0}'")]
    UnknownEnv(String),
}

/// Coverage sections of the configuration, consumed by the native
/// combine/report operations.
#[derive(Debug, Clone, Default)]
pub struct CoverageConfig {
    /// Whether branch coverage columns are reported.
    pub branch: bool,
    /// Logical source package; files outside it are dropped from reports.
    pub source: Option<String>,
    /// Alias sets from `[coverage:paths]`, in declared order.
    pub paths: Vec<PathAliases>,
}

/// One `[coverage:paths]` entry: a set of path prefixes considered
/// equivalent. The first prefix is canonical for reporting.
#[derive(Debug, Clone)]
pub struct PathAliases {
    pub name: String,
    pub prefixes: Vec<String>,
}

#[derive(Debug)]
pub struct Config {
    /// Environments run by default, in declared order.
    pub envlist: Vec<String>,
    /// Work directory holding per-environment dirs, relative to `config_dir`.
    pub workdir: String,
    /// Installer program used for provisioning.
    pub installer: String,
    pub coverage: CoverageConfig,
    /// Directory containing the configuration file; the project root.
    pub config_dir: PathBuf,
    base: EnvConfig,
    envs: BTreeMap<String, EnvTable>,
}

impl Config {
    /// Loads configuration from an ini file, falling back to the
    /// `tool.tox.legacy_tox_ini` string in a sibling `pyproject.toml`
    /// when the file does not exist.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_dir = match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };

        let text = if path.is_file() {
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?
        } else {
            embedded_ini(&config_dir)?.ok_or_else(|| {
                anyhow!(
                    "no config file '{}' and no embedded configuration in {}",
                    path.display(),
                    PYPROJECT_FILE
                )
            })?
        };

        Self::from_ini(&text, &config_dir)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Parses configuration from ini text.
    pub fn from_ini(text: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let doc = IniDocument::parse(text)?;

        let (envlist, workdir, installer) = match doc.section(TOX_SECTION) {
            Some(section) => (
                section.get("envlist").map(split_list).unwrap_or_default(),
                section.get("workdir").unwrap_or(WORKDIR_DEFAULT).to_string(),
                section
                    .get("installer")
                    .unwrap_or(INSTALLER_DEFAULT)
                    .to_string(),
            ),
            None => (
                Vec::new(),
                WORKDIR_DEFAULT.to_string(),
                INSTALLER_DEFAULT.to_string(),
            ),
        };

        let base = match doc.section(BASE_ENV_SECTION) {
            Some(section) => env_table(section)?.overlay(&EnvConfig::default()),
            None => EnvConfig::default(),
        };

        let mut envs = BTreeMap::new();
        for section in doc.sections() {
            if let Some(name) = section.name().strip_prefix(ENV_SECTION_PREFIX) {
                envs.insert(name.trim().to_string(), env_table(section)?);
            }
        }

        let coverage = coverage_config(&doc)?;

        Ok(Self {
            envlist,
            workdir,
            installer,
            coverage,
            config_dir: config_dir.to_path_buf(),
            base,
            envs,
        })
    }

    /// All known environment names: the envlist in order, then any
    /// remaining explicitly configured environments.
    pub fn env_names(&self) -> Vec<String> {
        let mut names = self.envlist.clone();
        for name in self.envs.keys() {
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Resolves an environment by name.
    ///
    /// Names in the envlist without a dedicated section are implicit
    /// environments inheriting the base `[testenv]` configuration.
    pub fn resolve_env(&self, name: &str) -> Result<ResolvedEnv, ConfigError> {
        let config = if let Some(table) = self.envs.get(name) {
            table.overlay(&self.base)
        } else if self.envlist.iter().any(|n| n == name) {
            self.base.clone()
        } else {
            return Err(ConfigError::UnknownEnv(name.to_string()));
        };

        Ok(ResolvedEnv {
            name: name.to_string(),
            config,
        })
    }
}

fn embedded_ini(config_dir: &Path) -> Result<Option<String>> {
    let manifest = config_dir.join(PYPROJECT_FILE);
    if !manifest.is_file() {
        return Ok(None);
    }

    let text = std::fs::read_to_string(&manifest)
        .with_context(|| format!("failed to read {}", manifest.display()))?;
    let value: toml::Value = text
        .parse()
        .with_context(|| format!("failed to parse {}", manifest.display()))?;

    Ok(value
        .get("tool")
        .and_then(|tool| tool.get("tox"))
        .and_then(|tox| tox.get("legacy_tox_ini"))
        .and_then(|ini| ini.as_str())
        .map(ToOwned::to_owned))
}

fn env_table(section: &IniSection) -> Result<EnvTable, ConfigError> {
    let mut table = EnvTable::default();

    for (key, value) in section.entries() {
        match key {
            "skip_install" => table.skip_install = Some(parse_bool(key, value)?),
            "deps" => table.deps = Some(split_lines(value)),
            "extras" => table.extras = Some(split_list(value)),
            "setenv" => table.setenv = Some(parse_setenv(value)?),
            "passenv" => table.passenv = Some(split_list(value)),
            "commands" => table.commands = Some(split_lines(value)),
            "changedir" => table.changedir = Some(value.to_string()),
            "whitelist_externals" => table.whitelist_externals = Some(split_list(value)),
            other => warn!(
                "ignoring unknown key '{}' in section '[{}]'",
                other,
                section.name()
            ),
        }
    }

    Ok(table)
}

fn coverage_config(doc: &IniDocument) -> Result<CoverageConfig, ConfigError> {
    let mut coverage = CoverageConfig::default();

    if let Some(section) = doc.section(COVERAGE_RUN_SECTION) {
        if let Some(value) = section.get("branch") {
            coverage.branch = parse_bool("branch", value)?;
        }
        coverage.source = section
            .get("source")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned);
    }

    if let Some(section) = doc.section(COVERAGE_PATHS_SECTION) {
        for (key, value) in section.entries() {
            coverage.paths.push(PathAliases {
                name: key.to_string(),
                prefixes: split_lines(value),
            });
        }
    }

    Ok(coverage)
}

/// Splits a comma/whitespace separated value (envlist, extras, passenv).
fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Splits a line-separated value (deps, commands); specifiers keep
/// their internal whitespace.
fn split_lines(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_setenv(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut vars = BTreeMap::new();
    for entry in value.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((name, val)) = entry.split_once('=') else {
            return Err(ConfigError::InvalidSetenv {
                entry: entry.to_string(),
            });
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidSetenv {
                entry: entry.to_string(),
            });
        }
        vars.insert(name.to_string(), val.trim().to_string());
    }
    Ok(vars)
}
