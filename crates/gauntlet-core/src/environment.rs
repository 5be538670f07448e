use std::collections::BTreeMap;

/// The effective configuration of one environment after inheritance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// When set, the project itself is not installed into the environment.
    pub skip_install: bool,
    /// Dependency specifiers handed to the installer, in declared order.
    pub deps: Vec<String>,
    /// Named extra dependency groups installed with the project.
    pub extras: Vec<String>,
    /// Variables set in the child process environment.
    pub setenv: BTreeMap<String, String>,
    /// Patterns of variables forwarded from the invoking shell.
    pub passenv: Vec<String>,
    /// Command lines, one spawn each, run in declared order.
    pub commands: Vec<String>,
    /// Working directory override, resolved against the config dir.
    pub changedir: Option<String>,
    /// Patterns of external programs the environment may run.
    pub whitelist_externals: Vec<String>,
}

/// Raw values of one `[testenv:<name>]` section. `None` means the key was
/// not set and the base `[testenv]` value applies.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvTable {
    pub skip_install: Option<bool>,
    pub deps: Option<Vec<String>>,
    pub extras: Option<Vec<String>>,
    pub setenv: Option<BTreeMap<String, String>>,
    pub passenv: Option<Vec<String>>,
    pub commands: Option<Vec<String>>,
    pub changedir: Option<String>,
    pub whitelist_externals: Option<Vec<String>>,
}

impl EnvTable {
    /// Applies this section on top of the base configuration.
    ///
    /// Every key replaces the inherited value wholesale except `setenv`,
    /// whose map is merged with this section winning per variable.
    pub(crate) fn overlay(&self, base: &EnvConfig) -> EnvConfig {
        let mut setenv = base.setenv.clone();
        if let Some(own) = &self.setenv {
            setenv.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        EnvConfig {
            skip_install: self.skip_install.unwrap_or(base.skip_install),
            deps: self.deps.clone().unwrap_or_else(|| base.deps.clone()),
            extras: self.extras.clone().unwrap_or_else(|| base.extras.clone()),
            setenv,
            passenv: self.passenv.clone().unwrap_or_else(|| base.passenv.clone()),
            commands: self
                .commands
                .clone()
                .unwrap_or_else(|| base.commands.clone()),
            changedir: self.changedir.clone().or_else(|| base.changedir.clone()),
            whitelist_externals: self
                .whitelist_externals
                .clone()
                .unwrap_or_else(|| base.whitelist_externals.clone()),
        }
    }
}

/// An environment selected for execution.
#[derive(Debug, Clone)]
pub struct ResolvedEnv {
    pub name: String,
    pub config: EnvConfig,
}
