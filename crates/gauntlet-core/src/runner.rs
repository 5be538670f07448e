use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::cmdline;
use crate::config::Config;
use crate::constants::{BIN_DIR, FINGERPRINT_FILE};
use crate::environment::ResolvedEnv;
use crate::fingerprint::provision_fingerprint;

/// Variables always forwarded into a child environment, independent of
/// `passenv`.
const BASELINE_VARS: &[&str] = &["PATH", "HOME", "TMPDIR", "TEMP", "LANG", "LC_ALL"];

/// The result of running one environment. Configuration errors abort the
/// whole invocation; command and provisioning failures are captured here
/// so remaining environments still run.
#[derive(Debug)]
pub struct EnvOutcome {
    pub name: String,
    pub duration_ms: u64,
    pub failure: Option<String>,
}

impl EnvOutcome {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Executes environments sequentially against a work directory.
pub struct Runner<'a> {
    cfg: &'a Config,
    workdir: PathBuf,
}

impl<'a> Runner<'a> {
    pub fn new(cfg: &'a Config, workdir_override: Option<PathBuf>) -> Self {
        let workdir = workdir_override.unwrap_or_else(|| cfg.config_dir.join(&cfg.workdir));
        Self { cfg, workdir }
    }

    /// Provisions and runs a single environment.
    #[instrument(skip(self))]
    pub fn run_env(&self, name: &str) -> Result<EnvOutcome> {
        let env = self.cfg.resolve_env(name)?;
        let envdir = self.workdir.join(name);
        let start = Instant::now();

        let failure = match self.run_resolved(&env, &envdir) {
            Ok(()) => None,
            Err(e) => Some(format!("{e:#}")),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match &failure {
            None => info!(target: "gauntlet", "{}: ok ({} ms)", name, duration_ms),
            Some(reason) => warn!(target: "gauntlet", "{}: failed: {}", name, reason),
        }

        Ok(EnvOutcome {
            name: name.to_string(),
            duration_ms,
            failure,
        })
    }

    fn run_resolved(&self, env: &ResolvedEnv, envdir: &Path) -> Result<()> {
        fs::create_dir_all(envdir)
            .with_context(|| format!("failed to create env dir '{}'", envdir.display()))?;
        self.provision(env, envdir)?;

        let parent: Vec<(String, String)> = std::env::vars().collect();
        let vars = assemble_environment(env, &self.cfg.config_dir, envdir, &parent);
        let cwd = self.resolve_cwd(env, envdir);

        for line in &env.config.commands {
            let line = substitute(line, &self.cfg.config_dir, envdir);
            let argv = cmdline::split(&line)?;
            self.check_external(&argv[0], env, envdir)?;
            info!(target: "gauntlet", "run [{}] {}", env.name, line);
            spawn_checked(&argv, Some(&vars), &cwd)?;
        }

        Ok(())
    }

    /// Installs declared deps and, unless `skip_install`, the project
    /// itself. The work is skipped entirely when the recorded fingerprint
    /// matches the current configuration.
    fn provision(&self, env: &ResolvedEnv, envdir: &Path) -> Result<()> {
        let config = &env.config;
        if config.skip_install && config.deps.is_empty() {
            debug!(target: "gauntlet", "{}: nothing to provision", env.name);
            return Ok(());
        }

        let print = provision_fingerprint(&self.cfg.installer, config);
        let marker = envdir.join(FINGERPRINT_FILE);
        if let Ok(recorded) = fs::read_to_string(&marker) {
            if recorded.trim() == print {
                debug!(target: "gauntlet", "{}: provisioning up to date", env.name);
                return Ok(());
            }
        }

        let prefix = envdir.display().to_string();
        if !config.deps.is_empty() {
            info!(target: "gauntlet", "provision [{}] {} deps", env.name, config.deps.len());
            let mut argv = vec![
                self.cfg.installer.clone(),
                "install".to_string(),
                "--prefix".to_string(),
                prefix.clone(),
            ];
            argv.extend(config.deps.iter().cloned());
            spawn_checked(&argv, None, &self.cfg.config_dir)
                .with_context(|| format!("failed to provision deps for '{}'", env.name))?;
        }

        if !config.skip_install {
            let mut target = self.cfg.config_dir.display().to_string();
            if !config.extras.is_empty() {
                target = format!("{}[{}]", target, config.extras.join(","));
            }
            info!(target: "gauntlet", "provision [{}] install {}", env.name, target);
            let argv = vec![
                self.cfg.installer.clone(),
                "install".to_string(),
                "--prefix".to_string(),
                prefix,
                target,
            ];
            spawn_checked(&argv, None, &self.cfg.config_dir)
                .with_context(|| format!("failed to install project for '{}'", env.name))?;
        }

        fs::write(&marker, &print)
            .with_context(|| format!("failed to record fingerprint '{}'", marker.display()))?;
        Ok(())
    }

    /// A program is internal when it was provisioned into the environment's
    /// bin dir; anything else must match `whitelist_externals`.
    fn check_external(&self, program: &str, env: &ResolvedEnv, envdir: &Path) -> Result<()> {
        if envdir.join(BIN_DIR).join(program).is_file() {
            return Ok(());
        }
        if env
            .config
            .whitelist_externals
            .iter()
            .any(|pattern| cmdline::glob_match(pattern, program))
        {
            debug!(target: "gauntlet", "{}: allowed external '{}'", env.name, program);
            return Ok(());
        }
        bail!(
            "program '{}' is external to environment '{}': add it to whitelist_externals",
            program,
            env.name
        )
    }

    fn resolve_cwd(&self, env: &ResolvedEnv, envdir: &Path) -> PathBuf {
        match &env.config.changedir {
            Some(dir) => {
                let dir = PathBuf::from(substitute(dir, &self.cfg.config_dir, envdir));
                if dir.is_absolute() {
                    dir
                } else {
                    self.cfg.config_dir.join(dir)
                }
            }
            None => self.cfg.config_dir.clone(),
        }
    }
}

/// Replaces the `{toxinidir}` and `{envdir}` placeholders.
pub fn substitute(text: &str, toxinidir: &Path, envdir: &Path) -> String {
    text.replace("{toxinidir}", &toxinidir.display().to_string())
        .replace("{envdir}", &envdir.display().to_string())
}

/// Builds the child process environment: a baseline plus `passenv`
/// matches from `parent`, overlaid with substituted `setenv` values, with
/// the environment's bin dir prepended to `PATH`.
pub fn assemble_environment(
    env: &ResolvedEnv,
    toxinidir: &Path,
    envdir: &Path,
    parent: &[(String, String)],
) -> Vec<(String, String)> {
    let mut vars: BTreeMap<String, String> = BTreeMap::new();

    for (key, value) in parent {
        let keep = BASELINE_VARS.contains(&key.as_str())
            || env
                .config
                .passenv
                .iter()
                .any(|pattern| cmdline::glob_match(pattern, key));
        if keep {
            vars.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in &env.config.setenv {
        vars.insert(key.clone(), substitute(value, toxinidir, envdir));
    }

    let mut paths = vec![envdir.join(BIN_DIR)];
    if let Some(existing) = vars.get("PATH") {
        paths.extend(std::env::split_paths(existing));
    }
    match std::env::join_paths(paths) {
        Ok(joined) => {
            vars.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }
        Err(e) => warn!("keeping inherited PATH, cannot prepend env bin dir: {}", e),
    }

    vars.into_iter().collect()
}

fn spawn_checked(argv: &[String], vars: Option<&[(String, String)]>, cwd: &Path) -> Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("empty command argv"))?;

    let mut command = Command::new(program);
    command.args(args).current_dir(cwd);
    if let Some(vars) = vars {
        command.env_clear();
        command.envs(vars.iter().map(|(k, v)| (k, v)));
    }

    let status = command
        .status()
        .with_context(|| format!("failed to start command '{} {}'", program, args.join(" ")))?;

    if !status.success() {
        bail!(
            "command failed with status {}: {} {}",
            status,
            program,
            args.join(" ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn config(text: &str, dir: &Path) -> Config {
        Config::from_ini(text, dir).expect("test config should parse")
    }

    fn write_script(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).unwrap();
    }

    #[test]
    fn whitelisted_external_command_passes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            "[testenv:smoke]\nskip_install = true\nwhitelist_externals = true\ncommands = true\n",
            dir.path(),
        );
        let outcome = Runner::new(&cfg, None).run_env("smoke").unwrap();
        assert!(outcome.passed(), "failure: {:?}", outcome.failure);
    }

    #[test]
    fn failing_command_is_captured_in_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            "[testenv:bad]\nskip_install = true\nwhitelist_externals = false\ncommands = false\n",
            dir.path(),
        );
        let outcome = Runner::new(&cfg, None).run_env("bad").unwrap();
        let failure = outcome.failure.expect("must fail");
        assert!(failure.contains("status"), "unexpected failure: {failure}");
    }

    #[test]
    fn failure_halts_remaining_commands() {
        let dir = tempfile::tempdir().unwrap();
        let text = "[testenv:halt]\nskip_install = true\n\
                    whitelist_externals = false mkdir\n\
                    commands =\n    false\n    mkdir {envdir}/after\n";
        let cfg = config(text, dir.path());
        let outcome = Runner::new(&cfg, None).run_env("halt").unwrap();
        assert!(!outcome.passed());
        assert!(!dir.path().join(".tox/halt/after").exists());
    }

    #[test]
    fn changedir_and_substitution_apply() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        let text = "[testenv:docs]\nskip_install = true\nchangedir = docs\n\
                    whitelist_externals = mkdir\ncommands = mkdir marker\n";
        let cfg = config(text, dir.path());
        let outcome = Runner::new(&cfg, None).run_env("docs").unwrap();
        assert!(outcome.passed(), "failure: {:?}", outcome.failure);
        assert!(dir.path().join("docs/marker").is_dir());
    }

    #[test]
    fn unlisted_external_program_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            "[testenv:gate]\nskip_install = true\ncommands = no-such-gauntlet-prog\n",
            dir.path(),
        );
        let outcome = Runner::new(&cfg, None).run_env("gate").unwrap();
        let failure = outcome.failure.expect("must fail");
        assert!(failure.contains("whitelist_externals"));
    }

    #[test]
    fn provisioned_program_runs_without_whitelist() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join(".tox/hello/bin");
        fs::create_dir_all(&bin).unwrap();
        write_script(&bin.join("hello"), "#!/bin/sh\nexit 0\n");

        let cfg = config(
            "[testenv:hello]\nskip_install = true\ncommands = hello\n",
            dir.path(),
        );
        let outcome = Runner::new(&cfg, None).run_env("hello").unwrap();
        assert!(outcome.passed(), "failure: {:?}", outcome.failure);
    }

    #[test]
    fn unknown_environment_aborts_instead_of_recording_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("[tox]\nenvlist = py3\n", dir.path());
        assert!(Runner::new(&cfg, None).run_env("nope").is_err());
    }

    #[test]
    fn provisioning_runs_once_until_config_changes() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("install.log");
        let installer = dir.path().join("fake-installer");
        write_script(
            &installer,
            &format!("#!/bin/sh\necho run >> {}\nexit 0\n", log.display()),
        );

        let text = |deps: &str| {
            format!(
                "[tox]\ninstaller = {}\n[testenv:demo]\nskip_install = true\ndeps = {}\n",
                installer.display(),
                deps
            )
        };

        let cfg = config(&text("alpha"), dir.path());
        let runner = Runner::new(&cfg, None);
        assert!(runner.run_env("demo").unwrap().passed());
        assert!(runner.run_env("demo").unwrap().passed());
        let after_two = fs::read_to_string(&log).unwrap();
        assert_eq!(after_two.lines().count(), 1, "second run must skip");

        let changed = config(&text("alpha\n    beta"), dir.path());
        assert!(Runner::new(&changed, None).run_env("demo").unwrap().passed());
        let after_change = fs::read_to_string(&log).unwrap();
        assert_eq!(after_change.lines().count(), 2, "changed deps re-provision");
    }

    #[test]
    fn failed_provisioning_fails_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            "[tox]\ninstaller = false\n[testenv:demo]\nskip_install = true\ndeps = alpha\n",
            dir.path(),
        );
        let outcome = Runner::new(&cfg, None).run_env("demo").unwrap();
        let failure = outcome.failure.expect("must fail");
        assert!(failure.contains("provision"));
    }

    #[test]
    fn assemble_environment_filters_and_overlays() {
        let dir = tempfile::tempdir().unwrap();
        let text = "[testenv:shape]\npassenv = TRAVIS_*\n\
                    setenv =\n    DATA = {envdir}/data\n";
        let cfg = config(text, dir.path());
        let env = cfg.resolve_env("shape").unwrap();
        let envdir = dir.path().join(".tox/shape");

        let parent = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("HOME".to_string(), "/home/u".to_string()),
            ("SECRET".to_string(), "x".to_string()),
            ("TRAVIS_JOB_ID".to_string(), "7".to_string()),
        ];
        let vars = assemble_environment(&env, dir.path(), &envdir, &parent);
        let lookup = |name: &str| {
            vars.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(lookup("HOME"), Some("/home/u"));
        assert_eq!(lookup("TRAVIS_JOB_ID"), Some("7"));
        assert_eq!(lookup("SECRET"), None);
        assert_eq!(
            lookup("DATA"),
            Some(format!("{}/data", envdir.display()).as_str())
        );
        let path = lookup("PATH").expect("PATH present");
        assert!(path.starts_with(&format!("{}/bin", envdir.display())));
        assert!(path.ends_with("/usr/bin"));
    }

    #[test]
    fn substitute_replaces_both_placeholders() {
        let out = substitute(
            "{toxinidir}/src and {envdir}/bin",
            Path::new("/proj"),
            Path::new("/proj/.tox/py3"),
        );
        assert_eq!(out, "/proj/src and /proj/.tox/py3/bin");
    }
}
