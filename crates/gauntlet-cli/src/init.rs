use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};

use crate::Cli;
use tracing::{info, instrument};

/// Runs the `init` command to write a starter configuration.
#[instrument(skip(cli))]
pub fn run(cli: &Cli, template_selector: Option<&str>) -> Result<()> {
    let template = match template_selector {
        Some(value) => InitTemplate::from_str(value)?,
        None => detect_template()?,
    };

    write_if_absent(&cli.config, template.render_config(), cli.force)
        .with_context(|| format!("failed to write '{}'", cli.config))?;

    info!(
        "init complete: template={}, config={}",
        template.as_str(),
        cli.config
    );
    println!("next: run 'gnt run'");

    Ok(())
}

/// Supported project templates for initialization.
#[derive(Debug, Clone, Copy)]
enum InitTemplate {
    /// Python package with a src/ layout.
    Python,
    /// Makefile-driven project.
    Make,
}

impl InitTemplate {
    fn from_str(value: &str) -> Result<Self> {
        match value {
            "python" => Ok(Self::Python),
            "make" => Ok(Self::Make),
            other => Err(anyhow!(
                "unknown init template '{}' (supported: python,make)",
                other
            )),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Make => "make",
        }
    }

    fn render_config(self) -> &'static str {
        match self {
            Self::Python => r#"[tox]
envlist = lint, py3, coverage-report

[testenv]
extras = tests
commands =
    coverage run --parallel -m pytest

[testenv:lint]
skip_install = true
deps = pylint
commands = pylint src

[testenv:coverage-report]
skip_install = true
deps = coverage
commands =
    coverage combine
    coverage report

[coverage:run]
branch = true
# set source to your package name
source = src

[coverage:paths]
source =
    src/
    .tox/*/site-packages/
"#,
            Self::Make => r#"[tox]
envlist = check

[testenv:check]
skip_install = true
whitelist_externals = make
commands =
    make lint
    make test
"#,
        }
    }
}

fn detect_template() -> Result<InitTemplate> {
    if Path::new("pyproject.toml").exists() || Path::new("setup.py").exists() {
        return Ok(InitTemplate::Python);
    }

    if Path::new("Makefile").exists() {
        return Ok(InitTemplate::Make);
    }

    Err(anyhow!(
        "unable to auto-detect template. Run: gnt init <python|make>"
    ))
}

fn write_if_absent(path: &str, content: &str, force: bool) -> Result<()> {
    let output = Path::new(path);

    if output.exists() && !force {
        return Err(anyhow!(
            "'{}' already exists. Re-run with --force to overwrite",
            path
        ));
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory '{}'", parent.display()))?;
    }

    fs::write(output, content)
        .with_context(|| format!("failed to write file '{}'", output.display()))
}
