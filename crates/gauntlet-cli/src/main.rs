use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use gauntlet_core::{CommandRef, Config, PrimaryCommand, Runner};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod init;
mod publish;
mod styles;

#[allow(unused_imports)]
use styles as s;

/// The command-line interface for Gauntlet.
#[derive(Debug, Parser)]
#[command(name = "gnt")]
#[command(version)]
#[command(styles = s::get_clap_styles())]
#[command(
    help_template = "{bin} {version}\n\n{about-with-newline}{usage-heading} {usage}\n\n{all-args}{after-help}"
)]
#[command(about = "Isolated-environment quality gate runner")]
#[command(
    long_about = "Gauntlet runs each configured quality gate (lint, type check, tests, docs)
in its own provisioned environment, sequentially, and understands the
coverage sections of the config natively.

Common Commands:
  init              Write a starter tox.ini in the current directory
  run               Run every environment in the configured envlist
  run:py36          Run a single environment
  run:pylint,mypy   Run a subset of environments
  list              List configured environments
  cov:combine       Combine parallel coverage data files
  cov:report        Print the coverage report
  cov:publish       Upload combined coverage to coveralls
"
)]
pub(crate) struct Cli {
    /// Command in canonical form, for example: `run:py36`, `cov:report`
    command: Option<String>,
    /// Optional selector (supports `gnt run py36` style)
    selector: Option<String>,
    /// Path to the runner config file.
    #[arg(long, default_value = "tox.ini")]
    config: String,
    /// Override the work directory holding environment dirs.
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Overwrite generated files if they already exist.
    #[arg(long, default_value_t = false)]
    force: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    debug!("parsed cli arguments: {:?}", cli);

    let command_name = match &cli.command {
        Some(cmd) => cmd,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!(); // Add a newline after help
            return Ok(());
        }
    };

    let command_text = match &cli.selector {
        Some(selector) => format!("{}:{}", command_name, selector),
        None => command_name.clone(),
    };

    let command = CommandRef::from_str(&command_text)
        .map_err(|e| anyhow!("failed to parse command '{}': {e}", command_text))?;

    if command.primary == PrimaryCommand::Init {
        return init::run(&cli, command.selector.as_deref());
    }

    let cfg = Config::load_from_file(&cli.config)
        .with_context(|| format!("unable to load config '{}'", cli.config))?;

    execute(&cli, &cfg, &command)
}

/// Executes a validated Gauntlet command.
fn execute(cli: &Cli, cfg: &Config, command: &CommandRef) -> Result<()> {
    match command.primary {
        PrimaryCommand::Run => {
            let selected: Vec<String> = match command.selector.as_deref() {
                Some(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(ToOwned::to_owned)
                    .collect(),
                None => cfg.envlist.clone(),
            };
            if selected.is_empty() {
                bail!("nothing to run: envlist is empty and no selector was given");
            }

            let runner = Runner::new(cfg, cli.workdir.clone());
            let mut outcomes = Vec::with_capacity(selected.len());
            for name in &selected {
                println!(" - {name}");
                outcomes.push(runner.run_env(name)?);
            }

            println!();
            for outcome in &outcomes {
                match &outcome.failure {
                    None => println!("  {}: ok ({} ms)", outcome.name, outcome.duration_ms),
                    Some(reason) => println!("  {}: failed: {}", outcome.name, reason),
                }
            }

            let failed = outcomes.iter().filter(|o| !o.passed()).count();
            if failed > 0 {
                bail!("{failed} of {} environments failed", outcomes.len());
            }
            Ok(())
        }
        PrimaryCommand::List => {
            for name in cfg.env_names() {
                let marker = if cfg.envlist.contains(&name) { "*" } else { " " };
                println!("{marker} {name}");
            }
            Ok(())
        }
        PrimaryCommand::Cov => match command.selector.as_deref() {
            Some("combine") => {
                gauntlet_cov::combine(&cfg.config_dir, &cfg.coverage)?;
                Ok(())
            }
            Some("report") | None => {
                let data = gauntlet_cov::load_combined(&cfg.config_dir)?;
                print!("{}", gauntlet_cov::render_report(&data, &cfg.coverage));
                Ok(())
            }
            Some("publish") => publish::run(cfg),
            Some(other) => Err(anyhow!(
                "unknown cov operation '{}' (expected combine, report, publish)",
                other
            )),
        },
        // init never reaches here from main; kept for exhaustiveness
        PrimaryCommand::Init => init::run(cli, command.selector.as_deref()),
    }
}
