//! botloop CLI: write, validate and inspect script configuration.
//!
//! Scripts run inside a host that provides an `Environment`; this binary only
//! covers the offline parts of that workflow.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use botloop::exit_codes;
use botloop::io::config::{BotConfig, DEFAULT_CONFIG_FILE, load_config, write_config};
use botloop::logging;
use botloop::scripts::{ScriptKind, validate_all};

#[derive(Parser)]
#[command(
    name = "botloop",
    version,
    about = "Cooperative tick scheduler for game-automation scripts"
)]
struct Cli {
    /// Config file to read or write.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file with every default spelled out.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Load the config and build every bundled script.
    Validate,
    /// Print the phase, task and interrupt tables of a script.
    Describe {
        #[arg(value_enum)]
        script: ScriptKind,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Validate => cmd_validate(&cli.config),
        Command::Describe { script } => cmd_describe(&cli.config, script),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &BotConfig::default())?;
    info!(path = %path.display(), "wrote default config");
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(path: &Path) -> Result<i32> {
    let cfg = load_config(path)?;
    validate_all(&cfg)?;
    println!("ok");
    Ok(exit_codes::OK)
}

fn cmd_describe(path: &Path, script: ScriptKind) -> Result<i32> {
    let cfg = load_config(path)?;
    print!("{}", script.describe(&cfg)?);
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["botloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_describe_with_config() {
        let cli = Cli::parse_from(["botloop", "describe", "salvager", "--config", "bots/a.toml"]);
        assert!(matches!(
            cli.command,
            Command::Describe {
                script: ScriptKind::Salvager
            }
        ));
        assert_eq!(cli.config, PathBuf::from("bots/a.toml"));
    }

    #[test]
    fn rejects_unknown_script() {
        assert!(Cli::try_parse_from(["botloop", "describe", "fisher"]).is_err());
    }
}
