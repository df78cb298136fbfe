//! Bundled scripts, each built from its section of [`BotConfig`].

pub mod salvager;
pub mod tapper;

use std::fmt;

use anyhow::{Context, Result};
use clap::ValueEnum;

use crate::io::config::BotConfig;
use crate::io::environment::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScriptKind {
    Tapper,
    Salvager,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 2] = [ScriptKind::Tapper, ScriptKind::Salvager];

    pub fn name(self) -> &'static str {
        match self {
            ScriptKind::Tapper => "tapper",
            ScriptKind::Salvager => "salvager",
        }
    }

    /// Build the script against the type-erased environment and render its tables.
    pub fn describe(self, cfg: &BotConfig) -> Result<String> {
        let text = match self {
            ScriptKind::Tapper => tapper::script::<dyn Environment>(&cfg.tapper)?.describe(),
            ScriptKind::Salvager => {
                salvager::script::<dyn Environment>(&cfg.salvager)?.describe()
            }
        };
        Ok(text)
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build every bundled script once, surfacing the first definition error.
pub fn validate_all(cfg: &BotConfig) -> Result<()> {
    for kind in ScriptKind::ALL {
        kind.describe(cfg)
            .with_context(|| format!("build script {kind}"))?;
    }
    Ok(())
}
