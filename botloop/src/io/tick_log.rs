//! Tick journal: one JSON object per tick appended to a JSONL file.
//!
//! This is product output for post-mortem diagnosis and is always written when
//! configured, independent of `RUST_LOG`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::trigger::Activation;
use crate::core::types::{OutcomeKind, Phase, TransitionCause};
use crate::scheduler::{TickAction, TickReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub cause: TransitionCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Interrupt,
    Task,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRecord {
    pub recorded_at: String,
    pub script: String,
    pub tick: u64,
    pub phase_before: String,
    pub phase_after: String,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<Activation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionRecord>,
}

impl TickRecord {
    pub fn from_report<P: Phase>(script: &str, report: &TickReport<P>) -> Self {
        let (action, name, activation, outcome, detail) = match &report.action {
            TickAction::Interrupt {
                name,
                activation,
                outcome,
                detail,
            } => (
                ActionKind::Interrupt,
                Some(name.clone()),
                Some(*activation),
                Some(*outcome),
                detail.clone(),
            ),
            TickAction::Task {
                name,
                outcome,
                detail,
            } => (
                ActionKind::Task,
                Some(name.clone()),
                None,
                Some(*outcome),
                detail.clone(),
            ),
            TickAction::Idle => (ActionKind::Idle, None, None, None, None),
        };
        Self {
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            script: script.to_string(),
            tick: report.tick,
            phase_before: report.phase_before.to_string(),
            phase_after: report.phase_after.to_string(),
            action,
            name,
            activation,
            outcome,
            detail,
            transitions: report
                .transitions
                .iter()
                .map(|t| TransitionRecord {
                    from: t.from.to_string(),
                    to: t.to.to_string(),
                    cause: t.cause.clone(),
                })
                .collect(),
        }
    }
}

/// Append-only JSONL writer.
#[derive(Debug)]
pub struct TickJournal {
    path: PathBuf,
    file: File,
}

impl TickJournal {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create journal dir {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open journal {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn append(&mut self, record: &TickRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("serialize tick record")?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .with_context(|| format!("append journal {}", self.path.display()))?;
        Ok(())
    }
}

/// Read every record of a journal file in order.
pub fn read_journal(path: &Path) -> Result<Vec<TickRecord>> {
    let file = File::open(path).with_context(|| format!("open journal {}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read journal {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TickRecord = serde_json::from_str(&line)
            .with_context(|| format!("parse journal {} line {}", path.display(), idx + 1))?;
        records.push(record);
    }
    Ok(records)
}
