//! Bot configuration stored as TOML (default `botloop.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::failures::FailureLimits;
use crate::wait::WaitSpec;

pub const DEFAULT_CONFIG_FILE: &str = "botloop.toml";

/// Top-level configuration (TOML).
///
/// Loaded and validated once at startup; every record is handed to the
/// scheduler or scripts read-only. Missing fields default to working values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct BotConfig {
    pub engine: EngineConfig,
    pub jitter: JitterConfig,
    pub tapper: TapperConfig,
    pub salvager: SalvagerConfig,
}

/// What to do when a task exhausts its failure or retry streak.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EscalationPolicy {
    /// Stop the bot.
    Stop,
    /// Move to the script's recovery phase; stop if already there.
    Recover,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Sleep when no interrupt and no task is applicable.
    pub idle_ms: u64,

    pub max_consecutive_failures: u32,
    pub max_consecutive_retries: u32,
    pub escalation: EscalationPolicy,

    /// Extra ticks allowed after a stop request while the script is mid-transaction.
    pub stop_grace_ticks: u64,

    /// Append one JSON line per tick to this file when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,

    pub wait: WaitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_ms: 50,
            max_consecutive_failures: 5,
            max_consecutive_retries: 25,
            escalation: EscalationPolicy::Recover,
            stop_grace_ticks: 20,
            journal_path: None,
            wait: WaitConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn limits(&self) -> FailureLimits {
        FailureLimits {
            max_consecutive_failures: self.max_consecutive_failures,
            max_consecutive_retries: self.max_consecutive_retries,
        }
    }
}

/// Default condition-wait tuning for tasks that do not pick their own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WaitConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            max_attempts: 30,
        }
    }
}

impl WaitConfig {
    pub fn spec(&self) -> WaitSpec {
        WaitSpec::new(Duration::from_millis(self.interval_ms), self.max_attempts)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    None,
    Uniform,
    Gaussian,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JitterConfig {
    pub mode: JitterMode,
    pub min_ms: u64,
    pub max_ms: u64,
    /// Gaussian mode only.
    pub mean_ms: u64,
    /// Gaussian mode only.
    pub std_dev_ms: u64,
    /// Fixed seed for reproducible runs; entropy when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            mode: JitterMode::Gaussian,
            min_ms: 60,
            max_ms: 600,
            mean_ms: 180,
            std_dev_ms: 70,
            seed: None,
        }
    }
}

/// Message rule: exactly one of `flag` or `phase` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EventRuleConfig {
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl EventRuleConfig {
    pub fn flag(pattern: &str, flag: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            flag: Some(flag.to_string()),
            phase: None,
        }
    }

    pub fn phase(pattern: &str, phase: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            flag: None,
            phase: Some(phase.to_string()),
        }
    }
}

/// Tap a target, wait for the product, drop it, wait for respawn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TapperConfig {
    pub target: String,
    pub tap_action: String,
    pub product: String,
    pub food: String,
    pub waiting_timeout_ms: u64,
    pub cooldown_timeout_ms: u64,
    pub events: Vec<EventRuleConfig>,
}

impl Default for TapperConfig {
    fn default() -> Self {
        Self {
            target: "Rock".to_string(),
            tap_action: "Tap".to_string(),
            product: "Ore".to_string(),
            food: "Bread".to_string(),
            waiting_timeout_ms: 30_000,
            cooldown_timeout_ms: 60_000,
            events: vec![
                EventRuleConfig::flag("^You are (?:poisoned|badly hurt)", "low_health"),
                EventRuleConfig::phase("^The rock (?:crumbles|is depleted)", "cleanup"),
            ],
        }
    }
}

/// Salvage wrecks until full, sort the haul, harvest on a timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SalvagerConfig {
    pub wreck: String,
    pub salvage_action: String,
    pub salvage_item: String,
    pub sort_action: String,
    pub harvester: String,
    pub harvest_action: String,
    pub harvest_item: String,
    pub harvest_every_ms: u64,
    pub sorting_timeout_ms: u64,
    pub events: Vec<EventRuleConfig>,
}

impl Default for SalvagerConfig {
    fn default() -> Self {
        Self {
            wreck: "Shipwreck".to_string(),
            salvage_action: "Salvage".to_string(),
            salvage_item: "Salvage".to_string(),
            sort_action: "Sort".to_string(),
            harvester: "Harvester".to_string(),
            harvest_action: "Harvest".to_string(),
            harvest_item: "Seaweed".to_string(),
            harvest_every_ms: 5 * 60 * 1000,
            sorting_timeout_ms: 3 * 60 * 1000,
            events: vec![EventRuleConfig::flag(
                "^Your harvester is full",
                "harvest_ready",
            )],
        }
    }
}

impl BotConfig {
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.jitter.validate()?;
        self.tapper.validate()?;
        self.salvager.validate()?;
        Ok(())
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.idle_ms == 0 || self.idle_ms > 10_000 {
            return Err(anyhow!("engine.idle_ms must be in 1..=10000"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("engine.max_consecutive_failures must be > 0"));
        }
        if self.max_consecutive_retries == 0 {
            return Err(anyhow!("engine.max_consecutive_retries must be > 0"));
        }
        if self.wait.interval_ms == 0 {
            return Err(anyhow!("engine.wait.interval_ms must be > 0"));
        }
        if self.wait.max_attempts == 0 {
            return Err(anyhow!("engine.wait.max_attempts must be > 0"));
        }
        Ok(())
    }
}

impl JitterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_ms > self.max_ms {
            return Err(anyhow!("jitter.min_ms must be <= jitter.max_ms"));
        }
        if self.mode == JitterMode::Gaussian
            && (self.mean_ms < self.min_ms || self.mean_ms > self.max_ms)
        {
            return Err(anyhow!("jitter.mean_ms must lie within [min_ms, max_ms]"));
        }
        Ok(())
    }
}

impl TapperConfig {
    pub fn validate(&self) -> Result<()> {
        require_named("tapper.target", &self.target)?;
        require_named("tapper.tap_action", &self.tap_action)?;
        require_named("tapper.product", &self.product)?;
        require_named("tapper.food", &self.food)?;
        require_positive("tapper.waiting_timeout_ms", self.waiting_timeout_ms)?;
        require_positive("tapper.cooldown_timeout_ms", self.cooldown_timeout_ms)?;
        validate_events("tapper", &self.events)
    }
}

impl SalvagerConfig {
    pub fn validate(&self) -> Result<()> {
        require_named("salvager.wreck", &self.wreck)?;
        require_named("salvager.salvage_action", &self.salvage_action)?;
        require_named("salvager.salvage_item", &self.salvage_item)?;
        require_named("salvager.sort_action", &self.sort_action)?;
        require_named("salvager.harvester", &self.harvester)?;
        require_named("salvager.harvest_action", &self.harvest_action)?;
        require_named("salvager.harvest_item", &self.harvest_item)?;
        require_positive("salvager.harvest_every_ms", self.harvest_every_ms)?;
        require_positive("salvager.sorting_timeout_ms", self.sorting_timeout_ms)?;
        validate_events("salvager", &self.events)
    }
}

fn require_named(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{field} must be a non-empty string"));
    }
    Ok(())
}

fn require_positive(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(anyhow!("{field} must be > 0"));
    }
    Ok(())
}

// Phase names are resolved when the script is built; only shape is checked here.
fn validate_events(section: &str, events: &[EventRuleConfig]) -> Result<()> {
    for (idx, rule) in events.iter().enumerate() {
        Regex::new(&rule.pattern)
            .with_context(|| format!("{section}.events[{idx}].pattern is not a valid regex"))?;
        if rule.flag.is_some() == rule.phase.is_some() {
            return Err(anyhow!(
                "{section}.events[{idx}] must set exactly one of `flag` or `phase`"
            ));
        }
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BotConfig::default()`.
pub fn load_config(path: &Path) -> Result<BotConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = BotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, BotConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("botloop.toml");
        let mut cfg = BotConfig::default();
        cfg.engine.journal_path = Some(PathBuf::from("ticks.jsonl"));
        cfg.jitter.seed = Some(9);
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("botloop.toml");
        fs::write(
            &path,
            "[engine]\nmax_consecutive_failures = 3\nescalation = \"stop\"\n\n[tapper]\ntarget = \"Tree\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.engine.max_consecutive_failures, 3);
        assert_eq!(cfg.engine.escalation, EscalationPolicy::Stop);
        assert_eq!(cfg.engine.idle_ms, EngineConfig::default().idle_ms);
        assert_eq!(cfg.tapper.target, "Tree");
        assert_eq!(cfg.tapper.product, "Ore");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = BotConfig::default();
        cfg.engine.idle_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.jitter.min_ms = 900;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.tapper.events.push(EventRuleConfig {
            pattern: "both".to_string(),
            flag: Some("f".to_string()),
            phase: Some("ready".to_string()),
        });
        let err = cfg.validate().expect_err("ambiguous rule");
        assert!(err.to_string().contains("exactly one"));

        let mut cfg = BotConfig::default();
        cfg.salvager.harvester = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reports_path_on_invalid_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("botloop.toml");
        fs::write(&path, "[engine]\nidle_ms = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("idle_ms"));
    }
}
