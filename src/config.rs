// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::providers::{daily_price, google_news, sec_edgar, yonhap};
use crate::retry::RetryPolicy;

pub const ENV_CONFIG_PATH: &str = "COLLECTOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/collector.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    DailyPrice,
    Dart,
    SecEdgar,
    Earnings,
    Yonhap,
    GoogleNews,
}

impl SourceKind {
    /// Prefix of the per-source environment overrides.
    pub fn env_prefix(self) -> &'static str {
        match self {
            SourceKind::DailyPrice => "DAILY_PRICE",
            SourceKind::Dart => "DART",
            SourceKind::SecEdgar => "SEC",
            SourceKind::Earnings => "EARNINGS",
            SourceKind::Yonhap => "YONHAP",
            SourceKind::GoogleNews => "GOOGLE_NEWS",
        }
    }

    pub fn requires_api_key(self) -> bool {
        matches!(self, SourceKind::Dart | SourceKind::SecEdgar)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub interval_secs: u64,
    pub lookback_days: u32,
    /// Per-page targets: tickers, CIKs, feed names or search queries.
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SourceConfig {
    fn builtin(kind: SourceKind) -> Self {
        let (name, base_url, interval_secs, lookback_days, symbols): (&str, &str, u64, u32, &[&str]) =
            match kind {
                SourceKind::DailyPrice => (
                    "daily-price",
                    "https://query1.finance.yahoo.com",
                    3_600,
                    3,
                    daily_price::DEFAULT_SYMBOLS,
                ),
                SourceKind::Dart => ("dart", "https://opendart.fss.or.kr/api", 600, 3, NO_SYMBOLS),
                SourceKind::SecEdgar => (
                    "sec-edgar",
                    "https://data.sec.gov",
                    900,
                    3,
                    sec_edgar::DEFAULT_CIKS,
                ),
                SourceKind::Earnings => (
                    "earnings",
                    "https://query2.finance.yahoo.com",
                    21_600,
                    120,
                    daily_price::DEFAULT_SYMBOLS,
                ),
                SourceKind::Yonhap => ("yonhap", "https://www.yna.co.kr", 300, 1, yonhap::DEFAULT_FEEDS),
                SourceKind::GoogleNews => (
                    "google-news",
                    "https://news.google.com",
                    600,
                    1,
                    google_news::DEFAULT_QUERIES,
                ),
            };
        Self {
            name: name.to_string(),
            kind,
            base_url: base_url.to_string(),
            api_key: None,
            interval_secs,
            lookback_days,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            enabled: true,
        }
    }
}

const NO_SYMBOLS: &[&str] = &[];

/// Upper bound for `<PREFIX>_COLLECT_DAYS` / `lookback_days`.
pub const MAX_LOOKBACK_DAYS: u32 = 3_650;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub batch_size: usize,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            timeout_secs: 60,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scheduler_enabled: bool,
    pub bind_addr: String,
    /// JSON watermark file; in-memory when unset.
    pub watermark_path: Option<PathBuf>,
    pub provider_timeout_secs: u64,
    pub retry: RetryPolicy,
    pub downstream: DownstreamConfig,
    pub sources: Vec<SourceConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scheduler_enabled: true,
            bind_addr: "0.0.0.0:8000".to_string(),
            watermark_path: Some(PathBuf::from("data/watermarks.json")),
            provider_timeout_secs: 30,
            retry: RetryPolicy::default(),
            downstream: DownstreamConfig::default(),
            sources: [
                SourceKind::DailyPrice,
                SourceKind::Dart,
                SourceKind::SecEdgar,
                SourceKind::Earnings,
                SourceKind::Yonhap,
                SourceKind::GoogleNews,
            ]
            .into_iter()
            .map(SourceConfig::builtin)
            .collect(),
        }
    }
}

impl PipelineConfig {
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Load from an explicit TOML path (no env overrides applied).
pub fn load_config_from(path: &Path) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading collector config from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Load using env var + fallbacks, then apply env overrides and validate:
/// 1) $COLLECTOR_CONFIG_PATH
/// 2) config/collector.toml
/// 3) built-in defaults
pub fn load_config_default() -> Result<PipelineConfig> {
    let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        load_config_from(&pb)?
    } else {
        let p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if p.exists() {
            load_config_from(&p)?
        } else {
            PipelineConfig::default()
        }
    };
    apply_env_overrides(&mut cfg)?;
    validate(&mut cfg)?;
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_nonempty(key) {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{key}: cannot parse {v:?}")),
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env_nonempty(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn apply_env_overrides(cfg: &mut PipelineConfig) -> Result<()> {
    if let Some(v) = env_flag("SCHEDULER_ENABLED") {
        cfg.scheduler_enabled = v;
    }
    if let Some(v) = env_nonempty("BIND_ADDR") {
        cfg.bind_addr = v;
    }
    if let Some(v) = env_nonempty("WATERMARK_PATH") {
        cfg.watermark_path = match v.as_str() {
            "memory" | ":memory:" => None,
            _ => Some(PathBuf::from(v)),
        };
    }
    if let Some(v) = env_nonempty("DOWNSTREAM_BASE_URL") {
        cfg.downstream.base_url = v;
    }
    if let Some(v) = env_nonempty("DOWNSTREAM_API_KEY") {
        cfg.downstream.api_key = v;
    }
    if let Some(v) = env_parse("DELIVERY_BATCH_SIZE")? {
        cfg.downstream.batch_size = v;
    }
    if let Some(v) = env_parse("DELIVERY_MAX_ATTEMPTS")? {
        cfg.retry.max_attempts = v;
    }
    if let Some(v) = env_parse("DELIVERY_BASE_DELAY_MS")? {
        cfg.retry.base_delay_ms = v;
    }
    if let Some(v) = env_parse("DELIVERY_MAX_DELAY_MS")? {
        cfg.retry.max_delay_ms = v;
    }

    for src in cfg.sources.iter_mut() {
        let p = src.kind.env_prefix();
        if let Some(v) = env_nonempty(&format!("{p}_BASE_URL")) {
            src.base_url = v;
        }
        if let Some(v) = env_nonempty(&format!("{p}_API_KEY")) {
            src.api_key = Some(v);
        }
        if let Some(v) = env_parse(&format!("{p}_INTERVAL_SECS"))? {
            src.interval_secs = v;
        }
        if let Some(v) = env_parse(&format!("{p}_COLLECT_DAYS"))? {
            src.lookback_days = v;
        }
        if let Some(v) = env_nonempty(&format!("{p}_SYMBOLS")) {
            src.symbols = split_list(&v);
        }
        if let Some(v) = env_flag(&format!("{p}_ENABLED")) {
            src.enabled = v;
        }
    }
    Ok(())
}

/// Reject unusable settings; disable sources that lack a required key.
pub fn validate(cfg: &mut PipelineConfig) -> Result<()> {
    if cfg.downstream.api_key.trim().is_empty() {
        bail!("DOWNSTREAM_API_KEY is not set");
    }
    if cfg.downstream.batch_size == 0 {
        bail!("downstream.batch_size must be at least 1");
    }

    let mut seen = std::collections::HashSet::new();
    for src in cfg.sources.iter_mut() {
        if !seen.insert(src.name.clone()) {
            bail!("duplicate source name {:?}", src.name);
        }
        if src.name.is_empty() || !src.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            bail!("source name {:?} must be non-empty [A-Za-z0-9-]", src.name);
        }
        if src.interval_secs == 0 {
            bail!("source {:?}: interval_secs must be positive", src.name);
        }
        if src.lookback_days == 0 || src.lookback_days > MAX_LOOKBACK_DAYS {
            bail!(
                "source {:?}: lookback_days must be within 1..={MAX_LOOKBACK_DAYS}, got {}",
                src.name,
                src.lookback_days
            );
        }
        let missing_key = src.api_key.as_deref().map_or(true, |k| k.trim().is_empty());
        if src.enabled && src.kind.requires_api_key() && missing_key {
            tracing::warn!(source = %src.name, "no api key configured, source disabled");
            src.enabled = false;
        }
    }
    Ok(())
}
