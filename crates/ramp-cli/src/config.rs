//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `$RAMP_CONFIG` environment variable
//! 2. `~/.config/ramp/config.toml`
//! 3. Built-in defaults (everything is optional)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use ramp_core::carbon::DEFAULT_COUNTRY;
use ramp_core::tier::DEFAULT_LADDER;
use ramp_core::{GradeThresholds, GridFactor, ProbeSettings, RampSettings, StalenessPolicy};
use ramp_engine::{DEFAULT_API_KEY_ENV, DEFAULT_OLLAMA_URL, DEFAULT_REMOTE_URL};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub ramp: RampConfig,
    pub probes: ProbesConfig,
    pub energy: EnergyConfig,
    pub grades: GradeThresholds,
    pub store: StoreConfig,
    pub report: ReportConfig,
}

/// Inference endpoints.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ollama_url: String,
    /// OpenAI-compatible base URL for API-served models.
    pub remote_url: String,
    /// Environment variable holding the remote API key.
    pub api_key_env: String,
    pub connect_timeout_secs: u64,
}

/// Context ladder and tier execution.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    pub ladder: Vec<u32>,
    pub max_context: Option<u32>,
    /// Free memory required before a local tier starts.
    pub safety_margin_gb: f64,
    pub swap_ratio: f64,
    pub sample_interval_ms: u64,
    /// Longest wait for an unloaded model's memory to be released.
    pub unload_settle_ms: u64,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub tier_timeout_secs: u64,
    pub needle: bool,
    pub needle_min_context: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProbesConfig {
    pub enabled: bool,
    pub repeats: u32,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub force_tools: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// ISO 3166 alpha-3 code used for grid intensity.
    pub country: String,
    /// Overrides the country's intensity (gCO2e/kWh).
    pub grid_g_per_kwh: Option<f64>,
    pub pue: f64,
    /// Read RAPL counters when the host exposes them.
    pub rapl: bool,
}

/// Database and catalog locations.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path. Default: platform-specific data dir.
    pub path: Option<String>,
    /// `models.json` path. Default: `./models.json`.
    pub catalog: Option<String>,
    /// Records older than this are re-run in resume mode.
    pub max_age_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub path: String,
}

// --- Defaults ---

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.into(),
            remote_url: DEFAULT_REMOTE_URL.into(),
            api_key_env: DEFAULT_API_KEY_ENV.into(),
            connect_timeout_secs: 5,
        }
    }
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            ladder: DEFAULT_LADDER.to_vec(),
            max_context: None,
            safety_margin_gb: 2.0,
            swap_ratio: 0.80,
            sample_interval_ms: 250,
            unload_settle_ms: 2000,
            max_output_tokens: 512,
            temperature: 0.7,
            tier_timeout_secs: 300,
            needle: true,
            needle_min_context: 4096,
        }
    }
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repeats: 2,
            context_window: 2048,
            max_output_tokens: 512,
            timeout_secs: 120,
            force_tools: false,
        }
    }
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            country: DEFAULT_COUNTRY.into(),
            grid_g_per_kwh: None,
            pue: 1.0,
            rapl: true,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: "BENCHMARK_REPORT.md".into(),
        }
    }
}

// --- Conversions ---

impl Config {
    pub fn ramp_settings(&self) -> RampSettings {
        let r = &self.ramp;
        let p = &self.probes;
        RampSettings {
            ladder: r.ladder.clone(),
            max_context: r.max_context,
            safety_margin_bytes: (r.safety_margin_gb.max(0.0) * ramp_core::monitor::GIB) as u64,
            swap_ratio: r.swap_ratio,
            sample_interval: Duration::from_millis(r.sample_interval_ms.max(10)),
            unload_settle: Duration::from_millis(r.unload_settle_ms),
            max_output_tokens: r.max_output_tokens,
            tier_temperature: r.temperature,
            tier_timeout: Duration::from_secs(r.tier_timeout_secs),
            needle: r.needle,
            needle_min_context: r.needle_min_context,
            functional: p.enabled,
            probes: ProbeSettings {
                repeats: p.repeats.max(1),
                context_window: p.context_window,
                max_output_tokens: p.max_output_tokens,
                timeout: Duration::from_secs(p.timeout_secs),
                force_tools: p.force_tools,
            },
            grades: self.grades.clone(),
        }
    }

    pub fn grid_factor(&self) -> GridFactor {
        let e = &self.energy;
        GridFactor::for_country(&e.country, e.grid_g_per_kwh, e.pue)
    }

    pub fn staleness(&self) -> StalenessPolicy {
        StalenessPolicy {
            max_age_days: self.store.max_age_days,
        }
    }
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config() -> Result<Config> {
    let path = config_path();

    if let Some(p) = &path {
        if p.exists() {
            let content =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(config);
        }
    }

    Ok(Config::default())
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("RAMP_CONFIG") {
        return Some(PathBuf::from(p));
    }

    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("ramp").join("config.toml"))
}

/// Show the active config path (for `ramp config`).
pub fn show_config_path() -> String {
    match config_path() {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}
