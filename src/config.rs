//! Layered configuration for alertflow.
//!
//! Settings are read from `alertflow.toml`, then overridden by `ALERTFLOW_*`
//! environment variables (a `.env` file is honoured), then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! max_concurrency_per_org = 4
//! claim_ttl_secs = 600
//! backlog_capacity = 50
//! timeline_timeout_ms = 500
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//! max_delay_ms = 10000
//! jitter_ratio = 0.2
//!
//! [stages.deep_analysis]
//! timeout_secs = 240
//! manual_minutes = 45
//!
//! [provider]
//! kind = "http"
//! base_url = "http://127.0.0.1:9000"
//! model = "sec-analyst"
//! temperature = 0.2
//!
//! [orchestration]
//! protocol = "mcp"
//! endpoint = "http://127.0.0.1:9100"
//! max_iocs = 10
//!
//! [timeline]
//! kind = "http"
//! endpoint = "http://127.0.0.1:8080/api"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//!
//! [logging]
//! format = "json"
//! directory = "logs"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alertflow_common::Stage;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::executor::retry::RetryPolicy;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "alertflow.toml";

/// Engine-wide limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// In-flight external calls allowed per organization
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency_per_org: usize,
    /// Lifetime of a stage claim before another trigger may take it over
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,
    /// Progress events retained per alert for replay
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,
    /// Upper bound on a single timeline append
    #[serde(default = "default_timeline_timeout_ms")]
    pub timeline_timeout_ms: u64,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_claim_ttl_secs() -> u64 {
    600
}

fn default_backlog_capacity() -> usize {
    50
}

fn default_timeline_timeout_ms() -> u64 {
    500
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrency_per_org: default_max_concurrency(),
            claim_ttl_secs: default_claim_ttl_secs(),
            backlog_capacity: default_backlog_capacity(),
            timeline_timeout_ms: default_timeline_timeout_ms(),
        }
    }
}

/// Retry/backoff settings for transient backend failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetrySection {
    /// Non-finite jitter (e.g. `nan` in TOML) disables jitter.
    pub fn policy(&self) -> RetryPolicy {
        let jitter_ratio = if self.jitter_ratio.is_finite() {
            self.jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio,
        }
    }
}

/// Per-stage override keyed by stage name, e.g. `[stages.deep_analysis]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOverride {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub manual_minutes: Option<u32>,
}

/// Resolved settings for a specific stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSettings {
    pub timeout: Duration,
    /// Analyst effort the stage replaces, used for the time-saved estimate
    pub manual_minutes: u32,
}

impl StageSettings {
    pub fn defaults_for(stage: Stage) -> Self {
        let (secs, minutes) = match stage {
            Stage::Classification => (60, 10),
            Stage::DeepAnalysis => (180, 30),
            Stage::MitreMapping => (90, 15),
            Stage::PlaybookImmediate => (120, 20),
            Stage::PlaybookInvestigation => (180, 25),
            Stage::OrchestrationApi | Stage::OrchestrationMcp => (120, 15),
        };
        Self {
            timeout: Duration::from_secs(secs),
            manual_minutes: minutes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic canned answers, no network
    #[default]
    Offline,
    Http,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProviderKind::Offline => "offline",
            ProviderKind::Http => "http",
        })
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "offline" => Ok(ProviderKind::Offline),
            "http" => Ok(ProviderKind::Http),
            _ => anyhow::bail!("Invalid provider kind '{}'. Valid values: offline, http", s),
        }
    }
}

/// AI inference backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "default".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: None,
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// SOAR transport protocol used by the one-click pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationProtocol {
    #[default]
    Api,
    Mcp,
}

impl OrchestrationProtocol {
    pub fn stage(&self) -> Stage {
        match self {
            OrchestrationProtocol::Api => Stage::OrchestrationApi,
            OrchestrationProtocol::Mcp => Stage::OrchestrationMcp,
        }
    }
}

impl std::fmt::Display for OrchestrationProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationProtocol::Api => write!(f, "api"),
            OrchestrationProtocol::Mcp => write!(f, "mcp"),
        }
    }
}

impl std::str::FromStr for OrchestrationProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" => Ok(OrchestrationProtocol::Api),
            "mcp" => Ok(OrchestrationProtocol::Mcp),
            _ => anyhow::bail!("Invalid orchestration protocol '{}'. Valid values: api, mcp", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSection {
    #[serde(default)]
    pub protocol: OrchestrationProtocol,
    /// SOAR backend base URL; offline canned responses when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_max_iocs")]
    pub max_iocs: usize,
}

fn default_max_iocs() -> usize {
    10
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            protocol: OrchestrationProtocol::default(),
            endpoint: None,
            max_iocs: default_max_iocs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
    #[default]
    Log,
    Http,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineSection {
    #[serde(default)]
    pub kind: TimelineKind,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for daily-rolling log files; stderr only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// The complete alertflow.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertflowToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub stages: BTreeMap<String, StageOverride>,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub orchestration: OrchestrationSection,
    #[serde(default)]
    pub timeline: TimelineSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl AlertflowToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse alertflow.toml")
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize alertflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Effective settings for a stage, applying any `[stages.<name>]` override.
    pub fn stage_settings(&self, stage: Stage) -> StageSettings {
        let mut settings = StageSettings::defaults_for(stage);
        if let Some(over) = self.stages.get(stage.as_str()) {
            if let Some(secs) = over.timeout_secs {
                settings.timeout = Duration::from_secs(secs);
            }
            if let Some(minutes) = over.manual_minutes {
                settings.manual_minutes = minutes;
            }
        }
        settings
    }

    /// Apply `ALERTFLOW_*` overrides using the given variable lookup.
    ///
    /// Malformed values are reported as errors rather than ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("ALERTFLOW_PROVIDER") {
            self.provider.kind = kind.parse()?;
        }
        if let Some(url) = lookup("ALERTFLOW_PROVIDER_URL") {
            self.provider.base_url = Some(url);
        }
        if let Some(model) = lookup("ALERTFLOW_MODEL") {
            self.provider.model = model;
        }
        if let Some(protocol) = lookup("ALERTFLOW_ORCHESTRATION_PROTOCOL") {
            self.orchestration.protocol = protocol.parse()?;
        }
        if let Some(endpoint) = lookup("ALERTFLOW_SOAR_ENDPOINT") {
            self.orchestration.endpoint = Some(endpoint);
        }
        if let Some(endpoint) = lookup("ALERTFLOW_TIMELINE_ENDPOINT") {
            self.timeline.kind = TimelineKind::Http;
            self.timeline.endpoint = Some(endpoint);
        }
        if let Some(value) = lookup("ALERTFLOW_MAX_CONCURRENCY") {
            self.engine.max_concurrency_per_org = value
                .parse()
                .with_context(|| format!("Invalid ALERTFLOW_MAX_CONCURRENCY '{}'", value))?;
        }
        if let Some(host) = lookup("ALERTFLOW_HOST") {
            self.server.host = host;
        }
        if let Some(value) = lookup("ALERTFLOW_PORT") {
            self.server.port = value
                .parse()
                .with_context(|| format!("Invalid ALERTFLOW_PORT '{}'", value))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.max_concurrency_per_org == 0 {
            warnings.push(
                "engine.max_concurrency_per_org is 0: no stage can ever run".to_string(),
            );
        }
        if self.engine.backlog_capacity == 0 {
            warnings.push(
                "engine.backlog_capacity is 0: reconnecting observers must always resync"
                    .to_string(),
            );
        }
        if self.engine.claim_ttl_secs == 0 {
            warnings.push("engine.claim_ttl_secs is 0: every claim expires immediately".to_string());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0: treated as 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            warnings.push(format!(
                "retry.jitter_ratio {} is outside 0.0..=1.0 and will be clamped",
                self.retry.jitter_ratio
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            warnings.push(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }

        for (name, over) in &self.stages {
            if name.parse::<Stage>().is_err() {
                warnings.push(format!("Unknown stage '{}' in [stages]", name));
            }
            if over.timeout_secs == Some(0) {
                warnings.push(format!("stages.{}.timeout_secs is 0", name));
            }
        }

        if self.provider.kind == ProviderKind::Http && self.provider.base_url.is_none() {
            warnings.push("provider.kind is \"http\" but provider.base_url is not set".to_string());
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            warnings.push(format!(
                "provider.temperature {} is outside 0.0..=2.0",
                self.provider.temperature
            ));
        }
        if self.timeline.kind == TimelineKind::Http && self.timeline.endpoint.is_none() {
            warnings.push("timeline.kind is \"http\" but timeline.endpoint is not set".to_string());
        }

        warnings
    }
}

/// Resolved runtime configuration: file, then environment, then CLI.
#[derive(Debug, Clone)]
pub struct AlertflowConfig {
    /// File the settings were read from, if any
    pub source: Option<PathBuf>,
    pub toml: AlertflowToml,
}

impl AlertflowConfig {
    /// Load from an explicit path (which must exist) or from `./alertflow.toml`
    /// when present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let (source, mut toml) = match path {
            Some(path) => (Some(path.to_path_buf()), AlertflowToml::load(path)?),
            None => {
                let default_path = PathBuf::from(CONFIG_FILE);
                if default_path.exists() {
                    let toml = AlertflowToml::load(&default_path)?;
                    (Some(default_path), toml)
                } else {
                    (None, AlertflowToml::default())
                }
            }
        };

        toml.apply_env(|key| std::env::var(key).ok())?;
        Ok(Self { source, toml })
    }

    /// Configuration with built-in defaults only.
    pub fn defaults() -> Self {
        Self {
            source: None,
            toml: AlertflowToml::default(),
        }
    }

    /// Apply CLI overrides for the server socket.
    pub fn with_cli_args(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.toml.server.host = host;
        }
        if let Some(port) = port {
            self.toml.server.port = port;
        }
        self
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.toml.engine.claim_ttl_secs)
    }

    pub fn timeline_timeout(&self) -> Duration {
        Duration::from_millis(self.toml.engine.timeline_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.toml.retry.policy()
    }

    pub fn stage_settings(&self, stage: Stage) -> StageSettings {
        self.toml.stage_settings(stage)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.toml.server.host, self.toml.server.port)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
