use std::time::Duration;

use serde::Deserialize;

use crate::deferred::DEFAULT_STEPS_PER_TICK;
use crate::dispatch::DispatchOptions;

pub const DEFAULT_CONFIG_PATH: &str = "switchboard.json";
pub const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 180;

/// Runtime settings. Read from `switchboard.json` (or `SWITCHBOARD_CONFIG`),
/// then overridden field by field from `SWITCHBOARD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub bind: String,
    pub api_token: Option<String>,
    pub rate_limit_per_sec: u32,
    pub tick_hz: f64,
    pub steps_per_tick: usize,
    pub pending_ttl_secs: u64,
    /// Seconds the HTTP layer waits for a result before answering with an
    /// error. The operation itself keeps running.
    pub call_timeout_secs: u64,
    pub log: String,
    pub validate_params: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3030".to_string(),
            api_token: None,
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
            tick_hz: 60.0,
            steps_per_tick: DEFAULT_STEPS_PER_TICK,
            pending_ttl_secs: 600,
            call_timeout_secs: 30,
            log: "info".to_string(),
            validate_params: true,
        }
    }
}

impl BridgeConfig {
    /// Loads the file (missing or invalid falls back to defaults) and applies
    /// environment overrides. Runs before logging is set up, so problems go
    /// to stderr.
    pub fn load() -> Self {
        let path = std::env::var("SWITCHBOARD_CONFIG")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BridgeConfig>(&contents) {
                Ok(cfg) => {
                    println!("[Switchboard] Loaded config from {path}");
                    cfg
                }
                Err(e) => {
                    eprintln!("[Switchboard] Failed to parse {path}: {e}; using defaults");
                    BridgeConfig::default()
                }
            },
            Err(_) => BridgeConfig::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Applies `SWITCHBOARD_*` overrides read through `var`. Unparseable
    /// values are ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            var(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(bind) = get("SWITCHBOARD_BIND") {
            self.bind = bind;
        }
        if let Some(token) = get("SWITCHBOARD_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(v) = get("SWITCHBOARD_RATE_LIMIT_PER_SEC").and_then(|v| v.parse().ok()) {
            self.rate_limit_per_sec = v;
        }
        if let Some(v) = get("SWITCHBOARD_TICK_HZ").and_then(|v| v.parse().ok()) {
            self.tick_hz = v;
        }
        if let Some(v) = get("SWITCHBOARD_STEPS_PER_TICK").and_then(|v| v.parse().ok()) {
            self.steps_per_tick = v;
        }
        if let Some(v) = get("SWITCHBOARD_PENDING_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.pending_ttl_secs = v;
        }
        if let Some(v) = get("SWITCHBOARD_CALL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.call_timeout_secs = v;
        }
        if let Some(log) = get("SWITCHBOARD_LOG") {
            self.log = log;
        }
        if let Some(v) = get("SWITCHBOARD_VALIDATE_PARAMS").and_then(|v| parse_flag(&v)) {
            self.validate_params = v;
        }

        self.api_token = self
            .api_token
            .take()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self.rate_limit_per_sec = self.rate_limit_per_sec.max(1);
        self.steps_per_tick = self.steps_per_tick.max(1);
        if !(self.tick_hz.is_finite() && self.tick_hz > 0.0) {
            self.tick_hz = BridgeConfig::default().tick_hz;
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            validate_params: self.validate_params,
            pending_ttl: Duration::from_secs(self.pending_ttl_secs),
        }
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
