//! Configuration: a YAML file deep-merged with `__`-delimited environment
//! overrides (`SIM__FEE_RATE=0.0005` overrides `sim.fee_rate`).

use alerts::AlertsConfig;
use engine::strategies::StrategyTuning;
use execution_sim::{RiskParams, SimParams};
use indicators::IndicatorConfig;
use serde::Deserialize;
use serde_yaml::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinanceSection {
    pub rest_base: String,
    pub ws_base: String,
    pub symbol: String,
    pub intervals: Vec<String>,
}

impl Default for BinanceSection {
    fn default() -> Self {
        Self {
            rest_base: "https://fapi.binance.com".to_string(),
            ws_base: "wss://fstream.binance.com".to_string(),
            symbol: "BTCUSDT".to_string(),
            intervals: vec!["15m".to_string(), "1h".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KlineCacheSection {
    pub max_bars: usize,
    pub warmup_extra_bars: usize,
    pub warmup_buffer_mult: f64,
}

impl Default for KlineCacheSection {
    fn default() -> Self {
        Self {
            max_bars: 2000,
            warmup_extra_bars: 200,
            warmup_buffer_mult: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub sqlite_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            sqlite_path: "./db/app.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub ws_push_interval: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            base_path: String::new(),
            ws_push_interval: "raw".to_string(),
        }
    }
}

/// One configured strategy instance.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Override of the global initial capital.
    #[serde(default)]
    pub initial_capital: Option<f64>,
    /// Override of the global strategy tuning.
    #[serde(default)]
    pub params: Option<StrategyTuning>,
}

impl Default for StrategyEntry {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            kind: "trend_pullback".to_string(),
            initial_capital: None,
            params: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub app: AppSection,
    pub binance: BinanceSection,
    pub sim: SimParams,
    pub risk: RiskParams,
    pub indicators: IndicatorConfig,
    pub strategy: StrategyTuning,
    pub strategies: Vec<StrategyEntry>,
    pub kline_cache: KlineCacheSection,
    pub alerts: AlertsConfig,
    pub storage: StorageSection,
    pub api: ApiSection,
}

impl Settings {
    pub fn validate(&self) -> Result<(), String> {
        if self.binance.intervals.is_empty() {
            return Err("binance.intervals must not be empty".to_string());
        }
        if self.sim.initial_capital <= 0.0 {
            return Err("sim.initial_capital must be > 0".to_string());
        }
        if self.sim.max_leverage <= 0.0 {
            return Err("sim.max_leverage must be > 0".to_string());
        }
        if self.sim.fee_rate < 0.0 {
            return Err("sim.fee_rate must be >= 0".to_string());
        }
        Ok(())
    }

    /// The configured strategies, defaulting to a single trend-pullback
    /// instance named "default".
    pub fn strategy_entries(&self) -> Vec<StrategyEntry> {
        if self.strategies.is_empty() {
            vec![StrategyEntry::default()]
        } else {
            self.strategies.clone()
        }
    }
}

/// Load settings: YAML file (if present) merged with env overrides.
pub fn load_settings(path: &str) -> Result<Settings, String> {
    let mut root: Value = match std::fs::read_to_string(path) {
        Ok(text) => serde_yaml::from_str(&text).map_err(|e| format!("invalid YAML: {}", e))?,
        Err(_) => Value::Mapping(Default::default()),
    };

    for (key, raw) in std::env::vars() {
        if !key.contains("__") {
            continue;
        }
        let parts: Vec<String> = key
            .split("__")
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() < 2 {
            continue;
        }
        // Scalars keep their natural YAML type ("8000" becomes a number)
        let value: Value =
            serde_yaml::from_str(&raw).unwrap_or(Value::String(raw.clone()));
        set_path(&mut root, &parts, value);
    }

    let settings: Settings =
        serde_yaml::from_value(root).map_err(|e| format!("invalid config: {}", e))?;
    settings.validate()?;
    Ok(settings)
}

fn set_path(root: &mut Value, path: &[String], value: Value) {
    let mut cursor = root;
    for part in &path[..path.len() - 1] {
        if !cursor.is_mapping() {
            *cursor = Value::Mapping(Default::default());
        }
        let map = cursor.as_mapping_mut().unwrap();
        let key = Value::String(part.clone());
        if !map.contains_key(&key) {
            map.insert(key.clone(), Value::Mapping(Default::default()));
        }
        cursor = map.get_mut(&key).unwrap();
    }
    if !cursor.is_mapping() {
        *cursor = Value::Mapping(Default::default());
    }
    cursor
        .as_mapping_mut()
        .unwrap()
        .insert(Value::String(path[path.len() - 1].clone()), value);
}
