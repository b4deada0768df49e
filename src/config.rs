//! Application configuration.
//!
//! Loaded once at process start and passed as an explicit immutable value
//! into the orchestrator. Inner components never read the environment
//! directly (spec.md §9 design note).

use std::collections::BTreeMap;

use crate::model::Cct;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub min_accept_ratio: Option<f64>,
    pub min_cct_confidence: f64,
    pub ambiguity_delta: f64,
    pub cct_thresholds: BTreeMap<Cct, f64>,
    pub allow_missing_watermark: bool,
    pub policy_version: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./ingest.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let min_accept_ratio = std::env::var("MIN_ACCEPT_RATIO")
            .ok()
            .and_then(|v| parse_disableable_ratio(&v))
            .unwrap_or(Some(0.10));

        let min_cct_confidence = std::env::var("MIN_CCT_CONFIDENCE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.70);

        let ambiguity_delta = std::env::var("AMBIGUITY_DELTA")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.05);

        let cct_thresholds = std::env::var("CCT_THRESHOLDS_JSON")
            .ok()
            .and_then(|v| parse_cct_thresholds(&v))
            .unwrap_or_default();

        let allow_missing_watermark = std::env::var("ALLOW_MISSING_WATERMARK")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);

        let policy_version =
            std::env::var("POLICY_VERSION").unwrap_or_else(|_| "policy-v1".to_string());

        Ok(Self {
            database_path,
            port,
            min_accept_ratio,
            min_cct_confidence,
            ambiguity_delta,
            cct_thresholds,
            allow_missing_watermark,
            policy_version,
        })
    }

    pub fn threshold_for(&self, cct: Cct) -> f64 {
        self.cct_thresholds
            .get(&cct)
            .copied()
            .unwrap_or(self.min_cct_confidence)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./ingest.db".to_string(),
            port: 8080,
            min_accept_ratio: Some(0.10),
            min_cct_confidence: 0.70,
            ambiguity_delta: 0.05,
            cct_thresholds: BTreeMap::new(),
            allow_missing_watermark: false,
            policy_version: "policy-v1".to_string(),
        }
    }
}

fn parse_disableable_ratio(raw: &str) -> Option<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || matches!(trimmed.to_ascii_lowercase().as_str(), "none" | "null") {
        return Some(None);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v <= 0.0 => Some(None),
        Ok(v) => Some(Some(v)),
        Err(_) => None,
    }
}

fn parse_cct_thresholds(raw: &str) -> Option<BTreeMap<Cct, f64>> {
    let parsed: serde_json::Value = serde_json::from_str(raw).ok()?;
    let obj = parsed.as_object()?;
    let mut out = BTreeMap::new();
    for (key, value) in obj {
        let cct = match key.to_ascii_uppercase().as_str() {
            "FREE" => Cct::Free,
            "CONSTRAINED" => Cct::Constrained,
            "PASS_THROUGH" => Cct::PassThrough,
            "ARTIFICIAL" => Cct::Artificial,
            "CONDITIONAL" => Cct::Conditional,
            "UNKNOWN" => Cct::Unknown,
            _ => continue,
        };
        if let Some(v) = value.as_f64() {
            out.insert(cct, v);
        }
    }
    Some(out)
}
