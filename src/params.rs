//! Per-symbol / per-timeframe trading parameters.
//!
//! Effective parameters are resolved by layering overrides onto the global
//! defaults in a fixed order: timeframe, then symbol default, then
//! symbol+timeframe. Each layer replaces only the fields it sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, ScanError};
use crate::models::Timeframe;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
    pub max_risk_percent: f64,
    pub stop_loss_atr_multiplier: f64,
    pub take_profit_rr_ratio: f64,
    pub position_size_percent: f64,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_risk_percent: 1.0,
            stop_loss_atr_multiplier: 1.5,
            take_profit_rr_ratio: 2.0,
            position_size_percent: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionParameters {
    pub min_gap_percent: f64,
    pub max_age_candles: u32,
    pub volume_confirmation: bool,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            min_gap_percent: 0.1,
            max_age_candles: 50,
            volume_confirmation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TradingParameters {
    pub risk: RiskParameters,
    #[serde(alias = "fvg")]
    pub detection: DetectionParameters,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_risk_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_atr_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit_rr_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_size_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_gap_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_candles: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_confirmation: Option<bool>,
}

/// One override layer. Unset fields fall through to the layer below.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskOverride>,
    #[serde(default, alias = "fvg", skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionOverride>,
}

impl ParameterOverride {
    pub fn from_json(json: &str) -> Result<Self> {
        let ovr: ParameterOverride =
            serde_json::from_str(json).map_err(|e| ScanError::InvalidOverride(e.to_string()))?;
        ovr.validate()?;
        Ok(ovr)
    }

    pub fn min_gap_percent(value: f64) -> Self {
        Self {
            detection: Some(DetectionOverride {
                min_gap_percent: Some(value),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn take_profit_rr_ratio(value: f64) -> Self {
        Self {
            risk: Some(RiskOverride {
                take_profit_rr_ratio: Some(value),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Rejects non-finite or negative numbers.
    pub fn validate(&self) -> Result<()> {
        let mut fields: Vec<(&str, Option<f64>)> = Vec::new();
        if let Some(r) = &self.risk {
            fields.push(("risk.max_risk_percent", r.max_risk_percent));
            fields.push(("risk.stop_loss_atr_multiplier", r.stop_loss_atr_multiplier));
            fields.push(("risk.take_profit_rr_ratio", r.take_profit_rr_ratio));
            fields.push(("risk.position_size_percent", r.position_size_percent));
        }
        if let Some(d) = &self.detection {
            fields.push(("detection.min_gap_percent", d.min_gap_percent));
        }
        for (name, value) in fields {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ScanError::InvalidOverride(format!(
                        "{} must be a non-negative number, got {}",
                        name, v
                    )));
                }
            }
        }
        Ok(())
    }

    /// Shallow per-field merge onto `base`, returning a fresh value.
    pub fn apply(&self, base: &TradingParameters) -> TradingParameters {
        let mut out = base.clone();
        if let Some(r) = &self.risk {
            if let Some(v) = r.max_risk_percent {
                out.risk.max_risk_percent = v;
            }
            if let Some(v) = r.stop_loss_atr_multiplier {
                out.risk.stop_loss_atr_multiplier = v;
            }
            if let Some(v) = r.take_profit_rr_ratio {
                out.risk.take_profit_rr_ratio = v;
            }
            if let Some(v) = r.position_size_percent {
                out.risk.position_size_percent = v;
            }
        }
        if let Some(d) = &self.detection {
            if let Some(v) = d.min_gap_percent {
                out.detection.min_gap_percent = v;
            }
            if let Some(v) = d.max_age_candles {
                out.detection.max_age_candles = v;
            }
            if let Some(v) = d.volume_confirmation {
                out.detection.volume_confirmation = v;
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParameterOverride>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timeframes: BTreeMap<Timeframe, ParameterOverride>,
}

impl SymbolOverrides {
    fn is_empty(&self) -> bool {
        self.default.is_none() && self.timeframes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideTree {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timeframes: BTreeMap<Timeframe, ParameterOverride>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub symbols: BTreeMap<String, SymbolOverrides>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct OverrideDocument {
    #[serde(default)]
    overrides: OverrideTree,
}

/// Holds defaults plus the override tree. Resolution is never cached.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    defaults: TradingParameters,
    overrides: OverrideTree,
    path: Option<PathBuf>,
}

impl ParameterStore {
    /// In-memory store; mutations are not persisted.
    pub fn new(defaults: TradingParameters) -> Self {
        Self {
            defaults,
            overrides: OverrideTree::default(),
            path: None,
        }
    }

    /// Store backed by a JSON file. A missing file means no overrides.
    pub fn open(defaults: TradingParameters, path: impl AsRef<Path>) -> Result<Self> {
        let mut store = Self {
            defaults,
            overrides: OverrideTree::default(),
            path: Some(path.as_ref().to_path_buf()),
        };
        store.load()?;
        Ok(store)
    }

    pub fn defaults(&self) -> &TradingParameters {
        &self.defaults
    }

    pub fn overrides(&self) -> &OverrideTree {
        &self.overrides
    }

    pub fn resolve(&self, symbol: Option<&str>, timeframe: Option<Timeframe>) -> TradingParameters {
        let mut params = self.defaults.clone();

        if let Some(tf) = timeframe {
            if let Some(ovr) = self.overrides.timeframes.get(&tf) {
                params = ovr.apply(&params);
            }
        }

        if let Some(sym) = symbol.and_then(|s| self.overrides.symbols.get(s)) {
            if let Some(ovr) = &sym.default {
                params = ovr.apply(&params);
            }
            if let Some(ovr) = timeframe.and_then(|tf| sym.timeframes.get(&tf)) {
                params = ovr.apply(&params);
            }
        }

        params
    }

    pub fn set_symbol_parameters(
        &mut self,
        symbol: &str,
        parameters: ParameterOverride,
        timeframe: Option<Timeframe>,
    ) -> Result<()> {
        parameters.validate()?;
        let mut tree = self.overrides.clone();
        let entry = tree.symbols.entry(symbol.to_string()).or_default();
        match timeframe {
            Some(tf) => {
                entry.timeframes.insert(tf, parameters);
            }
            None => entry.default = Some(parameters),
        }
        self.commit(tree)?;
        debug!("Set parameter override for {} {:?}", symbol, timeframe);
        Ok(())
    }

    /// Parses and validates `json` before touching the store.
    pub fn set_symbol_parameters_json(
        &mut self,
        symbol: &str,
        json: &str,
        timeframe: Option<Timeframe>,
    ) -> Result<()> {
        let parameters = ParameterOverride::from_json(json)?;
        self.set_symbol_parameters(symbol, parameters, timeframe)
    }

    pub fn set_timeframe_parameters(
        &mut self,
        timeframe: Timeframe,
        parameters: ParameterOverride,
    ) -> Result<()> {
        parameters.validate()?;
        let mut tree = self.overrides.clone();
        tree.timeframes.insert(timeframe, parameters);
        self.commit(tree)?;
        debug!("Set parameter override for timeframe {}", timeframe);
        Ok(())
    }

    pub fn set_timeframe_parameters_json(&mut self, timeframe: Timeframe, json: &str) -> Result<()> {
        let parameters = ParameterOverride::from_json(json)?;
        self.set_timeframe_parameters(timeframe, parameters)
    }

    /// Drops the symbol+timeframe override, or every override of the symbol
    /// when no timeframe is given.
    pub fn remove_symbol_parameters(
        &mut self,
        symbol: &str,
        timeframe: Option<Timeframe>,
    ) -> Result<()> {
        let mut tree = self.overrides.clone();
        match timeframe {
            Some(tf) => {
                let Some(sym) = tree.symbols.get_mut(symbol) else {
                    return Ok(());
                };
                if sym.timeframes.remove(&tf).is_none() {
                    return Ok(());
                }
                if sym.is_empty() {
                    tree.symbols.remove(symbol);
                }
            }
            None => {
                if tree.symbols.remove(symbol).is_none() {
                    return Ok(());
                }
            }
        }
        self.commit(tree)
    }

    pub fn remove_timeframe_parameters(&mut self, timeframe: Timeframe) -> Result<()> {
        let mut tree = self.overrides.clone();
        if tree.timeframes.remove(&timeframe).is_none() {
            return Ok(());
        }
        self.commit(tree)
    }

    pub fn to_json(&self) -> Result<String> {
        document_json(&self.overrides)
    }

    /// Replaces the override tree with the document in `json`.
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let doc: OverrideDocument =
            serde_json::from_str(json).map_err(|e| ScanError::InvalidOverride(e.to_string()))?;
        let layers = doc
            .overrides
            .timeframes
            .values()
            .chain(doc.overrides.symbols.values().flat_map(|s| {
                s.default.iter().chain(s.timeframes.values())
            }));
        for layer in layers {
            layer.validate()?;
        }
        self.overrides = doc.overrides;
        Ok(())
    }

    pub fn load(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if !path.exists() {
            self.overrides = OverrideTree::default();
            return Ok(());
        }
        let content = fs::read_to_string(&path)?;
        self.load_json(&content)?;
        info!("Loaded parameter overrides from {}", path.display());
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.write(&self.overrides)
    }

    fn write(&self, tree: &OverrideTree) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, document_json(tree)?)?;
        debug!("Saved parameter overrides to {}", path.display());
        Ok(())
    }

    /// Writes `tree` to the backing file, then makes it current. A failed
    /// write leaves the store as it was.
    fn commit(&mut self, tree: OverrideTree) -> Result<()> {
        self.write(&tree)?;
        self.overrides = tree;
        Ok(())
    }

    /// Human-readable dump of the resolved parameters.
    pub fn describe(&self, symbol: Option<&str>, timeframe: Option<Timeframe>) -> String {
        let params = self.resolve(symbol, timeframe);
        let mut context = Vec::new();
        if let Some(s) = symbol {
            context.push(format!("Symbol: {}", s));
        }
        if let Some(tf) = timeframe {
            context.push(format!("Timeframe: {}", tf));
        }
        let title = if context.is_empty() {
            "(Default)".to_string()
        } else {
            format!("({})", context.join(", "))
        };

        let mut out = String::new();
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out, "Trading Parameters {}", title);
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out, "Risk Management:");
        let _ = writeln!(out, "  Max Risk:             {}%", params.risk.max_risk_percent);
        let _ = writeln!(out, "  Position Size:        {}%", params.risk.position_size_percent);
        let _ = writeln!(out, "  Stop Loss Multiplier: {}x ATR", params.risk.stop_loss_atr_multiplier);
        let _ = writeln!(out, "  Take Profit R:R:      {}", params.risk.take_profit_rr_ratio);
        let _ = writeln!(out, "Gap Detection:");
        let _ = writeln!(out, "  Min Gap Size:         {}%", params.detection.min_gap_percent);
        let _ = writeln!(out, "  Max Age:              {} candles", params.detection.max_age_candles);
        let _ = writeln!(out, "  Volume Confirmation:  {}", params.detection.volume_confirmation);
        let _ = write!(out, "{}", "=".repeat(60));
        out
    }
}

fn document_json(tree: &OverrideTree) -> Result<String> {
    let doc = OverrideDocument {
        overrides: tree.clone(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParameterStore {
        ParameterStore::new(TradingParameters::default())
    }

    #[test]
    fn no_overrides_resolves_to_defaults() {
        let s = store();
        assert_eq!(s.resolve(None, None), TradingParameters::default());
        assert_eq!(
            s.resolve(Some("BTC/USDT"), Some(Timeframe::H1)),
            TradingParameters::default()
        );
    }

    #[test]
    fn symbol_timeframe_override_beats_timeframe_override() {
        let mut s = store();
        s.set_timeframe_parameters(Timeframe::M1, ParameterOverride::min_gap_percent(0.2))
            .unwrap();
        s.set_symbol_parameters(
            "BTC/USDT",
            ParameterOverride::min_gap_percent(0.3),
            Some(Timeframe::M1),
        )
        .unwrap();

        let p = s.resolve(Some("BTC/USDT"), Some(Timeframe::M1));
        assert!((p.detection.min_gap_percent - 0.3).abs() < 1e-12);

        // other symbols only see the timeframe layer
        let other = s.resolve(Some("ETH/USDT"), Some(Timeframe::M1));
        assert!((other.detection.min_gap_percent - 0.2).abs() < 1e-12);
    }

    #[test]
    fn symbol_default_applies_after_timeframe_layer() {
        let mut s = store();
        s.set_timeframe_parameters(Timeframe::H1, ParameterOverride::take_profit_rr_ratio(4.0))
            .unwrap();
        s.set_symbol_parameters("ETH/USDT", ParameterOverride::take_profit_rr_ratio(3.0), None)
            .unwrap();

        let p = s.resolve(Some("ETH/USDT"), Some(Timeframe::H1));
        assert!((p.risk.take_profit_rr_ratio - 3.0).abs() < 1e-12);
        let tf_only = s.resolve(None, Some(Timeframe::H1));
        assert!((tf_only.risk.take_profit_rr_ratio - 4.0).abs() < 1e-12);
    }

    #[test]
    fn layers_merge_per_field() {
        let mut s = store();
        s.set_timeframe_parameters(
            Timeframe::M1,
            ParameterOverride::from_json(r#"{"fvg": {"min_gap_percent": 0.2, "max_age_candles": 20}}"#)
                .unwrap(),
        )
        .unwrap();
        s.set_symbol_parameters_json(
            "BTC/USDT",
            r#"{"risk": {"max_risk_percent": 0.5}, "detection": {"min_gap_percent": 0.15}}"#,
            Some(Timeframe::M1),
        )
        .unwrap();

        let p = s.resolve(Some("BTC/USDT"), Some(Timeframe::M1));
        assert!((p.detection.min_gap_percent - 0.15).abs() < 1e-12);
        assert_eq!(p.detection.max_age_candles, 20);
        assert!(p.detection.volume_confirmation);
        assert!((p.risk.max_risk_percent - 0.5).abs() < 1e-12);
        assert!((p.risk.take_profit_rr_ratio - 2.0).abs() < 1e-12);
    }

    #[test]
    fn resolution_is_idempotent_and_does_not_mutate() {
        let mut s = store();
        s.set_symbol_parameters("BTC/USDT", ParameterOverride::min_gap_percent(0.5), None)
            .unwrap();
        let a = s.resolve(Some("BTC/USDT"), Some(Timeframe::M5));
        let b = s.resolve(Some("BTC/USDT"), Some(Timeframe::M5));
        assert_eq!(a, b);
        assert_eq!(s.defaults(), &TradingParameters::default());
    }

    #[test]
    fn mutations_are_visible_immediately() {
        let mut s = store();
        s.set_symbol_parameters("BTC/USDT", ParameterOverride::min_gap_percent(0.5), None)
            .unwrap();
        assert!((s.resolve(Some("BTC/USDT"), None).detection.min_gap_percent - 0.5).abs() < 1e-12);

        s.remove_symbol_parameters("BTC/USDT", None).unwrap();
        assert_eq!(s.resolve(Some("BTC/USDT"), None), TradingParameters::default());
    }

    #[test]
    fn removing_last_timeframe_override_drops_symbol_entry() {
        let mut s = store();
        s.set_symbol_parameters("BTC/USDT", ParameterOverride::min_gap_percent(0.5), Some(Timeframe::H4))
            .unwrap();
        s.remove_symbol_parameters("BTC/USDT", Some(Timeframe::H4)).unwrap();
        assert!(s.overrides().symbols.is_empty());
        // removing something absent is a no-op
        s.remove_symbol_parameters("SOL/USDT", Some(Timeframe::H4)).unwrap();
        s.remove_timeframe_parameters(Timeframe::D1).unwrap();
    }

    #[test]
    fn malformed_override_is_rejected_and_store_unchanged() {
        let mut s = store();
        s.set_timeframe_parameters(Timeframe::M5, ParameterOverride::min_gap_percent(0.2))
            .unwrap();
        let before = s.overrides().clone();

        let unknown = s.set_timeframe_parameters_json(Timeframe::M5, r#"{"risk": {"leverage": 10}}"#);
        assert!(matches!(unknown, Err(ScanError::InvalidOverride(_))));

        let negative = s.set_symbol_parameters_json(
            "BTC/USDT",
            r#"{"detection": {"min_gap_percent": -1.0}}"#,
            None,
        );
        assert!(matches!(negative, Err(ScanError::InvalidOverride(_))));

        assert_eq!(s.overrides(), &before);
    }

    #[test]
    fn json_round_trip_reproduces_resolution() {
        let mut s = store();
        s.set_timeframe_parameters(Timeframe::M1, ParameterOverride::min_gap_percent(0.2))
            .unwrap();
        s.set_symbol_parameters("ETH/USDT", ParameterOverride::take_profit_rr_ratio(3.0), None)
            .unwrap();
        s.set_symbol_parameters("BTC/USDT", ParameterOverride::min_gap_percent(0.3), Some(Timeframe::M1))
            .unwrap();

        let json = s.to_json().unwrap();
        let mut reloaded = store();
        reloaded.load_json(&json).unwrap();

        for sym in [None, Some("BTC/USDT"), Some("ETH/USDT")] {
            for tf in [None, Some(Timeframe::M1), Some(Timeframe::H1)] {
                assert_eq!(s.resolve(sym, tf), reloaded.resolve(sym, tf));
            }
        }
    }

    #[test]
    fn file_backed_store_persists_every_mutation() {
        let path = std::env::temp_dir()
            .join(format!("flow_scanner_params_{}", std::process::id()))
            .join("parameters.json");
        let _ = fs::remove_file(&path);

        let mut s = ParameterStore::open(TradingParameters::default(), &path).unwrap();
        s.set_symbol_parameters("BTC/USDT", ParameterOverride::min_gap_percent(0.3), Some(Timeframe::M15))
            .unwrap();
        assert!(path.exists());

        let reopened = ParameterStore::open(TradingParameters::default(), &path).unwrap();
        assert_eq!(
            reopened.resolve(Some("BTC/USDT"), Some(Timeframe::M15)),
            s.resolve(Some("BTC/USDT"), Some(Timeframe::M15))
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn failed_write_leaves_overrides_untouched() {
        let dir = std::env::temp_dir().join(format!("flow_scanner_params_ro_{}", std::process::id()));
        let path = dir.join("parameters.json");
        let _ = fs::remove_dir_all(&dir);

        let mut s = ParameterStore::open(TradingParameters::default(), &path).unwrap();
        s.set_timeframe_parameters(Timeframe::H1, ParameterOverride::min_gap_percent(0.2))
            .unwrap();
        let before = s.overrides().clone();

        // A directory where the file should be makes every write fail
        fs::remove_file(&path).unwrap();
        fs::create_dir_all(&path).unwrap();

        assert!(s
            .set_symbol_parameters("BTC/USDT", ParameterOverride::min_gap_percent(0.5), None)
            .is_err());
        assert!(s
            .set_timeframe_parameters(Timeframe::M5, ParameterOverride::take_profit_rr_ratio(3.0))
            .is_err());
        assert!(s.remove_timeframe_parameters(Timeframe::H1).is_err());
        assert_eq!(s.overrides(), &before);
        assert!((s.resolve(None, Some(Timeframe::H1)).detection.min_gap_percent - 0.2).abs() < 1e-12);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn describe_mentions_context() {
        let s = store();
        let text = s.describe(Some("BTC/USDT"), Some(Timeframe::H1));
        assert!(text.contains("Symbol: BTC/USDT"));
        assert!(text.contains("Timeframe: 1h"));
        assert!(s.describe(None, None).contains("(Default)"));
    }
}
