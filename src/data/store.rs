use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{Pattern, PatternId, Signal, SignalId, SignalStatus, Timeframe};

/// Filter for valid-pattern queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct PatternQuery {
    pub symbol: Option<String>,
    pub pattern_type: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub since: Option<DateTime<Utc>>,
}

impl PatternQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }

    pub fn pattern_type(mut self, pattern_type: &str) -> Self {
        self.pattern_type = Some(pattern_type.to_string());
        self
    }

    pub fn timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, p: &Pattern) -> bool {
        self.symbol.as_deref().map_or(true, |s| p.symbol == s)
            && self
                .pattern_type
                .as_deref()
                .map_or(true, |t| p.pattern_type == t)
            && self.timeframe.map_or(true, |tf| p.timeframe == tf)
            && self.since.map_or(true, |s| p.start_timestamp >= s)
    }
}

/// Persistence sink for patterns and signals.
pub trait PatternStore: Send {
    /// Stores `pattern` and returns its id. A pattern already stored for the
    /// same symbol, timeframe, type, direction and start time keeps its
    /// existing record.
    fn save_pattern(&mut self, pattern: Pattern) -> Result<PatternId>;

    /// Valid patterns matching `query`, newest first.
    fn valid_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>>;

    fn invalidate_pattern(&mut self, id: PatternId, filled_at: DateTime<Utc>) -> Result<bool>;

    fn save_signal(&mut self, signal: Signal) -> Result<SignalId>;

    /// Active signals, newest first.
    fn active_signals(&self, symbol: Option<&str>) -> Result<Vec<Signal>>;

    fn unnotified_signals(&self) -> Result<Vec<Signal>>;

    fn mark_signal_notified(&mut self, id: SignalId, at: DateTime<Utc>) -> Result<bool>;

    fn update_signal_status(&mut self, id: SignalId, status: SignalStatus) -> Result<bool>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MemoryStore {
    patterns: Vec<Pattern>,
    signals: Vec<Signal>,
    next_pattern_id: PatternId,
    next_signal_id: SignalId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_pattern_id: 1,
            next_signal_id: 1,
            ..Default::default()
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn pattern(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id == Some(id))
    }

    pub fn signal(&self, id: SignalId) -> Option<&Signal> {
        self.signals.iter().find(|s| s.id == Some(id))
    }

    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!("Saved store snapshot to {}", path.display());
        Ok(())
    }

    /// Reads a snapshot; a missing file yields an empty store.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let store: MemoryStore = serde_json::from_str(&content)?;
        info!(
            "Loaded {} patterns and {} signals from {}",
            store.patterns.len(),
            store.signals.len(),
            path.display()
        );
        Ok(store)
    }

    fn allocate_pattern_id(&mut self) -> PatternId {
        let id = self.next_pattern_id.max(1);
        self.next_pattern_id = id + 1;
        id
    }

    fn allocate_signal_id(&mut self) -> SignalId {
        let id = self.next_signal_id.max(1);
        self.next_signal_id = id + 1;
        id
    }
}

impl PatternStore for MemoryStore {
    fn save_pattern(&mut self, mut pattern: Pattern) -> Result<PatternId> {
        let existing = self.patterns.iter().find(|p| {
            p.symbol == pattern.symbol
                && p.timeframe == pattern.timeframe
                && p.pattern_type == pattern.pattern_type
                && p.direction == pattern.direction
                && p.start_timestamp == pattern.start_timestamp
        });
        if let Some(id) = existing.and_then(|p| p.id) {
            return Ok(id);
        }

        let id = self.allocate_pattern_id();
        pattern.id = Some(id);
        self.patterns.push(pattern);
        Ok(id)
    }

    fn valid_patterns(&self, query: &PatternQuery) -> Result<Vec<Pattern>> {
        let mut out: Vec<Pattern> = self
            .patterns
            .iter()
            .filter(|p| p.is_valid && query.matches(p))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.start_timestamp.cmp(&a.start_timestamp));
        Ok(out)
    }

    fn invalidate_pattern(&mut self, id: PatternId, filled_at: DateTime<Utc>) -> Result<bool> {
        match self.patterns.iter_mut().find(|p| p.id == Some(id)) {
            Some(p) if p.is_valid => {
                p.invalidate(filled_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn save_signal(&mut self, mut signal: Signal) -> Result<SignalId> {
        let id = self.allocate_signal_id();
        signal.id = Some(id);
        self.signals.push(signal);
        Ok(id)
    }

    fn active_signals(&self, symbol: Option<&str>) -> Result<Vec<Signal>> {
        let mut out: Vec<Signal> = self
            .signals
            .iter()
            .filter(|s| s.status == SignalStatus::Active)
            .filter(|s| symbol.map_or(true, |sym| s.symbol == sym))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    fn unnotified_signals(&self) -> Result<Vec<Signal>> {
        Ok(self
            .signals
            .iter()
            .filter(|s| !s.notified && s.status == SignalStatus::Active)
            .cloned()
            .collect())
    }

    fn mark_signal_notified(&mut self, id: SignalId, at: DateTime<Utc>) -> Result<bool> {
        match self.signals.iter_mut().find(|s| s.id == Some(id)) {
            Some(s) => {
                s.notified = true;
                s.notification_sent_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update_signal_status(&mut self, id: SignalId, status: SignalStatus) -> Result<bool> {
        match self.signals.iter_mut().find(|s| s.id == Some(id)) {
            Some(s) => {
                s.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
