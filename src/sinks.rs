//! File- and log-backed collaborators used by the CLI
//!
//! - [`JsonFileSource`]: `<data_dir>/<SYMBOL>_<tf>.json` price windows
//! - [`MemoryAlertStore`] / [`JsonlAlertStore`]: alert persistence
//! - [`LogNotifier`]: renders the alert message and logs it

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::{
    scanner::{Alert, AlertStore, CollabResult, CollaboratorError, MarketDataSource, Notifier},
    AssetType, Direction, PatternId, PriceBar, PriceWindow, Timeframe,
};

// ============================================================
// MARKET DATA
// ============================================================

/// Reads price windows from JSON arrays of [`PriceBar`] on disk.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    data_dir: PathBuf,
    window_len: usize,
}

impl JsonFileSource {
    pub const DEFAULT_WINDOW_LEN: usize = 250;

    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            window_len: Self::DEFAULT_WINDOW_LEN,
        }
    }

    pub fn with_window_len(mut self, window_len: usize) -> Self {
        self.window_len = window_len;
        self
    }

    /// `BTC/USDT` at 4h -> `<data_dir>/BTC-USDT_4h.json`
    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}.json", symbol.replace('/', "-"), timeframe))
    }
}

impl MarketDataSource for JsonFileSource {
    fn fetch_window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        asset_type: AssetType,
    ) -> CollabResult<PriceWindow> {
        let path = self.path_for(symbol, timeframe);
        debug!(path = %path.display(), %asset_type, "reading window");
        let file = File::open(&path)?;
        let bars: Vec<PriceBar> = serde_json::from_reader(BufReader::new(file))?;
        let window = PriceWindow::new(bars)
            .map_err(|e| CollaboratorError::Rejected(format!("{}: {e}", path.display())))?;
        Ok(window.tail(self.window_len))
    }
}

// ============================================================
// ALERT STORES
// ============================================================

/// Alerts held in memory. Ids are sequential.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alerts(alerts: Vec<Alert>) -> Self {
        Self {
            alerts: Mutex::new(alerts),
        }
    }

    /// Snapshot of stored alerts, in insertion order.
    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn lock(&self) -> CollabResult<MutexGuard<'_, Vec<Alert>>> {
        self.alerts
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("alert store lock poisoned".into()))
    }

    fn insert(&self, alert: &Alert) -> CollabResult<Alert> {
        let mut alerts = self.lock()?;
        let mut stored = alert.clone();
        let id = stored
            .id
            .clone()
            .unwrap_or_else(|| (alerts.len() + 1).to_string());
        stored.id = Some(id);
        alerts.push(stored.clone());
        Ok(stored)
    }

    fn set_sent(&self, id: &str) -> CollabResult<()> {
        let mut alerts = self.lock()?;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id.as_deref() == Some(id))
            .ok_or_else(|| CollaboratorError::Rejected(format!("unknown alert id {id}")))?;
        alert.message_sent = true;
        Ok(())
    }
}

impl AlertStore for MemoryAlertStore {
    fn save_alert(&self, alert: &Alert) -> CollabResult<String> {
        let stored = self.insert(alert)?;
        Ok(stored.id.unwrap_or_default())
    }

    fn is_duplicate(
        &self,
        asset: &str,
        timeframe: Timeframe,
        pattern: PatternId,
        cooldown_hours: u32,
    ) -> CollabResult<bool> {
        let since = Utc::now() - Duration::hours(i64::from(cooldown_hours));
        Ok(self.lock()?.iter().any(|a| {
            a.asset == asset && a.timeframe == timeframe && a.pattern == pattern && a.detected_at >= since
        }))
    }

    fn mark_sent(&self, id: &str) -> CollabResult<()> {
        self.set_sent(id)
    }
}

/// Append-only JSON-lines alert log.
///
/// The file is read once on open. `save_alert` appends a line;
/// `mark_sent` rewrites the whole file.
#[derive(Debug)]
pub struct JsonlAlertStore {
    path: PathBuf,
    memory: MemoryAlertStore,
}

impl JsonlAlertStore {
    pub fn open(path: impl Into<PathBuf>) -> CollabResult<Self> {
        let path = path.into();
        let alerts = if path.exists() {
            read_jsonl(&path)?
        } else {
            Vec::new()
        };
        info!(path = %path.display(), alerts = alerts.len(), "alert log opened");
        Ok(Self {
            path,
            memory: MemoryAlertStore::with_alerts(alerts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.memory.alerts()
    }

    fn rewrite(&self) -> CollabResult<()> {
        let alerts = self.memory.lock()?;
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for alert in alerts.iter() {
                serde_json::to_writer(&mut out, alert)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn read_jsonl(path: &Path) -> CollabResult<Vec<Alert>> {
    let reader = BufReader::new(File::open(path)?);
    let mut alerts = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Alert>(&line) {
            Ok(mut alert) => {
                if alert.id.is_none() {
                    alert.id = Some((alerts.len() + 1).to_string());
                }
                alerts.push(alert);
            }
            Err(e) => warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed alert"),
        }
    }
    Ok(alerts)
}

impl AlertStore for JsonlAlertStore {
    fn save_alert(&self, alert: &Alert) -> CollabResult<String> {
        let stored = self.memory.insert(alert)?;
        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(line.as_bytes())?;
        Ok(stored.id.unwrap_or_default())
    }

    fn is_duplicate(
        &self,
        asset: &str,
        timeframe: Timeframe,
        pattern: PatternId,
        cooldown_hours: u32,
    ) -> CollabResult<bool> {
        self.memory
            .is_duplicate(asset, timeframe, pattern, cooldown_hours)
    }

    fn mark_sent(&self, id: &str) -> CollabResult<()> {
        self.memory.set_sent(id)?;
        self.rewrite()
    }
}

// ============================================================
// NOTIFIER
// ============================================================

/// Logs the formatted alert message; delivery always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, alert: &Alert) -> CollabResult<()> {
        let message = format_alert_message(alert);
        info!(target: "chartscan::notify", asset = %alert.asset, pattern = %alert.pattern, "\n{message}");
        Ok(())
    }
}

fn pattern_description(pattern: PatternId, direction: Direction) -> &'static str {
    use Direction::*;
    use PatternId::*;
    match (pattern, direction) {
        (DoubleTopBottom, Bullish) => "Two similar lows with a peak between them; possible move up.",
        (DoubleTopBottom, Bearish) => "Two similar highs with a trough between them; possible move down.",
        (HeadAndShoulders, Bullish) => "Inverse head and shoulders: three lows, the middle one deepest. Possible reversal up.",
        (HeadAndShoulders, Bearish) => "Head and shoulders: three highs, the middle one highest. Classic bearish reversal.",
        (BullBearFlag, Bullish) => "Strong rally followed by a tight consolidation; trend may continue.",
        (BullBearFlag, Bearish) => "Strong drop followed by a tight consolidation; decline may continue.",
        (Triangles, Bullish) => "Rising lows under flat resistance; pressure building for a breakout up.",
        (Triangles, Bearish) => "Falling highs over flat support; pressure building for a breakdown.",
        (GoldenDeathCross, Bullish) => "EMA50 crossed above EMA200 (golden cross); long-term bullish signal.",
        (GoldenDeathCross, Bearish) => "EMA50 crossed below EMA200 (death cross); long-term bearish signal.",
        (RsiDivergence, Bullish) => "Price made a new low but RSI did not; hidden strength.",
        (RsiDivergence, Bearish) => "Price made a new high but RSI did not; hidden weakness.",
        (Engulfing, Bullish) => "Green candle engulfed the previous red one; strong bullish reversal.",
        (Engulfing, Bearish) => "Red candle engulfed the previous green one; strong bearish reversal.",
        (SupportResistanceBreak, Bullish) => "Key resistance broken; confirms the move up.",
        (SupportResistanceBreak, Bearish) => "Key support broken; confirms the move down.",
        (Ichimoku, Bullish) => "Tenkan crossed above Kijun with price above a bullish cloud.",
        (Ichimoku, Bearish) => "Tenkan crossed below Kijun with price below a bearish cloud.",
        (AbcCorrection, Bullish) => "ABC correction completed near wave C; trend may resume upward.",
        (AbcCorrection, Bearish) => "ABC correction completed near wave C; trend may resume downward.",
        (_, Neutral) => "Technical pattern detected.",
    }
}

/// Two decimals with thousands separators for USDT pairs and prices above
/// 100, six decimals otherwise.
pub fn format_price(price: f64, symbol: &str) -> String {
    if symbol.contains("USDT") || price > 100.0 {
        let fixed = format!("{:.2}", price.abs());
        let (int, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
        let mut grouped = String::with_capacity(int.len() + int.len() / 3);
        for (i, ch) in int.chars().enumerate() {
            if i > 0 && (int.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        let sign = if price < 0.0 { "-" } else { "" };
        format!("{sign}${grouped}.{frac}")
    } else {
        format!("${price:.6}")
    }
}

/// Human-readable alert text.
pub fn format_alert_message(alert: &Alert) -> String {
    let (emoji, label) = match alert.direction {
        Direction::Bullish => ("🟢", "BULLISH SIGNAL"),
        Direction::Bearish => ("🔴", "BEARISH SIGNAL"),
        Direction::Neutral => ("⚠️", "NEUTRAL SIGNAL"),
    };

    let mut msg = format!(
        "{emoji} {label} - {} ({})\n\
         📊 Pattern: {}\n\
         💪 Confidence: {:.0} %\n\
         💰 Price: {}\n\
         \n\
         📖 What it means:\n\
         {}\n",
        alert.asset,
        alert.timeframe,
        alert.pattern.display_name(),
        alert.confidence,
        format_price(alert.price, &alert.asset),
        pattern_description(alert.pattern, alert.direction),
    );

    let level = |key: &str| alert.key_levels.get(key).copied().filter(|v| *v != 0.0);
    let mut levels = Vec::new();
    if let Some(r) = level("resistance") {
        levels.push(format!("  Resistance: {}", format_price(r, &alert.asset)));
    }
    if let Some(s) = level("support") {
        levels.push(format!("  Support: {}", format_price(s, &alert.asset)));
    }
    if !levels.is_empty() {
        msg.push_str(&format!("\n📏 Key levels:\n{}\n", levels.join("\n")));
    }

    msg.push_str(&format!(
        "\n⏰ {}",
        alert.detected_at.format("%d.%m.%Y %H:%M UTC")
    ));
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DetectionResult, Details};
    use chrono::TimeZone;

    fn alert(asset: &str, pattern: PatternId, hours_ago: i64) -> Alert {
        let mut details = Details::new();
        details.insert("support", 95.0);
        details.insert("resistance", 105.5);
        let result = DetectionResult::found(pattern, Direction::Bullish, 80.0, details);
        Alert::from_detection(asset, Timeframe::H4, &result, 100.0, Utc::now() - Duration::hours(hours_ago))
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(64250.5, "BTC/USDT"), "$64,250.50");
        assert_eq!(format_price(0.5, "BTC/USDT"), "$0.50");
        assert_eq!(format_price(1234567.891, "AAPL"), "$1,234,567.89");
        assert_eq!(format_price(42.5, "AAPL"), "$42.500000");
    }

    #[test]
    fn test_message_contents() {
        let mut a = alert("ETH/USDT", PatternId::Engulfing, 0);
        a.detected_at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let msg = format_alert_message(&a);
        assert!(msg.starts_with("🟢 BULLISH SIGNAL - ETH/USDT (4h)"));
        assert!(msg.contains("Pattern: Engulfing Candle"));
        assert!(msg.contains("Confidence: 80 %"));
        assert!(msg.contains("Price: $100.00"));
        assert!(msg.contains("Resistance: $105.50"));
        assert!(msg.contains("Support: $95.00"));
        assert!(msg.ends_with("09.03.2024 14:05 UTC"));
    }

    #[test]
    fn test_memory_store_dedup_and_sent() {
        let store = MemoryAlertStore::new();
        let id = store.save_alert(&alert("BTC/USDT", PatternId::Triangles, 2)).unwrap();
        assert_eq!(id, "1");
        assert!(store
            .is_duplicate("BTC/USDT", Timeframe::H4, PatternId::Triangles, 24)
            .unwrap());
        assert!(!store
            .is_duplicate("BTC/USDT", Timeframe::H4, PatternId::Triangles, 1)
            .unwrap());
        assert!(!store
            .is_duplicate("BTC/USDT", Timeframe::D1, PatternId::Triangles, 24)
            .unwrap());
        store.mark_sent(&id).unwrap();
        assert!(store.alerts()[0].message_sent);
        assert!(store.mark_sent("99").is_err());
    }

    #[test]
    fn test_jsonl_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        {
            let store = JsonlAlertStore::open(&path).unwrap();
            let id = store.save_alert(&alert("AAPL", PatternId::Ichimoku, 1)).unwrap();
            store.save_alert(&alert("MSFT", PatternId::Ichimoku, 1)).unwrap();
            store.mark_sent(&id).unwrap();
        }
        let reopened = JsonlAlertStore::open(&path).unwrap();
        let alerts = reopened.alerts();
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].message_sent);
        assert!(!alerts[1].message_sent);
        assert!(reopened
            .is_duplicate("MSFT", Timeframe::H4, PatternId::Ichimoku, 24)
            .unwrap());
    }

    #[test]
    fn test_json_source_reads_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<PriceBar> = (0..10)
            .map(|i| {
                let c = 100.0 + i as f64;
                PriceBar::new(start + Duration::hours(i), c, c + 1.0, c - 1.0, c, 10.0)
            })
            .collect();
        let source = JsonFileSource::new(dir.path()).with_window_len(4);
        let path = source.path_for("BTC/USDT", Timeframe::H1);
        assert!(path.ends_with("BTC-USDT_1h.json"));
        fs::write(&path, serde_json::to_string(&bars).unwrap()).unwrap();

        let window = source
            .fetch_window("BTC/USDT", Timeframe::H1, AssetType::Crypto)
            .unwrap();
        assert_eq!(window.len(), 4);
        assert_eq!(window.last().unwrap().close, 109.0);
    }

    #[test]
    fn test_json_source_missing_file_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonFileSource::new(dir.path())
            .fetch_window("AAPL", Timeframe::D1, AssetType::Stock)
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Io(_)));
        assert!(!err.is_transient());
    }
}
