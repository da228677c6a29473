//! Detection orchestrator
//!
//! One scan pass walks a list of (asset, timeframe) jobs. For every job the
//! scanner fetches a window, runs the enabled detectors, filters found
//! results by confidence and risk/reward, optionally settles
//! opposite-direction conflicts, drops duplicates within the cooldown,
//! persists the survivors and notifies.
//!
//! Collaborator failures never abort the pass: a failed fetch abandons that
//! job only, a failed save is logged with the full payload and notification
//! still proceeds.

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    scoring::{resolve_conflicts, risk_reward, Resolution, ScoredDetection},
    AssetType, DetectionResult, Details, Direction, PatternEngine, PatternId, PriceWindow,
    Timeframe,
};

// ============================================================
// COLLABORATORS
// ============================================================

/// Failure reported by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl CollaboratorError {
    /// Worth another attempt: the collaborator may recover on its own.
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            CollaboratorError::Unavailable(_) => true,
            CollaboratorError::Io(e) => !matches!(
                e.kind(),
                ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidData
            ),
            CollaboratorError::Json(_) | CollaboratorError::Rejected(_) => false,
        }
    }
}

pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// Source of price windows.
pub trait MarketDataSource: Send + Sync {
    fn fetch_window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        asset_type: AssetType,
    ) -> CollabResult<PriceWindow>;
}

/// Persistence of alerts plus the cooldown-based duplicate check.
pub trait AlertStore: Send + Sync {
    /// Persist an alert, returning its id.
    fn save_alert(&self, alert: &Alert) -> CollabResult<String>;

    /// Same asset, timeframe and pattern alerted within `cooldown_hours`.
    fn is_duplicate(
        &self,
        asset: &str,
        timeframe: Timeframe,
        pattern: PatternId,
        cooldown_hours: u32,
    ) -> CollabResult<bool>;

    fn mark_sent(&self, id: &str) -> CollabResult<()>;
}

/// Delivery of alerts to humans. `Ok` means delivery was confirmed.
pub trait Notifier: Send + Sync {
    fn send(&self, alert: &Alert) -> CollabResult<()>;
}

// ============================================================
// ALERT
// ============================================================

/// Detection that passed every gate and is handed to storage/notification.
///
/// Readers must tolerate missing keys in `key_levels` and `pattern_data`:
/// records written by older detectors carry fewer fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub asset: String,
    pub timeframe: Timeframe,
    pub pattern: PatternId,
    pub direction: Direction,
    /// Rounded to 2 decimals.
    pub confidence: f64,
    /// Rounded to 8 decimals.
    pub price: f64,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub message_sent: bool,
    #[serde(default)]
    pub key_levels: BTreeMap<String, f64>,
    #[serde(default)]
    pub pattern_data: BTreeMap<String, f64>,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

impl Alert {
    pub const KEY_LEVELS: [&'static str; 3] = ["support", "resistance", "neckline"];

    pub fn from_detection(
        asset: &str,
        timeframe: Timeframe,
        result: &DetectionResult,
        price: f64,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let key_levels = Self::KEY_LEVELS
            .iter()
            .filter_map(|k| result.detail(k).map(|v| (k.to_string(), v)))
            .collect();
        let pattern_data = result
            .details
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        Self {
            id: None,
            asset: asset.to_string(),
            timeframe,
            pattern: result.pattern_id,
            direction: result.direction,
            confidence: round_to(result.confidence, 2),
            price: round_to(price, 8),
            detected_at,
            message_sent: false,
            key_levels,
            pattern_data,
        }
    }
}

// ============================================================
// RETRY
// ============================================================

/// Fixed attempt count with exponential backoff: 2s, 4s, 8s (capped).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(1 << attempt.min(3));
        delay.min(self.max_delay)
    }

    /// Run `op`, retrying transient failures.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> CollabResult<T>) -> CollabResult<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(%what, attempt = attempt + 1, max = attempts, error = %e, ?delay, "retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wraps a collaborator so each call goes through a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Retrying<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<S: MarketDataSource> MarketDataSource for Retrying<S> {
    fn fetch_window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        asset_type: AssetType,
    ) -> CollabResult<PriceWindow> {
        self.policy
            .run("fetch_window", || self.inner.fetch_window(symbol, timeframe, asset_type))
    }
}

impl<A: AlertStore> AlertStore for Retrying<A> {
    fn save_alert(&self, alert: &Alert) -> CollabResult<String> {
        self.policy.run("save_alert", || self.inner.save_alert(alert))
    }

    fn is_duplicate(
        &self,
        asset: &str,
        timeframe: Timeframe,
        pattern: PatternId,
        cooldown_hours: u32,
    ) -> CollabResult<bool> {
        self.policy.run("is_duplicate", || {
            self.inner.is_duplicate(asset, timeframe, pattern, cooldown_hours)
        })
    }

    fn mark_sent(&self, id: &str) -> CollabResult<()> {
        self.policy.run("mark_sent", || self.inner.mark_sent(id))
    }
}

impl<N: Notifier> Notifier for Retrying<N> {
    fn send(&self, alert: &Alert) -> CollabResult<()> {
        self.policy.run("send", || self.inner.send(alert))
    }
}

// ============================================================
// SETTINGS & REPORTS
// ============================================================

/// Thresholds and switches for one scan pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub min_confidence: f64,
    pub min_rr: f64,
    pub cooldown_hours: u32,
    pub resolve_conflicts: bool,
    pub parallel: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            min_confidence: 65.0,
            min_rr: 3.0,
            cooldown_hours: 24,
            resolve_conflicts: true,
            parallel: false,
        }
    }
}

/// One asset at one timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanJob {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub asset_type: AssetType,
}

impl ScanJob {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, asset_type: AssetType) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            asset_type,
        }
    }
}

/// What happened to a found detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    BelowConfidence,
    RiskRewardRejected,
    /// Lost (or tied) the opposite-direction weighing.
    Suppressed {
        winner: Option<Direction>,
        bullish_score: f64,
        bearish_score: f64,
    },
    Duplicate,
    Alerted {
        alert_id: Option<String>,
        message_sent: bool,
    },
}

/// Diagnostic record of every found detection, alerted or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub asset: String,
    pub timeframe: Timeframe,
    pub pattern: PatternId,
    pub direction: Direction,
    pub confidence: f64,
    pub price: f64,
    pub risk_reward: Option<f64>,
    pub details: Details,
    pub outcome: Outcome,
    /// The alert as persisted and delivered, when one was raised.
    pub alert: Option<Alert>,
}

impl DetectionRecord {
    pub fn is_alerted(&self) -> bool {
        matches!(self.outcome, Outcome::Alerted { .. })
    }
}

/// Result of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: ScanJob,
    /// Set when the window could not be fetched.
    pub error: Option<String>,
    pub detections: Vec<DetectionRecord>,
}

/// Result of a full pass, jobs in input order.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub jobs: Vec<JobReport>,
    pub elapsed: Duration,
}

impl ScanReport {
    pub fn detections(&self) -> impl Iterator<Item = &DetectionRecord> {
        self.jobs.iter().flat_map(|j| j.detections.iter())
    }

    pub fn above_threshold(&self, min_confidence: f64) -> usize {
        self.detections()
            .filter(|d| d.confidence >= min_confidence)
            .count()
    }

    pub fn alerts(&self) -> usize {
        self.detections().filter(|d| d.is_alerted()).count()
    }

    pub fn failed_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| j.error.is_some()).count()
    }
}

// ============================================================
// SCANNER
// ============================================================

/// Orchestrator owning the engine and its collaborators.
pub struct Scanner<S, A, N> {
    engine: PatternEngine,
    source: S,
    store: A,
    notifier: N,
    settings: ScanSettings,
}

impl<S, A, N> Scanner<S, A, N>
where
    S: MarketDataSource,
    A: AlertStore,
    N: Notifier,
{
    pub fn new(engine: PatternEngine, source: S, store: A, notifier: N, settings: ScanSettings) -> Self {
        Self {
            engine,
            source,
            store,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn store(&self) -> &A {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Scan every job and log a summary.
    pub fn run(&self, jobs: &[ScanJob]) -> ScanReport {
        let started = Instant::now();
        info!(
            jobs = jobs.len(),
            min_confidence = self.settings.min_confidence,
            min_rr = self.settings.min_rr,
            cooldown_hours = self.settings.cooldown_hours,
            parallel = self.settings.parallel,
            "scan started"
        );

        let reports: Vec<JobReport> = if self.settings.parallel {
            jobs.par_iter().map(|job| self.scan_job(job)).collect()
        } else {
            jobs.iter().map(|job| self.scan_job(job)).collect()
        };

        let report = ScanReport {
            jobs: reports,
            elapsed: started.elapsed(),
        };
        info!(
            elapsed_secs = report.elapsed.as_secs_f64(),
            detected = report.detections().count(),
            above_threshold = report.above_threshold(self.settings.min_confidence),
            alerts = report.alerts(),
            failed_jobs = report.failed_jobs(),
            "scan complete"
        );
        report
    }

    /// Scan one asset/timeframe.
    pub fn scan_job(&self, job: &ScanJob) -> JobReport {
        let window = match self
            .source
            .fetch_window(&job.symbol, job.timeframe, job.asset_type)
        {
            Ok(window) if !window.is_empty() => window,
            Ok(_) => {
                warn!(symbol = %job.symbol, timeframe = %job.timeframe, "no data, skipping");
                return JobReport {
                    job: job.clone(),
                    error: Some("empty window".to_string()),
                    detections: Vec::new(),
                };
            }
            Err(e) => {
                error!(symbol = %job.symbol, timeframe = %job.timeframe, error = %e, "fetch failed, skipping");
                return JobReport {
                    job: job.clone(),
                    error: Some(e.to_string()),
                    detections: Vec::new(),
                };
            }
        };

        let detections = self.evaluate(job, &window, Utc::now());
        JobReport {
            job: job.clone(),
            error: None,
            detections,
        }
    }

    /// Run detectors over an already-fetched window and drive the alert
    /// pipeline for each found result.
    pub fn evaluate(&self, job: &ScanJob, window: &PriceWindow, now: DateTime<Utc>) -> Vec<DetectionRecord> {
        let Some(price) = window.last().map(|b| b.close) else {
            return Vec::new();
        };
        debug!(symbol = %job.symbol, timeframe = %job.timeframe, price, bars = window.len(), "window fetched");

        // Gate outcome per detection, in detector order; `None` still qualifies.
        let mut gated: Vec<(DetectionResult, Option<f64>, Option<Outcome>)> = Vec::new();

        for result in self.engine.scan_window(window, job.timeframe) {
            info!(
                symbol = %job.symbol,
                timeframe = %job.timeframe,
                pattern = %result.pattern_id,
                direction = %result.direction,
                confidence = result.confidence,
                "pattern detected"
            );
            let rr = risk_reward(&result, price);
            if result.confidence < self.settings.min_confidence {
                info!(
                    pattern = %result.pattern_id,
                    confidence = result.confidence,
                    threshold = self.settings.min_confidence,
                    "below confidence threshold, no alert"
                );
                gated.push((result, rr, Some(Outcome::BelowConfidence)));
                continue;
            }
            if rr.filter(|rr| *rr >= self.settings.min_rr).is_none() {
                info!(
                    pattern = %result.pattern_id,
                    rr = rr.unwrap_or(0.0),
                    min_rr = self.settings.min_rr,
                    "risk/reward too low, no alert"
                );
                gated.push((result, rr, Some(Outcome::RiskRewardRejected)));
                continue;
            }
            gated.push((result, rr, None));
        }

        let resolution = self.settings.resolve_conflicts.then(|| {
            let scored: Vec<ScoredDetection> = gated
                .iter()
                .filter_map(|(r, rr, gate)| match (rr, gate) {
                    (Some(rr), None) => Some(ScoredDetection {
                        pattern_id: r.pattern_id,
                        direction: r.direction,
                        confidence: r.confidence,
                        risk_reward: *rr,
                    }),
                    _ => None,
                })
                .collect();
            resolve_conflicts(&scored)
        });

        gated
            .into_iter()
            .map(|(result, rr, gate)| {
                let (outcome, alert) = match (gate, resolution) {
                    (Some(rejected), _) => (rejected, None),
                    (None, Some(res)) if !res.allows(result.direction) => {
                        (self.suppressed(job, &result, &res), None)
                    }
                    (None, _) => self.alert(job, &result, price, now),
                };
                self.record(job, &result, price, rr, outcome, alert)
            })
            .collect()
    }

    fn suppressed(&self, job: &ScanJob, result: &DetectionResult, res: &Resolution) -> Outcome {
        warn!(
            symbol = %job.symbol,
            timeframe = %job.timeframe,
            pattern = %result.pattern_id,
            direction = %result.direction,
            winner = ?res.winner,
            bullish_score = res.bullish_score,
            bearish_score = res.bearish_score,
            "conflicting signal suppressed"
        );
        Outcome::Suppressed {
            winner: res.winner,
            bullish_score: res.bullish_score,
            bearish_score: res.bearish_score,
        }
    }

    fn alert(
        &self,
        job: &ScanJob,
        result: &DetectionResult,
        price: f64,
        now: DateTime<Utc>,
    ) -> (Outcome, Option<Alert>) {
        let cooldown = self.settings.cooldown_hours;
        match self
            .store
            .is_duplicate(&job.symbol, job.timeframe, result.pattern_id, cooldown)
        {
            Ok(true) => {
                info!(pattern = %result.pattern_id, cooldown_hours = cooldown, "duplicate within cooldown, skipping");
                return (Outcome::Duplicate, None);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(pattern = %result.pattern_id, error = %e, "duplicate check failed, treating as new");
            }
        }

        let mut alert = Alert::from_detection(&job.symbol, job.timeframe, result, price, now);
        match self.store.save_alert(&alert) {
            Ok(id) => alert.id = Some(id),
            Err(e) => {
                let payload = serde_json::to_string(&alert).unwrap_or_else(|_| format!("{alert:?}"));
                error!(error = %e, %payload, "failed to persist alert");
            }
        }

        match self.notifier.send(&alert) {
            Ok(()) => alert.message_sent = true,
            Err(e) => {
                warn!(
                    symbol = %job.symbol,
                    timeframe = %job.timeframe,
                    pattern = %result.pattern_id,
                    error = %e,
                    "failed to send alert"
                );
            }
        }

        if let (true, Some(id)) = (alert.message_sent, alert.id.as_deref()) {
            match self.store.mark_sent(id) {
                Ok(()) => info!(id, "alert sent"),
                Err(e) => warn!(id, error = %e, "alert sent but not marked"),
            }
        }

        let outcome = Outcome::Alerted {
            alert_id: alert.id.clone(),
            message_sent: alert.message_sent,
        };
        (outcome, Some(alert))
    }

    fn record(
        &self,
        job: &ScanJob,
        result: &DetectionResult,
        price: f64,
        risk_reward: Option<f64>,
        outcome: Outcome,
        alert: Option<Alert>,
    ) -> DetectionRecord {
        DetectionRecord {
            asset: job.symbol.clone(),
            timeframe: job.timeframe,
            pattern: result.pattern_id,
            direction: result.direction,
            confidence: result.confidence,
            price,
            risk_reward,
            details: result.details.clone(),
            outcome,
            alert,
        }
    }
}
