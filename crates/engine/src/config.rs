//! Engine configuration.
//!
//! Defaults are usable as-is; every knob can be overridden through a
//! `FORGEBI_*` environment variable.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use forgebi_observability::LogFormat;

pub const ENV_METRIC_REFRESH_MS: &str = "FORGEBI_METRIC_REFRESH_MS";
pub const ENV_INSIGHT_SCAN_SECS: &str = "FORGEBI_INSIGHT_SCAN_SECS";
pub const ENV_ANOMALY_THRESHOLD: &str = "FORGEBI_ANOMALY_THRESHOLD";
pub const ENV_INSIGHT_COOLDOWN_SECS: &str = "FORGEBI_INSIGHT_COOLDOWN_SECS";
pub const ENV_REPORT_CHECK_SECS: &str = "FORGEBI_REPORT_CHECK_SECS";
pub const ENV_DISPATCH_TIMEOUT_MS: &str = "FORGEBI_DISPATCH_TIMEOUT_MS";
pub const ENV_MODEL_MAX_AGE_SECS: &str = "FORGEBI_MODEL_MAX_AGE_SECS";
pub const ENV_MODEL_SWEEP_SECS: &str = "FORGEBI_MODEL_SWEEP_SECS";
pub const ENV_SCAN_ON_REFRESH: &str = "FORGEBI_SCAN_ON_REFRESH";
pub const ENV_LOG_FORMAT: &str = "FORGEBI_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How often the metric feed is polled.
    pub metric_refresh: Duration,
    /// Periodic insight scan cadence.
    pub insight_scan: Duration,
    pub anomaly_threshold_pct: f64,
    pub insight_cooldown: Duration,
    /// How often reports are checked for a due `next_run`.
    pub report_check: Duration,
    /// Upper bound on a single recipient delivery.
    pub dispatch_timeout: Duration,
    /// Ready models older than this are swept to `outdated`.
    pub model_max_age: Duration,
    pub model_sweep: Duration,
    /// Trigger an insight scan after each `metrics_updated` burst.
    pub scan_on_refresh: bool,
    pub log_format: LogFormat,
    /// Retries for a failing driver tick before waiting for the next interval.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metric_refresh: Duration::from_secs(60),
            insight_scan: Duration::from_secs(60 * 60),
            anomaly_threshold_pct: 20.0,
            insight_cooldown: Duration::from_secs(24 * 60 * 60),
            report_check: Duration::from_secs(60),
            dispatch_timeout: Duration::from_secs(30),
            model_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            model_sweep: Duration::from_secs(60 * 60),
            scan_on_refresh: true,
            log_format: LogFormat::Json,
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `FORGEBI_*` variables that are set.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, ENV_METRIC_REFRESH_MS)? {
            cfg.metric_refresh = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_INSIGHT_SCAN_SECS)? {
            cfg.insight_scan = Duration::from_secs(secs);
        }
        if let Some(pct) = parse::<f64>(&lookup, ENV_ANOMALY_THRESHOLD)? {
            cfg.anomaly_threshold_pct = pct;
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_INSIGHT_COOLDOWN_SECS)? {
            cfg.insight_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_REPORT_CHECK_SECS)? {
            cfg.report_check = Duration::from_secs(secs);
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_DISPATCH_TIMEOUT_MS)? {
            cfg.dispatch_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_MODEL_MAX_AGE_SECS)? {
            cfg.model_max_age = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_MODEL_SWEEP_SECS)? {
            cfg.model_sweep = Duration::from_secs(secs);
        }
        if let Some(flag) = parse::<bool>(&lookup, ENV_SCAN_ON_REFRESH)? {
            cfg.scan_on_refresh = flag;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            cfg.log_format = LogFormat::parse(&raw)
                .with_context(|| format!("{ENV_LOG_FORMAT}={raw:?} is not json or pretty"))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            (ENV_METRIC_REFRESH_MS, self.metric_refresh),
            (ENV_INSIGHT_SCAN_SECS, self.insight_scan),
            (ENV_REPORT_CHECK_SECS, self.report_check),
            (ENV_DISPATCH_TIMEOUT_MS, self.dispatch_timeout),
            (ENV_MODEL_SWEEP_SECS, self.model_sweep),
        ] {
            if value.is_zero() {
                bail!("{name} must be greater than zero");
            }
        }
        if !(self.anomaly_threshold_pct.is_finite() && self.anomaly_threshold_pct >= 0.0) {
            bail!(
                "{ENV_ANOMALY_THRESHOLD} must be a non-negative number, got {}",
                self.anomaly_threshold_pct
            );
        }
        chrono::Duration::from_std(self.insight_cooldown)
            .with_context(|| format!("{ENV_INSIGHT_COOLDOWN_SECS} is out of range"))?;
        chrono::Duration::from_std(self.model_max_age)
            .with_context(|| format!("{ENV_MODEL_MAX_AGE_SECS} is out of range"))?;
        Ok(())
    }

    pub fn with_metric_refresh(mut self, every: Duration) -> Self {
        self.metric_refresh = every;
        self
    }

    pub fn with_insight_scan(mut self, every: Duration) -> Self {
        self.insight_scan = every;
        self
    }

    pub fn with_anomaly_threshold(mut self, pct: f64) -> Self {
        self.anomaly_threshold_pct = pct;
        self
    }

    pub fn with_insight_cooldown(mut self, cooldown: Duration) -> Self {
        self.insight_cooldown = cooldown;
        self
    }

    pub fn with_report_check(mut self, every: Duration) -> Self {
        self.report_check = every;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn with_model_max_age(mut self, max_age: Duration) -> Self {
        self.model_max_age = max_age;
        self
    }

    pub fn with_model_sweep(mut self, every: Duration) -> Self {
        self.model_sweep = every;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    pub fn with_scan_on_refresh(mut self, enabled: bool) -> Self {
        self.scan_on_refresh = enabled;
        self
    }

    /// Install the tracing subscriber in the configured format.
    pub fn init_tracing(&self) {
        forgebi_observability::tracing::init(self.log_format, "info");
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key}={raw:?} is not valid"))
        })
        .transpose()
}
