//! Engine configuration.
//!
//! Every tunable the classifier, aggregation, and prediction layers use is a
//! named field here, so boundary tests are exact and reproducible. Defaults
//! can be overridden from the environment (a `.env` file is honored by the
//! CLI via `dotenvy`).

use std::time::Duration;

use tracing::warn;

/// Congestion classification thresholds, in index units.
///
/// `index < medium` is Low, `medium <= index < high` is Medium, and
/// `index >= high` is High.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            medium: 30.0,
            high: 70.0,
        }
    }
}

/// Tunables for the aggregation and prediction engines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub thresholds: ClassifierThresholds,

    /// Weekday hours with elevated expected congestion.
    pub rush_hours: Vec<u8>,

    /// Additive index bias applied when the request context is a rush hour.
    pub rush_hour_bias: f64,
    /// Additive index bias applied when the request context is a weekend.
    pub weekend_bias: f64,

    /// How strongly the requested vehicle count moves the estimate relative
    /// to the historical mean count at the same hour.
    pub vehicle_sensitivity: f64,
    /// Clamp bounds for the vehicle-count ratio before it is applied.
    pub vehicle_ratio_floor: f64,
    pub vehicle_ratio_ceil: f64,

    /// Sample count at which pattern support reaches 0.5.
    pub confidence_pivot: f64,
    /// Hours of staleness that halve the freshness factor.
    pub freshness_half_life_hours: f64,

    /// Fallback congestion index for routes with no samples at all.
    pub default_congestion: f64,
    /// Fallback vehicle count for derived hourly/all-routes predictions
    /// when no historical mean exists for the hour.
    pub default_vehicle_count: u64,

    /// Hard bound on any single aggregation or prediction call.
    pub query_timeout: Duration,
    /// Period of the background rollup refresh task.
    pub rollup_refresh_interval: Duration,
    /// Lifetime of a cached prediction.
    pub prediction_ttl: Duration,

    /// When false, error detail is suppressed from response envelopes.
    pub expose_error_detail: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: ClassifierThresholds::default(),
            rush_hours: vec![7, 8, 9, 16, 17, 18],
            rush_hour_bias: 12.0,
            weekend_bias: -7.5,
            vehicle_sensitivity: 0.35,
            vehicle_ratio_floor: 0.25,
            vehicle_ratio_ceil: 4.0,
            confidence_pivot: 20.0,
            freshness_half_life_hours: 48.0,
            default_congestion: 50.0,
            default_vehicle_count: 80,
            query_timeout: Duration::from_secs(5),
            rollup_refresh_interval: Duration::from_secs(60),
            prediction_ttl: Duration::from_secs(300),
            expose_error_detail: true,
        }
    }
}

impl EngineConfig {
    /// Builds a config from defaults, overriding individual fields from the
    /// environment. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_f64("CONGESTION_MEDIUM_THRESHOLD") {
            cfg.thresholds.medium = v;
        }
        if let Some(v) = env_f64("CONGESTION_HIGH_THRESHOLD") {
            cfg.thresholds.high = v;
        }
        if let Some(v) = env_f64("RUSH_HOUR_BIAS") {
            cfg.rush_hour_bias = v;
        }
        if let Some(v) = env_f64("WEEKEND_BIAS") {
            cfg.weekend_bias = v;
        }
        if let Some(v) = env_f64("VEHICLE_SENSITIVITY") {
            cfg.vehicle_sensitivity = v;
        }
        if let Some(v) = env_u64("QUERY_TIMEOUT_SECS") {
            cfg.query_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("ROLLUP_REFRESH_SECS") {
            cfg.rollup_refresh_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("PREDICTION_TTL_SECS") {
            cfg.prediction_ttl = Duration::from_secs(v);
        }
        if let Ok(v) = std::env::var("APP_ENV") {
            cfg.expose_error_detail = v != "production";
        }

        cfg
    }

    /// True when `hour` falls in the configured rush-hour set.
    pub fn is_rush_hour(&self, hour: u8) -> bool {
        self.rush_hours.contains(&hour)
    }
}

fn env_f64(name: &str) -> Option<f64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable env override");
            None
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable env override");
            None
        }
    }
}
