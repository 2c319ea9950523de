use chrono::{FixedOffset, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Longest request spacing or page delay accepted: one hour.
pub const MAX_SPACING_MS: u64 = 3_600_000;
/// Longest finite wait accepted: one week. Zero still means no timeout.
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub throttle: ThrottleConfig,
    pub pagination: PaginationConfig,
    pub timeouts: TimeoutConfig,
    pub maintenance: MaintenanceConfig,
    pub exchange: ExchangeConfig,
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(burst) = &self.throttle.burst_limit {
            if burst.max_requests == 0 || burst.window_ms == 0 {
                return Err(ConfigError::Invalid(
                    "throttle.burst_limit needs max_requests > 0 and window_ms > 0".into(),
                ));
            }
            at_most("throttle.burst_limit.window_ms", burst.window_ms, MAX_SPACING_MS)?;
        }
        at_most("throttle.min_interval_ms", self.throttle.min_interval_ms, MAX_SPACING_MS)?;
        at_most("pagination.page_delay_ms", self.pagination.page_delay_ms, MAX_SPACING_MS)?;
        at_most("timeouts.login_secs", self.timeouts.login_secs, MAX_TIMEOUT_SECS)?;
        at_most("timeouts.request_secs", self.timeouts.request_secs, MAX_TIMEOUT_SECS)?;
        at_most("timeouts.condition_secs", self.timeouts.condition_secs, MAX_TIMEOUT_SECS)?;
        if self.pagination.max_pages == Some(0) {
            return Err(ConfigError::Invalid("pagination.max_pages must be positive".into()));
        }
        for window in &self.maintenance.windows {
            if window.weekdays.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "maintenance window '{}' has no weekdays",
                    window.name
                )));
            }
            if window.start >= window.end {
                return Err(ConfigError::Invalid(format!(
                    "maintenance window '{}' starts at or after its end",
                    window.name
                )));
            }
        }
        offset_from_hours(self.maintenance.utc_offset_hours)?;
        offset_from_hours(self.exchange.utc_offset_hours)?;
        Ok(())
    }
}

/// Request spacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum gap between two consecutive requests.
    pub min_interval_ms: u64,
    /// Optional cap on requests within a sliding window.
    pub burst_limit: Option<BurstLimit>,
}

impl ThrottleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 200,
            burst_limit: Some(BurstLimit {
                max_requests: 5,
                window_ms: 1000,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstLimit {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl BurstLimit {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Historical series fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Extra pause between consecutive pages, on top of the throttle.
    pub page_delay_ms: u64,
    /// Hard cap on pages per fetch; `None` means unbounded.
    pub max_pages: Option<usize>,
}

impl PaginationConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_delay_ms: 200,
            max_pages: Some(1000),
        }
    }
}

/// Waits on the gateway. Zero disables the timeout for that channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub login_secs: u64,
    pub request_secs: u64,
    pub condition_secs: u64,
}

impl TimeoutConfig {
    pub fn login(&self) -> Option<Duration> {
        non_zero_secs(self.login_secs)
    }

    pub fn request(&self) -> Option<Duration> {
        non_zero_secs(self.request_secs)
    }

    pub fn condition(&self) -> Option<Duration> {
        non_zero_secs(self.condition_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login_secs: 60,
            request_secs: 30,
            condition_secs: 30,
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Scheduled server maintenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Offset of the clock the windows are written in.
    pub utc_offset_hours: i32,
    pub windows: Vec<MaintenanceWindow>,
}

impl MaintenanceConfig {
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        offset_from_hours(self.utc_offset_hours)
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 9,
            windows: vec![
                MaintenanceWindow {
                    name: "daily".to_string(),
                    weekdays: vec![
                        Weekday::Mon,
                        Weekday::Tue,
                        Weekday::Wed,
                        Weekday::Thu,
                        Weekday::Fri,
                        Weekday::Sat,
                    ],
                    start: hm(4, 45),
                    end: hm(5, 1),
                    code: -100,
                },
                MaintenanceWindow {
                    name: "sunday".to_string(),
                    weekdays: vec![Weekday::Sun],
                    start: hm(3, 50),
                    end: hm(4, 31),
                    code: -101,
                },
            ],
        }
    }
}

/// A recurring window; both bounds are exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub name: String,
    pub weekdays: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub code: i32,
}

/// Exchange-local time interpretation for gateway timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub utc_offset_hours: i32,
}

impl ExchangeConfig {
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        offset_from_hours(self.utc_offset_hours)
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self { utc_offset_hours: 9 }
    }
}

fn at_most(field: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::Invalid(format!("{field} = {value} exceeds {max}")));
    }
    Ok(())
}

fn offset_from_hours(hours: i32) -> Result<FixedOffset, ConfigError> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| ConfigError::Invalid(format!("utc offset {hours}h is out of range")))
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.throttle.min_interval(), Duration::from_millis(200));
        assert_eq!(config.maintenance.windows.len(), 2);
        assert_eq!(config.timeouts.request(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [throttle]
            min_interval_ms = 250

            [timeouts]
            login_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.throttle.min_interval_ms, 250);
        assert!(config.throttle.burst_limit.is_some());
        assert_eq!(config.timeouts.login(), None);
        assert_eq!(config.pagination.page_delay_ms, 200);
    }

    #[test]
    fn test_custom_maintenance_windows() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [maintenance]
            utc_offset_hours = 9

            [[maintenance.windows]]
            name = "nightly"
            weekdays = ["Mon", "Wed"]
            start = "01:00:00"
            end = "01:30:00"
            code = -200
            "#,
        )
        .unwrap();
        assert_eq!(config.maintenance.windows.len(), 1);
        assert_eq!(config.maintenance.windows[0].weekdays, vec![Weekday::Mon, Weekday::Wed]);
    }

    #[test]
    fn test_rejects_inverted_window() {
        let err = BridgeConfig::from_toml_str(
            r#"
            [[maintenance.windows]]
            name = "bad"
            weekdays = ["Sun"]
            start = "05:00:00"
            end = "04:00:00"
            code = -1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_burst() {
        let err = BridgeConfig::from_toml_str(
            r#"
            [throttle.burst_limit]
            max_requests = 0
            window_ms = 1000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        let err = BridgeConfig::from_toml_str(
            r#"
            [throttle]
            min_interval_ms = 9223372036854775807
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let mut config = BridgeConfig::default();
        config.timeouts.request_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.timeouts.request_secs = 0;
        config.validate().unwrap();
    }
}
