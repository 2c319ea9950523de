use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc};
use kwbridge_core::BridgeError;
use tracing::error;

use crate::config::{ConfigError, MaintenanceConfig, MaintenanceWindow};

/// Rejects requests while the gateway is in scheduled maintenance.
#[derive(Debug, Clone)]
pub struct MaintenanceGuard {
    offset: FixedOffset,
    windows: Vec<MaintenanceWindow>,
}

impl MaintenanceGuard {
    pub fn new(config: &MaintenanceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            offset: config.offset()?,
            windows: config.windows.clone(),
        })
    }

    /// A guard that never trips.
    pub fn disabled() -> Self {
        Self {
            offset: Utc.fix(),
            windows: Vec::new(),
        }
    }

    /// The window `now` falls into, if any.
    pub fn active_window(&self, now: DateTime<Utc>) -> Option<&MaintenanceWindow> {
        let local = now.with_timezone(&self.offset);
        let weekday = local.weekday();
        let time = local.time();
        self.windows
            .iter()
            .find(|w| w.weekdays.contains(&weekday) && w.start < time && time < w.end)
    }

    /// Fail with `MaintenanceWindow` when `now` is inside a window.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), BridgeError> {
        match self.active_window(now) {
            Some(window) => {
                error!(
                    window = %window.name,
                    code = window.code,
                    "Request refused during gateway maintenance"
                );
                Err(BridgeError::MaintenanceWindow {
                    code: window.code,
                    window: window.name.clone(),
                })
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kst(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, hh, mm, ss)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn guard() -> MaintenanceGuard {
        MaintenanceGuard::new(&MaintenanceConfig::default()).unwrap()
    }

    #[test]
    fn test_weekday_window() {
        // 2024-01-03 is a Wednesday
        let err = guard().check(kst(2024, 1, 3, 4, 50, 0)).unwrap_err();
        assert!(matches!(err, BridgeError::MaintenanceWindow { code: -100, .. }));
    }

    #[test]
    fn test_sunday_window() {
        // 2024-01-07 is a Sunday
        let err = guard().check(kst(2024, 1, 7, 4, 0, 0)).unwrap_err();
        assert!(matches!(err, BridgeError::MaintenanceWindow { code: -101, .. }));
        // The weekday window does not apply on Sunday
        assert!(guard().check(kst(2024, 1, 7, 4, 50, 0)).is_ok());
    }

    #[test]
    fn test_bounds_are_exclusive() {
        assert!(guard().check(kst(2024, 1, 3, 4, 45, 0)).is_ok());
        assert!(guard().check(kst(2024, 1, 3, 4, 45, 1)).is_err());
        assert!(guard().check(kst(2024, 1, 3, 5, 1, 0)).is_ok());
    }

    #[test]
    fn test_outside_windows() {
        assert!(guard().check(kst(2024, 1, 3, 9, 0, 0)).is_ok());
        assert!(guard().check(kst(2024, 1, 6, 23, 59, 59)).is_ok());
    }

    #[test]
    fn test_uses_configured_offset() {
        // 04:50 UTC is 13:50 in Seoul
        let utc = Utc.with_ymd_and_hms(2024, 1, 3, 4, 50, 0).unwrap();
        assert!(guard().check(utc).is_ok());
    }

    #[test]
    fn test_disabled_guard() {
        assert!(MaintenanceGuard::disabled().check(kst(2024, 1, 3, 4, 50, 0)).is_ok());
    }
}
