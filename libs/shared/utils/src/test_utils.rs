use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use shared_config::{AppConfig, DenyPolicy};

pub const TEST_TIMEZONE: &str = "America/New_York";

/// Config tuned for tests: in-memory backends and millisecond-scale retries.
pub struct TestConfig {
    pub timezone: String,
    pub deny_policy: DenyPolicy,
    pub max_attempts: u32,
    pub honors_idempotency_key: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timezone: TEST_TIMEZONE.to_string(),
            deny_policy: DenyPolicy::RecollectTime,
            max_attempts: 3,
            honors_idempotency_key: true,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            clinic_timezone: self.timezone.clone(),
            deny_policy: self.deny_policy,
            booking_max_attempts: self.max_attempts,
            booking_retry_base_delay_ms: 1,
            availability_timeout_seconds: 2,
            create_timeout_seconds: 2,
            calendar_honors_idempotency_key: self.honors_idempotency_key,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Builds a UTC instant from a wall-clock time in the test clinic timezone.
pub fn clinic_time(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    let tz: Tz = TEST_TIMEZONE.parse().unwrap_or(chrono_tz::America::New_York);
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .unwrap_or_else(|| panic!("invalid test date {}-{}-{} {}:{}", year, month, day, hour, minute));

    tz.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| panic!("nonexistent local time {}", naive))
        .with_timezone(&Utc)
}

/// A fixed "now": Monday 2026-10-19 10:00 in the test clinic timezone.
pub fn reference_now() -> DateTime<Utc> {
    clinic_time(2026, 10, 19, 10, 0)
}
