use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// What a "no" at the confirmation step means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyPolicy {
    /// Ask for a different date and time.
    RecollectTime,
    /// Abandon the booking.
    Cancel,
}

impl FromStr for DenyPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "recollect_time" | "recollect" => Ok(DenyPolicy::RecollectTime),
            "cancel" => Ok(DenyPolicy::Cancel),
            other => Err(format!("unknown deny policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub redis_url: Option<String>,
    pub calendar_base_url: String,
    pub calendar_api_key: String,
    pub calendar_honors_idempotency_key: bool,
    pub clinic_timezone: String,
    pub clinic_open_hour: u32,
    pub clinic_close_hour: u32,
    pub appointment_duration_minutes: i64,
    pub availability_timeout_seconds: u64,
    pub create_timeout_seconds: u64,
    pub booking_max_attempts: u32,
    pub booking_retry_base_delay_ms: u64,
    pub session_idle_timeout_seconds: i64,
    pub session_terminal_grace_seconds: i64,
    pub deny_policy: DenyPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 3000,
            redis_url: None,
            calendar_base_url: String::new(),
            calendar_api_key: String::new(),
            calendar_honors_idempotency_key: true,
            clinic_timezone: "America/New_York".to_string(),
            clinic_open_hour: 9,
            clinic_close_hour: 17,
            appointment_duration_minutes: 30,
            availability_timeout_seconds: 10,
            create_timeout_seconds: 10,
            booking_max_attempts: 3,
            booking_retry_base_delay_ms: 250,
            session_idle_timeout_seconds: 1800,
            session_terminal_grace_seconds: 300,
            deny_policy: DenyPolicy::RecollectTime,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            server_port: parsed_var("SERVER_PORT", defaults.server_port),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            calendar_base_url: env::var("CALENDAR_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("CALENDAR_BASE_URL not set, using in-memory calendar");
                    String::new()
                }),
            calendar_api_key: env::var("CALENDAR_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("CALENDAR_API_KEY not set, using empty value");
                    String::new()
                }),
            calendar_honors_idempotency_key: parsed_var(
                "CALENDAR_HONORS_IDEMPOTENCY_KEY",
                defaults.calendar_honors_idempotency_key,
            ),
            clinic_timezone: env::var("CLINIC_TIMEZONE")
                .unwrap_or_else(|_| {
                    warn!("CLINIC_TIMEZONE not set, using default");
                    defaults.clinic_timezone.clone()
                }),
            clinic_open_hour: parsed_var("CLINIC_OPEN_HOUR", defaults.clinic_open_hour),
            clinic_close_hour: parsed_var("CLINIC_CLOSE_HOUR", defaults.clinic_close_hour),
            appointment_duration_minutes: parsed_var(
                "APPOINTMENT_DURATION_MINUTES",
                defaults.appointment_duration_minutes,
            ),
            availability_timeout_seconds: parsed_var(
                "AVAILABILITY_TIMEOUT_SECONDS",
                defaults.availability_timeout_seconds,
            ),
            create_timeout_seconds: parsed_var("CREATE_TIMEOUT_SECONDS", defaults.create_timeout_seconds),
            booking_max_attempts: parsed_var("BOOKING_MAX_ATTEMPTS", defaults.booking_max_attempts),
            booking_retry_base_delay_ms: parsed_var(
                "BOOKING_RETRY_BASE_DELAY_MS",
                defaults.booking_retry_base_delay_ms,
            ),
            session_idle_timeout_seconds: parsed_var(
                "SESSION_IDLE_TIMEOUT_SECONDS",
                defaults.session_idle_timeout_seconds,
            ),
            session_terminal_grace_seconds: parsed_var(
                "SESSION_TERMINAL_GRACE_SECONDS",
                defaults.session_terminal_grace_seconds,
            ),
            deny_policy: parsed_var("DENY_POLICY", defaults.deny_policy),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - falling back to in-memory backends");
        }

        config
    }

    /// True when both the calendar API and Redis are configured.
    pub fn is_configured(&self) -> bool {
        self.is_calendar_configured() && self.redis_url.is_some()
    }

    pub fn is_calendar_configured(&self) -> bool {
        !self.calendar_base_url.is_empty() && !self.calendar_api_key.is_empty()
    }
}

fn parsed_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {:?}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
