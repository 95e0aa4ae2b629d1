// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use shared_config::AppConfig;

// ==============================================================================
// CORE BOOKING MODELS
// ==============================================================================

/// A candidate appointment interval for one doctor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub doctor_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AvailabilityWindow {
    pub fn new(doctor_id: &str, start: DateTime<Utc>, duration_minutes: i64) -> Self {
        Self {
            doctor_id: doctor_id.to_string(),
            start,
            end: start + Duration::minutes(duration_minutes),
        }
    }

    /// Half-open interval overlap: `[start, end)` against `[other_start, other_end)`.
    pub fn overlaps(&self, other_start: DateTime<Utc>, other_end: DateTime<Utc>) -> bool {
        self.start < other_end && other_start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Patient details written onto the calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: String,
    pub symptoms: String,
}

/// An event as reported by the calendar collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub booking_ref: String,
    pub doctor_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
}

impl CalendarEvent {
    pub fn is_owned_by(&self, idempotency_key: &str) -> bool {
        self.idempotency_key.as_deref() == Some(idempotency_key)
    }
}

/// Opaque reference to a committed booking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingRef(pub String);

impl BookingRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ==============================================================================
// CLINIC HOURS
// ==============================================================================

/// Timezone, opening hours and slot length of the clinic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClinicHours {
    pub timezone: Tz,
    pub open_hour: u32,
    pub close_hour: u32,
    pub slot_minutes: i64,
}

impl Default for ClinicHours {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            open_hour: 9,
            close_hour: 17,
            slot_minutes: 30,
        }
    }
}

impl ClinicHours {
    pub fn from_config(config: &AppConfig) -> Self {
        let defaults = Self::default();

        let timezone = match config.clinic_timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(
                    "Unknown CLINIC_TIMEZONE '{}', falling back to {}",
                    config.clinic_timezone, defaults.timezone
                );
                defaults.timezone
            }
        };

        if config.clinic_open_hour >= config.clinic_close_hour || config.clinic_close_hour > 24 {
            warn!(
                "Invalid clinic hours {}-{}, using {}-{}",
                config.clinic_open_hour, config.clinic_close_hour, defaults.open_hour, defaults.close_hour
            );
            return Self { timezone, ..defaults };
        }

        Self {
            timezone,
            open_hour: config.clinic_open_hour,
            close_hour: config.clinic_close_hour,
            slot_minutes: if config.appointment_duration_minutes > 0 {
                config.appointment_duration_minutes
            } else {
                defaults.slot_minutes
            },
        }
    }

    /// True when the whole window falls inside opening hours on a single local day.
    pub fn contains(&self, window: &AvailabilityWindow) -> bool {
        let start = window.start.with_timezone(&self.timezone);
        let end = window.end.with_timezone(&self.timezone);

        if start.date_naive() != end.date_naive() && !(end.hour() == 0 && end.minute() == 0) {
            return false;
        }

        let start_minutes = start.hour() * 60 + start.minute();
        let end_minutes = if start.date_naive() == end.date_naive() {
            end.hour() * 60 + end.minute()
        } else {
            24 * 60
        };

        start_minutes >= self.open_hour * 60 && end_minutes <= self.close_hour * 60
    }

    /// Opening and closing instants for the local day containing `instant`.
    pub fn day_bounds(&self, instant: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.date_bounds(self.local_date(instant))
    }

    /// Opening and closing instants for a clinic-local calendar date.
    pub fn date_bounds(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let open = self.local_instant(date, self.open_hour)?;
        let close = self.local_instant(date, self.close_hour)?;
        Some((open, close))
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    pub fn window_at(&self, doctor_id: &str, start: DateTime<Utc>) -> AvailabilityWindow {
        AvailabilityWindow::new(doctor_id, start, self.slot_minutes)
    }

    /// Human-readable local rendering, e.g. "Tuesday, October 20, 2026 at 2:00 PM".
    pub fn describe(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.timezone)
            .format("%A, %B %-d, %Y at %-I:%M %p")
            .to_string()
    }

    pub fn describe_time(&self, instant: DateTime<Utc>) -> String {
        instant.with_timezone(&self.timezone).format("%-I:%M %p").to_string()
    }

    fn local_instant(&self, date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
        let naive = if hour == 24 {
            date.succ_opt()?.and_hms_opt(0, 0, 0)?
        } else {
            date.and_hms_opt(hour, 0, 0)?
        };
        self.timezone
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("Requested time is in the past")]
    PastDate,

    #[error("Could not understand the requested date or time")]
    Unparseable,
}

/// Failures reported by the calendar collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Calendar not found: {0}")]
    NotFound(String),

    #[error("Calendar rate limit exceeded")]
    RateLimited,

    #[error("Calendar service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Slot already taken")]
    SlotTaken,

    #[error("Calendar request timed out")]
    Timeout,

    #[error("Calendar rejected the request: {0}")]
    Rejected(String),
}

impl CalendarError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CalendarError::RateLimited | CalendarError::ServiceUnavailable(_) | CalendarError::Timeout
        )
    }
}

/// Outcome classes of a booking attempt other than success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Requested slot conflicts with an existing booking")]
    Conflict { alternatives: Vec<AvailabilityWindow> },

    #[error("Booking failed after {attempts} attempts: {reason}")]
    TransientFailure { attempts: u32, reason: String },

    #[error("Booking cannot proceed: {0}")]
    Fatal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_utils::test_utils::clinic_time;

    #[test]
    fn overlap_is_half_open() {
        let window = AvailabilityWindow::new("dr-smith", clinic_time(2026, 10, 20, 14, 0), 30);

        assert!(window.overlaps(clinic_time(2026, 10, 20, 14, 15), clinic_time(2026, 10, 20, 14, 45)));
        assert!(!window.overlaps(clinic_time(2026, 10, 20, 14, 30), clinic_time(2026, 10, 20, 15, 0)));
        assert!(!window.overlaps(clinic_time(2026, 10, 20, 13, 30), clinic_time(2026, 10, 20, 14, 0)));
    }

    #[test]
    fn opening_hours_bound_the_whole_window() {
        let hours = ClinicHours::default();

        assert!(hours.contains(&hours.window_at("dr-smith", clinic_time(2026, 10, 20, 9, 0))));
        assert!(hours.contains(&hours.window_at("dr-smith", clinic_time(2026, 10, 20, 16, 30))));
        assert!(!hours.contains(&hours.window_at("dr-smith", clinic_time(2026, 10, 20, 16, 45))));
        assert!(!hours.contains(&hours.window_at("dr-smith", clinic_time(2026, 10, 20, 8, 30))));
    }

    #[test]
    fn describe_renders_local_time() {
        let hours = ClinicHours::default();
        assert_eq!(
            hours.describe(clinic_time(2026, 10, 20, 14, 0)),
            "Tuesday, October 20, 2026 at 2:00 PM"
        );
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(CalendarError::Timeout.is_transient());
        assert!(CalendarError::RateLimited.is_transient());
        assert!(!CalendarError::SlotTaken.is_transient());
        assert!(!CalendarError::NotFound("dr-x".into()).is_transient());
    }
}
