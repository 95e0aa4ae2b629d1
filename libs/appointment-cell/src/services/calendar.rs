// libs/appointment-cell/src/services/calendar.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_database::{RestClient, RestError};

use crate::models::{AvailabilityWindow, BookingRef, CalendarError, CalendarEvent, PatientInfo};

/// The external scheduling resource: an availability query plus a write.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Events for `window.doctor_id` overlapping `[window.start, window.end)`.
    async fn query_conflicts(&self, window: &AvailabilityWindow) -> Result<Vec<CalendarEvent>, CalendarError>;

    async fn create_event(
        &self,
        window: &AvailabilityWindow,
        patient: &PatientInfo,
        idempotency_key: &str,
    ) -> Result<BookingRef, CalendarError>;

    /// Whether a repeated create with the same key returns the first booking
    /// instead of writing a second one.
    fn honors_idempotency_key(&self) -> bool;

    fn backend_name(&self) -> &'static str;
}

/// REST calendar collaborator.
///
/// `GET  /calendars/{doctor_id}/events?start=..&end=..` lists overlapping events,
/// `POST /calendars/{doctor_id}/events` creates one, deduplicated by the
/// `Idempotency-Key` header.
pub struct HttpCalendarClient {
    rest: RestClient,
    availability_timeout: Duration,
    create_timeout: Duration,
    honors_idempotency_key: bool,
}

impl HttpCalendarClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            rest: RestClient::new(config),
            availability_timeout: Duration::from_secs(config.availability_timeout_seconds),
            create_timeout: Duration::from_secs(config.create_timeout_seconds),
            honors_idempotency_key: config.calendar_honors_idempotency_key,
        }
    }

    pub fn with_rest_client(rest: RestClient, config: &AppConfig) -> Self {
        Self {
            rest,
            ..Self::new(config)
        }
    }

    fn events_path(doctor_id: &str) -> String {
        format!("/calendars/{}/events", doctor_id)
    }
}

#[async_trait]
impl CalendarClient for HttpCalendarClient {
    async fn query_conflicts(&self, window: &AvailabilityWindow) -> Result<Vec<CalendarEvent>, CalendarError> {
        let path = format!(
            "{}?start={}&end={}",
            Self::events_path(&window.doctor_id),
            timestamp(window.start),
            timestamp(window.end)
        );

        let events: Vec<CalendarEvent> = self
            .rest
            .request(Method::GET, &path, None, self.availability_timeout)
            .await
            .map_err(|e| map_rest_error(e, &window.doctor_id))?;

        debug!("Calendar returned {} events for doctor {}", events.len(), window.doctor_id);

        // Trust but verify the server-side range filter.
        Ok(events
            .into_iter()
            .filter(|event| window.overlaps(event.start, event.end))
            .collect())
    }

    async fn create_event(
        &self,
        window: &AvailabilityWindow,
        patient: &PatientInfo,
        idempotency_key: &str,
    ) -> Result<BookingRef, CalendarError> {
        let body = json!({
            "start": timestamp(window.start),
            "end": timestamp(window.end),
            "summary": format!("Appointment: {}", patient.name),
            "patient_name": patient.name,
            "description": format!("Patient: {}\nSymptoms: {}", patient.name, patient.symptoms),
            "idempotency_key": idempotency_key,
        });

        let event: CalendarEvent = self
            .rest
            .request_with_headers(
                Method::POST,
                &Self::events_path(&window.doctor_id),
                Some(body),
                &[("Idempotency-Key", idempotency_key)],
                self.create_timeout,
            )
            .await
            .map_err(|e| map_rest_error(e, &window.doctor_id))?;

        Ok(BookingRef(event.booking_ref))
    }

    fn honors_idempotency_key(&self) -> bool {
        self.honors_idempotency_key
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn map_rest_error(err: RestError, doctor_id: &str) -> CalendarError {
    match err {
        RestError::Status { status, body } => match status {
            StatusCode::NOT_FOUND => CalendarError::NotFound(doctor_id.to_string()),
            StatusCode::CONFLICT => CalendarError::SlotTaken,
            StatusCode::TOO_MANY_REQUESTS => CalendarError::RateLimited,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => CalendarError::Timeout,
            s if s.is_server_error() => CalendarError::ServiceUnavailable(format!("{}: {}", s, body)),
            s => {
                warn!("Calendar rejected request with {}: {}", s, body);
                CalendarError::Rejected(format!("{}: {}", s, body))
            }
        },
        RestError::Timeout => CalendarError::Timeout,
        // A response we could not read may still mean the write landed; retry
        // under the idempotency key.
        RestError::Transport(msg) | RestError::Decode(msg) => CalendarError::ServiceUnavailable(msg),
        RestError::InvalidHeader(msg) => CalendarError::Rejected(msg),
    }
}
