// libs/appointment-cell/src/services/gateway.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rand::Rng;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;
use shared_utils::KeyedLocks;

use crate::models::{
    AvailabilityWindow, BookingRef, CalendarError, CalendarEvent, ClinicHours, GatewayError,
    PatientInfo,
};
use crate::services::calendar::CalendarClient;

const MAX_ALTERNATIVES: usize = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Check-then-create against the calendar with at-most-once semantics per
/// session id.
pub struct BookingGateway {
    calendar: Arc<dyn CalendarClient>,
    hours: ClinicHours,
    doctor_locks: KeyedLocks,
    availability_timeout: Duration,
    create_timeout: Duration,
    max_attempts: u32,
    retry_base_delay: Duration,
    honors_idempotency_key: bool,
}

impl BookingGateway {
    pub fn new(calendar: Arc<dyn CalendarClient>, config: &AppConfig) -> Self {
        let honors_idempotency_key =
            config.calendar_honors_idempotency_key && calendar.honors_idempotency_key();

        Self {
            calendar,
            hours: ClinicHours::from_config(config),
            doctor_locks: KeyedLocks::new(),
            availability_timeout: Duration::from_secs(config.availability_timeout_seconds),
            create_timeout: Duration::from_secs(config.create_timeout_seconds),
            max_attempts: config.booking_max_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.booking_retry_base_delay_ms),
            honors_idempotency_key,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.calendar.backend_name()
    }

    /// Books `window` for `patient`, keyed by `session_id`.
    ///
    /// Calling this again with the same session id after a success returns
    /// the original booking reference without writing a second event.
    #[instrument(skip(self, window, patient), fields(doctor_id = %window.doctor_id))]
    pub async fn try_book(
        &self,
        session_id: &str,
        window: &AvailabilityWindow,
        patient: &PatientInfo,
    ) -> Result<BookingRef, GatewayError> {
        let _guard = self.doctor_locks.lock(&window.doctor_id).await;
        debug!("Checking availability for {} - {}", window.start, window.end);

        let existing = self.query_with_retries(window).await?;

        if let Some(ours) = existing.iter().find(|e| e.is_owned_by(session_id)) {
            info!("Session {} already holds booking {}", session_id, ours.booking_ref);
            return Ok(BookingRef(ours.booking_ref.clone()));
        }

        if existing.iter().any(|e| window.overlaps(e.start, e.end)) {
            warn!("Conflict detected for doctor {} at {}", window.doctor_id, window.start);
            return Err(self.conflict(window).await);
        }

        let booking_ref = self.create_with_retries(session_id, window, patient).await?;
        info!("Booked {} for session {}", booking_ref, session_id);
        Ok(booking_ref)
    }

    /// Looks in `window` for an event written under `session_id`.
    ///
    /// A create that timed out may still have landed; callers re-check the
    /// windows of failed attempts with this before booking anything else.
    #[instrument(skip(self, window), fields(doctor_id = %window.doctor_id))]
    pub async fn find_owned(
        &self,
        session_id: &str,
        window: &AvailabilityWindow,
    ) -> Result<Option<CalendarEvent>, GatewayError> {
        let events = self.query_with_retries(window).await?;
        let ours = events.into_iter().find(|e| e.is_owned_by(session_id));
        if let Some(event) = &ours {
            info!("Session {} owns booking {} at {}", session_id, event.booking_ref, event.start);
        }
        Ok(ours)
    }

    /// Free slots for `doctor_id` on the clinic-local `date`, starting no
    /// earlier than `now`. Closed or past days yield an empty list.
    #[instrument(skip(self))]
    pub async fn free_slots(
        &self,
        doctor_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<AvailabilityWindow>, GatewayError> {
        let Some((open, close)) = self.hours.date_bounds(date) else {
            return Ok(Vec::new());
        };
        if close <= now {
            return Ok(Vec::new());
        }

        let day = AvailabilityWindow {
            doctor_id: doctor_id.to_string(),
            start: open,
            end: close,
        };
        let busy = self.query_with_retries(&day).await?;

        let slot = ChronoDuration::minutes(self.hours.slot_minutes.max(1));
        let slots = self.open_windows(doctor_id, open, close, slot, &busy, usize::MAX);
        Ok(slots.into_iter().filter(|w| w.start >= now).collect())
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn query_once(&self, window: &AvailabilityWindow) -> Result<Vec<CalendarEvent>, CalendarError> {
        match timeout(self.availability_timeout, self.calendar.query_conflicts(window)).await {
            Ok(result) => result,
            Err(_) => Err(CalendarError::Timeout),
        }
    }

    async fn create_once(
        &self,
        session_id: &str,
        window: &AvailabilityWindow,
        patient: &PatientInfo,
    ) -> Result<BookingRef, CalendarError> {
        match timeout(self.create_timeout, self.calendar.create_event(window, patient, session_id)).await {
            Ok(result) => result,
            Err(_) => Err(CalendarError::Timeout),
        }
    }

    async fn query_with_retries(&self, window: &AvailabilityWindow) -> Result<Vec<CalendarEvent>, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.query_once(window).await {
                Ok(events) => return Ok(events),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!("Availability check attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(e) => return Err(self.classify(e, attempt, window).await),
            }
        }
    }

    async fn create_with_retries(
        &self,
        session_id: &str,
        window: &AvailabilityWindow,
        patient: &PatientInfo,
    ) -> Result<BookingRef, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            // Without server-side dedup, a failed attempt may still have
            // written the event. Look for it before writing again.
            if attempt > 1 && !self.honors_idempotency_key {
                match self.query_once(window).await {
                    Ok(events) => {
                        if let Some(ours) = events.iter().find(|e| e.is_owned_by(session_id)) {
                            info!("Found booking {} from an earlier attempt", ours.booking_ref);
                            return Ok(BookingRef(ours.booking_ref.clone()));
                        }
                        if events.iter().any(|e| window.overlaps(e.start, e.end)) {
                            return Err(self.conflict(window).await);
                        }
                    }
                    Err(e) if e.is_transient() && attempt < self.max_attempts => {
                        warn!("Re-check before retry {} failed: {}", attempt, e);
                        tokio::time::sleep(self.backoff(attempt)).await;
                        continue;
                    }
                    Err(e) => return Err(self.classify(e, attempt, window).await),
                }
            }

            match self.create_once(session_id, window, patient).await {
                Ok(booking_ref) => return Ok(booking_ref),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!("Create attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(e) => return Err(self.classify(e, attempt, window).await),
            }
        }
    }

    async fn classify(&self, err: CalendarError, attempts: u32, window: &AvailabilityWindow) -> GatewayError {
        match err {
            CalendarError::SlotTaken => {
                warn!("Calendar rejected slot for doctor {} as taken", window.doctor_id);
                self.conflict(window).await
            }
            e if e.is_transient() => {
                warn!("Giving up after {} attempts: {}", attempts, e);
                GatewayError::TransientFailure { attempts, reason: e.to_string() }
            }
            e => {
                error!("Non-retryable calendar error for doctor {}: {}", window.doctor_id, e);
                GatewayError::Fatal(e.to_string())
            }
        }
    }

    async fn conflict(&self, window: &AvailabilityWindow) -> GatewayError {
        GatewayError::Conflict {
            alternatives: self.suggest_alternatives(window).await,
        }
    }

    /// Free slots later on the same clinic day, from one day-wide query.
    /// Advisory only; failures yield no suggestions.
    async fn suggest_alternatives(&self, window: &AvailabilityWindow) -> Vec<AvailabilityWindow> {
        let Some((_, close)) = self.hours.day_bounds(window.start) else {
            return Vec::new();
        };

        let slot = ChronoDuration::minutes(window.duration_minutes().max(1));
        let day = AvailabilityWindow {
            doctor_id: window.doctor_id.clone(),
            start: window.start,
            end: close,
        };
        if day.start >= day.end {
            return Vec::new();
        }

        let busy = match self.query_once(&day).await {
            Ok(events) => events,
            Err(e) => {
                debug!("Skipping alternative suggestions: {}", e);
                return Vec::new();
            }
        };

        let step = ChronoDuration::minutes(self.hours.slot_minutes.max(1));
        self.open_windows(&window.doctor_id, window.start + step, close, slot, &busy, MAX_ALTERNATIVES)
    }

    /// Slot-aligned windows from `from` until `close` that miss every busy event.
    fn open_windows(
        &self,
        doctor_id: &str,
        from: DateTime<Utc>,
        close: DateTime<Utc>,
        slot: ChronoDuration,
        busy: &[CalendarEvent],
        limit: usize,
    ) -> Vec<AvailabilityWindow> {
        let step = ChronoDuration::minutes(self.hours.slot_minutes.max(1));
        let mut windows = Vec::new();
        let mut current = from;

        while current + slot <= close && windows.len() < limit {
            let candidate = AvailabilityWindow {
                doctor_id: doctor_id.to_string(),
                start: current,
                end: current + slot,
            };
            let free = !busy.iter().any(|e| candidate.overlaps(e.start, e.end));
            if free && self.hours.contains(&candidate) {
                windows.push(candidate);
            }
            current += step;
        }

        windows
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(MAX_BACKOFF);
        let jitter_ms = (self.retry_base_delay.as_millis() as u64 / 2).max(1);
        exponential + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}
