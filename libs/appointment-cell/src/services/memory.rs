// libs/appointment-cell/src/services/memory.rs
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{AvailabilityWindow, BookingRef, CalendarError, CalendarEvent, PatientInfo};
use crate::services::calendar::CalendarClient;

/// Process-local calendar used when no REST calendar is configured, and by
/// tests. Enforces the same per-doctor uniqueness rule as the real service
/// and supports scripted failures.
pub struct InMemoryCalendar {
    events: RwLock<Vec<CalendarEvent>>,
    known_doctors: Option<HashSet<String>>,
    honors_idempotency_key: bool,
    latency: Option<Duration>,
    query_failures: Mutex<VecDeque<CalendarError>>,
    create_failures: Mutex<VecDeque<CalendarError>>,
    lost_responses: AtomicUsize,
    create_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl Default for InMemoryCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            known_doctors: None,
            honors_idempotency_key: true,
            latency: None,
            query_failures: Mutex::new(VecDeque::new()),
            create_failures: Mutex::new(VecDeque::new()),
            lost_responses: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Restricts the calendar to the given doctors; others yield `NotFound`.
    pub fn with_doctors<I, S>(mut self, doctor_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_doctors = Some(doctor_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_idempotency_keys(mut self, honored: bool) -> Self {
        self.honors_idempotency_key = honored;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Next queries fail with these errors, in order.
    pub fn inject_query_failures(&self, failures: impl IntoIterator<Item = CalendarError>) {
        lock(&self.query_failures).extend(failures);
    }

    /// Next creates fail with these errors, in order, without writing.
    pub fn inject_create_failures(&self, failures: impl IntoIterator<Item = CalendarError>) {
        lock(&self.create_failures).extend(failures);
    }

    /// Next `count` creates write the event but report `ServiceUnavailable`.
    pub fn inject_lost_responses(&self, count: usize) {
        self.lost_responses.fetch_add(count, Ordering::SeqCst);
    }

    pub async fn insert_event(&self, event: CalendarEvent) {
        self.events.write().await.push(event);
    }

    pub async fn events(&self) -> Vec<CalendarEvent> {
        self.events.read().await.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_doctor(&self, doctor_id: &str) -> Result<(), CalendarError> {
        match &self.known_doctors {
            Some(known) if !known.contains(doctor_id) => Err(CalendarError::NotFound(doctor_id.to_string())),
            _ => Ok(()),
        }
    }

    fn take_lost_response(&self) -> bool {
        self.lost_responses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CalendarClient for InMemoryCalendar {
    async fn query_conflicts(&self, window: &AvailabilityWindow) -> Result<Vec<CalendarEvent>, CalendarError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(failure) = lock(&self.query_failures).pop_front() {
            return Err(failure);
        }
        self.check_doctor(&window.doctor_id)?;

        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.doctor_id == window.doctor_id && window.overlaps(e.start, e.end))
            .cloned()
            .collect())
    }

    async fn create_event(
        &self,
        window: &AvailabilityWindow,
        patient: &PatientInfo,
        idempotency_key: &str,
    ) -> Result<BookingRef, CalendarError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(failure) = lock(&self.create_failures).pop_front() {
            return Err(failure);
        }
        self.check_doctor(&window.doctor_id)?;

        let mut events = self.events.write().await;

        if self.honors_idempotency_key {
            if let Some(existing) = events.iter().find(|e| e.is_owned_by(idempotency_key)) {
                debug!("Idempotent replay for key {}", idempotency_key);
                return Ok(BookingRef(existing.booking_ref.clone()));
            }
        }

        if events
            .iter()
            .any(|e| e.doctor_id == window.doctor_id && window.overlaps(e.start, e.end))
        {
            return Err(CalendarError::SlotTaken);
        }

        let booking_ref = format!("bk-{}", Uuid::new_v4().simple());
        events.push(CalendarEvent {
            booking_ref: booking_ref.clone(),
            doctor_id: window.doctor_id.clone(),
            start: window.start,
            end: window.end,
            idempotency_key: Some(idempotency_key.to_string()),
            patient_name: Some(patient.name.clone()),
        });

        if self.take_lost_response() {
            return Err(CalendarError::ServiceUnavailable("response lost".to_string()));
        }

        Ok(BookingRef(booking_ref))
    }

    fn honors_idempotency_key(&self) -> bool {
        self.honors_idempotency_key
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_utils::test_utils::clinic_time;

    fn patient() -> PatientInfo {
        PatientInfo { name: "Sarah Johnson".into(), symptoms: "headache".into() }
    }

    #[tokio::test]
    async fn overlapping_create_is_rejected() {
        let calendar = InMemoryCalendar::new();
        let first = AvailabilityWindow::new("dr-smith", clinic_time(2026, 10, 20, 14, 0), 30);
        let second = AvailabilityWindow::new("dr-smith", clinic_time(2026, 10, 20, 14, 15), 30);

        calendar.create_event(&first, &patient(), "s-1").await.unwrap();
        assert_matches!(
            calendar.create_event(&second, &patient(), "s-2").await,
            Err(CalendarError::SlotTaken)
        );
    }

    #[tokio::test]
    async fn repeated_key_returns_first_booking() {
        let calendar = InMemoryCalendar::new();
        let window = AvailabilityWindow::new("dr-smith", clinic_time(2026, 10, 20, 14, 0), 30);

        let first = calendar.create_event(&window, &patient(), "s-1").await.unwrap();
        let second = calendar.create_event(&window, &patient(), "s-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calendar.events().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_doctor_is_not_found() {
        let calendar = InMemoryCalendar::new().with_doctors(["dr-smith"]);
        let window = AvailabilityWindow::new("dr-nobody", clinic_time(2026, 10, 20, 14, 0), 30);

        assert_matches!(calendar.query_conflicts(&window).await, Err(CalendarError::NotFound(_)));
    }
}
