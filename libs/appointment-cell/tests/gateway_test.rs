// libs/appointment-cell/tests/gateway_test.rs

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use appointment_cell::models::*;
use appointment_cell::services::{BookingGateway, CalendarClient, InMemoryCalendar};
use shared_config::AppConfig;
use shared_utils::test_utils::{clinic_time, reference_now, TestConfig};

fn test_config() -> AppConfig {
    TestConfig::default().to_app_config()
}

fn gateway_with(calendar: Arc<InMemoryCalendar>, config: &AppConfig) -> BookingGateway {
    BookingGateway::new(calendar as Arc<dyn CalendarClient>, config)
}

fn window_at(hour: u32, minute: u32) -> AvailabilityWindow {
    AvailabilityWindow::new("dr-smith", clinic_time(2026, 10, 20, hour, minute), 30)
}

fn patient(name: &str) -> PatientInfo {
    PatientInfo {
        name: name.to_string(),
        symptoms: "headache".to_string(),
    }
}

fn existing_event(hour: u32, minute: u32) -> CalendarEvent {
    let window = window_at(hour, minute);
    CalendarEvent {
        booking_ref: format!("existing-{}{}", hour, minute),
        doctor_id: window.doctor_id,
        start: window.start,
        end: window.end,
        idempotency_key: Some("someone-else".to_string()),
        patient_name: Some("Jane Roe".to_string()),
    }
}

// ==============================================================================
// HAPPY PATH AND IDEMPOTENCE
// ==============================================================================

#[tokio::test]
async fn books_a_free_slot() {
    let calendar = Arc::new(InMemoryCalendar::new());
    let gateway = gateway_with(calendar.clone(), &test_config());

    let booking_ref = gateway
        .try_book("session-1", &window_at(14, 0), &patient("Sarah Johnson"))
        .await
        .unwrap();

    let events = calendar.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].booking_ref, booking_ref.0);
    assert_eq!(events[0].idempotency_key.as_deref(), Some("session-1"));
}

#[tokio::test]
async fn repeated_booking_for_same_session_returns_original_ref() {
    let calendar = Arc::new(InMemoryCalendar::new());
    let gateway = gateway_with(calendar.clone(), &test_config());
    let window = window_at(14, 0);

    let first = gateway.try_book("session-1", &window, &patient("Sarah Johnson")).await.unwrap();
    let second = gateway.try_book("session-1", &window, &patient("Sarah Johnson")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(calendar.create_calls(), 1);
    assert_eq!(calendar.events().await.len(), 1);
}

// ==============================================================================
// CONFLICTS
// ==============================================================================

#[tokio::test]
async fn concurrent_overlapping_requests_book_exactly_once() {
    let calendar = Arc::new(InMemoryCalendar::new().with_latency(Duration::from_millis(5)));
    let gateway = Arc::new(gateway_with(calendar.clone(), &test_config()));

    let first = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway.try_book("session-a", &window_at(14, 0), &patient("Sarah Johnson")).await
        })
    };
    let second = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway.try_book("session-b", &window_at(14, 15), &patient("John Doe")).await
        })
    };

    let results = vec![first.await.unwrap(), second.await.unwrap()];

    let booked = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(GatewayError::Conflict { .. })))
        .count();

    assert_eq!(booked, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(calendar.events().await.len(), 1);
}

#[tokio::test]
async fn calendar_uniqueness_protects_separate_gateways() {
    // Two gateways do not share doctor locks; the calendar's own
    // constraint must still reject the second write.
    let calendar = Arc::new(InMemoryCalendar::new().with_latency(Duration::from_millis(5)));
    let config = test_config();
    let gateway_a = gateway_with(calendar.clone(), &config);
    let gateway_b = gateway_with(calendar.clone(), &config);

    let window_a = window_at(14, 0);
    let window_b = window_at(14, 0);
    let patient_a = patient("Sarah Johnson");
    let patient_b = patient("John Doe");

    let (a, b) = futures::join!(
        gateway_a.try_book("session-a", &window_a, &patient_a),
        gateway_b.try_book("session-b", &window_b, &patient_b),
    );

    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert!(matches!(a, Err(GatewayError::Conflict { .. })) || matches!(b, Err(GatewayError::Conflict { .. })));
    assert_eq!(calendar.events().await.len(), 1);
}

#[tokio::test]
async fn conflict_suggests_later_free_slots_same_day() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.insert_event(existing_event(14, 0)).await;
    calendar.insert_event(existing_event(15, 0)).await;
    let gateway = gateway_with(calendar.clone(), &test_config());

    let result = gateway.try_book("session-1", &window_at(14, 0), &patient("Sarah Johnson")).await;

    assert_matches!(result, Err(GatewayError::Conflict { alternatives }) => {
        let starts: Vec<_> = alternatives.iter().map(|w| w.start).collect();
        assert_eq!(starts, vec![
            clinic_time(2026, 10, 20, 14, 30),
            clinic_time(2026, 10, 20, 15, 30),
            clinic_time(2026, 10, 20, 16, 0),
        ]);
    });
    assert_eq!(calendar.create_calls(), 0);
}

#[tokio::test]
async fn no_alternatives_after_closing() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.insert_event(existing_event(16, 30)).await;
    let gateway = gateway_with(calendar, &test_config());

    let result = gateway.try_book("session-1", &window_at(16, 30), &patient("Sarah Johnson")).await;

    assert_matches!(result, Err(GatewayError::Conflict { alternatives }) if alternatives.is_empty());
}

#[tokio::test]
async fn slot_taken_on_create_is_a_conflict() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.inject_create_failures([CalendarError::SlotTaken]);
    let gateway = gateway_with(calendar, &test_config());

    let result = gateway.try_book("session-1", &window_at(14, 0), &patient("Sarah Johnson")).await;

    assert_matches!(result, Err(GatewayError::Conflict { .. }));
}

// ==============================================================================
// RETRIES AND FAILURES
// ==============================================================================

#[tokio::test]
async fn transient_create_failures_are_retried() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.inject_create_failures([
        CalendarError::ServiceUnavailable("503".into()),
        CalendarError::RateLimited,
    ]);
    let gateway = gateway_with(calendar.clone(), &test_config());

    let result = gateway.try_book("session-1", &window_at(14, 0), &patient("Sarah Johnson")).await;

    assert!(result.is_ok());
    assert_eq!(calendar.create_calls(), 3);
    assert_eq!(calendar.events().await.len(), 1);
}

#[tokio::test]
async fn exhausted_retries_report_transient_failure() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.inject_create_failures(vec![CalendarError::RateLimited; 3]);
    let gateway = gateway_with(calendar.clone(), &test_config());

    let result = gateway.try_book("session-1", &window_at(14, 0), &patient("Sarah Johnson")).await;

    assert_matches!(result, Err(GatewayError::TransientFailure { attempts: 3, .. }));
    assert!(calendar.events().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_calendar_times_out_as_transient() {
    let calendar = Arc::new(InMemoryCalendar::new().with_latency(Duration::from_secs(30)));
    let gateway = gateway_with(calendar.clone(), &test_config());

    let result = gateway.try_book("session-1", &window_at(14, 0), &patient("Sarah Johnson")).await;

    assert_matches!(result, Err(GatewayError::TransientFailure { attempts: 3, reason }) if reason.contains("timed out"));
    assert_eq!(calendar.query_calls(), 3);
    assert_eq!(calendar.create_calls(), 0);
}

#[tokio::test]
async fn unknown_calendar_is_fatal() {
    let calendar = Arc::new(InMemoryCalendar::new().with_doctors(["dr-patel"]));
    let gateway = gateway_with(calendar, &test_config());

    let result = gateway.try_book("session-1", &window_at(14, 0), &patient("Sarah Johnson")).await;

    assert_matches!(result, Err(GatewayError::Fatal(_)));
}

#[tokio::test]
async fn lost_response_is_deduplicated_by_idempotency_key() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.inject_lost_responses(1);
    let gateway = gateway_with(calendar.clone(), &test_config());

    let result = gateway.try_book("session-1", &window_at(14, 0), &patient("Sarah Johnson")).await;

    let booking_ref = result.unwrap();
    let events = calendar.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].booking_ref, booking_ref.0);
    assert_eq!(calendar.create_calls(), 2);
}

#[tokio::test]
async fn lost_response_is_found_by_recheck_without_idempotency_support() {
    let calendar = Arc::new(InMemoryCalendar::new().with_idempotency_keys(false));
    calendar.inject_lost_responses(1);
    let config = TestConfig {
        honors_idempotency_key: false,
        ..TestConfig::default()
    }
    .to_app_config();
    let gateway = gateway_with(calendar.clone(), &config);

    let result = gateway.try_book("session-1", &window_at(14, 0), &patient("Sarah Johnson")).await;

    let booking_ref = result.unwrap();
    let events = calendar.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].booking_ref, booking_ref.0);
    // The re-check found the first write, so no second create was issued.
    assert_eq!(calendar.create_calls(), 1);
}

// ==============================================================================
// OWNED EVENTS AND AVAILABILITY
// ==============================================================================

fn owned_event(session_id: &str, hour: u32, minute: u32) -> CalendarEvent {
    CalendarEvent {
        idempotency_key: Some(session_id.to_string()),
        booking_ref: format!("bk-{}", session_id),
        ..existing_event(hour, minute)
    }
}

#[tokio::test]
async fn find_owned_sees_only_the_sessions_event() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.insert_event(existing_event(14, 0)).await;
    calendar.insert_event(owned_event("session-1", 15, 0)).await;
    let gateway = gateway_with(calendar.clone(), &test_config());

    let found = gateway.find_owned("session-1", &window_at(15, 0)).await.unwrap();
    assert_matches!(found, Some(event) if event.booking_ref == "bk-session-1");

    assert_eq!(gateway.find_owned("session-1", &window_at(14, 0)).await.unwrap(), None);
    assert_eq!(gateway.find_owned("session-2", &window_at(15, 0)).await.unwrap(), None);
}

#[tokio::test]
async fn find_owned_reports_unreachable_calendar() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.inject_query_failures(vec![CalendarError::Timeout; 3]);
    let gateway = gateway_with(calendar, &test_config());

    let result = gateway.find_owned("session-1", &window_at(15, 0)).await;

    assert_matches!(result, Err(GatewayError::TransientFailure { attempts: 3, .. }));
}

#[tokio::test]
async fn free_slots_skip_busy_times() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.insert_event(existing_event(9, 0)).await;
    calendar.insert_event(existing_event(14, 0)).await;
    let gateway = gateway_with(calendar.clone(), &test_config());
    let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();

    let slots = gateway.free_slots("dr-smith", date, reference_now()).await.unwrap();

    // 9:00-17:00 in 30-minute slots, minus the two busy ones.
    assert_eq!(slots.len(), 14);
    assert_eq!(slots[0].start, clinic_time(2026, 10, 20, 9, 30));
    assert_eq!(slots.last().map(|w| w.start), Some(clinic_time(2026, 10, 20, 16, 30)));
    assert!(slots.iter().all(|w| w.start != clinic_time(2026, 10, 20, 14, 0)));
    assert_eq!(calendar.query_calls(), 1);
}

#[tokio::test]
async fn free_slots_today_start_from_now() {
    let gateway = gateway_with(Arc::new(InMemoryCalendar::new()), &test_config());
    let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

    let slots = gateway.free_slots("dr-smith", today, reference_now()).await.unwrap();

    assert_eq!(slots.first().map(|w| w.start), Some(clinic_time(2026, 10, 19, 10, 0)));
    assert_eq!(slots.len(), 14);
}

#[tokio::test]
async fn free_slots_on_a_past_day_are_empty() {
    let calendar = Arc::new(InMemoryCalendar::new());
    let gateway = gateway_with(calendar.clone(), &test_config());
    let yesterday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

    let slots = gateway.free_slots("dr-smith", yesterday, reference_now()).await.unwrap();

    assert!(slots.is_empty());
    assert_eq!(calendar.query_calls(), 0);
}
