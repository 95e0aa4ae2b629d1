// libs/appointment-cell/tests/calendar_http_test.rs

use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::*;
use appointment_cell::services::{BookingGateway, CalendarClient, HttpCalendarClient};
use shared_config::AppConfig;
use shared_utils::test_utils::{clinic_time, TestConfig};

fn config_for(server: &MockServer) -> AppConfig {
    AppConfig {
        calendar_base_url: server.uri(),
        calendar_api_key: "test-key".to_string(),
        ..TestConfig::default().to_app_config()
    }
}

fn window() -> AvailabilityWindow {
    // 2026-10-20 14:00 New York is 18:00 UTC.
    AvailabilityWindow::new("dr-patel", clinic_time(2026, 10, 20, 14, 0), 30)
}

fn patient() -> PatientInfo {
    PatientInfo {
        name: "Sarah Johnson".to_string(),
        symptoms: "I have a bad headache and fever".to_string(),
    }
}

#[tokio::test]
async fn query_sends_window_bounds_and_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/dr-patel/events"))
        .and(query_param("start", "2026-10-20T18:00:00Z"))
        .and(query_param("end", "2026-10-20T18:30:00Z"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "booking_ref": "evt-1",
                "doctor_id": "dr-patel",
                "start": "2026-10-20T18:15:00Z",
                "end": "2026-10-20T18:45:00Z"
            },
            {
                "booking_ref": "evt-2",
                "doctor_id": "dr-patel",
                "start": "2026-10-20T19:00:00Z",
                "end": "2026-10-20T19:30:00Z"
            }
        ])))
        .mount(&server)
        .await;

    let client = HttpCalendarClient::new(&config_for(&server));
    let events = client.query_conflicts(&window()).await.unwrap();

    // Non-overlapping events are dropped client-side.
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].booking_ref, "evt-1");
    assert_eq!(events[0].idempotency_key, None);
}

#[tokio::test]
async fn create_sends_idempotency_key_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calendars/dr-patel/events"))
        .and(header("idempotency-key", "session-42"))
        .and(body_partial_json(json!({
            "patient_name": "Sarah Johnson",
            "start": "2026-10-20T18:00:00Z",
            "idempotency_key": "session-42"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "booking_ref": "evt-99",
            "doctor_id": "dr-patel",
            "start": "2026-10-20T18:00:00Z",
            "end": "2026-10-20T18:30:00Z",
            "idempotency_key": "session-42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpCalendarClient::new(&config_for(&server));
    let booking_ref = client.create_event(&window(), &patient(), "session-42").await.unwrap();

    assert_eq!(booking_ref, BookingRef("evt-99".to_string()));
}

#[tokio::test]
async fn conflict_status_on_create_maps_to_slot_taken() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calendars/dr-patel/events"))
        .respond_with(ResponseTemplate::new(409).set_body_string("slot taken"))
        .mount(&server)
        .await;

    let client = HttpCalendarClient::new(&config_for(&server));
    let result = client.create_event(&window(), &patient(), "session-42").await;

    assert_matches!(result, Err(CalendarError::SlotTaken));
}

#[tokio::test]
async fn gateway_retries_server_errors_then_books() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/dr-patel/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/calendars/dr-patel/events"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/calendars/dr-patel/events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "booking_ref": "evt-7",
            "doctor_id": "dr-patel",
            "start": "2026-10-20T18:00:00Z",
            "end": "2026-10-20T18:30:00Z"
        })))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let calendar: Arc<dyn CalendarClient> = Arc::new(HttpCalendarClient::new(&config));
    let gateway = BookingGateway::new(calendar, &config);

    let booking_ref = gateway.try_book("session-42", &window(), &patient()).await.unwrap();

    assert_eq!(booking_ref.as_str(), "evt-7");
}

#[tokio::test]
async fn missing_calendar_is_fatal_through_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/dr-patel/events"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no calendar"))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let calendar: Arc<dyn CalendarClient> = Arc::new(HttpCalendarClient::new(&config));
    let gateway = BookingGateway::new(calendar, &config);

    let result = gateway.try_book("session-42", &window(), &patient()).await;

    assert_matches!(result, Err(GatewayError::Fatal(_)));
}
