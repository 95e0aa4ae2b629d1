// libs/conversation-cell/tests/handlers_test.rs

mod common;

use assert_matches::assert_matches;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};

use chrono::NaiveDate;

use appointment_cell::models::{CalendarError, CalendarEvent};
use conversation_cell::handlers::{
    cancel_conversation, get_availability, get_conversation, health_check, post_turn,
    reset_conversation, start_conversation,
};
use conversation_cell::models::*;
use shared_models::AppError;
use shared_utils::test_utils::clinic_time;

use common::harness;

fn turn(utterance: &str) -> Json<TurnRequest> {
    Json(TurnRequest {
        utterance: utterance.to_string(),
        history: None,
    })
}

#[tokio::test]
async fn conversation_over_handlers_reaches_booked() {
    let h = harness();

    let Json(opened) = start_conversation(State(h.state())).await.unwrap();
    assert_eq!(opened.state, ConversationState::AwaitingName);
    let id = opened.session_id.clone();

    for (utterance, expected) in [
        ("Sarah Johnson", ConversationState::AwaitingSymptoms),
        ("I have a bad headache and fever", ConversationState::AwaitingDatetime),
        ("tomorrow at 2pm", ConversationState::AwaitingConfirmation),
        ("yes", ConversationState::Booked),
    ] {
        let Json(reply) = post_turn(State(h.state()), Path(id.clone()), turn(utterance))
            .await
            .unwrap();
        assert_eq!(reply.state, expected, "after '{}'", utterance);
    }

    let Json(snapshot) = get_conversation(State(h.state()), Path(id)).await.unwrap();
    assert_eq!(snapshot.state, ConversationState::Booked);
    assert_eq!(snapshot.doctor_id.as_deref(), Some("dr-patel"));
    assert_eq!(snapshot.turn_count, 4);
    assert!(snapshot.booking_ref.is_some());
}

#[tokio::test]
async fn empty_utterance_is_bad_request() {
    let h = harness();

    let result = post_turn(State(h.state()), Path("s-1".to_string()), turn("")).await;

    let err = result.unwrap_err();
    assert_matches!(err, AppError::BadRequest(_));
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let h = harness();

    let result = get_conversation(State(h.state()), Path("missing".to_string())).await;
    assert_matches!(result, Err(AppError::NotFound(_)));

    let result = cancel_conversation(State(h.state()), Path("missing".to_string())).await;
    assert_matches!(result, Err(AppError::NotFound(_)));
}

#[tokio::test]
async fn reset_of_cancelled_conversation_conflicts() {
    let h = harness();
    let id = "s-cancel".to_string();

    post_turn(State(h.state()), Path(id.clone()), turn("Sarah Johnson"))
        .await
        .unwrap();
    let Json(cancelled) = cancel_conversation(State(h.state()), Path(id.clone()))
        .await
        .unwrap();
    assert_eq!(cancelled.state, ConversationState::Cancelled);

    let result = reset_conversation(State(h.state()), Path(id)).await;
    let err = result.unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn health_reports_backends() {
    let h = harness();

    let Json(body) = health_check(State(h.state())).await;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["session_store"], "memory");
    assert_eq!(body["calendar"], "memory");
    assert_eq!(body["external_backends_configured"], false);
}

fn on(date: Option<NaiveDate>) -> Query<AvailabilityQuery> {
    Query(AvailabilityQuery { date })
}

#[tokio::test]
async fn availability_lists_free_slots_for_the_day() {
    let h = harness();
    let start = clinic_time(2026, 10, 20, 9, 0);
    h.calendar
        .insert_event(CalendarEvent {
            booking_ref: "busy-900".to_string(),
            doctor_id: "dr-smith".to_string(),
            start,
            end: start + chrono::Duration::minutes(30),
            idempotency_key: Some("another-session".to_string()),
            patient_name: Some("Jane Roe".to_string()),
        })
        .await;
    let date = NaiveDate::from_ymd_opt(2026, 10, 20);

    let Json(day) = get_availability(State(h.state()), Path("dr-smith".to_string()), on(date))
        .await
        .unwrap();

    assert_eq!(day.doctor_id, "dr-smith");
    assert_eq!(day.date, NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
    assert_eq!(day.timezone, "America/New_York");
    assert_eq!(day.slots.len(), 15);
    assert_eq!(day.slots.first(), Some(&clinic_time(2026, 10, 20, 9, 30)));
    assert_eq!(h.calendar.query_calls(), 1);
}

#[tokio::test]
async fn availability_defaults_to_the_rest_of_today() {
    let h = harness();

    let Json(day) = get_availability(State(h.state()), Path("dr-patel".to_string()), on(None))
        .await
        .unwrap();

    assert_eq!(day.date, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
    assert_eq!(day.slots.first(), Some(&clinic_time(2026, 10, 19, 10, 0)));
}

#[tokio::test]
async fn availability_for_unknown_doctor_is_not_found() {
    let h = harness();

    let result = get_availability(State(h.state()), Path("dr-nobody".to_string()), on(None)).await;

    let err = result.unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    assert_eq!(h.calendar.query_calls(), 0);
}

#[tokio::test]
async fn availability_with_calendar_down_is_unavailable() {
    let h = harness();
    h.calendar.inject_query_failures(vec![CalendarError::RateLimited; 3]);

    let result = get_availability(State(h.state()), Path("dr-smith".to_string()), on(None)).await;

    let err = result.unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
}
