// libs/conversation-cell/src/services/prompts.rs
//! Assistant replies. Every user-facing string the conversation produces
//! comes from here.

use chrono::{DateTime, Utc};

use appointment_cell::ClinicHours;
use doctor_cell::Doctor;

use crate::models::{ConversationSession, ConversationState};

pub fn greeting() -> String {
    "Hello! I'm the clinic's appointment assistant. May I have your full name, please?".to_string()
}

pub fn ask_name_again() -> String {
    "Sorry, I didn't catch your name. Could you tell me your full name?".to_string()
}

pub fn ask_symptoms(name: &str) -> String {
    format!(
        "Thank you, {}. Could you briefly describe the symptoms or reason for your visit?",
        name
    )
}

pub fn ask_symptoms_again() -> String {
    "Could you describe what you're experiencing in a few words?".to_string()
}

pub fn ask_datetime(doctor: &Doctor) -> String {
    format!(
        "Based on what you've described, I'll book you with {}. What date and time would suit you? For example, \"tomorrow at 2pm\".",
        doctor.display_name()
    )
}

pub fn past_date() -> String {
    "That time has already passed. Could you give me a date and time in the future?".to_string()
}

pub fn unparseable_datetime() -> String {
    "I couldn't work out that date and time. Could you try something like \"Friday at 10am\" or \"November 19 at 1:30pm\"?".to_string()
}

pub fn outside_hours(hours: &ClinicHours) -> String {
    format!(
        "The clinic sees patients between {} and {}. Could you choose a time within those hours?",
        hour_label(hours.open_hour),
        hour_label(hours.close_hour)
    )
}

pub fn confirm_booking(name: &str, doctor: &Doctor, when: &str) -> String {
    format!(
        "To confirm: an appointment for {} with {} on {}. Shall I book it? (yes/no)",
        name,
        doctor.display_name(),
        when
    )
}

pub fn confirm_again(when: &str) -> String {
    format!(
        "Sorry, I need a yes or no. Should I book the appointment on {}?",
        when
    )
}

pub fn booked(name: &str, doctor: &Doctor, when: &str, booking_ref: &str) -> String {
    format!(
        "You're all set, {}! Your appointment with {} is booked for {}. Your booking reference is {}.",
        name,
        doctor.display_name(),
        when,
        booking_ref
    )
}

/// The calendar kept a write from an attempt that looked failed.
pub fn booking_recovered(name: &str, doctor: &Doctor, when: &str, booking_ref: &str) -> String {
    format!(
        "Good news, {}: your earlier request went through after all, so I haven't booked a second appointment. You're seeing {} on {}. Your booking reference is {}.",
        name,
        doctor.display_name(),
        when,
        booking_ref
    )
}

pub fn slot_taken(hours: &ClinicHours, alternatives: &[DateTime<Utc>]) -> String {
    if alternatives.is_empty() {
        return "Sorry, that time is no longer available and there are no other openings later that day. Could you suggest another date or time?".to_string();
    }

    let options = alternatives
        .iter()
        .enumerate()
        .map(|(i, start)| format!("{}) {}", i + 1, hours.describe_time(*start)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Sorry, that time is no longer available. Later that day I have: {}. Reply with an option number or suggest another time.",
        options
    )
}

pub fn booking_unavailable() -> String {
    "I'm having trouble reaching the calendar right now. Say \"yes\" to try again, or \"no\" to pick a different time.".to_string()
}

pub fn ask_new_time() -> String {
    "No problem. What date and time would you prefer instead?".to_string()
}

pub fn cancelled() -> String {
    "Okay, I've cancelled this booking request. Feel free to start again whenever you're ready.".to_string()
}

pub fn failed() -> String {
    "I'm sorry, something went wrong on our side and I couldn't complete your booking. Our staff have been notified; please call the clinic to finish booking.".to_string()
}

pub fn restarted() -> String {
    format!("Let's start over. {}", greeting())
}

/// Restates the outcome of a finished conversation.
pub fn terminal_recap(session: &ConversationSession, hours: &ClinicHours) -> String {
    match session.state {
        ConversationState::Booked => {
            let when = session
                .requested_time
                .map(|t| hours.describe(t))
                .unwrap_or_else(|| "the agreed time".to_string());
            format!(
                "Your appointment is already booked for {} (reference {}). There's nothing more to do.",
                when,
                session.booking_ref.as_deref().unwrap_or("unknown")
            )
        }
        ConversationState::Cancelled => {
            "This booking request was cancelled. Please start a new conversation to book again.".to_string()
        }
        _ => failed(),
    }
}

fn hour_label(hour: u32) -> String {
    match hour {
        0 | 24 => "12 AM".to_string(),
        12 => "12 PM".to_string(),
        h if h < 12 => format!("{} AM", h),
        h => format!("{} PM", h - 12),
    }
}
