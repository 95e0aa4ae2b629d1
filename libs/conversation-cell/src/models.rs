// libs/conversation-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use appointment_cell::AvailabilityWindow;

// ==============================================================================
// CONVERSATION STATE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    AwaitingName,
    AwaitingSymptoms,
    AwaitingDatetime,
    AwaitingConfirmation,
    Booked,
    Cancelled,
    Failed,
}

impl ConversationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversationState::Booked | ConversationState::Cancelled | ConversationState::Failed
        )
    }

    pub fn can_transition_to(&self, target: &ConversationState) -> bool {
        use ConversationState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, target) {
            (a, b) if a == b => true,
            (AwaitingName, AwaitingSymptoms) => true,
            (AwaitingSymptoms, AwaitingDatetime) => true,
            (AwaitingDatetime, AwaitingConfirmation) => true,
            (AwaitingConfirmation, Booked) => true,
            (AwaitingConfirmation, AwaitingDatetime) => true,
            (_, AwaitingName) => true,
            (_, Cancelled) => true,
            (_, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationState::AwaitingName => write!(f, "awaiting_name"),
            ConversationState::AwaitingSymptoms => write!(f, "awaiting_symptoms"),
            ConversationState::AwaitingDatetime => write!(f, "awaiting_datetime"),
            ConversationState::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            ConversationState::Booked => write!(f, "booked"),
            ConversationState::Cancelled => write!(f, "cancelled"),
            ConversationState::Failed => write!(f, "failed"),
        }
    }
}

// ==============================================================================
// SESSION MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Kept on a `Failed` session for operator inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDiagnostics {
    pub reason: String,
    pub state_at_failure: ConversationState,
    pub failed_at: DateTime<Utc>,
    pub operator_review: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub state: ConversationState,
    pub patient_name: Option<String>,
    pub symptom_text: Option<String>,
    pub doctor_id: Option<String>,
    pub requested_time: Option<DateTime<Utc>>,
    pub confirmed: bool,
    pub booking_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub turn_count: u32,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
    #[serde(default)]
    pub failure: Option<FailureDiagnostics>,
    /// Free slot starts offered after a conflict. Never booked without the
    /// patient picking one.
    #[serde(default)]
    pub pending_alternatives: Vec<DateTime<Utc>>,
    /// Windows whose create gave up on a transient error. The write may
    /// still have landed, so these are re-checked before any further
    /// booking and on cancel. Survives start-over.
    #[serde(default)]
    pub unconfirmed_bookings: Vec<AvailabilityWindow>,
}

impl ConversationSession {
    pub fn new(session_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: ConversationState::AwaitingName,
            patient_name: None,
            symptom_text: None,
            doctor_id: None,
            requested_time: None,
            confirmed: false,
            booking_ref: None,
            created_at: now,
            last_updated_at: now,
            turn_count: 0,
            transcript: Vec::new(),
            failure: None,
            pending_alternatives: Vec::new(),
            unconfirmed_bookings: Vec::new(),
        }
    }

    /// Clears collected fields for a fresh start; transcript and turn count stay.
    pub fn clear_fields(&mut self) {
        self.patient_name = None;
        self.symptom_text = None;
        self.doctor_id = None;
        self.requested_time = None;
        self.confirmed = false;
        self.booking_ref = None;
        self.pending_alternatives.clear();
    }

    pub fn record(&mut self, speaker: Speaker, text: &str, at: DateTime<Utc>) {
        self.transcript.push(TranscriptEntry {
            speaker,
            text: text.to_string(),
            at,
        });
    }

    /// How long the session may sit untouched before it is discarded.
    pub fn time_to_live(&self, idle_timeout: Duration, terminal_grace: Duration) -> Duration {
        if self.state.is_terminal() {
            terminal_grace
        } else {
            idle_timeout
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, idle_timeout: Duration, terminal_grace: Duration) -> bool {
        now - self.last_updated_at > self.time_to_live(idle_timeout, terminal_grace)
    }

    pub fn last_assistant_message(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|entry| entry.speaker == Speaker::Assistant)
            .map(|entry| entry.text.as_str())
    }
}

// ==============================================================================
// EXTRACTION MODELS
// ==============================================================================

/// A value pulled from an utterance together with whether it is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted<T> {
    pub value: T,
    pub valid: bool,
}

impl<T> Extracted<T> {
    pub fn valid(value: T) -> Self {
        Self { value, valid: true }
    }

    pub fn invalid(value: T) -> Self {
        Self { value, valid: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationIntent {
    Affirm,
    Deny,
    Unclear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlIntent {
    Cancel,
    StartOver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Name(Extracted<String>),
    Symptoms(Extracted<String>),
    /// Raw phrase for the datetime resolver.
    TimePhrase(Extracted<String>),
    /// Zero-based pick from the alternatives offered after a conflict.
    AlternativeChoice(usize),
    Confirmation(ConfirmationIntent),
}

/// Per-turn extraction output. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractionResult {
    pub control: Option<ControlIntent>,
    pub updates: Vec<FieldUpdate>,
}

impl ExtractionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn control(intent: ControlIntent) -> Self {
        Self {
            control: Some(intent),
            updates: Vec::new(),
        }
    }

    pub fn update(update: FieldUpdate) -> Self {
        Self {
            control: None,
            updates: vec![update],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.control.is_none() && self.updates.is_empty()
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Speaker,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub utterance: String,
    #[serde(default)]
    pub history: Option<Vec<HistoryEntry>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    /// Clinic-local date; today when omitted.
    pub date: Option<NaiveDate>,
}

/// Free slots for one doctor on one clinic day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayAvailability {
    pub doctor_id: String,
    pub doctor_name: String,
    pub date: NaiveDate,
    pub timezone: String,
    pub slot_minutes: i64,
    pub slots: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReply {
    pub session_id: String,
    pub reply: String,
    pub terminal: bool,
    pub state: ConversationState,
}

impl TurnReply {
    pub fn for_session(session: &ConversationSession, reply: String) -> Self {
        Self {
            session_id: session.session_id.clone(),
            reply,
            terminal: session.state.is_terminal(),
            state: session.state,
        }
    }
}

/// Read-only view of a session for the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: ConversationState,
    pub patient_name: Option<String>,
    pub symptom_text: Option<String>,
    pub doctor_id: Option<String>,
    pub requested_time: Option<DateTime<Utc>>,
    pub booking_ref: Option<String>,
    pub turn_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub pending_alternatives: Vec<DateTime<Utc>>,
    pub failure: Option<FailureDiagnostics>,
}

impl From<&ConversationSession> for SessionSnapshot {
    fn from(session: &ConversationSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            state: session.state,
            patient_name: session.patient_name.clone(),
            symptom_text: session.symptom_text.clone(),
            doctor_id: session.doctor_id.clone(),
            requested_time: session.requested_time,
            booking_ref: session.booking_ref.clone(),
            turn_count: session.turn_count,
            created_at: session.created_at,
            last_updated_at: session.last_updated_at,
            pending_alternatives: session.pending_alternatives.clone(),
            failure: session.failure.clone(),
        }
    }
}
