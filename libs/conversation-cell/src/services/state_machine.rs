// libs/conversation-cell/src/services/state_machine.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use appointment_cell::{
    BookingGateway, CalendarEvent, ClinicHours, DatetimeResolver, GatewayError, ParseError,
    PatientInfo,
};
use doctor_cell::{Doctor, DoctorDirectory, DoctorMatcher};
use shared_config::{AppConfig, DenyPolicy};

use crate::error::ConversationError;
use crate::models::{
    ConfirmationIntent, ControlIntent, ConversationSession, ConversationState, FailureDiagnostics,
    FieldUpdate, Speaker, TurnReply,
};
use crate::services::extractor::FieldExtractor;
use crate::services::prompts;

/// Drives one session through name, symptoms, time and confirmation.
pub struct BookingStateMachine {
    extractor: FieldExtractor,
    directory: DoctorDirectory,
    matcher: DoctorMatcher,
    resolver: DatetimeResolver,
    hours: ClinicHours,
    gateway: Arc<BookingGateway>,
    deny_policy: DenyPolicy,
}

impl BookingStateMachine {
    pub fn new(directory: DoctorDirectory, gateway: Arc<BookingGateway>, config: &AppConfig) -> Self {
        let hours = ClinicHours::from_config(config);
        Self {
            extractor: FieldExtractor::new(),
            matcher: DoctorMatcher::from_directory(&directory),
            directory,
            resolver: DatetimeResolver::from_hours(&hours),
            hours,
            gateway,
            deny_policy: config.deny_policy,
        }
    }

    pub fn with_matcher(mut self, matcher: DoctorMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn hours(&self) -> &ClinicHours {
        &self.hours
    }

    pub fn gateway(&self) -> &BookingGateway {
        &self.gateway
    }

    pub fn directory(&self) -> &DoctorDirectory {
        &self.directory
    }

    /// Applies one utterance to `session` and returns the assistant reply.
    ///
    /// Terminal sessions are left untouched; the reply restates their outcome.
    #[instrument(skip(self, session, utterance), fields(session_id = %session.session_id, state = %session.state))]
    pub async fn advance(&self, session: &mut ConversationSession, utterance: &str, now: DateTime<Utc>) -> TurnReply {
        if session.state.is_terminal() {
            debug!("Turn on finished session, restating outcome");
            return TurnReply::for_session(session, prompts::terminal_recap(session, &self.hours));
        }

        session.turn_count += 1;
        session.last_updated_at = now;
        session.record(Speaker::User, utterance, now);

        let reply = match self.handle(session, utterance, now).await {
            Ok(reply) => reply,
            Err(e) => self.fail(session, &e.to_string(), now),
        };

        session.record(Speaker::Assistant, &reply, now);
        TurnReply::for_session(session, reply)
    }

    /// Clears collected fields and returns to the name prompt.
    pub fn start_over(&self, session: &mut ConversationSession, now: DateTime<Utc>) -> Result<TurnReply, ConversationError> {
        self.transition(session, ConversationState::AwaitingName)?;
        session.clear_fields();
        session.last_updated_at = now;

        let reply = prompts::restarted();
        session.record(Speaker::Assistant, &reply, now);
        Ok(TurnReply::for_session(session, reply))
    }

    /// Ends a non-terminal session as cancelled.
    pub async fn cancel(&self, session: &mut ConversationSession, now: DateTime<Utc>) -> Result<TurnReply, ConversationError> {
        self.transition(session, ConversationState::Cancelled)?;
        session.confirmed = false;
        session.last_updated_at = now;
        info!("Session {} cancelled", session.session_id);
        self.orphaned_bookings(session).await;

        let reply = prompts::cancelled();
        session.record(Speaker::Assistant, &reply, now);
        Ok(TurnReply::for_session(session, reply))
    }

    /// Events the session owns from attempts that reported a transient
    /// failure. Each one, and each window that cannot be checked, is logged
    /// for operator review.
    pub async fn orphaned_bookings(&self, session: &ConversationSession) -> Vec<CalendarEvent> {
        let mut orphans = Vec::new();
        for window in &session.unconfirmed_bookings {
            match self.gateway.find_owned(&session.session_id, window).await {
                Ok(Some(event)) => {
                    warn!(
                        session_id = %session.session_id,
                        booking_ref = %event.booking_ref,
                        doctor_id = %event.doctor_id,
                        operator_review = true,
                        "Calendar event at {} has no confirmed booking in the conversation",
                        event.start
                    );
                    orphans.push(event);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    session_id = %session.session_id,
                    doctor_id = %window.doctor_id,
                    operator_review = true,
                    "Could not check attempt at {} for a landed booking: {}",
                    window.start,
                    e
                ),
            }
        }
        orphans
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn handle(
        &self,
        session: &mut ConversationSession,
        utterance: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ConversationError> {
        let extraction = self.extractor.extract(utterance, session);

        match extraction.control {
            Some(ControlIntent::Cancel) => {
                self.transition(session, ConversationState::Cancelled)?;
                session.confirmed = false;
                info!("Session {} cancelled by patient", session.session_id);
                self.orphaned_bookings(session).await;
                return Ok(prompts::cancelled());
            }
            Some(ControlIntent::StartOver) => {
                self.transition(session, ConversationState::AwaitingName)?;
                session.clear_fields();
                info!("Session {} restarted by patient", session.session_id);
                return Ok(prompts::restarted());
            }
            None => {}
        }

        let update = extraction.updates.into_iter().next();

        match (session.state, update) {
            (ConversationState::AwaitingName, Some(FieldUpdate::Name(name))) if name.valid => {
                session.patient_name = Some(name.value.clone());
                self.transition(session, ConversationState::AwaitingSymptoms)?;
                Ok(prompts::ask_symptoms(&name.value))
            }
            (ConversationState::AwaitingName, _) => Ok(prompts::ask_name_again()),

            (ConversationState::AwaitingSymptoms, Some(FieldUpdate::Symptoms(symptoms))) if symptoms.valid => {
                let matched = self.matcher.find_match(&symptoms.value);
                let doctor = self.doctor(&matched.doctor_id)?.clone();
                debug!(
                    "Matched doctor {} (rule {:?}, keyword {:?})",
                    doctor.id, matched.rule_index, matched.matched_keyword
                );

                session.symptom_text = Some(symptoms.value);
                session.doctor_id = Some(doctor.id.clone());
                self.transition(session, ConversationState::AwaitingDatetime)?;
                Ok(prompts::ask_datetime(&doctor))
            }
            (ConversationState::AwaitingSymptoms, _) => Ok(prompts::ask_symptoms_again()),

            (ConversationState::AwaitingDatetime, Some(FieldUpdate::AlternativeChoice(index))) => {
                match session.pending_alternatives.get(index).copied() {
                    Some(start) => self.propose_time(session, start),
                    None => Ok(prompts::unparseable_datetime()),
                }
            }
            (ConversationState::AwaitingDatetime, Some(FieldUpdate::TimePhrase(phrase))) => {
                match self.resolver.resolve(&phrase.value, now) {
                    Ok(start) => self.propose_time(session, start),
                    Err(ParseError::PastDate) => {
                        debug!("Requested time '{}' is in the past", phrase.value);
                        Ok(prompts::past_date())
                    }
                    Err(ParseError::Unparseable) => {
                        debug!("Could not resolve '{}'", phrase.value);
                        Ok(prompts::unparseable_datetime())
                    }
                }
            }
            (ConversationState::AwaitingDatetime, _) => Ok(prompts::unparseable_datetime()),

            (ConversationState::AwaitingConfirmation, Some(FieldUpdate::Confirmation(intent))) => {
                self.confirm(session, intent).await
            }
            (ConversationState::AwaitingConfirmation, _) => {
                let when = self.describe_requested(session)?;
                Ok(prompts::confirm_again(&when))
            }

            (state, _) => Err(ConversationError::SessionTerminal(state)),
        }
    }

    fn propose_time(&self, session: &mut ConversationSession, start: DateTime<Utc>) -> Result<String, ConversationError> {
        let doctor = self.session_doctor(session)?.clone();
        let window = self.hours.window_at(&doctor.id, start);

        if !self.hours.contains(&window) {
            debug!("Requested time {} is outside clinic hours", start);
            return Ok(prompts::outside_hours(&self.hours));
        }

        session.requested_time = Some(start);
        session.pending_alternatives.clear();
        self.transition(session, ConversationState::AwaitingConfirmation)?;

        let name = self.patient_name(session)?;
        Ok(prompts::confirm_booking(&name, &doctor, &self.hours.describe(start)))
    }

    async fn confirm(&self, session: &mut ConversationSession, intent: ConfirmationIntent) -> Result<String, ConversationError> {
        match intent {
            ConfirmationIntent::Affirm => self.book(session).await,
            ConfirmationIntent::Deny => match self.deny_policy {
                DenyPolicy::RecollectTime => {
                    session.requested_time = None;
                    session.confirmed = false;
                    self.transition(session, ConversationState::AwaitingDatetime)?;
                    Ok(prompts::ask_new_time())
                }
                DenyPolicy::Cancel => {
                    self.transition(session, ConversationState::Cancelled)?;
                    session.confirmed = false;
                    info!("Session {} cancelled after patient declined", session.session_id);
                    self.orphaned_bookings(session).await;
                    Ok(prompts::cancelled())
                }
            },
            ConfirmationIntent::Unclear => {
                let when = self.describe_requested(session)?;
                Ok(prompts::confirm_again(&when))
            }
        }
    }

    async fn book(&self, session: &mut ConversationSession) -> Result<String, ConversationError> {
        let doctor = self.session_doctor(session)?.clone();
        let name = self.patient_name(session)?;
        let start = session.requested_time.ok_or_else(|| {
            ConversationError::InvariantViolation("confirmation without a requested time".to_string())
        })?;

        session.confirmed = true;

        // A write from an attempt that looked failed is this session's booking.
        match self.find_landed(session).await {
            Ok(Some(event)) => return self.adopt(session, event, &name),
            Ok(None) => session.unconfirmed_bookings.clear(),
            Err(GatewayError::Fatal(reason)) => {
                return Err(ConversationError::InvariantViolation(format!(
                    "calendar refused lookup: {}",
                    reason
                )))
            }
            Err(e) => {
                session.confirmed = false;
                warn!("Could not re-check earlier attempts for session {}: {}", session.session_id, e);
                return Ok(prompts::booking_unavailable());
            }
        }

        let window = self.hours.window_at(&doctor.id, start);
        let patient = PatientInfo {
            name: name.clone(),
            symptoms: session.symptom_text.clone().unwrap_or_default(),
        };

        match self.gateway.try_book(&session.session_id, &window, &patient).await {
            Ok(booking_ref) => {
                session.booking_ref = Some(booking_ref.0.clone());
                self.transition(session, ConversationState::Booked)?;
                info!("Session {} booked {} with {}", session.session_id, booking_ref, doctor.id);
                Ok(prompts::booked(&name, &doctor, &self.hours.describe(start), booking_ref.as_str()))
            }
            Err(GatewayError::Conflict { alternatives }) => {
                session.confirmed = false;
                session.requested_time = None;
                session.pending_alternatives = alternatives.iter().map(|w| w.start).collect();
                self.transition(session, ConversationState::AwaitingDatetime)?;
                Ok(prompts::slot_taken(&self.hours, &session.pending_alternatives))
            }
            Err(GatewayError::TransientFailure { attempts, reason }) => {
                session.confirmed = false;
                if !session.unconfirmed_bookings.contains(&window) {
                    session.unconfirmed_bookings.push(window);
                }
                warn!("Booking for session {} failed after {} attempts: {}", session.session_id, attempts, reason);
                Ok(prompts::booking_unavailable())
            }
            Err(GatewayError::Fatal(reason)) => Err(ConversationError::InvariantViolation(format!(
                "calendar refused booking: {}",
                reason
            ))),
        }
    }

    /// First session-owned event among the windows of earlier failed attempts.
    async fn find_landed(&self, session: &ConversationSession) -> Result<Option<CalendarEvent>, GatewayError> {
        for window in &session.unconfirmed_bookings {
            if let Some(event) = self.gateway.find_owned(&session.session_id, window).await? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn adopt(&self, session: &mut ConversationSession, event: CalendarEvent, name: &str) -> Result<String, ConversationError> {
        let doctor = self.doctor(&event.doctor_id)?.clone();
        warn!(
            "Session {} adopts booking {} at {} from an earlier attempt",
            session.session_id, event.booking_ref, event.start
        );

        session.doctor_id = Some(doctor.id.clone());
        session.requested_time = Some(event.start);
        session.booking_ref = Some(event.booking_ref.clone());
        session.unconfirmed_bookings.clear();
        self.transition(session, ConversationState::Booked)?;

        Ok(prompts::booking_recovered(name, &doctor, &self.hours.describe(event.start), &event.booking_ref))
    }

    fn transition(&self, session: &mut ConversationSession, target: ConversationState) -> Result<(), ConversationError> {
        if !session.state.can_transition_to(&target) {
            return Err(ConversationError::InvalidTransition {
                from: session.state,
                to: target,
            });
        }
        if session.state != target {
            debug!("Session {} {} -> {}", session.session_id, session.state, target);
        }
        session.state = target;
        Ok(())
    }

    /// Moves the session to `Failed`, keeping diagnostics for operators.
    fn fail(&self, session: &mut ConversationSession, reason: &str, now: DateTime<Utc>) -> String {
        error!(
            session_id = %session.session_id,
            state = %session.state,
            operator_review = true,
            unconfirmed_attempts = session.unconfirmed_bookings.len(),
            "Conversation failed: {}",
            reason
        );

        session.failure = Some(FailureDiagnostics {
            reason: reason.to_string(),
            state_at_failure: session.state,
            failed_at: now,
            operator_review: true,
        });
        session.confirmed = false;
        session.booking_ref = None;
        session.state = ConversationState::Failed;
        prompts::failed()
    }

    fn doctor(&self, doctor_id: &str) -> Result<&Doctor, ConversationError> {
        self.directory
            .get(doctor_id)
            .ok_or_else(|| ConversationError::InvariantViolation(format!("unknown doctor id {}", doctor_id)))
    }

    fn session_doctor(&self, session: &ConversationSession) -> Result<&Doctor, ConversationError> {
        let doctor_id = session.doctor_id.as_deref().ok_or_else(|| {
            ConversationError::InvariantViolation("doctor missing after symptoms".to_string())
        })?;
        self.doctor(doctor_id)
    }

    fn patient_name(&self, session: &ConversationSession) -> Result<String, ConversationError> {
        session
            .patient_name
            .clone()
            .ok_or_else(|| ConversationError::InvariantViolation("patient name missing".to_string()))
    }

    fn describe_requested(&self, session: &ConversationSession) -> Result<String, ConversationError> {
        session
            .requested_time
            .map(|t| self.hours.describe(t))
            .ok_or_else(|| ConversationError::InvariantViolation("requested time missing".to_string()))
    }
}
