// libs/conversation-cell/src/services/service.rs
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_utils::{Clock, KeyedLocks, SystemClock};

use crate::error::ConversationError;
use crate::models::{ConversationSession, DayAvailability, HistoryEntry, Speaker, TurnReply};
use crate::services::prompts;
use crate::services::session_store::SessionStore;
use crate::services::state_machine::BookingStateMachine;

/// Entry point for conversation turns: loads the session, serializes turns
/// per session id, runs the state machine and persists the result.
pub struct ConversationService {
    machine: BookingStateMachine,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    session_locks: KeyedLocks,
    cancel_requests: Mutex<HashSet<String>>,
    idle_timeout: Duration,
    terminal_grace: Duration,
}

impl ConversationService {
    pub fn new(machine: BookingStateMachine, store: Arc<dyn SessionStore>, config: &AppConfig) -> Self {
        Self {
            machine,
            store,
            clock: Arc::new(SystemClock),
            session_locks: KeyedLocks::new(),
            cancel_requests: Mutex::new(HashSet::new()),
            idle_timeout: Duration::seconds(config.session_idle_timeout_seconds),
            terminal_grace: Duration::seconds(config.session_terminal_grace_seconds),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn calendar_backend(&self) -> &'static str {
        self.machine.gateway().backend_name()
    }

    /// Opens a new session and returns the greeting.
    pub async fn start_session(&self) -> Result<TurnReply, ConversationError> {
        let now = self.clock.now();
        let session_id = Uuid::new_v4().to_string();
        let mut session = ConversationSession::new(&session_id, now);

        let greeting = prompts::greeting();
        session.record(Speaker::Assistant, &greeting, now);
        self.persist(&session).await?;

        info!("Started conversation {}", session_id);
        Ok(TurnReply::for_session(&session, greeting))
    }

    /// Handles one inbound utterance. Unknown or idle-expired ids start a
    /// fresh session under the same id.
    #[instrument(skip(self, utterance, history))]
    pub async fn handle_turn(
        &self,
        session_id: &str,
        utterance: &str,
        history: Option<Vec<HistoryEntry>>,
    ) -> Result<TurnReply, ConversationError> {
        if utterance.trim().is_empty() {
            return Err(ConversationError::EmptyUtterance);
        }

        let _guard = self.session_locks.lock(session_id).await;
        let now = self.clock.now();

        let mut session = match self.load_live(session_id, now).await? {
            Some(session) => session,
            None => {
                let mut session = ConversationSession::new(session_id, now);
                seed_history(&mut session, history, now);
                info!("Created conversation {} on first utterance", session_id);
                session
            }
        };

        let before = session.clone();
        let reply = self.machine.advance(&mut session, utterance, now).await;

        if self.take_cancel_request(session_id) && !before.state.is_terminal() {
            if let Some(booking_ref) = &session.booking_ref {
                warn!(
                    booking_ref = %booking_ref,
                    operator_review = true,
                    "Cancellation arrived during booking; discarding result for session {}",
                    session_id
                );
            }
            // Attempts that gave up on this turn may still have written.
            let unconfirmed = std::mem::take(&mut session.unconfirmed_bookings);
            session = before;
            session.unconfirmed_bookings = unconfirmed;
            session.turn_count += 1;
            session.record(Speaker::User, utterance, now);
            let reply = self.machine.cancel(&mut session, now).await?;
            self.persist(&session).await?;
            return Ok(reply);
        }

        self.persist(&session).await?;
        Ok(reply)
    }

    /// Cancels the session. A turn already in flight finishes its external
    /// calls first, then its outcome is discarded.
    #[instrument(skip(self))]
    pub async fn cancel(&self, session_id: &str) -> Result<TurnReply, ConversationError> {
        self.register_cancel(session_id);

        let _guard = self.session_locks.lock(session_id).await;
        let now = self.clock.now();

        let mut session = match self.load_live(session_id, now).await? {
            Some(session) => session,
            None => {
                self.take_cancel_request(session_id);
                return Err(ConversationError::SessionNotFound(session_id.to_string()));
            }
        };

        // An in-flight turn may already have consumed the request.
        if !self.take_cancel_request(session_id) || session.state.is_terminal() {
            let reply = session
                .last_assistant_message()
                .map(str::to_string)
                .unwrap_or_else(|| prompts::terminal_recap(&session, self.machine.hours()));
            return Ok(TurnReply::for_session(&session, reply));
        }

        let reply = self.machine.cancel(&mut session, now).await?;
        self.persist(&session).await?;
        Ok(reply)
    }

    /// Clears collected fields of an active session.
    #[instrument(skip(self))]
    pub async fn reset(&self, session_id: &str) -> Result<TurnReply, ConversationError> {
        let _guard = self.session_locks.lock(session_id).await;
        let now = self.clock.now();

        let mut session = self
            .load_live(session_id, now)
            .await?
            .ok_or_else(|| ConversationError::SessionNotFound(session_id.to_string()))?;

        if session.state.is_terminal() {
            return Err(ConversationError::SessionTerminal(session.state));
        }

        let reply = self.machine.start_over(&mut session, now)?;
        self.persist(&session).await?;
        Ok(reply)
    }

    /// Free slots for `doctor_id` on `date`, or on today's clinic date.
    #[instrument(skip(self))]
    pub async fn availability(
        &self,
        doctor_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<DayAvailability, ConversationError> {
        let doctor = self
            .machine
            .directory()
            .get(doctor_id)
            .ok_or_else(|| ConversationError::UnknownDoctor(doctor_id.to_string()))?;

        let now = self.clock.now();
        let hours = self.machine.hours();
        let date = date.unwrap_or_else(|| hours.local_date(now));

        let slots = self
            .machine
            .gateway()
            .free_slots(&doctor.id, date, now)
            .await
            .map_err(|e| ConversationError::CalendarUnavailable(e.to_string()))?;
        debug!("{} free slots for {} on {}", slots.len(), doctor.id, date);

        Ok(DayAvailability {
            doctor_id: doctor.id.clone(),
            doctor_name: doctor.display_name(),
            date,
            timezone: hours.timezone.to_string(),
            slot_minutes: hours.slot_minutes,
            slots: slots.into_iter().map(|w| w.start).collect(),
        })
    }

    pub async fn get_session(&self, session_id: &str) -> Result<ConversationSession, ConversationError> {
        self.load_live(session_id, self.clock.now())
            .await?
            .ok_or_else(|| ConversationError::SessionNotFound(session_id.to_string()))
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn load_live(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ConversationSession>, ConversationError> {
        match self.store.load(session_id).await? {
            Some(session) if session.is_expired(now, self.idle_timeout, self.terminal_grace) => {
                debug!("Session {} expired, discarding", session_id);
                self.store.delete(session_id).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn persist(&self, session: &ConversationSession) -> Result<(), ConversationError> {
        let ttl = session.time_to_live(self.idle_timeout, self.terminal_grace);
        self.store.save(session, ttl).await?;
        Ok(())
    }

    fn register_cancel(&self, session_id: &str) {
        self.cancel_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id.to_string());
    }

    fn take_cancel_request(&self, session_id: &str) -> bool {
        self.cancel_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id)
    }
}

fn seed_history(session: &mut ConversationSession, history: Option<Vec<HistoryEntry>>, now: DateTime<Utc>) {
    for entry in history.into_iter().flatten() {
        session.record(entry.role, &entry.content, now);
    }
}
