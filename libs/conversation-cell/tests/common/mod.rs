// libs/conversation-cell/tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use appointment_cell::{BookingGateway, CalendarClient, InMemoryCalendar};
use conversation_cell::{
    AppState, BookingStateMachine, ConversationService, ConversationSession, InMemorySessionStore,
};
use doctor_cell::DoctorDirectory;
use shared_config::AppConfig;
use shared_utils::test_utils::{reference_now, TestConfig};
use shared_utils::FixedClock;

pub const SESSION_ID: &str = "session-sarah";

pub struct Harness {
    pub config: Arc<AppConfig>,
    pub calendar: Arc<InMemoryCalendar>,
    pub store: Arc<InMemorySessionStore>,
    pub clock: Arc<FixedClock>,
    pub service: Arc<ConversationService>,
}

impl Harness {
    pub fn state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            conversations: self.service.clone(),
        }
    }
}

pub fn state_machine(test_config: &TestConfig, calendar: Arc<InMemoryCalendar>) -> BookingStateMachine {
    let config = test_config.to_app_config();
    let gateway = Arc::new(BookingGateway::new(calendar as Arc<dyn CalendarClient>, &config));
    BookingStateMachine::new(DoctorDirectory::clinic_default(), gateway, &config)
}

pub fn harness_with(test_config: TestConfig, calendar: InMemoryCalendar) -> Harness {
    let config = test_config.to_arc();
    let calendar = Arc::new(calendar);
    let store = Arc::new(InMemorySessionStore::new());
    let clock = Arc::new(FixedClock::new(reference_now()));

    let machine = state_machine(&test_config, calendar.clone());
    let service = ConversationService::new(machine, store.clone(), &config).with_clock(clock.clone());

    Harness {
        config,
        calendar,
        store,
        clock,
        service: Arc::new(service),
    }
}

pub fn harness() -> Harness {
    harness_with(TestConfig::default(), InMemoryCalendar::new())
}

pub fn new_session() -> ConversationSession {
    ConversationSession::new(SESSION_ID, reference_now())
}

/// Runs each utterance through the machine at `reference_now`.
pub async fn drive(machine: &BookingStateMachine, session: &mut ConversationSession, utterances: &[&str]) {
    for utterance in utterances {
        machine.advance(session, utterance, reference_now()).await;
    }
}
