pub mod extractor;
pub mod prompts;
pub mod reaper;
pub mod service;
pub mod session_store;
pub mod state_machine;

pub use extractor::FieldExtractor;
pub use reaper::{ReaperHandle, SessionReaper};
pub use service::ConversationService;
pub use session_store::{InMemorySessionStore, RedisSessionStore, SessionStore};
pub use state_machine::BookingStateMachine;
