pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::{ConversationError, StoreError};
pub use models::*;
pub use router::{create_conversation_router, AppState};
pub use services::*;
