pub mod calendar;
pub mod datetime;
pub mod gateway;
pub mod memory;

pub use calendar::{CalendarClient, HttpCalendarClient};
pub use datetime::DatetimeResolver;
pub use gateway::BookingGateway;
pub use memory::InMemoryCalendar;
