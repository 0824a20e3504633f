//! Message delivery.
//!
//! [`SendOrchestrator`] runs each send through
//! `pending → sending → sent | failed`, keeping status in a
//! [`StatusTracker`] that writes through to a [`SendHistoryStore`] and
//! publishing [`MailEvent`]s along the way.

mod events;
mod history;
mod orchestrator;
mod status;
mod tracker;

pub use events::{BroadcastPublisher, EventPublisher, MailEvent, NoopPublisher};
pub use history::{SendHistoryStore, SqliteSendHistory};
pub use orchestrator::{BulkItem, SendHandle, SendOrchestrator};
pub use status::{SendId, SendResult, SendState, SendStatus};
pub use tracker::StatusTracker;
