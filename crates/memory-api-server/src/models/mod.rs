pub mod api;
pub mod message;

pub use message::{Metadata, Role, SessionStats, StoredMessage};
