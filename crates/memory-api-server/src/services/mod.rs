pub mod memory;

pub use memory::{ConversationMemory, MemoryOptions, SaveOutcome};
