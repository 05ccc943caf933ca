pub mod error;
pub mod logger;

pub use error::{ApiError, CacheError, MemoryError, StoreError};
pub use logger::init_logger;
