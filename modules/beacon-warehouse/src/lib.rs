pub mod client;
pub mod error;

pub use client::{GeoUpdate, PipelineStage, WarehouseClient};
pub use error::{SqlErrorClass, WarehouseError};

/// Result type alias for warehouse operations.
pub type Result<T> = std::result::Result<T, WarehouseError>;
