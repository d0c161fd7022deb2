pub mod breaker;
pub mod deadletter;
pub mod etl;
pub mod health;
pub mod listener;
pub mod ops;
pub mod pipeline;
pub mod sweeper;
pub mod writer;

pub use breaker::{BreakerState, CircuitBreaker};
pub use pipeline::{EnrichmentContext, Enricher, Pipeline};
