//! HTTP API handlers for whalemap-agg
//!
//! REST endpoints for the published collections and query setters, plus an
//! SSE stream of pipeline and query events.

pub mod health;
pub mod local;
pub mod observations;
pub mod query;
pub mod sse;

pub use health::health_routes;
pub use local::local_routes;
pub use observations::observation_routes;
pub use query::query_routes;
pub use sse::{event_routes, event_stream};
