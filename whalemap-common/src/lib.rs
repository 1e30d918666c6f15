//! # Whalemap Common Library
//!
//! Shared code for the whalemap services including:
//! - Error and result types
//! - Bootstrap configuration loading
//! - Event types and the broadcast EventBus
//! - Time utilities (ISO-8601 durations, naive local timestamps)
//! - Geographic primitives (extent, coordinates, great-circle distance)

pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod time;

pub use error::{Error, Result};
pub use geo::{Extent, LonLat};
