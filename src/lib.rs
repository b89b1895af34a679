//! Climkit Meter Bridge Library
//!
//! Polls the Climkit metering API for electricity, water and heating meters and
//! republishes every reading as a Home Assistant sensor state.

pub mod climkit_api;
pub mod config;
pub mod config_flow;
pub mod errors;
pub mod home_assistant;
pub mod meter;
pub mod poller;

// Re-export commonly used types for easier access
pub use climkit_api::ClimkitAPI;
pub use config::Settings;
pub use errors::{ClimkitError, ClimkitResult};
pub use home_assistant::{HomeAssistantAPI, StateStore};
pub use meter::{Meter, MeterType, Reading, SensorState, Site};
pub use poller::{Poller, PollerHandle, TickSummary};
