//! # Configuration
//!
//! Environment-driven settings for the controller runtime.

mod controller;

pub use controller::ControllerConfig;
