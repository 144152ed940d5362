//! # Web Handlers for the Campsite Tracker Web Application
//!
//! This crate provides the trip API handlers for the Campsite Tracker application.

/// Request, response and error types of the trip API
mod trip_types;
pub use trip_types::*;

/// Handlers for trip API endpoints
mod trip_handlers;
pub use trip_handlers::*;
