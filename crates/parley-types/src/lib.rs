//! Shared types for the Parley relay: wire events, HTTP bodies, models and
//! the error taxonomy used by every other crate.

pub mod api;
pub mod errors;
pub mod events;
pub mod models;
