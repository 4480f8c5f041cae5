//! Command implementations.

pub mod admin;
pub mod intents;
pub mod queue;
pub mod worker;
