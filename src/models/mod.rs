//! Data models for events, domain payloads, and delegations.

pub mod delegation;
pub mod domain;
pub mod event;

pub use delegation::*;
pub use domain::*;
pub use event::*;
