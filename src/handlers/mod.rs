//! HTTP and SSE request handlers.

pub mod events;
pub mod http;

pub use events::*;
pub use http::*;
