//! Session authentication: JWT carried in the `session` cookie or a bearer header.

mod jwt;

pub use jwt::{Claims, JwtSecret};
