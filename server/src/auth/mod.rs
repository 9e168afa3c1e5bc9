//! Authentication and tenant extraction.

mod middleware;

pub use middleware::*;
