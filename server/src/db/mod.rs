//! Database module for PostgreSQL persistence.

mod pool;
mod rows;

pub use pool::*;
pub use rows::*;
