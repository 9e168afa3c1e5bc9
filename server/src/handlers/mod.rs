//! Request handlers for the row API and the change feed.

mod realtime;
mod rows;

pub use realtime::*;
pub use rows::*;
