//! Request pattern matching
//!
//! Patterns select requests by method, accepting port, and pathname glob.

mod glob;
mod request;

pub use glob::GlobMatcher;
pub use request::RequestPattern;
