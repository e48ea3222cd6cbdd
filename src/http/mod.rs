//! HTTP protocol layer module
//!
//! Request and response types shared by the handler chain, plus MIME
//! detection and file resolution for disk-backed responses.

pub mod files;
pub mod mime;
pub mod request;
pub mod response;

// Re-export commonly used types
pub use files::{FileStats, SendFileOptions};
pub use request::ServerRequest;
pub use response::{build_404_response, build_500_response, HandlerError, ServerResponse};
