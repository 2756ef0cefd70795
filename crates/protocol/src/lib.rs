pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    CompleteRequest, CompleteResponse, CompletedPart, InitiateRequest, InitiateResponse,
    PartUrlResponse,
};
pub use types::UploadStatus;
