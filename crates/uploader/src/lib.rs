//! Resumable multipart upload coordinator.
//!
//! Files are split into parts, each part is sent to a presigned URL with
//! retries and a stall watchdog, and the queue survives restarts through a
//! JSON state document. [`UploadManager`] is the entry point.

mod backend;
mod config;
mod error;
mod http;
mod manager;
mod persist;
mod record;
mod retry;
mod scheduler;
mod session;
mod transport;

#[cfg(test)]
mod testing;

pub use backend::{BackendFuture, PartFuture, PartTransport, ProgressFn, UploadBackend};
pub use config::UploaderConfig;
pub use error::{TransportError, UploadError};
pub use http::HttpBackend;
pub use manager::{Services, UploadEvent, UploadManager};
pub use persist::{
    JsonFileStore, MemoryStore, PersistedRecord, PersistedState, STATE_VERSION, StateStore,
    config_dir, default_state_path,
};
pub use record::{FileSlot, UploadRecord, UploadView};
pub use retry::RetryPolicy;
pub use scheduler::{
    Action, Applied, Effect, EnqueueReport, QueueState, RejectReason, Rejection, next_actions,
};
pub use session::{SessionDeps, SessionMessage, SessionStart, SessionUpdate, UploadSession};
pub use transport::{TransferLimits, send_watched};
