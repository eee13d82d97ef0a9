//! Document synchronizer
//!
//! Ties a PDF, its annotation store and durable storage together in a
//! [`DocumentSession`]: loading, background flushing, reconciliation after
//! navigation or reflow, and cancellable export back into the PDF.

mod error;
mod export;
mod session;
mod state;

pub use error::{SessionError, SessionResult};
pub use export::{ExportHandle, ExportReport};
pub use session::{DocumentSession, FlushFailure, ImportReport, ReloadReport};
pub use state::{SyncEvent, SyncState, SyncStateMachine};
