//! Call-record reconciliation and appointment-extraction core.
//!
//! Merges the external call provider's read-only snapshot with the locally
//! writable overlay store into a unified per-agent record set, detects new
//! arrivals against the previously observed set, and drains unprocessed
//! transcript-bearing records through the appointment extraction service
//! exactly once per session. The dashboard shell sits on top of
//! `refresh::run_refresh` and the `SessionState` snapshot it maintains.

pub mod call_merge;
pub mod call_source;
pub mod detector;
pub mod error;
pub mod extract_queue;
pub mod extraction;
pub mod notify;
pub mod overlay;
pub mod refresh;
pub mod session;
pub mod types;

pub use refresh::{run_refresh, RefreshEnv, RefreshOutcome, RefreshResult};
pub use session::SessionState;
pub use types::{AppointmentStatus, CallRecord, Config, ExtractionResult};
