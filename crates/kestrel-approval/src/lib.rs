//! Human-in-the-loop approval queue.
//!
//! An [`ApprovalQueue`] owns the lifecycle of every [`ApprovalRecord`]:
//! `Pending -> Approved` or `Pending -> Denied`, both terminal. Records are
//! persisted to a [`RecordLog`] on every state change, so re-opening the log
//! after a crash reconstructs the pending/approved/denied partition exactly.
//! Approvals granted with a TTL install a [`Whitelist`] entry that
//! auto-approves later requests in the same scope until it expires.

pub mod clock;
pub mod log;
pub mod paths;
pub mod queue;
pub mod record;
pub mod whitelist;

pub use clock::{Clock, ManualClock, SystemClock};
pub use kestrel_core::config::WhitelistScope;
pub use log::RecordLog;
pub use queue::ApprovalQueue;
pub use record::{ApprovalRecord, ApprovalRequest, Decision};
pub use whitelist::Whitelist;
