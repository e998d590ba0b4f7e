//! Scripted transactions and interleaving schedulers
//!
//! This crate turns a list of SQL steps into a transaction that can be
//! paused at named checkpoints, and provides two ways to interleave several
//! such transactions:
//! - `CooperativeScheduler`: one thread, one step at a time, caller decides
//!   the order
//! - `PreemptiveScheduler`: one thread per transaction, checkpoints park the
//!   thread until the scenario resumes it
//!
//! Every transaction holds its own pooled connection from `begin` until it
//! commits, rolls back or fails.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cooperative;
pub mod preemptive;
pub mod script;
pub mod transaction;

pub use cooperative::{CheckpointWait, CooperativeScheduler, ResumeToken, ScheduleEvent};
pub use preemptive::{PreemptiveScheduler, DEFAULT_DROP_GRACE};
pub use script::{Bindings, SqlText, Step, TransactionScript};
pub use transaction::{
    OutcomeKind, ScriptedTransaction, StepOutcome, TransactionFailure, TransactionOutcome,
    TransactionState,
};
