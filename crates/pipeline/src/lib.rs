//! The evaluation pipeline: scheduler, metrics computer, and the
//! requester façade tying them together.
//!
//! Jobs flow `queued -> submitted -> completed` in the [`JobScheduler`],
//! then `waiting -> computing` in the [`MetricsComputer`], which persists
//! a score row and drops the job on success. Both components snapshot
//! their lists to disk after every mutation, so a restart resumes where
//! the last process stopped.

pub mod computer;
pub mod error;
pub mod job;
pub mod requester;
pub mod scheduler;
pub mod snapshot;

#[cfg(test)]
mod testutil;

pub use computer::{ComputerList, MetricsComputer};
pub use error::PipelineError;
pub use job::Job;
pub use requester::Requester;
pub use scheduler::{JobList, JobScheduler, SubmitOutcome};
