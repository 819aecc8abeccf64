//! The process-source seam.
//!
//! A [`ProcessSource`] manufactures fresh children paused at the entry of
//! the target, ready to post their first transition; a [`ChildProcess`] is
//! one such child.  The search engine may discard the current child and
//! request a new one between any two steps, so children are ephemeral and
//! must release every resource on drop.
//!
//! [`ForkProcessSource`](crate::fork_source::ForkProcessSource) is the
//! fork-and-exec implementation.  A checkpoint-restart source would
//! implement the same pair of traits; this seam is its only coupling point.

use std::io;
use std::time::Duration;

use thiserror::Error;

use mcmini_model::RunnerId;
use mcmini_protocol::MailboxView;

/// Errors from spawning and steering child processes.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to create the shared-memory segment `{name}`: {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to map the shared-memory segment: {0}")]
    ShmMap(#[source] io::Error),

    #[error("failed to initialize a rendezvous semaphore: {0}")]
    SemInit(#[source] io::Error),

    #[error("failed to spawn the target `{target}`: {source}")]
    Spawn {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("the child process is not alive")]
    NotAlive,

    #[error("runner {0} is outside the mailbox segment")]
    RunnerOutOfRange(RunnerId),

    #[error("runner {0} did not post within {1:?}; the target may be blocked outside the registered primitive set")]
    PostTimeout(RunnerId, Duration),

    #[error("the child process died unexpectedly ({0})")]
    ChildDied(String),

    #[error("rendezvous protocol violation: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A live, paused child executing the target under instrumentation.
pub trait ChildProcess {
    /// Release the given runner, then block until it posts its next
    /// intended operation; returns a copy of the posting.
    ///
    /// At most one runner is released per call, and no further runner is
    /// released until the posting is observed, so at most one thread in
    /// the child is ever unblocked.
    fn execute_runner(&mut self, runner: RunnerId) -> Result<MailboxView, ProcessError>;

    /// Release the given runner without awaiting a posting.
    ///
    /// Used for transitions after which the runner never reaches another
    /// instrumented call (its thread exit).
    fn release_runner_final(&mut self, runner: RunnerId) -> Result<(), ProcessError>;

    fn is_alive(&self) -> bool;

    /// Kill the child and release its shared memory.  Idempotent; also
    /// performed on drop.
    fn terminate(&mut self);
}

/// Factory for fresh children, each paused at the target's entry point
/// with `thread_start(main)` as its implicit first transition.
pub trait ProcessSource {
    fn force_new_process(&mut self) -> Result<Box<dyn ChildProcess>, ProcessError>;
}
