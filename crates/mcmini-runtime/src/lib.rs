//! Real-world side of the checker: child processes and the coordinator.
//!
//! The model crate knows nothing about processes; this crate owns the
//! machinery that turns a live child into a stream of model transitions —
//! a [`ProcessSource`] that spawns instrumented targets, the
//! [`AddressMap`] translating child-side addresses into model identities,
//! the transition-discovery callbacks that parse mailbox postings, and the
//! [`Coordinator`] that drives one runner at a time.

use thiserror::Error;

use mcmini_model::{ModelError, UndefinedBehavior};

pub mod address_map;
pub mod callbacks;
pub mod coordinator;
pub mod fork_source;
pub mod process;

pub use address_map::{AddressMap, ObjectObservatory, RemoteAddr};
pub use callbacks::TransitionRegistry;
pub use coordinator::Coordinator;
pub use fork_source::{ForkProcessSource, Target};
pub use process::{ChildProcess, ProcessError, ProcessSource};

/// Errors surfaced to the search loop by the coordinator.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(
        "execution resulted in a runner scheduled to execute the transition type with the \
         tag {tag:#x} (`{name}`), but this tag was not registered before model checking \
         began; double check that the coordinator was configured with every transition \
         kind the trampoline announces"
    )]
    UnregisteredTag { tag: u64, name: &'static str },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl RuntimeError {
    /// The undefined-behavior report carried by this error, if it is one.
    ///
    /// Undefined behavior in the target prunes the current search branch;
    /// every other runtime error aborts the search.
    pub fn undefined_behavior(&self) -> Option<&UndefinedBehavior> {
        match self {
            RuntimeError::Model(ModelError::UndefinedBehavior(ub)) => Some(ub),
            _ => None,
        }
    }
}

impl From<UndefinedBehavior> for RuntimeError {
    fn from(ub: UndefinedBehavior) -> Self {
        RuntimeError::Model(ModelError::UndefinedBehavior(ub))
    }
}
