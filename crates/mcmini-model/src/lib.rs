//! Abstract model of the target program.
//!
//! The checker never inspects the target's memory.  Everything it knows is
//! reconstructed from the stream of transition announcements: a set of
//! *visible objects* (synchronization primitives), a set of *runners*
//! (threads), the totally ordered *trace* of executed transitions, and one
//! *pending* transition per live runner.  This crate is pure data — it
//! performs no I/O and holds no process state — so the search engine can
//! clone, rewind, and replay it freely.

use std::fmt;

use thiserror::Error;

pub mod objects;
pub mod program;
pub mod transition;

mod relations;

pub use objects::{CondObject, CondState, MutexState, ObjectTable, ThreadState, VisibleObject};
pub use program::ProgramModel;
pub use transition::{Transition, TransitionKind};

// ═══════════════════════════════════════════════════════════════════════
//  Identifiers
// ═══════════════════════════════════════════════════════════════════════

/// Identity of one visible object, dense within a search session in order
/// of first observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Distinguished id denoting absence.
    pub const INVALID: ObjectId = ObjectId(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        ObjectId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one runner (target-side thread).
///
/// Every runner is also a visible object and therefore owns an [`ObjectId`]
/// as well; the runner id is the scheduling identity.  The main thread is
/// runner 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnerId(u32);

impl RunnerId {
    /// The main thread of the target.
    pub const MAIN: RunnerId = RunnerId(0);

    pub const fn new(raw: u32) -> Self {
        RunnerId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════════════

/// The target performed an operation whose precondition does not hold
/// (locking an uninitialized mutex, waiting with a mismatched mutex, …).
///
/// Not a checker failure: the search reports it together with the current
/// trace and prunes the branch.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UndefinedBehavior {
    message: String,
}

impl UndefinedBehavior {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised by model mutation.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("object {0} is not part of the model")]
    UnknownObject(ObjectId),

    #[error("object {0} is not a {1}")]
    NotA(ObjectId, &'static str),

    #[error("runner {0} is not part of the model")]
    UnknownRunner(RunnerId),

    #[error("runner {0} has no pending transition")]
    NoPending(RunnerId),

    #[error("transition `{0}` executed while disabled")]
    Disabled(String),

    #[error("undefined behavior in the target: {0}")]
    UndefinedBehavior(#[from] UndefinedBehavior),
}
