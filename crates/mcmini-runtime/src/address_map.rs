//! Mapping between child-side addresses and model identities.
//!
//! The child refers to its primitives by pointer (`pthread_mutex_t*`,
//! `pthread_t`); the model refers to them by dense [`ObjectId`]s assigned
//! in order of first observation.  The [`AddressMap`] keeps the
//! correspondence both ways, and the [`ObjectObservatory`] combines it
//! with mutable access to the live model so transition-discovery
//! callbacks can record newly observed objects.
//!
//! The map is reset together with the model on every child re-creation:
//! a deterministic target re-derives identical ids on every replay, so
//! nothing depends on raw addresses staying valid across executions.

use std::collections::HashMap;
use std::fmt;

use mcmini_model::objects::{ThreadState, VisibleObject};
use mcmini_model::{ModelError, ObjectId, ProgramModel, RunnerId, Transition, UndefinedBehavior};

/// An opaque pointer-sized handle into the child's address space.
///
/// Never dereferenced by the checker; it is an identity only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteAddr(pub u64);

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Bidirectional association between remote addresses and object ids.
///
/// Invariant: each remote address maps to at most one object id and each
/// object id to at most one remote address for the lifetime of one child.
#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    by_addr: HashMap<RemoteAddr, ObjectId>,
    by_object: HashMap<ObjectId, RemoteAddr>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, addr: RemoteAddr) -> bool {
        self.by_addr.contains_key(&addr)
    }

    /// The object id for `addr`, or [`ObjectId::INVALID`] when unknown.
    pub fn get_model_of(&self, addr: RemoteAddr) -> ObjectId {
        self.by_addr.get(&addr).copied().unwrap_or(ObjectId::INVALID)
    }

    /// The remote address recorded for an object id, if any.
    pub fn remote_of(&self, id: ObjectId) -> Option<RemoteAddr> {
        self.by_object.get(&id).copied()
    }

    fn insert(&mut self, addr: RemoteAddr, id: ObjectId) {
        debug_assert!(!self.by_addr.contains_key(&addr));
        debug_assert!(!self.by_object.contains_key(&id));
        self.by_addr.insert(addr, id);
        self.by_object.insert(id, addr);
    }
}

/// Callback-facing view pairing the live model with the address map.
///
/// Only the coordinator constructs instances, which is what guarantees
/// the model behind the map is the one the search is driving.
pub struct ObjectObservatory<'a> {
    model: &'a mut ProgramModel,
    map: &'a mut AddressMap,
}

impl<'a> ObjectObservatory<'a> {
    pub(crate) fn new(model: &'a mut ProgramModel, map: &'a mut AddressMap) -> Self {
        Self { model, map }
    }

    pub fn contains(&self, addr: RemoteAddr) -> bool {
        self.map.contains(addr)
    }

    pub fn object_for(&self, addr: RemoteAddr) -> ObjectId {
        self.map.get_model_of(addr)
    }

    /// Record a newly observed visible object, or return the id it was
    /// already observed under.
    pub fn observe_object(&mut self, addr: RemoteAddr, initial: VisibleObject) -> ObjectId {
        let existing = self.map.get_model_of(addr);
        if existing.is_valid() {
            return existing;
        }
        let id = self.model.add_object(initial);
        self.map.insert(addr, id);
        id
    }

    /// Record a newly observed runner and install its initial pending
    /// transition (its thread start), or return the runner it was already
    /// observed as.
    pub fn observe_runner(
        &mut self,
        addr: RemoteAddr,
        initial: ThreadState,
        start_transition: impl FnOnce(RunnerId, ObjectId) -> Transition,
    ) -> Result<RunnerId, ModelError> {
        let existing = self.map.get_model_of(addr);
        if existing.is_valid() {
            return self.runner_of(existing);
        }
        let runner = self.model.add_runner(initial);
        let thread = self.model.thread_object(runner)?;
        self.map.insert(addr, thread);
        self.model.set_pending(runner, start_transition(runner, thread));
        Ok(runner)
    }

    /// The runner represented by a thread object id.
    pub fn runner_of(&self, id: ObjectId) -> Result<RunnerId, ModelError> {
        match self.model.objects().get(id)? {
            VisibleObject::Thread { runner, .. } => Ok(*runner),
            _ => Err(ModelError::NotA(id, "thread")),
        }
    }

    /// The thread object id of a runner.
    pub fn thread_object(&self, runner: RunnerId) -> Result<ObjectId, ModelError> {
        self.model.thread_object(runner)
    }

    /// Read-only access to the object table, for precondition checks.
    pub fn objects(&self) -> &mcmini_model::ObjectTable {
        self.model.objects()
    }

    /// Convenience for callbacks rejecting an operation on a primitive
    /// that was never observed.
    pub fn known_object(
        &self,
        addr: RemoteAddr,
        complaint: &str,
    ) -> Result<ObjectId, UndefinedBehavior> {
        let id = self.object_for(addr);
        if id.is_valid() {
            Ok(id)
        } else {
            Err(UndefinedBehavior::new(complaint))
        }
    }
}
