//! Visible objects and their state machines.
//!
//! A visible object is the model's stand-in for one synchronization
//! primitive the target allocated at runtime.  Objects are owned by the
//! [`ObjectTable`], keyed by [`ObjectId`], and referred to by id everywhere
//! else; they are appended on first observation and never removed (a
//! destroyed primitive stays in the table in its terminal state).

use crate::{ModelError, ObjectId, RunnerId};

/// State machine of a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    /// Observed (its address appeared in a payload) but not yet
    /// initialized by the target.
    Uninitialized,
    Unlocked,
    LockedBy(RunnerId),
}

/// State machine of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created but its start step has not executed yet.
    Embryo,
    Running,
    /// Asleep in the queue of the given condition variable.
    SleepingOn(ObjectId),
    Exited,
}

/// Lifecycle of a condition variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondState {
    Uninitialized,
    Ready,
    Destroyed,
}

/// A condition variable: lifecycle state, the mutex bound to it (fixed at
/// first enqueue), the ordered queue of sleeping runners, and the runners
/// that have been handed a wake but have not yet re-acquired the mutex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondObject {
    pub state: CondState,
    pub mutex: Option<ObjectId>,
    pub sleep_queue: Vec<RunnerId>,
    pub wake_set: Vec<RunnerId>,
}

impl CondObject {
    pub fn new(state: CondState) -> Self {
        Self { state, mutex: None, sleep_queue: Vec::new(), wake_set: Vec::new() }
    }

    /// Move the oldest sleeper, if any, into the wake set.
    pub fn wake_one(&mut self) {
        if !self.sleep_queue.is_empty() {
            let runner = self.sleep_queue.remove(0);
            self.wake_set.push(runner);
        }
    }

    /// Move every sleeper into the wake set, preserving queue order.
    pub fn wake_all(&mut self) {
        self.wake_set.append(&mut self.sleep_queue);
    }

    pub fn has_waiters(&self) -> bool {
        !self.sleep_queue.is_empty() || !self.wake_set.is_empty()
    }
}

/// One visible object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibleObject {
    Mutex(MutexState),
    Thread { runner: RunnerId, state: ThreadState },
    Cond(CondObject),
}

/// Owner of every visible object in one model instance.
///
/// Ids are indices: dense, assigned in order of first observation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectTable {
    objects: Vec<VisibleObject>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: VisibleObject) -> ObjectId {
        let id = ObjectId::new(self.objects.len() as u32);
        self.objects.push(object);
        id
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        id.is_valid() && id.index() < self.objects.len()
    }

    pub fn get(&self, id: ObjectId) -> Result<&VisibleObject, ModelError> {
        self.objects.get(id.index()).ok_or(ModelError::UnknownObject(id))
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut VisibleObject, ModelError> {
        self.objects.get_mut(id.index()).ok_or(ModelError::UnknownObject(id))
    }

    pub fn mutex(&self, id: ObjectId) -> Result<&MutexState, ModelError> {
        match self.get(id)? {
            VisibleObject::Mutex(state) => Ok(state),
            _ => Err(ModelError::NotA(id, "mutex")),
        }
    }

    pub fn mutex_mut(&mut self, id: ObjectId) -> Result<&mut MutexState, ModelError> {
        match self.get_mut(id)? {
            VisibleObject::Mutex(state) => Ok(state),
            _ => Err(ModelError::NotA(id, "mutex")),
        }
    }

    pub fn cond(&self, id: ObjectId) -> Result<&CondObject, ModelError> {
        match self.get(id)? {
            VisibleObject::Cond(cond) => Ok(cond),
            _ => Err(ModelError::NotA(id, "condition variable")),
        }
    }

    pub fn cond_mut(&mut self, id: ObjectId) -> Result<&mut CondObject, ModelError> {
        match self.get_mut(id)? {
            VisibleObject::Cond(cond) => Ok(cond),
            _ => Err(ModelError::NotA(id, "condition variable")),
        }
    }

    pub fn thread_state(&self, id: ObjectId) -> Result<ThreadState, ModelError> {
        match self.get(id)? {
            VisibleObject::Thread { state, .. } => Ok(*state),
            _ => Err(ModelError::NotA(id, "thread")),
        }
    }

    pub fn set_thread_state(&mut self, id: ObjectId, new: ThreadState) -> Result<(), ModelError> {
        match self.get_mut(id)? {
            VisibleObject::Thread { state, .. } => {
                *state = new;
                Ok(())
            }
            _ => Err(ModelError::NotA(id, "thread")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &VisibleObject)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, o)| (ObjectId::new(i as u32), o))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_in_observation_order() {
        let mut table = ObjectTable::new();
        let a = table.add(VisibleObject::Mutex(MutexState::Uninitialized));
        let b = table.add(VisibleObject::Cond(CondObject::new(CondState::Uninitialized)));
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);
        assert!(table.contains(a));
        assert!(!table.contains(ObjectId::INVALID));
        assert!(!table.contains(ObjectId::new(2)));
    }

    #[test]
    fn typed_accessors_reject_wrong_variants() {
        let mut table = ObjectTable::new();
        let m = table.add(VisibleObject::Mutex(MutexState::Unlocked));
        assert!(table.mutex(m).is_ok());
        assert!(matches!(table.cond(m), Err(ModelError::NotA(_, _))));
        assert!(matches!(table.thread_state(m), Err(ModelError::NotA(_, _))));
    }

    #[test]
    fn signal_wakes_the_oldest_sleeper_first() {
        let mut cond = CondObject::new(CondState::Ready);
        cond.sleep_queue = vec![RunnerId::new(2), RunnerId::new(1)];
        cond.wake_one();
        assert_eq!(cond.wake_set, vec![RunnerId::new(2)]);
        assert_eq!(cond.sleep_queue, vec![RunnerId::new(1)]);
    }

    #[test]
    fn broadcast_drains_the_whole_queue() {
        let mut cond = CondObject::new(CondState::Ready);
        cond.sleep_queue = vec![RunnerId::new(3), RunnerId::new(4)];
        cond.wake_all();
        assert!(cond.sleep_queue.is_empty());
        assert_eq!(cond.wake_set, vec![RunnerId::new(3), RunnerId::new(4)]);
        assert!(cond.has_waiters());
    }
}
