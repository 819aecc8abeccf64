//! The transition algebra: one value type per visible operation.
//!
//! A transition is an immutable record of one scheduled step: the runner
//! that executes it, the operation kind, and the object ids it touches.
//! Each kind carries three pure functions over the model — `is_enabled`
//! (local precondition), `apply` (object-state update), and the dependency
//! and co-enabledness relations (in `relations.rs`).

use std::fmt;

use crate::objects::{CondState, MutexState, ObjectTable, ThreadState};
use crate::{ModelError, ObjectId, RunnerId, UndefinedBehavior};

/// The operation a transition performs, with the object ids it references.
///
/// Thread operations carry the *thread object* id alongside the runner id:
/// the relations compare transitions by object-id overlap, and a thread's
/// scheduling identity and visible-object identity are distinct id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// The runner begins executing its start routine.
    ThreadStart { thread: ObjectId },
    /// The runner's start routine returned.
    ThreadExit { thread: ObjectId },
    ThreadCreate { child: RunnerId, child_thread: ObjectId },
    ThreadJoin { target: RunnerId, target_thread: ObjectId },
    MutexInit { mutex: ObjectId },
    MutexLock { mutex: ObjectId },
    MutexUnlock { mutex: ObjectId },
    CondInit { cond: ObjectId },
    /// First half of a wait: enqueue on `cond` and release `mutex`.
    CondEnqueue { cond: ObjectId, mutex: ObjectId },
    CondSignal { cond: ObjectId },
    CondBroadcast { cond: ObjectId },
    /// Second half of a wait: consume a wake and re-acquire `mutex`.
    CondWaitResume { cond: ObjectId, mutex: ObjectId },
    CondDestroy { cond: ObjectId },
}

/// One scheduled visible action of one runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub executor: RunnerId,
    pub kind: TransitionKind,
}

impl Transition {
    pub fn new(executor: RunnerId, kind: TransitionKind) -> Self {
        Self { executor, kind }
    }

    pub fn thread_start(executor: RunnerId, thread: ObjectId) -> Self {
        Self::new(executor, TransitionKind::ThreadStart { thread })
    }

    pub fn thread_exit(executor: RunnerId, thread: ObjectId) -> Self {
        Self::new(executor, TransitionKind::ThreadExit { thread })
    }

    pub fn thread_create(executor: RunnerId, child: RunnerId, child_thread: ObjectId) -> Self {
        Self::new(executor, TransitionKind::ThreadCreate { child, child_thread })
    }

    pub fn thread_join(executor: RunnerId, target: RunnerId, target_thread: ObjectId) -> Self {
        Self::new(executor, TransitionKind::ThreadJoin { target, target_thread })
    }

    pub fn mutex_init(executor: RunnerId, mutex: ObjectId) -> Self {
        Self::new(executor, TransitionKind::MutexInit { mutex })
    }

    pub fn mutex_lock(executor: RunnerId, mutex: ObjectId) -> Self {
        Self::new(executor, TransitionKind::MutexLock { mutex })
    }

    pub fn mutex_unlock(executor: RunnerId, mutex: ObjectId) -> Self {
        Self::new(executor, TransitionKind::MutexUnlock { mutex })
    }

    pub fn cond_init(executor: RunnerId, cond: ObjectId) -> Self {
        Self::new(executor, TransitionKind::CondInit { cond })
    }

    pub fn cond_enqueue(executor: RunnerId, cond: ObjectId, mutex: ObjectId) -> Self {
        Self::new(executor, TransitionKind::CondEnqueue { cond, mutex })
    }

    pub fn cond_signal(executor: RunnerId, cond: ObjectId) -> Self {
        Self::new(executor, TransitionKind::CondSignal { cond })
    }

    pub fn cond_broadcast(executor: RunnerId, cond: ObjectId) -> Self {
        Self::new(executor, TransitionKind::CondBroadcast { cond })
    }

    pub fn cond_wait_resume(executor: RunnerId, cond: ObjectId, mutex: ObjectId) -> Self {
        Self::new(executor, TransitionKind::CondWaitResume { cond, mutex })
    }

    pub fn cond_destroy(executor: RunnerId, cond: ObjectId) -> Self {
        Self::new(executor, TransitionKind::CondDestroy { cond })
    }

    /// The object ids this transition operates on.
    pub(crate) fn object_refs(&self) -> [Option<ObjectId>; 2] {
        use TransitionKind::*;
        match self.kind {
            ThreadStart { thread } | ThreadExit { thread } => [Some(thread), None],
            ThreadCreate { child_thread, .. } => [Some(child_thread), None],
            ThreadJoin { target_thread, .. } => [Some(target_thread), None],
            MutexInit { mutex } | MutexLock { mutex } | MutexUnlock { mutex } => {
                [Some(mutex), None]
            }
            CondInit { cond } | CondSignal { cond } | CondBroadcast { cond }
            | CondDestroy { cond } => [Some(cond), None],
            CondEnqueue { cond, mutex } | CondWaitResume { cond, mutex } => {
                [Some(cond), Some(mutex)]
            }
        }
    }

    /// Whether the two transitions reference at least one common object.
    pub fn shares_object_with(&self, other: &Transition) -> bool {
        self.object_refs()
            .into_iter()
            .flatten()
            .any(|id| other.object_refs().into_iter().flatten().any(|o| o == id))
    }

    /// True for transitions after which the runner never posts again: the
    /// coordinator releases the runner without awaiting a mailbox posting.
    pub fn ends_runner(&self) -> bool {
        matches!(self.kind, TransitionKind::ThreadExit { .. })
    }

    /// Local precondition of this transition in the given object state.
    ///
    /// Lookups that fail resolve to *disabled* rather than an error: a
    /// pending transition always references observed objects, so a miss
    /// here only happens on a model the caller is still assembling.
    pub fn is_enabled(&self, objects: &ObjectTable) -> bool {
        use TransitionKind::*;
        match self.kind {
            MutexLock { mutex } => {
                matches!(objects.mutex(mutex), Ok(MutexState::Unlocked))
            }
            ThreadJoin { target_thread, .. } => {
                matches!(objects.thread_state(target_thread), Ok(ThreadState::Exited))
            }
            CondWaitResume { cond, mutex } => {
                let woken = objects
                    .cond(cond)
                    .map(|c| c.wake_set.contains(&self.executor))
                    .unwrap_or(false);
                woken && matches!(objects.mutex(mutex), Ok(MutexState::Unlocked))
            }
            ThreadStart { .. } | ThreadExit { .. } | ThreadCreate { .. } | MutexInit { .. }
            | MutexUnlock { .. } | CondInit { .. } | CondEnqueue { .. } | CondSignal { .. }
            | CondBroadcast { .. } | CondDestroy { .. } => true,
        }
    }

    /// Update the affected objects.  Never touches unrelated objects.
    ///
    /// Precondition violations that a real pthread implementation leaves
    /// undefined surface as [`ModelError::UndefinedBehavior`]; scheduling a
    /// disabled transition is a checker bug and surfaces as
    /// [`ModelError::Disabled`].
    pub fn apply(&self, objects: &mut ObjectTable) -> Result<(), ModelError> {
        use TransitionKind::*;
        match self.kind {
            ThreadStart { thread } => objects.set_thread_state(thread, ThreadState::Running),
            ThreadExit { thread } => objects.set_thread_state(thread, ThreadState::Exited),
            ThreadCreate { child_thread, .. } => {
                // The child was observed in the embryo state by the
                // discovery callback; creation itself changes nothing.
                objects.thread_state(child_thread).map(|_| ())
            }
            ThreadJoin { target_thread, .. } => {
                match objects.thread_state(target_thread)? {
                    ThreadState::Exited => Ok(()),
                    _ => Err(ModelError::Disabled(self.to_string())),
                }
            }
            MutexInit { mutex } => {
                *objects.mutex_mut(mutex)? = MutexState::Unlocked;
                Ok(())
            }
            MutexLock { mutex } => match *objects.mutex(mutex)? {
                MutexState::Unlocked => {
                    *objects.mutex_mut(mutex)? = MutexState::LockedBy(self.executor);
                    Ok(())
                }
                MutexState::Uninitialized => Err(UndefinedBehavior::new(
                    "Attempting to lock an uninitialized mutex",
                )
                .into()),
                MutexState::LockedBy(_) => Err(ModelError::Disabled(self.to_string())),
            },
            MutexUnlock { mutex } => match *objects.mutex(mutex)? {
                MutexState::LockedBy(_) => {
                    *objects.mutex_mut(mutex)? = MutexState::Unlocked;
                    Ok(())
                }
                MutexState::Unlocked | MutexState::Uninitialized => Err(UndefinedBehavior::new(
                    "Attempting to unlock a mutex that is not locked",
                )
                .into()),
            },
            CondInit { cond } => {
                let c = objects.cond_mut(cond)?;
                c.state = CondState::Ready;
                c.mutex = None;
                c.sleep_queue.clear();
                c.wake_set.clear();
                Ok(())
            }
            CondEnqueue { cond, mutex } => {
                match objects.cond(cond)?.state {
                    CondState::Uninitialized => {
                        return Err(UndefinedBehavior::new(
                            "Attempting to wait on an uninitialized condition variable",
                        )
                        .into())
                    }
                    CondState::Destroyed => {
                        return Err(UndefinedBehavior::new(
                            "Attempting to wait on a destroyed condition variable",
                        )
                        .into())
                    }
                    CondState::Ready => {}
                }
                if let Some(bound) = objects.cond(cond)?.mutex {
                    if bound != mutex {
                        return Err(UndefinedBehavior::new(
                            "A mutex has already been associated with this condition \
                             variable; waiting with a different mutex is undefined",
                        )
                        .into());
                    }
                }
                match *objects.mutex(mutex)? {
                    MutexState::LockedBy(owner) if owner == self.executor => {}
                    _ => {
                        return Err(UndefinedBehavior::new(
                            "Attempting to wait on a condition variable without holding \
                             the mutex",
                        )
                        .into())
                    }
                }
                let c = objects.cond_mut(cond)?;
                c.mutex = Some(mutex);
                c.sleep_queue.push(self.executor);
                *objects.mutex_mut(mutex)? = MutexState::Unlocked;
                let thread = self.thread_object_of_executor(objects)?;
                objects.set_thread_state(thread, ThreadState::SleepingOn(cond))
            }
            CondSignal { cond } => {
                let c = objects.cond_mut(cond)?;
                if c.state != CondState::Ready {
                    return Err(UndefinedBehavior::new(
                        "Attempting to signal a condition variable that is not initialized",
                    )
                    .into());
                }
                c.wake_one();
                Ok(())
            }
            CondBroadcast { cond } => {
                let c = objects.cond_mut(cond)?;
                if c.state != CondState::Ready {
                    return Err(UndefinedBehavior::new(
                        "Attempting to broadcast a condition variable that is not initialized",
                    )
                    .into());
                }
                c.wake_all();
                Ok(())
            }
            CondWaitResume { cond, mutex } => {
                let c = objects.cond_mut(cond)?;
                let Some(pos) = c.wake_set.iter().position(|r| *r == self.executor) else {
                    return Err(ModelError::Disabled(self.to_string()));
                };
                c.wake_set.remove(pos);
                match *objects.mutex(mutex)? {
                    MutexState::Unlocked => {
                        *objects.mutex_mut(mutex)? = MutexState::LockedBy(self.executor)
                    }
                    _ => return Err(ModelError::Disabled(self.to_string())),
                }
                let thread = self.thread_object_of_executor(objects)?;
                objects.set_thread_state(thread, ThreadState::Running)
            }
            CondDestroy { cond } => {
                let c = objects.cond_mut(cond)?;
                if c.has_waiters() {
                    return Err(UndefinedBehavior::new(
                        "Attempting to destroy a condition variable with waiters",
                    )
                    .into());
                }
                c.state = CondState::Destroyed;
                Ok(())
            }
        }
    }

    fn thread_object_of_executor(&self, objects: &ObjectTable) -> Result<ObjectId, ModelError> {
        objects
            .iter()
            .find_map(|(id, o)| match o {
                crate::VisibleObject::Thread { runner, .. } if *runner == self.executor => {
                    Some(id)
                }
                _ => None,
            })
            .ok_or(ModelError::UnknownRunner(self.executor))
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TransitionKind::*;
        match self.kind {
            ThreadStart { .. } => write!(f, "thread_start"),
            ThreadExit { .. } => write!(f, "thread_exit"),
            ThreadCreate { child, .. } => write!(f, "pthread_create({child})"),
            ThreadJoin { target, .. } => write!(f, "pthread_join({target})"),
            MutexInit { mutex } => write!(f, "pthread_mutex_init({mutex})"),
            MutexLock { mutex } => write!(f, "pthread_mutex_lock({mutex})"),
            MutexUnlock { mutex } => write!(f, "pthread_mutex_unlock({mutex})"),
            CondInit { cond } => write!(f, "pthread_cond_init({cond})"),
            CondEnqueue { cond, mutex } => {
                write!(f, "pthread_cond_wait({cond}, {mutex}) (awake)")
            }
            CondSignal { cond } => write!(f, "pthread_cond_signal({cond})"),
            CondBroadcast { cond } => write!(f, "pthread_cond_broadcast({cond})"),
            CondWaitResume { cond, mutex } => {
                write!(f, "pthread_cond_wait({cond}, {mutex}) (asleep)")
            }
            CondDestroy { cond } => write!(f, "pthread_cond_destroy({cond})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{CondObject, VisibleObject};

    fn table_with_thread(runner: RunnerId) -> (ObjectTable, ObjectId) {
        let mut objects = ObjectTable::new();
        let thread = objects.add(VisibleObject::Thread { runner, state: ThreadState::Running });
        (objects, thread)
    }

    #[test]
    fn lock_is_enabled_only_on_an_unlocked_mutex() {
        let (mut objects, _) = table_with_thread(RunnerId::MAIN);
        let m = objects.add(VisibleObject::Mutex(MutexState::Uninitialized));
        let lock = Transition::mutex_lock(RunnerId::MAIN, m);

        assert!(!lock.is_enabled(&objects));
        Transition::mutex_init(RunnerId::MAIN, m).apply(&mut objects).unwrap();
        assert!(lock.is_enabled(&objects));
        lock.apply(&mut objects).unwrap();
        assert_eq!(*objects.mutex(m).unwrap(), MutexState::LockedBy(RunnerId::MAIN));
        assert!(!lock.is_enabled(&objects));
    }

    #[test]
    fn lock_of_an_uninitialized_mutex_is_undefined_behavior() {
        let (mut objects, _) = table_with_thread(RunnerId::MAIN);
        let m = objects.add(VisibleObject::Mutex(MutexState::Uninitialized));
        let err = Transition::mutex_lock(RunnerId::MAIN, m).apply(&mut objects).unwrap_err();
        assert!(matches!(err, ModelError::UndefinedBehavior(_)));
        assert!(err.to_string().contains("uninitialized mutex"));
    }

    #[test]
    fn unlock_of_an_unlocked_mutex_is_undefined_behavior() {
        let (mut objects, _) = table_with_thread(RunnerId::MAIN);
        let m = objects.add(VisibleObject::Mutex(MutexState::Unlocked));
        let err = Transition::mutex_unlock(RunnerId::MAIN, m).apply(&mut objects).unwrap_err();
        assert!(matches!(err, ModelError::UndefinedBehavior(_)));
    }

    #[test]
    fn join_is_enabled_once_the_target_exited() {
        let (mut objects, _) = table_with_thread(RunnerId::MAIN);
        let child = RunnerId::new(1);
        let child_thread =
            objects.add(VisibleObject::Thread { runner: child, state: ThreadState::Running });
        let join = Transition::thread_join(RunnerId::MAIN, child, child_thread);

        assert!(!join.is_enabled(&objects));
        Transition::thread_exit(child, child_thread).apply(&mut objects).unwrap();
        assert!(join.is_enabled(&objects));
        join.apply(&mut objects).unwrap();
    }

    #[test]
    fn enqueue_releases_the_mutex_and_sleeps_the_runner() {
        let (mut objects, thread) = table_with_thread(RunnerId::MAIN);
        let m = objects.add(VisibleObject::Mutex(MutexState::LockedBy(RunnerId::MAIN)));
        let c = objects.add(VisibleObject::Cond(CondObject::new(CondState::Ready)));

        Transition::cond_enqueue(RunnerId::MAIN, c, m).apply(&mut objects).unwrap();

        assert_eq!(*objects.mutex(m).unwrap(), MutexState::Unlocked);
        assert_eq!(objects.cond(c).unwrap().mutex, Some(m));
        assert_eq!(objects.cond(c).unwrap().sleep_queue, vec![RunnerId::MAIN]);
        assert_eq!(
            objects.thread_state(thread).unwrap(),
            ThreadState::SleepingOn(c)
        );
    }

    #[test]
    fn enqueue_with_a_different_mutex_is_undefined_behavior() {
        let (mut objects, _) = table_with_thread(RunnerId::MAIN);
        let m1 = objects.add(VisibleObject::Mutex(MutexState::LockedBy(RunnerId::MAIN)));
        let m2 = objects.add(VisibleObject::Mutex(MutexState::LockedBy(RunnerId::MAIN)));
        let c = objects.add(VisibleObject::Cond(CondObject::new(CondState::Ready)));

        Transition::cond_enqueue(RunnerId::MAIN, c, m1).apply(&mut objects).unwrap();
        *objects.mutex_mut(m2).unwrap() = MutexState::LockedBy(RunnerId::MAIN);
        let err = Transition::cond_enqueue(RunnerId::MAIN, c, m2).apply(&mut objects).unwrap_err();
        assert!(matches!(err, ModelError::UndefinedBehavior(_)));
    }

    #[test]
    fn wait_resume_needs_a_wake_and_a_free_mutex() {
        let (mut objects, thread) = table_with_thread(RunnerId::MAIN);
        let m = objects.add(VisibleObject::Mutex(MutexState::LockedBy(RunnerId::MAIN)));
        let c = objects.add(VisibleObject::Cond(CondObject::new(CondState::Ready)));

        Transition::cond_enqueue(RunnerId::MAIN, c, m).apply(&mut objects).unwrap();
        let resume = Transition::cond_wait_resume(RunnerId::MAIN, c, m);
        assert!(!resume.is_enabled(&objects));

        Transition::cond_signal(RunnerId::new(1), c).apply(&mut objects).unwrap();
        assert!(resume.is_enabled(&objects));

        resume.apply(&mut objects).unwrap();
        assert_eq!(*objects.mutex(m).unwrap(), MutexState::LockedBy(RunnerId::MAIN));
        assert_eq!(objects.thread_state(thread).unwrap(), ThreadState::Running);
        assert!(!objects.cond(c).unwrap().has_waiters());
    }

    #[test]
    fn destroying_a_cond_with_waiters_is_undefined_behavior() {
        let (mut objects, _) = table_with_thread(RunnerId::MAIN);
        let m = objects.add(VisibleObject::Mutex(MutexState::LockedBy(RunnerId::MAIN)));
        let c = objects.add(VisibleObject::Cond(CondObject::new(CondState::Ready)));
        Transition::cond_enqueue(RunnerId::MAIN, c, m).apply(&mut objects).unwrap();

        let err = Transition::cond_destroy(RunnerId::new(1), c).apply(&mut objects).unwrap_err();
        assert!(matches!(err, ModelError::UndefinedBehavior(_)));
    }

    #[test]
    fn transition_strings_use_the_pthread_names() {
        let t = Transition::mutex_lock(RunnerId::new(1), ObjectId::new(2));
        assert_eq!(t.to_string(), "pthread_mutex_lock(2)");
        let w = Transition::cond_enqueue(RunnerId::new(1), ObjectId::new(3), ObjectId::new(2));
        assert_eq!(w.to_string(), "pthread_cond_wait(3, 2) (awake)");
        assert_eq!(
            Transition::thread_start(RunnerId::MAIN, ObjectId::new(0)).to_string(),
            "thread_start"
        );
    }
}
