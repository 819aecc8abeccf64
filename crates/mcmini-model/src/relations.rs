//! Dependency and co-enabledness over pairs of transitions.
//!
//! Both relations are symmetric and keyed on unordered variant pairs.  A
//! pair that is not registered falls back to the declared defaults:
//! *independent* and *co-enabled*.  Independence is the unsafe default —
//! every new transition kind must have its pairs audited here — while
//! co-enabledness over-approximates safely.
//!
//! Transitions referencing disjoint object sets are always independent,
//! before any table lookup.
//!
//! A `cond-enqueue(c, m)` behaves like `mutex-unlock(m)` toward mutex
//! operations (it releases the mutex), and a `cond-wait-resume(c, m)` like
//! `mutex-lock(m)` (it re-acquires it).

use crate::transition::{Transition, TransitionKind};

impl Transition {
    /// Happens-before dependency: swapping the order of two dependent
    /// transitions may change the outcome.
    pub fn depends(&self, other: &Transition) -> bool {
        if !self.shares_object_with(other) {
            return false;
        }
        registered_dependent(self, other)
            .or_else(|| registered_dependent(other, self))
            .unwrap_or(false)
    }

    /// Whether both transitions can simultaneously be in the pending set
    /// of some reachable state.
    pub fn co_enabled_with(&self, other: &Transition) -> bool {
        if self.executor == other.executor {
            // One pending transition per runner.
            return false;
        }
        registered_co_enabled(self, other)
            .or_else(|| registered_co_enabled(other, self))
            .unwrap_or(true)
    }
}

/// One direction of the unordered dependency table.
fn registered_dependent(a: &Transition, b: &Transition) -> Option<bool> {
    use TransitionKind::*;
    match (a.kind, b.kind) {
        // Mutex pairs on the same mutex.
        (MutexLock { mutex: m1 }, MutexLock { mutex: m2 }) if m1 == m2 => Some(true),
        (MutexLock { mutex: m1 }, MutexUnlock { mutex: m2 }) if m1 == m2 => Some(true),
        (MutexLock { mutex: m1 }, MutexInit { mutex: m2 }) if m1 == m2 => Some(true),

        // Thread lifecycle pairs on the same thread object.
        (ThreadCreate { child_thread: t1, .. }, ThreadStart { thread: t2 }) if t1 == t2 => {
            Some(true)
        }
        (ThreadCreate { child_thread: t1, .. }, ThreadJoin { target_thread: t2, .. })
            if t1 == t2 =>
        {
            Some(true)
        }
        (ThreadJoin { target_thread: t1, .. }, ThreadExit { thread: t2 }) if t1 == t2 => {
            Some(true)
        }

        // Enqueue releases its mutex: dependent with a lock of it, and
        // with any same-cond operation.
        (CondEnqueue { mutex: m1, .. }, MutexLock { mutex: m2 }) if m1 == m2 => Some(true),
        (CondEnqueue { cond: c1, .. }, CondEnqueue { cond: c2, .. }) if c1 == c2 => Some(true),

        // Wakeups order against enqueues, each other, and resumes.
        (CondSignal { cond: c1 }, CondEnqueue { cond: c2, .. }) if c1 == c2 => Some(true),
        (CondBroadcast { cond: c1 }, CondEnqueue { cond: c2, .. }) if c1 == c2 => Some(true),
        (CondSignal { cond: c1 }, CondSignal { cond: c2 }) if c1 == c2 => Some(true),
        (CondSignal { cond: c1 }, CondBroadcast { cond: c2 }) if c1 == c2 => Some(true),
        (CondBroadcast { cond: c1 }, CondBroadcast { cond: c2 }) if c1 == c2 => Some(true),
        (CondWaitResume { cond: c1, .. }, CondSignal { cond: c2 }) if c1 == c2 => Some(true),
        (CondWaitResume { cond: c1, .. }, CondBroadcast { cond: c2 }) if c1 == c2 => Some(true),
        (CondWaitResume { cond: c1, .. }, CondEnqueue { cond: c2, .. }) if c1 == c2 => Some(true),
        (CondWaitResume { cond: c1, .. }, CondWaitResume { cond: c2, .. }) if c1 == c2 => {
            Some(true)
        }

        // Resume re-acquires its mutex: treat as a lock of it.
        (CondWaitResume { mutex: m1, .. }, MutexLock { mutex: m2 }) if m1 == m2 => Some(true),
        (CondWaitResume { mutex: m1, .. }, MutexUnlock { mutex: m2 }) if m1 == m2 => Some(true),
        (CondWaitResume { mutex: m1, .. }, MutexInit { mutex: m2 }) if m1 == m2 => Some(true),
        (CondWaitResume { mutex: m1, .. }, CondEnqueue { mutex: m2, .. }) if m1 == m2 => {
            Some(true)
        }

        // Destruction orders against every same-cond operation.
        (CondDestroy { cond: c1 }, CondInit { cond: c2 }) if c1 == c2 => Some(true),
        (CondDestroy { cond: c1 }, CondEnqueue { cond: c2, .. }) if c1 == c2 => Some(true),
        (CondDestroy { cond: c1 }, CondSignal { cond: c2 }) if c1 == c2 => Some(true),
        (CondDestroy { cond: c1 }, CondBroadcast { cond: c2 }) if c1 == c2 => Some(true),
        (CondDestroy { cond: c1 }, CondWaitResume { cond: c2, .. }) if c1 == c2 => Some(true),
        (CondDestroy { cond: c1 }, CondDestroy { cond: c2 }) if c1 == c2 => Some(true),

        // Initialization orders against waits on the same cond.
        (CondInit { cond: c1 }, CondEnqueue { cond: c2, .. }) if c1 == c2 => Some(true),

        _ => None,
    }
}

/// One direction of the unordered co-enabledness table.
fn registered_co_enabled(a: &Transition, b: &Transition) -> Option<bool> {
    use TransitionKind::*;
    match (a.kind, b.kind) {
        // Mutual exclusion: two acquisitions of the same mutex can never
        // both be pending in a reachable state.
        (MutexLock { mutex: m1 }, MutexLock { mutex: m2 }) if m1 == m2 => Some(false),
        (MutexLock { mutex: m1 }, MutexInit { mutex: m2 }) if m1 == m2 => Some(false),
        (MutexLock { mutex: m1 }, MutexUnlock { mutex: m2 }) if m1 == m2 => Some(true),

        (ThreadCreate { child_thread: t1, .. }, ThreadStart { thread: t2 }) if t1 == t2 => {
            Some(false)
        }
        (ThreadCreate { child_thread: t1, .. }, ThreadJoin { target_thread: t2, .. })
            if t1 == t2 =>
        {
            Some(false)
        }
        (ThreadJoin { target_thread: t1, .. }, ThreadExit { thread: t2 }) if t1 == t2 => {
            Some(true)
        }

        // Only one waiter can complete the release of the shared mutex.
        (CondEnqueue { cond: c1, .. }, CondEnqueue { cond: c2, .. }) if c1 == c2 => Some(false),

        // Resume behaves as a lock of its mutex.
        (CondWaitResume { mutex: m1, .. }, MutexLock { mutex: m2 }) if m1 == m2 => Some(false),
        (CondWaitResume { mutex: m1, .. }, MutexInit { mutex: m2 }) if m1 == m2 => Some(false),
        (CondWaitResume { cond: c1, .. }, CondWaitResume { cond: c2, .. }) if c1 == c2 => {
            Some(false)
        }

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::transition::Transition;
    use crate::{ObjectId, RunnerId};

    const R0: RunnerId = RunnerId::MAIN;
    const R1: RunnerId = RunnerId::new(1);
    const R2: RunnerId = RunnerId::new(2);

    fn m(i: u32) -> ObjectId {
        ObjectId::new(i)
    }

    #[test]
    fn disjoint_object_sets_are_independent() {
        let a = Transition::mutex_lock(R1, m(1));
        let b = Transition::mutex_lock(R2, m(2));
        assert!(!a.depends(&b));
        assert!(!b.depends(&a));
    }

    #[test]
    fn both_relations_are_symmetric() {
        let pairs = [
            (Transition::mutex_lock(R1, m(1)), Transition::mutex_unlock(R2, m(1))),
            (Transition::mutex_lock(R1, m(1)), Transition::mutex_init(R2, m(1))),
            (Transition::thread_create(R0, R1, m(3)), Transition::thread_start(R1, m(3))),
            (Transition::thread_join(R0, R1, m(3)), Transition::thread_exit(R1, m(3))),
            (Transition::cond_enqueue(R1, m(4), m(1)), Transition::mutex_lock(R2, m(1))),
            (Transition::cond_signal(R1, m(4)), Transition::cond_enqueue(R2, m(4), m(1))),
            (Transition::mutex_lock(R1, m(1)), Transition::mutex_lock(R2, m(2))),
        ];
        for (a, b) in &pairs {
            assert_eq!(a.depends(b), b.depends(a), "depends not symmetric: {a} / {b}");
            assert_eq!(
                a.co_enabled_with(b),
                b.co_enabled_with(a),
                "co-enabled not symmetric: {a} / {b}"
            );
        }
    }

    #[test]
    fn same_mutex_locks_are_dependent_but_not_co_enabled() {
        let a = Transition::mutex_lock(R1, m(1));
        let b = Transition::mutex_lock(R2, m(1));
        assert!(a.depends(&b));
        assert!(!a.co_enabled_with(&b));
    }

    #[test]
    fn lock_and_unlock_of_the_same_mutex_are_dependent_and_co_enabled() {
        let a = Transition::mutex_lock(R1, m(1));
        let b = Transition::mutex_unlock(R2, m(1));
        assert!(a.depends(&b));
        assert!(a.co_enabled_with(&b));
    }

    #[test]
    fn join_and_exit_of_the_same_thread_are_dependent_and_co_enabled() {
        let join = Transition::thread_join(R0, R1, m(3));
        let exit = Transition::thread_exit(R1, m(3));
        assert!(join.depends(&exit));
        assert!(join.co_enabled_with(&exit));
    }

    #[test]
    fn create_and_start_of_the_same_thread_cannot_be_reordered() {
        let create = Transition::thread_create(R0, R1, m(3));
        let start = Transition::thread_start(R1, m(3));
        assert!(create.depends(&start));
        assert!(!create.co_enabled_with(&start));
    }

    #[test]
    fn enqueue_acts_as_an_unlock_toward_lock() {
        let enqueue = Transition::cond_enqueue(R1, m(4), m(1));
        let lock = Transition::mutex_lock(R2, m(1));
        assert!(enqueue.depends(&lock));
        assert!(enqueue.co_enabled_with(&lock));
    }

    #[test]
    fn same_cond_enqueues_are_dependent_and_not_co_enabled() {
        let a = Transition::cond_enqueue(R1, m(4), m(1));
        let b = Transition::cond_enqueue(R2, m(4), m(2));
        assert!(a.depends(&b));
        assert!(!a.co_enabled_with(&b));
    }

    #[test]
    fn unregistered_same_object_pairs_default_to_independent_and_co_enabled() {
        // Two unlocks of the same mutex are not in the table.
        let a = Transition::mutex_unlock(R1, m(1));
        let b = Transition::mutex_unlock(R2, m(1));
        assert!(!a.depends(&b));
        assert!(a.co_enabled_with(&b));
    }

    #[test]
    fn same_runner_transitions_are_never_co_enabled() {
        let a = Transition::mutex_lock(R1, m(1));
        let b = Transition::mutex_unlock(R1, m(2));
        assert!(!a.co_enabled_with(&b));
    }
}
