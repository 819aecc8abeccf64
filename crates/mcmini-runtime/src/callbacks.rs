//! Transition discovery: parsing mailbox postings into model transitions.
//!
//! The registry maps each mailbox tag to a callback that reads the posted
//! payload, translates the child-side addresses through the address map —
//! observing objects on first sight — and constructs the runner's new
//! pending transition.  Precondition violations that can be detected at
//! translation time (operating on a primitive that was never observed,
//! waiting with a mismatched mutex, …) surface as undefined behavior.

use std::collections::HashMap;

use mcmini_model::objects::{CondState, MutexState, ThreadState, VisibleObject};
use mcmini_model::{CondObject, RunnerId, Transition, UndefinedBehavior};
use mcmini_protocol::{self as protocol, MailboxView};

use crate::address_map::{ObjectObservatory, RemoteAddr};
use crate::RuntimeError;

/// Parses one mailbox posting into the runner's new pending transition.
pub type TransitionCallback =
    fn(RunnerId, &MailboxView, &mut ObjectObservatory<'_>) -> Result<Transition, RuntimeError>;

/// Tag → callback table, fixed before model checking begins.
#[derive(Default)]
pub struct TransitionRegistry {
    callbacks: HashMap<u64, TransitionCallback>,
}

impl TransitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering every transition the trampoline announces.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(protocol::TAG_MUTEX_INIT, mutex_init_callback);
        registry.register(protocol::TAG_MUTEX_LOCK, mutex_lock_callback);
        registry.register(protocol::TAG_MUTEX_UNLOCK, mutex_unlock_callback);
        registry.register(protocol::TAG_THREAD_CREATE, thread_create_callback);
        registry.register(protocol::TAG_THREAD_EXIT, thread_exit_callback);
        registry.register(protocol::TAG_THREAD_JOIN, thread_join_callback);
        registry.register(protocol::TAG_COND_INIT, cond_init_callback);
        registry.register(protocol::TAG_COND_ENQUEUE, cond_enqueue_callback);
        registry.register(protocol::TAG_COND_SIGNAL, cond_signal_callback);
        registry.register(protocol::TAG_COND_BROADCAST, cond_broadcast_callback);
        registry.register(protocol::TAG_COND_WAIT_RESUME, cond_wait_resume_callback);
        registry.register(protocol::TAG_COND_DESTROY, cond_destroy_callback);
        registry
    }

    pub fn register(&mut self, tag: u64, callback: TransitionCallback) {
        self.callbacks.insert(tag, callback);
    }

    pub fn get(&self, tag: u64) -> Option<TransitionCallback> {
        self.callbacks.get(&tag).copied()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Mutex callbacks
// ═══════════════════════════════════════════════════════════════════════

fn mutex_init_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let addr = RemoteAddr(view.address(0));
    let mutex = obs.observe_object(addr, VisibleObject::Mutex(MutexState::Uninitialized));
    Ok(Transition::mutex_init(runner, mutex))
}

fn mutex_lock_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let addr = RemoteAddr(view.address(0));
    let mutex = obs.known_object(addr, "Attempting to lock an uninitialized mutex")?;
    Ok(Transition::mutex_lock(runner, mutex))
}

fn mutex_unlock_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let addr = RemoteAddr(view.address(0));
    let mutex = obs.known_object(addr, "Attempting to unlock an uninitialized mutex")?;
    Ok(Transition::mutex_unlock(runner, mutex))
}

// ═══════════════════════════════════════════════════════════════════════
//  Thread callbacks
// ═══════════════════════════════════════════════════════════════════════

fn thread_create_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let addr = RemoteAddr(view.address(0));
    let child = obs.observe_runner(addr, ThreadState::Embryo, Transition::thread_start)?;
    let child_thread = obs.thread_object(child)?;
    Ok(Transition::thread_create(runner, child, child_thread))
}

fn thread_exit_callback(
    runner: RunnerId,
    _view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let thread = obs.thread_object(runner)?;
    Ok(Transition::thread_exit(runner, thread))
}

fn thread_join_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let addr = RemoteAddr(view.address(0));
    let target_thread = obs.known_object(addr, "Attempting to join an unknown thread")?;
    let target = obs.runner_of(target_thread)?;
    Ok(Transition::thread_join(runner, target, target_thread))
}

// ═══════════════════════════════════════════════════════════════════════
//  Condition-variable callbacks
// ═══════════════════════════════════════════════════════════════════════

fn cond_init_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let addr = RemoteAddr(view.address(0));
    let cond = obs.observe_object(
        addr,
        VisibleObject::Cond(CondObject::new(CondState::Uninitialized)),
    );
    Ok(Transition::cond_init(runner, cond))
}

fn cond_enqueue_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let cond_addr = RemoteAddr(view.address(0));
    let mutex_addr = RemoteAddr(view.address(1));
    let cond = obs.known_object(
        cond_addr,
        "Attempting to wait on a condition variable that is uninitialized",
    )?;
    let mutex = obs.known_object(
        mutex_addr,
        "Attempting to wait on a condition variable with an uninitialized mutex",
    )?;
    let state = obs.objects().cond(cond)?;
    if state.state == CondState::Destroyed {
        return Err(
            UndefinedBehavior::new("Attempting to wait on a destroyed condition variable").into(),
        );
    }
    if let Some(bound) = state.mutex {
        if bound != mutex {
            return Err(UndefinedBehavior::new(
                "A mutex has already been associated with this condition variable; \
                 attempting to use another mutex with the same condition variable is \
                 undefined",
            )
            .into());
        }
    }
    Ok(Transition::cond_enqueue(runner, cond, mutex))
}

fn cond_signal_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let addr = RemoteAddr(view.address(0));
    let cond = obs.known_object(
        addr,
        "Attempting to signal an uninitialized condition variable",
    )?;
    Ok(Transition::cond_signal(runner, cond))
}

fn cond_broadcast_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let addr = RemoteAddr(view.address(0));
    let cond = obs.known_object(
        addr,
        "Attempting to broadcast an uninitialized condition variable",
    )?;
    Ok(Transition::cond_broadcast(runner, cond))
}

fn cond_wait_resume_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let cond_addr = RemoteAddr(view.address(0));
    let mutex_addr = RemoteAddr(view.address(1));
    let cond = obs.known_object(
        cond_addr,
        "Attempting to resume a wait on an unknown condition variable",
    )?;
    let mutex = obs.known_object(mutex_addr, "Attempting to resume a wait with an unknown mutex")?;
    Ok(Transition::cond_wait_resume(runner, cond, mutex))
}

fn cond_destroy_callback(
    runner: RunnerId,
    view: &MailboxView,
    obs: &mut ObjectObservatory<'_>,
) -> Result<Transition, RuntimeError> {
    let addr = RemoteAddr(view.address(0));
    let cond = obs.known_object(
        addr,
        "Attempting to destroy an uninitialized condition variable",
    )?;
    Ok(Transition::cond_destroy(runner, cond))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcmini_model::{ProgramModel, TransitionKind};

    use crate::address_map::AddressMap;

    fn with_observatory<R>(
        model: &mut ProgramModel,
        map: &mut AddressMap,
        f: impl FnOnce(&mut ObjectObservatory<'_>) -> R,
    ) -> R {
        let mut obs = ObjectObservatory::new(model, map);
        f(&mut obs)
    }

    #[test]
    fn standard_registry_covers_every_posted_tag() {
        let registry = TransitionRegistry::standard();
        for tag in [
            protocol::TAG_MUTEX_INIT,
            protocol::TAG_MUTEX_LOCK,
            protocol::TAG_MUTEX_UNLOCK,
            protocol::TAG_THREAD_CREATE,
            protocol::TAG_THREAD_EXIT,
            protocol::TAG_THREAD_JOIN,
            protocol::TAG_COND_INIT,
            protocol::TAG_COND_ENQUEUE,
            protocol::TAG_COND_SIGNAL,
            protocol::TAG_COND_BROADCAST,
            protocol::TAG_COND_WAIT_RESUME,
            protocol::TAG_COND_DESTROY,
        ] {
            assert!(registry.get(tag).is_some(), "missing {}", protocol::tag_name(tag));
        }
        // Thread starts are installed by `observe_runner`, never posted;
        // process exit is handled by the coordinator itself.
        assert!(registry.get(protocol::TAG_THREAD_START).is_none());
        assert!(registry.get(protocol::TAG_PROCESS_EXIT).is_none());
    }

    #[test]
    fn init_observes_the_mutex_and_lock_reuses_it() {
        let mut model = ProgramModel::starting_at_main();
        let mut map = AddressMap::new();
        let view = MailboxView::new(protocol::TAG_MUTEX_INIT, [0x1000, 0, 0, 0]);

        let init = with_observatory(&mut model, &mut map, |obs| {
            mutex_init_callback(RunnerId::MAIN, &view, obs).unwrap()
        });
        let lock_view = MailboxView::new(protocol::TAG_MUTEX_LOCK, [0x1000, 0, 0, 0]);
        let lock = with_observatory(&mut model, &mut map, |obs| {
            mutex_lock_callback(RunnerId::MAIN, &lock_view, obs).unwrap()
        });

        match (init.kind, lock.kind) {
            (TransitionKind::MutexInit { mutex: a }, TransitionKind::MutexLock { mutex: b }) => {
                assert_eq!(a, b)
            }
            other => panic!("unexpected transitions: {other:?}"),
        }
    }

    #[test]
    fn locking_an_unobserved_mutex_is_undefined_behavior() {
        let mut model = ProgramModel::starting_at_main();
        let mut map = AddressMap::new();
        let view = MailboxView::new(protocol::TAG_MUTEX_LOCK, [0x4444, 0, 0, 0]);

        let err = with_observatory(&mut model, &mut map, |obs| {
            mutex_lock_callback(RunnerId::MAIN, &view, obs).unwrap_err()
        });
        let ub = err.undefined_behavior().expect("should be undefined behavior");
        assert_eq!(ub.message(), "Attempting to lock an uninitialized mutex");
    }

    #[test]
    fn create_observes_the_new_runner_and_installs_its_start() {
        let mut model = ProgramModel::starting_at_main();
        let mut map = AddressMap::new();
        let view = MailboxView::new(protocol::TAG_THREAD_CREATE, [0x9100, 0, 0, 0]);

        let create = with_observatory(&mut model, &mut map, |obs| {
            thread_create_callback(RunnerId::MAIN, &view, obs).unwrap()
        });
        let TransitionKind::ThreadCreate { child, .. } = create.kind else {
            panic!("expected a create, got {create}");
        };
        assert_eq!(child, RunnerId::new(1));
        assert_eq!(model.pending_of(child).unwrap().to_string(), "thread_start");
    }

    #[test]
    fn waiting_with_a_second_mutex_is_undefined_behavior() {
        use mcmini_model::Transition;

        let mut model = ProgramModel::starting_at_main();
        let mut map = AddressMap::new();
        let main = RunnerId::MAIN;

        // Observe one condition variable and two mutexes through the
        // discovery callbacks, then execute main through init, lock, and a
        // first wait so the condition becomes bound to the first mutex.
        let init_m1 = with_observatory(&mut model, &mut map, |obs| {
            mutex_init_callback(
                main,
                &MailboxView::new(protocol::TAG_MUTEX_INIT, [0x1000, 0, 0, 0]),
                obs,
            )
            .unwrap()
        });
        let init_c = with_observatory(&mut model, &mut map, |obs| {
            cond_init_callback(
                main,
                &MailboxView::new(protocol::TAG_COND_INIT, [0x2000, 0, 0, 0]),
                obs,
            )
            .unwrap()
        });
        with_observatory(&mut model, &mut map, |obs| {
            mutex_init_callback(
                main,
                &MailboxView::new(protocol::TAG_MUTEX_INIT, [0x1040, 0, 0, 0]),
                obs,
            )
            .unwrap()
        });
        let (TransitionKind::MutexInit { mutex: m1 }, TransitionKind::CondInit { cond: c }) =
            (init_m1.kind, init_c.kind)
        else {
            panic!("unexpected discovery results");
        };

        model.model_executing_runner(main, Some(init_m1)).unwrap();
        model.model_executing_runner(main, Some(init_c)).unwrap();
        model
            .model_executing_runner(main, Some(Transition::mutex_lock(main, m1)))
            .unwrap();
        model
            .model_executing_runner(main, Some(Transition::cond_enqueue(main, c, m1)))
            .unwrap();
        model
            .model_executing_runner(main, Some(Transition::cond_wait_resume(main, c, m1)))
            .unwrap();

        // Announcing a wait on the same condition with the other mutex.
        let view = MailboxView::new(protocol::TAG_COND_ENQUEUE, [0x2000, 0x1040, 0, 0]);
        let err = with_observatory(&mut model, &mut map, |obs| {
            cond_enqueue_callback(main, &view, obs).unwrap_err()
        });
        assert!(err.undefined_behavior().is_some());
    }
}
