//! The aggregate program model.
//!
//! [`ProgramModel`] ties together the object table, the runner table, the
//! executed trace, and the pending next step of every live runner.  It is
//! mutated in exactly two places: by the coordinator while a transition is
//! applied, and by the search engine when it resets the model to the
//! initial state before a replay.

use std::collections::BTreeMap;

use log::trace;

use crate::objects::{ObjectTable, ThreadState, VisibleObject};
use crate::transition::Transition;
use crate::{ModelError, ObjectId, RunnerId};

/// Abstract state of the target: visible objects, runners, executed trace,
/// and pending transitions.
///
/// The trace and the pending set together are a faithful reconstruction of
/// the child's observable history: every runner either has exactly one
/// pending transition or has terminated.
#[derive(Debug, Clone, Default)]
pub struct ProgramModel {
    objects: ObjectTable,
    /// Runner id → the runner's visible-object id.  Dense, append-only.
    runners: Vec<ObjectId>,
    trace: Vec<Transition>,
    pending: BTreeMap<RunnerId, Transition>,
}

impl ProgramModel {
    /// Empty model with no runners and no objects.
    pub fn new() -> Self {
        Self::default()
    }

    /// The model of a target paused at the entry of `main`: a single
    /// running runner whose pending transition is its thread start.
    pub fn starting_at_main() -> Self {
        let mut model = Self::new();
        let main = model.add_runner(ThreadState::Running);
        let thread = model.thread_object(main).expect("main was just added");
        model.set_pending(main, Transition::thread_start(main, thread));
        model
    }

    /// Append a new runner in the given initial state.
    ///
    /// The runner's thread object is added to the object table, so runner
    /// ids and object ids stay aligned with order of first observation.
    pub fn add_runner(&mut self, initial: ThreadState) -> RunnerId {
        let runner = RunnerId::new(self.runners.len() as u32);
        let object = self.objects.add(VisibleObject::Thread { runner, state: initial });
        self.runners.push(object);
        runner
    }

    /// Record a freshly observed non-runner object.
    pub fn add_object(&mut self, object: VisibleObject) -> ObjectId {
        self.objects.add(object)
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    /// The visible-object id of a runner's thread object.
    pub fn thread_object(&self, runner: RunnerId) -> Result<ObjectId, ModelError> {
        self.runners
            .get(runner.index())
            .copied()
            .ok_or(ModelError::UnknownRunner(runner))
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// Replace the pending transition of `runner`.
    pub fn set_pending(&mut self, runner: RunnerId, transition: Transition) {
        debug_assert_eq!(transition.executor, runner);
        self.pending.insert(runner, transition);
    }

    /// The child just stopped after *attempting* its next operation:
    /// append the runner's previous pending transition (now executed) to
    /// the trace, apply it, and store the newly announced pending one.
    ///
    /// `None` announces runner termination — either a `thread_exit` was
    /// executed, or the main thread parked in the trampoline's exit loop —
    /// and leaves the runner terminal with no pending entry.
    pub fn model_executing_runner(
        &mut self,
        runner: RunnerId,
        next: Option<Transition>,
    ) -> Result<(), ModelError> {
        let executed = self.pending.remove(&runner).ok_or(ModelError::NoPending(runner))?;
        trace!("runner {runner} executed `{executed}`");
        self.trace.push(executed);
        executed.apply(&mut self.objects)?;
        match next {
            Some(transition) => self.set_pending(runner, transition),
            None => {
                let thread = self.thread_object(runner)?;
                self.objects.set_thread_state(thread, ThreadState::Exited)?;
            }
        }
        Ok(())
    }

    /// The totally ordered sequence of executed transitions.
    pub fn trace(&self) -> &[Transition] {
        &self.trace
    }

    /// Immutable view of every live runner's announced next step.
    pub fn pending_transitions(&self) -> &BTreeMap<RunnerId, Transition> {
        &self.pending
    }

    pub fn pending_of(&self, runner: RunnerId) -> Option<&Transition> {
        self.pending.get(&runner)
    }

    /// Runners whose pending transition is enabled, in runner-id order.
    pub fn enabled_runners(&self) -> Vec<RunnerId> {
        self.pending
            .iter()
            .filter(|(_, t)| t.is_enabled(&self.objects))
            .map(|(r, _)| *r)
            .collect()
    }

    pub fn is_enabled(&self, runner: RunnerId) -> bool {
        self.pending
            .get(&runner)
            .map(|t| t.is_enabled(&self.objects))
            .unwrap_or(false)
    }

    /// No runner can make progress, yet some runner has not exited.
    pub fn is_deadlocked(&self) -> bool {
        self.enabled_runners().is_empty() && self.live_runners() > 0
    }

    /// Number of runners that have not exited.
    pub fn live_runners(&self) -> usize {
        self.runners
            .iter()
            .filter(|obj| {
                !matches!(
                    self.objects.thread_state(**obj),
                    Ok(ThreadState::Exited)
                )
            })
            .count()
    }
}
