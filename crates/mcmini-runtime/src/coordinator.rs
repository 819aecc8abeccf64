//! The coordinator: one model, one child, one step at a time.
//!
//! The coordinator owns the live [`ProgramModel`], the transition
//! registry, the process source, the current child, and the address map.
//! Executing a runner releases exactly that runner in the child, awaits
//! its next posting, translates it into a model transition, and hands it
//! to the model — so after every step the model is a faithful image of
//! the child's observable state.

use log::{debug, info};

use mcmini_model::{ProgramModel, RunnerId};
use mcmini_protocol::{tag_name, TAG_PROCESS_EXIT};

use crate::address_map::{AddressMap, ObjectObservatory};
use crate::callbacks::TransitionRegistry;
use crate::process::{ChildProcess, ProcessError, ProcessSource};
use crate::RuntimeError;

/// Binds the abstract model to a concrete child process.
pub struct Coordinator {
    model: ProgramModel,
    /// Template the model is reset to on every restart.
    initial_model: ProgramModel,
    registry: TransitionRegistry,
    source: Box<dyn ProcessSource>,
    child: Option<Box<dyn ChildProcess>>,
    address_map: AddressMap,
}

impl Coordinator {
    /// Create a coordinator and eagerly spawn the first child.
    pub fn new(
        initial_model: ProgramModel,
        registry: TransitionRegistry,
        mut source: Box<dyn ProcessSource>,
    ) -> Result<Self, RuntimeError> {
        let child = source.force_new_process()?;
        Ok(Self {
            model: initial_model.clone(),
            initial_model,
            registry,
            source,
            child: Some(child),
            address_map: AddressMap::new(),
        })
    }

    pub fn model(&self) -> &ProgramModel {
        &self.model
    }

    pub fn has_live_child(&self) -> bool {
        self.child.as_ref().map(|c| c.is_alive()).unwrap_or(false)
    }

    /// Execute the given runner's pending transition in the child and fold
    /// the resulting posting into the model.
    pub fn execute_runner(&mut self, runner: RunnerId) -> Result<(), RuntimeError> {
        let child = self.child.as_mut().ok_or(ProcessError::NotAlive)?;
        let pending = *self
            .model
            .pending_of(runner)
            .ok_or(mcmini_model::ModelError::NoPending(runner))?;

        if pending.ends_runner() {
            // The runner never reaches another instrumented call; release
            // it without awaiting a posting.
            child.release_runner_final(runner)?;
            self.model.model_executing_runner(runner, None)?;
            return Ok(());
        }

        let view = child.execute_runner(runner)?;
        if view.tag == TAG_PROCESS_EXIT {
            // The main thread parked in the trampoline's exit loop; it is
            // terminal from the model's point of view.
            debug!("runner {runner} announced process exit");
            self.model.model_executing_runner(runner, None)?;
            return Ok(());
        }

        let callback = self
            .registry
            .get(view.tag)
            .ok_or(RuntimeError::UnregisteredTag { tag: view.tag, name: tag_name(view.tag) })?;
        let mut observatory = ObjectObservatory::new(&mut self.model, &mut self.address_map);
        let next = callback(runner, &view, &mut observatory)?;
        self.model.model_executing_runner(runner, Some(next))?;
        Ok(())
    }

    /// Tear the current child down and bring up a fresh one, with the
    /// model and the address map back at the initial state.
    ///
    /// The search engine replays its chosen prefix afterwards by calling
    /// [`execute_runner`](Self::execute_runner) along it; a deterministic
    /// target re-derives identical object ids on the way.
    pub fn restart_from_scratch(&mut self) -> Result<(), RuntimeError> {
        info!("restarting the target from scratch");
        self.child = None; // terminates and releases the old child first
        self.model = self.initial_model.clone();
        self.address_map = AddressMap::new();
        self.child = Some(self.source.force_new_process()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcmini_protocol::MailboxView;

    /// A child that replays a fixed queue of postings.
    struct QueueChild {
        postings: Vec<MailboxView>,
        cursor: usize,
        alive: bool,
    }

    impl ChildProcess for QueueChild {
        fn execute_runner(&mut self, _runner: RunnerId) -> Result<MailboxView, ProcessError> {
            let view = self
                .postings
                .get(self.cursor)
                .copied()
                .ok_or_else(|| ProcessError::Protocol("queue exhausted".into()))?;
            self.cursor += 1;
            Ok(view)
        }

        fn release_runner_final(&mut self, _runner: RunnerId) -> Result<(), ProcessError> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive
        }

        fn terminate(&mut self) {
            self.alive = false;
        }
    }

    struct QueueSource {
        postings: Vec<MailboxView>,
    }

    impl ProcessSource for QueueSource {
        fn force_new_process(&mut self) -> Result<Box<dyn ChildProcess>, ProcessError> {
            Ok(Box::new(QueueChild { postings: self.postings.clone(), cursor: 0, alive: true }))
        }
    }

    fn coordinator_with(postings: Vec<MailboxView>) -> Coordinator {
        Coordinator::new(
            ProgramModel::starting_at_main(),
            TransitionRegistry::standard(),
            Box::new(QueueSource { postings }),
        )
        .unwrap()
    }

    #[test]
    fn a_posting_becomes_the_new_pending_transition() {
        let mut coordinator = coordinator_with(vec![MailboxView::new(
            mcmini_protocol::TAG_MUTEX_INIT,
            [0x1000, 0, 0, 0],
        )]);

        coordinator.execute_runner(RunnerId::MAIN).unwrap();

        let model = coordinator.model();
        assert_eq!(model.trace().len(), 1);
        assert_eq!(model.trace()[0].to_string(), "thread_start");
        assert_eq!(
            model.pending_of(RunnerId::MAIN).unwrap().to_string(),
            "pthread_mutex_init(1)"
        );
    }

    #[test]
    fn a_process_exit_posting_terminates_the_runner() {
        let mut coordinator =
            coordinator_with(vec![MailboxView::tag_only(TAG_PROCESS_EXIT)]);

        coordinator.execute_runner(RunnerId::MAIN).unwrap();

        let model = coordinator.model();
        assert_eq!(model.trace().len(), 1);
        assert!(model.pending_transitions().is_empty());
        assert_eq!(model.live_runners(), 0);
        assert!(!model.is_deadlocked());
    }

    #[test]
    fn an_unregistered_tag_is_an_execution_error() {
        let mut coordinator =
            coordinator_with(vec![MailboxView::tag_only(0xbeef)]);

        let err = coordinator.execute_runner(RunnerId::MAIN).unwrap_err();
        assert!(matches!(err, RuntimeError::UnregisteredTag { tag: 0xbeef, .. }));
        assert!(err.undefined_behavior().is_none());
    }

    #[test]
    fn restart_resets_the_model_to_the_initial_template() {
        let mut coordinator = coordinator_with(vec![MailboxView::new(
            mcmini_protocol::TAG_MUTEX_INIT,
            [0x1000, 0, 0, 0],
        )]);

        coordinator.execute_runner(RunnerId::MAIN).unwrap();
        assert_eq!(coordinator.model().trace().len(), 1);

        coordinator.restart_from_scratch().unwrap();
        let model = coordinator.model();
        assert!(model.trace().is_empty());
        assert_eq!(model.runner_count(), 1);
        assert_eq!(
            model.pending_of(RunnerId::MAIN).unwrap().to_string(),
            "thread_start"
        );
        assert!(coordinator.has_live_child());
    }
}
