//! A scripted process source: a simulated target for driving the engine.
//!
//! Speaks the exact announce/execute protocol of a real instrumented
//! child — each released runner "performs" its previously announced
//! operation and announces the next one from its script — without forking
//! anything.  This is what the engine tests run against, and it doubles
//! as a harness for experimenting with the search when no trampoline
//! library is at hand.
//!
//! Scripts refer to primitives by small indices; the simulated child
//! translates them into stable fake addresses, so the address map sees
//! the same identities a real child would expose.

use mcmini_model::RunnerId;
use mcmini_protocol::{self as protocol, MailboxView};
use mcmini_runtime::{ChildProcess, ProcessError, ProcessSource};

/// One operation of a scripted thread.
///
/// `Spawn` and `Join` name sibling scripts by index; every non-main
/// script implicitly ends in a thread exit, and the main script in the
/// process-exit parking loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOp {
    MutexInit(usize),
    MutexLock(usize),
    MutexUnlock(usize),
    CondInit(usize),
    /// A full `pthread_cond_wait`: announces the enqueue, then the
    /// wait-resume, as the trampoline's wrapper does.
    CondWait { cond: usize, mutex: usize },
    CondSignal(usize),
    CondBroadcast(usize),
    CondDestroy(usize),
    Spawn(usize),
    Join(usize),
}

/// Per-thread scripts; `threads[0]` is the main thread.
#[derive(Debug, Clone)]
pub struct ScriptedProgram {
    pub threads: Vec<Vec<ScriptOp>>,
}

impl ScriptedProgram {
    pub fn new(threads: Vec<Vec<ScriptOp>>) -> Self {
        assert!(!threads.is_empty(), "a scripted program needs a main thread");
        Self { threads }
    }
}

fn mutex_addr(index: usize) -> u64 {
    0x1000 + 0x40 * index as u64
}

fn cond_addr(index: usize) -> u64 {
    0x2000 + 0x40 * index as u64
}

fn thread_addr(script: usize) -> u64 {
    0x9000 + 0x100 * script as u64
}

// ═══════════════════════════════════════════════════════════════════════
//  Simulated child
// ═══════════════════════════════════════════════════════════════════════

/// What a simulated thread last wrote into its mailbox.
#[derive(Debug, Clone, Copy)]
enum Announced {
    /// Parked at startup; nothing announced yet.
    NotYet,
    /// The script operation at the current program counter.
    Op(ScriptOp),
    /// The second half of a wait (the enqueue already executed).
    WaitResume { cond: usize, mutex: usize },
    ThreadExit,
    ProcessExit,
}

#[derive(Debug)]
struct SimThread {
    script: usize,
    pc: usize,
    announced: Announced,
}

/// One simulated execution of the scripted program.
struct ScriptedChild {
    program: ScriptedProgram,
    /// Indexed by runner id; allocation order mirrors the order in which
    /// creations are announced, which is how the coordinator assigns ids.
    threads: Vec<SimThread>,
    alive: bool,
}

impl ScriptedChild {
    fn new(program: ScriptedProgram) -> Self {
        Self {
            program,
            threads: vec![SimThread { script: 0, pc: 0, announced: Announced::NotYet }],
            alive: true,
        }
    }

    /// Announce the operation at the thread's current program counter,
    /// or its terminal announcement when the script is exhausted.
    fn announce_current(&mut self, idx: usize) -> MailboxView {
        let script = self.threads[idx].script;
        let pc = self.threads[idx].pc;
        match self.program.threads[script].get(pc).copied() {
            Some(op) => {
                self.threads[idx].announced = Announced::Op(op);
                self.view_for(op)
            }
            None if script == 0 => {
                self.threads[idx].announced = Announced::ProcessExit;
                MailboxView::tag_only(protocol::TAG_PROCESS_EXIT)
            }
            None => {
                self.threads[idx].announced = Announced::ThreadExit;
                MailboxView::tag_only(protocol::TAG_THREAD_EXIT)
            }
        }
    }

    fn view_for(&mut self, op: ScriptOp) -> MailboxView {
        match op {
            ScriptOp::MutexInit(m) => {
                MailboxView::new(protocol::TAG_MUTEX_INIT, [mutex_addr(m), 0, 0, 0])
            }
            ScriptOp::MutexLock(m) => {
                MailboxView::new(protocol::TAG_MUTEX_LOCK, [mutex_addr(m), 0, 0, 0])
            }
            ScriptOp::MutexUnlock(m) => {
                MailboxView::new(protocol::TAG_MUTEX_UNLOCK, [mutex_addr(m), 0, 0, 0])
            }
            ScriptOp::CondInit(c) => {
                MailboxView::new(protocol::TAG_COND_INIT, [cond_addr(c), 0, 0, 0])
            }
            ScriptOp::CondWait { cond, mutex } => MailboxView::new(
                protocol::TAG_COND_ENQUEUE,
                [cond_addr(cond), mutex_addr(mutex), 0, 0],
            ),
            ScriptOp::CondSignal(c) => {
                MailboxView::new(protocol::TAG_COND_SIGNAL, [cond_addr(c), 0, 0, 0])
            }
            ScriptOp::CondBroadcast(c) => {
                MailboxView::new(protocol::TAG_COND_BROADCAST, [cond_addr(c), 0, 0, 0])
            }
            ScriptOp::CondDestroy(c) => {
                MailboxView::new(protocol::TAG_COND_DESTROY, [cond_addr(c), 0, 0, 0])
            }
            ScriptOp::Spawn(script) => {
                // The wrapper creates the real thread before announcing
                // it, so the new thread exists (parked at startup) the
                // moment the creation is announced.
                if !self.threads.iter().any(|t| t.script == script) {
                    self.threads.push(SimThread {
                        script,
                        pc: 0,
                        announced: Announced::NotYet,
                    });
                }
                MailboxView::new(protocol::TAG_THREAD_CREATE, [thread_addr(script), 0, 0, 0])
            }
            ScriptOp::Join(script) => {
                MailboxView::new(protocol::TAG_THREAD_JOIN, [thread_addr(script), 0, 0, 0])
            }
        }
    }
}

impl ChildProcess for ScriptedChild {
    fn execute_runner(&mut self, runner: RunnerId) -> Result<MailboxView, ProcessError> {
        if !self.alive {
            return Err(ProcessError::NotAlive);
        }
        let idx = runner.raw() as usize;
        if idx >= self.threads.len() {
            return Err(ProcessError::Protocol(format!(
                "runner {runner} does not exist in the simulated child"
            )));
        }
        match self.threads[idx].announced {
            Announced::NotYet => Ok(self.announce_current(idx)),
            Announced::Op(ScriptOp::CondWait { cond, mutex }) => {
                // The enqueue executed; the wrapper's next announcement is
                // the wake-and-relock half, at the same program counter.
                self.threads[idx].announced = Announced::WaitResume { cond, mutex };
                Ok(MailboxView::new(
                    protocol::TAG_COND_WAIT_RESUME,
                    [cond_addr(cond), mutex_addr(mutex), 0, 0],
                ))
            }
            Announced::Op(_) | Announced::WaitResume { .. } => {
                self.threads[idx].pc += 1;
                Ok(self.announce_current(idx))
            }
            Announced::ThreadExit | Announced::ProcessExit => Err(ProcessError::Protocol(
                format!("runner {runner} was released after its terminal announcement"),
            )),
        }
    }

    fn release_runner_final(&mut self, runner: RunnerId) -> Result<(), ProcessError> {
        if !self.alive {
            return Err(ProcessError::NotAlive);
        }
        let idx = runner.raw() as usize;
        match self.threads.get(idx).map(|t| t.announced) {
            Some(Announced::ThreadExit) => Ok(()),
            Some(other) => Err(ProcessError::Protocol(format!(
                "runner {runner} finally released while announcing {other:?}"
            ))),
            None => Err(ProcessError::Protocol(format!(
                "runner {runner} does not exist in the simulated child"
            ))),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn terminate(&mut self) {
        self.alive = false;
    }
}

/// Process source producing one fresh simulated child per request.
pub struct ScriptedProcessSource {
    program: ScriptedProgram,
    spawned: u64,
}

impl ScriptedProcessSource {
    pub fn new(program: ScriptedProgram) -> Self {
        Self { program, spawned: 0 }
    }

    /// How many children this source has produced (one per explored
    /// execution, plus the eager initial child).
    pub fn spawned(&self) -> u64 {
        self.spawned
    }
}

impl ProcessSource for ScriptedProcessSource {
    fn force_new_process(&mut self) -> Result<Box<dyn ChildProcess>, ProcessError> {
        self.spawned += 1;
        Ok(Box::new(ScriptedChild::new(self.program.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_announces_its_first_operation_on_first_release() {
        let program = ScriptedProgram::new(vec![vec![ScriptOp::MutexInit(0)]]);
        let mut child = ScriptedChild::new(program);

        let view = child.execute_runner(RunnerId::MAIN).unwrap();
        assert_eq!(view.tag, protocol::TAG_MUTEX_INIT);
        assert_eq!(view.address(0), mutex_addr(0));

        // Next release executes the init and announces process exit.
        let view = child.execute_runner(RunnerId::MAIN).unwrap();
        assert_eq!(view.tag, protocol::TAG_PROCESS_EXIT);

        // A runner never comes back from its terminal announcement.
        assert!(child.execute_runner(RunnerId::MAIN).is_err());
    }

    #[test]
    fn an_empty_main_script_goes_straight_to_process_exit() {
        let program = ScriptedProgram::new(vec![vec![]]);
        let mut child = ScriptedChild::new(program);
        let view = child.execute_runner(RunnerId::MAIN).unwrap();
        assert_eq!(view.tag, protocol::TAG_PROCESS_EXIT);
    }

    #[test]
    fn spawn_allocates_the_new_thread_at_announce_time() {
        let program =
            ScriptedProgram::new(vec![vec![ScriptOp::Spawn(1)], vec![ScriptOp::MutexInit(0)]]);
        let mut child = ScriptedChild::new(program);

        let view = child.execute_runner(RunnerId::MAIN).unwrap();
        assert_eq!(view.tag, protocol::TAG_THREAD_CREATE);
        assert_eq!(view.address(0), thread_addr(1));
        assert_eq!(child.threads.len(), 2);

        // Releasing the new runner executes its start and announces its
        // first scripted operation.
        let view = child.execute_runner(RunnerId::new(1)).unwrap();
        assert_eq!(view.tag, protocol::TAG_MUTEX_INIT);
    }

    #[test]
    fn a_wait_announces_its_two_halves() {
        let program = ScriptedProgram::new(vec![vec![
            ScriptOp::MutexInit(0),
            ScriptOp::CondInit(0),
            ScriptOp::MutexLock(0),
            ScriptOp::CondWait { cond: 0, mutex: 0 },
            ScriptOp::MutexUnlock(0),
        ]]);
        let mut child = ScriptedChild::new(program);

        for expected in [
            protocol::TAG_MUTEX_INIT,
            protocol::TAG_COND_INIT,
            protocol::TAG_MUTEX_LOCK,
            protocol::TAG_COND_ENQUEUE,
            protocol::TAG_COND_WAIT_RESUME,
            protocol::TAG_MUTEX_UNLOCK,
            protocol::TAG_PROCESS_EXIT,
        ] {
            let view = child.execute_runner(RunnerId::MAIN).unwrap();
            assert_eq!(view.tag, expected, "expected {}", protocol::tag_name(expected));
        }
    }

    #[test]
    fn threads_with_empty_scripts_announce_thread_exit() {
        let program = ScriptedProgram::new(vec![vec![ScriptOp::Spawn(1)], vec![]]);
        let mut child = ScriptedChild::new(program);
        child.execute_runner(RunnerId::MAIN).unwrap();

        let view = child.execute_runner(RunnerId::new(1)).unwrap();
        assert_eq!(view.tag, protocol::TAG_THREAD_EXIT);
        child.release_runner_final(RunnerId::new(1)).unwrap();
    }
}
