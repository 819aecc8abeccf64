//! Classic stateless DPOR (Flanagan–Godefroid) over a live coordinator.
//!
//! The engine keeps one exploration frame per position of the current
//! trace:
//! the runner chosen there, the transition it took, the runners enabled in
//! the pre-state, and the backtrack/done sets.  No model snapshots are
//! kept — rewinding to a branch point discards the current child, brings
//! up a fresh one, and replays the recorded prefix, which is cheap because
//! replay is just the rendezvous protocol run at full speed.

use std::collections::BTreeSet;

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use mcmini_model::{ProgramModel, RunnerId, Transition, UndefinedBehavior};
use mcmini_runtime::{Coordinator, RuntimeError};

// ═══════════════════════════════════════════════════════════════════════
//  Configuration and results
// ═══════════════════════════════════════════════════════════════════════

/// Search parameters.
#[derive(Debug, Clone, Default)]
pub struct DporConfig {
    /// Cap on the number of transitions a single runner may execute
    /// within one explored trace (`None` = unbounded).  A runner at the
    /// cap counts as terminal for that trace, not as deadlocked.
    pub max_depth_per_runner: Option<usize>,
    /// Return after the first deadlock report.
    pub stop_at_first_deadlock: bool,
    /// Dump the exploration frames when this trace id is reported.
    pub print_at_trace_id: Option<u64>,
}

/// How one explored trace ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceOutcome {
    /// Every live runner ran to completion (or into the depth bound).
    Completed { hit_depth_bound: bool },
    /// No runner is enabled and at least one has not exited.
    Deadlock,
}

/// Observers invoked as the search progresses.
///
/// `trace_completed` fires for every terminal trace, deadlocked or not;
/// `undefined_behavior` fires when a branch is pruned because the target
/// violated a precondition, with the trace explored up to that point.
#[derive(Default)]
pub struct SearchCallbacks<'a> {
    #[allow(clippy::type_complexity)]
    pub trace_completed: Option<Box<dyn FnMut(&ProgramModel, u64, TraceOutcome) + 'a>>,
    #[allow(clippy::type_complexity)]
    pub undefined_behavior: Option<Box<dyn FnMut(&ProgramModel, u64, &UndefinedBehavior) + 'a>>,
}

impl SearchCallbacks<'_> {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Summary of one finished search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub traces_explored: u64,
    pub deadlock_trace_ids: Vec<u64>,
    pub undefined_behavior_reports: u64,
    /// Every frame ended with `backtrack ⊆ done` — the whole reduced
    /// space was visited.  False only when the search stopped early.
    pub fully_explored: bool,
}

/// Errors that abort the search.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("execution error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("the search state is corrupted: {0}")]
    Internal(String),
}

// ═══════════════════════════════════════════════════════════════════════
//  Frames
// ═══════════════════════════════════════════════════════════════════════

/// Exploration record for one position of the current trace.
struct Frame {
    /// Runner executed at this position along the current path.
    chosen: RunnerId,
    /// The transition it took.
    taken: Transition,
    /// Runners enabled in the pre-state of this position.
    enabled: BTreeSet<RunnerId>,
    /// Runners that must be tried as the choice at this position.
    backtrack: BTreeSet<RunnerId>,
    /// Runners already tried here.
    done: BTreeSet<RunnerId>,
}

impl Frame {
    fn unexplored(&self) -> Option<RunnerId> {
        self.backtrack.difference(&self.done).next().copied()
    }
}

enum StepOutcome {
    Recorded,
    /// The target hit undefined behavior; the branch is abandoned.
    Pruned(UndefinedBehavior),
}

enum RunEnd {
    Terminal { hit_depth_bound: bool },
    Pruned(UndefinedBehavior),
}

// ═══════════════════════════════════════════════════════════════════════
//  The engine
// ═══════════════════════════════════════════════════════════════════════

/// Classic DPOR search over the schedules of one target.
pub struct ClassicDpor {
    config: DporConfig,
}

impl ClassicDpor {
    pub fn new(config: DporConfig) -> Self {
        Self { config }
    }

    /// Explore the target exhaustively (modulo the reduction) and report
    /// every terminal trace through the callbacks.
    ///
    /// For every Mazurkiewicz equivalence class of executions reachable
    /// from the initial state, at least one representative is explored.
    pub fn verify_using(
        &mut self,
        coordinator: &mut Coordinator,
        callbacks: &mut SearchCallbacks<'_>,
    ) -> Result<SearchReport, CheckerError> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut trace_id: u64 = 0;
        let mut report = SearchReport {
            traces_explored: 0,
            deadlock_trace_ids: Vec::new(),
            undefined_behavior_reports: 0,
            fully_explored: false,
        };

        'search: loop {
            match self.extend_to_terminal(coordinator, &mut frames)? {
                RunEnd::Pruned(ub) => {
                    report.undefined_behavior_reports += 1;
                    if let Some(cb) = callbacks.undefined_behavior.as_mut() {
                        cb(coordinator.model(), trace_id, &ub);
                    }
                }
                RunEnd::Terminal { hit_depth_bound } => {
                    let deadlocked = coordinator.model().is_deadlocked();
                    let outcome = if deadlocked {
                        TraceOutcome::Deadlock
                    } else {
                        TraceOutcome::Completed { hit_depth_bound }
                    };
                    if self.config.print_at_trace_id == Some(trace_id) {
                        self.dump_frames(&frames, trace_id);
                    }
                    if let Some(cb) = callbacks.trace_completed.as_mut() {
                        cb(coordinator.model(), trace_id, outcome);
                    }
                    report.traces_explored += 1;
                    if deadlocked {
                        report.deadlock_trace_ids.push(trace_id);
                        if self.config.stop_at_first_deadlock {
                            info!("stopping at the first deadlock (trace {trace_id})");
                            trace_id += 1;
                            break 'search;
                        }
                    }
                }
            }
            trace_id += 1;

            // Rewind to the deepest branch point with unexplored choices
            // and take one of them; a choice that immediately runs into
            // undefined behavior is itself a (pruned) trace, and the hunt
            // for a branch point resumes.
            loop {
                let Some(branch) = frames.iter().rposition(|f| f.unexplored().is_some()) else {
                    break 'search;
                };
                frames.truncate(branch + 1);

                coordinator.restart_from_scratch()?;
                for position in 0..branch {
                    let chosen = frames[position].chosen;
                    coordinator.execute_runner(chosen)?;
                }

                let runner = frames[branch].unexplored().expect("frame was selected as unexplored");
                debug!("branching at position {branch}: trying runner {runner}");
                frames[branch].done.insert(runner);
                match self.execute_recorded(coordinator, &mut frames, branch, runner)? {
                    StepOutcome::Recorded => break,
                    StepOutcome::Pruned(ub) => {
                        report.undefined_behavior_reports += 1;
                        if let Some(cb) = callbacks.undefined_behavior.as_mut() {
                            cb(coordinator.model(), trace_id, &ub);
                        }
                        trace_id += 1;
                    }
                }
            }
        }

        report.fully_explored = frames.iter().all(|f| f.unexplored().is_none());
        info!(
            "search finished: {} traces, {} deadlocks, {} undefined-behavior reports",
            report.traces_explored,
            report.deadlock_trace_ids.len(),
            report.undefined_behavior_reports
        );
        Ok(report)
    }

    /// Depth-first extension: keep executing the lowest-id schedulable
    /// runner until no runner is schedulable.
    fn extend_to_terminal(
        &self,
        coordinator: &mut Coordinator,
        frames: &mut Vec<Frame>,
    ) -> Result<RunEnd, CheckerError> {
        loop {
            let model = coordinator.model();
            let enabled = model.enabled_runners();
            let schedulable: Vec<RunnerId> = enabled
                .iter()
                .copied()
                .filter(|r| self.under_depth_cap(model, *r))
                .collect();
            let Some(&runner) = schedulable.first() else {
                return Ok(RunEnd::Terminal { hit_depth_bound: !enabled.is_empty() });
            };

            let at = frames.len();
            match self.execute_recorded(coordinator, frames, at, runner)? {
                StepOutcome::Recorded => {}
                StepOutcome::Pruned(ub) => return Ok(RunEnd::Pruned(ub)),
            }
        }
    }

    /// Execute `runner` as the step at position `at`, record the frame,
    /// and back-propagate backtrack points.
    ///
    /// `at == frames.len()` extends the trace with a new frame seeded with
    /// the chosen runner; `at < frames.len()` re-branches an existing
    /// frame (pre-state and sets are position properties and survive).
    fn execute_recorded(
        &self,
        coordinator: &mut Coordinator,
        frames: &mut Vec<Frame>,
        at: usize,
        runner: RunnerId,
    ) -> Result<StepOutcome, CheckerError> {
        let enabled: BTreeSet<RunnerId> =
            coordinator.model().enabled_runners().into_iter().collect();

        if let Err(err) = coordinator.execute_runner(runner) {
            return match err.undefined_behavior() {
                Some(ub) => Ok(StepOutcome::Pruned(ub.clone())),
                None => Err(err.into()),
            };
        }

        let taken = *coordinator
            .model()
            .trace()
            .last()
            .ok_or_else(|| CheckerError::Internal("empty trace after an executed step".into()))?;

        if at == frames.len() {
            frames.push(Frame {
                chosen: runner,
                taken,
                enabled,
                backtrack: BTreeSet::from([runner]),
                done: BTreeSet::from([runner]),
            });
        } else {
            frames[at].chosen = runner;
            frames[at].taken = taken;
        }
        self.back_propagate(frames, at);
        Ok(StepOutcome::Recorded)
    }

    /// After executing step `i`, find the latest earlier step whose
    /// transition races with it (dependent, different runner) and widen
    /// that frame's backtrack set: with the racing runner if it was
    /// enabled there, with every enabled runner otherwise.
    fn back_propagate(&self, frames: &mut [Frame], i: usize) {
        let t_i = frames[i].taken;
        for j in (0..i).rev() {
            let t_j = frames[j].taken;
            if t_j.executor == t_i.executor {
                continue;
            }
            if !t_j.depends(&t_i) {
                continue;
            }
            let additions: Vec<RunnerId> = if frames[j].enabled.contains(&t_i.executor) {
                vec![t_i.executor]
            } else {
                frames[j].enabled.iter().copied().collect()
            };
            debug!(
                "race between `{t_j}` (position {j}) and `{t_i}` (position {i}); \
                 backtracking {additions:?} at {j}"
            );
            frames[j].backtrack.extend(additions);
            break;
        }
    }

    fn under_depth_cap(&self, model: &ProgramModel, runner: RunnerId) -> bool {
        match self.config.max_depth_per_runner {
            None => true,
            Some(cap) => {
                model.trace().iter().filter(|t| t.executor == runner).count() < cap
            }
        }
    }

    fn dump_frames(&self, frames: &[Frame], trace_id: u64) {
        info!("exploration frames at trace {trace_id}:");
        for (i, frame) in frames.iter().enumerate() {
            info!(
                "  [{i}] runner {} `{}` enabled={:?} backtrack={:?} done={:?}",
                frame.chosen, frame.taken, frame.enabled, frame.backtrack, frame.done
            );
        }
    }
}
