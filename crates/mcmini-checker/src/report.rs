//! Trace formatting and machine-readable report output.
//!
//! The stdout block format is the tool's contract:
//!
//! ```text
//! TRACE <n>
//! thread <rid>: <transition>
//! ...
//!
//! NEXT THREAD OPERATIONS
//! thread <rid>: <pending transition>
//! ...
//! ```
//!
//! followed by a `*** DEADLOCK DETECTED ***` marker when the trace ended
//! deadlocked.  The same information can be written per trace as JSON
//! into an output directory, plus a final `report.json` summary.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use serde::Serialize;

use mcmini_model::ProgramModel;

use crate::dpor::{SearchReport, TraceOutcome};

/// Marker printed after a deadlocked trace block.
pub const DEADLOCK_MARKER: &str = "*** DEADLOCK DETECTED ***";

/// Render one trace block, exactly as it goes to stdout (without the
/// deadlock marker).
pub fn format_trace(model: &ProgramModel, trace_id: u64) -> String {
    let mut out = String::new();
    out.push_str(&format!("TRACE {trace_id}\n"));
    for t in model.trace() {
        out.push_str(&format!("thread {}: {t}\n", t.executor));
    }
    out.push_str("\nNEXT THREAD OPERATIONS\n");
    for (runner, t) in model.pending_transitions() {
        out.push_str(&format!("thread {runner}: {t}\n"));
    }
    out
}

/// Print a reported trace to stdout, with the deadlock marker when due.
pub fn print_trace(model: &ProgramModel, trace_id: u64, outcome: TraceOutcome) {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(format_trace(model, trace_id).as_bytes());
    if outcome == TraceOutcome::Deadlock {
        let _ = writeln!(stdout, "{DEADLOCK_MARKER}");
    }
    let _ = stdout.flush();
}

// ═══════════════════════════════════════════════════════════════════════
//  JSON records
// ═══════════════════════════════════════════════════════════════════════

/// One `thread <rid>: <op>` line, structured.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub thread: u32,
    pub operation: String,
}

/// One reported trace, structured for the output directory.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub trace_id: u64,
    pub deadlock: bool,
    pub hit_depth_bound: bool,
    pub transitions: Vec<TraceStep>,
    pub next_operations: Vec<TraceStep>,
}

impl TraceRecord {
    pub fn from_model(model: &ProgramModel, trace_id: u64, outcome: TraceOutcome) -> Self {
        let (deadlock, hit_depth_bound) = match outcome {
            TraceOutcome::Deadlock => (true, false),
            TraceOutcome::Completed { hit_depth_bound } => (false, hit_depth_bound),
        };
        Self {
            trace_id,
            deadlock,
            hit_depth_bound,
            transitions: model
                .trace()
                .iter()
                .map(|t| TraceStep { thread: t.executor.raw(), operation: t.to_string() })
                .collect(),
            next_operations: model
                .pending_transitions()
                .iter()
                .map(|(r, t)| TraceStep { thread: r.raw(), operation: t.to_string() })
                .collect(),
        }
    }
}

/// Write `trace-<n>.json` into the output directory.
pub fn write_trace_record(dir: &Path, record: &TraceRecord) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("trace-{}.json", record.trace_id));
    fs::write(&path, serde_json::to_vec_pretty(record)?)?;
    Ok(path)
}

/// Write the final `report.json` summary into the output directory.
pub fn write_search_report(dir: &Path, report: &SearchReport) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join("report.json");
    fs::write(&path, serde_json::to_vec_pretty(report)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcmini_model::objects::{MutexState, VisibleObject};
    use mcmini_model::{RunnerId, Transition};

    fn model_with_one_step() -> ProgramModel {
        let mut model = ProgramModel::starting_at_main();
        let m = model.add_object(VisibleObject::Mutex(MutexState::Uninitialized));
        model
            .model_executing_runner(RunnerId::MAIN, Some(Transition::mutex_init(RunnerId::MAIN, m)))
            .unwrap();
        model
    }

    #[test]
    fn trace_block_has_the_documented_shape() {
        let model = model_with_one_step();
        let block = format_trace(&model, 0);
        assert_eq!(
            block,
            "TRACE 0\n\
             thread 0: thread_start\n\
             \n\
             NEXT THREAD OPERATIONS\n\
             thread 0: pthread_mutex_init(1)\n"
        );
    }

    #[test]
    fn empty_pending_section_stays_empty() {
        let mut model = ProgramModel::starting_at_main();
        model.model_executing_runner(RunnerId::MAIN, None).unwrap();
        let block = format_trace(&model, 3);
        assert_eq!(
            block,
            "TRACE 3\n\
             thread 0: thread_start\n\
             \n\
             NEXT THREAD OPERATIONS\n"
        );
    }

    #[test]
    fn record_mirrors_the_block() {
        let model = model_with_one_step();
        let record =
            TraceRecord::from_model(&model, 7, TraceOutcome::Completed { hit_depth_bound: false });
        assert_eq!(record.trace_id, 7);
        assert!(!record.deadlock);
        assert_eq!(record.transitions.len(), 1);
        assert_eq!(record.transitions[0].operation, "thread_start");
        assert_eq!(record.next_operations[0].operation, "pthread_mutex_init(1)");

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"trace_id\":7"));
        assert!(json.contains("pthread_mutex_init(1)"));
    }

    #[test]
    fn records_land_in_the_output_directory() {
        let dir = std::env::temp_dir().join(format!("mcmini-report-test-{}", std::process::id()));
        let model = model_with_one_step();
        let record = TraceRecord::from_model(&model, 0, TraceOutcome::Deadlock);

        let path = write_trace_record(&dir, &record).unwrap();
        assert!(path.ends_with("trace-0.json"));
        assert!(path.exists());

        let report = SearchReport {
            traces_explored: 1,
            deadlock_trace_ids: vec![0],
            undefined_behavior_reports: 0,
            fully_explored: true,
        };
        let path = write_search_report(&dir, &report).unwrap();
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("\"traces_explored\": 1"));

        let _ = fs::remove_dir_all(&dir);
    }
}
