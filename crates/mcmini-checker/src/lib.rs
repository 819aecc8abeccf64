//! The model-checking engine and its reporting surface.
//!
//! [`ClassicDpor`] explores the interleaving space of one target with
//! classic dynamic partial-order reduction: it drives the coordinator one
//! step at a time, records one exploration frame per trace position, and
//! replays prefixes from fresh children to branch into schedules the
//! dependency analysis proved worth trying.  Deadlocks are its positive
//! results; completed traces and undefined-behavior reports round out the
//! picture.

pub mod config;
pub mod dpor;
pub mod report;
pub mod scripted;

pub use config::CheckerConfig;
pub use dpor::{CheckerError, ClassicDpor, DporConfig, SearchCallbacks, SearchReport, TraceOutcome};
pub use scripted::{ScriptOp, ScriptedProcessSource, ScriptedProgram};
