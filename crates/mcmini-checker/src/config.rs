//! Checker configuration and the child-side environment contract.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use mcmini_protocol as protocol;

use crate::dpor::DporConfig;

/// Everything one `mcmini` invocation is parameterized by.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub target_executable: PathBuf,
    pub target_args: Vec<String>,
    /// Per-runner transition cap (`None` = unbounded).
    pub max_depth_per_thread: Option<usize>,
    pub stop_at_first_deadlock: bool,
    /// Emit diagnostics when this trace id is explored.
    pub print_at_trace_id: Option<u64>,
    /// Record mode: skip model checking, relaunch the target under the
    /// checkpointing supervisor with this checkpoint interval.
    pub checkpoint_period: Option<Duration>,
    /// Directory for per-trace JSON records and the final summary.
    pub output_dir: Option<PathBuf>,
}

impl CheckerConfig {
    pub fn new(target_executable: impl Into<PathBuf>, target_args: Vec<String>) -> Self {
        Self {
            target_executable: target_executable.into(),
            target_args,
            max_depth_per_thread: None,
            stop_at_first_deadlock: false,
            print_at_trace_id: None,
            checkpoint_period: None,
            output_dir: None,
        }
    }

    /// Fill options the command line left unset from the `MCMINI_*`
    /// environment, so scripted test harnesses can configure the checker
    /// the same way they configure the trampoline.
    pub fn apply_environment(&mut self) {
        if self.max_depth_per_thread.is_none() {
            self.max_depth_per_thread = env_number(protocol::ENV_MAX_DEPTH_PER_THREAD);
        }
        if self.print_at_trace_id.is_none() {
            self.print_at_trace_id = env_number(protocol::ENV_PRINT_AT_TRACE_ID);
        }
        if !self.stop_at_first_deadlock && env_flag(protocol::ENV_FIRST_DEADLOCK) {
            self.stop_at_first_deadlock = true;
        }
    }

    /// The `MCMINI_*` variables applied to every spawned child.
    pub fn child_environment(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        if let Some(depth) = self.max_depth_per_thread {
            vars.push((protocol::ENV_MAX_DEPTH_PER_THREAD.to_string(), depth.to_string()));
        }
        if let Some(id) = self.print_at_trace_id {
            vars.push((protocol::ENV_PRINT_AT_TRACE_ID.to_string(), id.to_string()));
        }
        if self.stop_at_first_deadlock {
            vars.push((protocol::ENV_FIRST_DEADLOCK.to_string(), "1".to_string()));
        }
        vars
    }

    pub fn dpor(&self) -> DporConfig {
        DporConfig {
            max_depth_per_runner: self.max_depth_per_thread,
            stop_at_first_deadlock: self.stop_at_first_deadlock,
            print_at_trace_id: self.print_at_trace_id,
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_flag(name: &str) -> bool {
    matches!(env::var(name).ok().as_deref(), Some("1") | Some("true") | Some("yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_environment_carries_only_set_options() {
        let mut config = CheckerConfig::new("/bin/true", vec![]);
        assert!(config.child_environment().is_empty());

        config.max_depth_per_thread = Some(40);
        config.stop_at_first_deadlock = true;
        let env = config.child_environment();
        assert!(env.contains(&("MCMINI_MAX_DEPTH_PER_THREAD".into(), "40".into())));
        assert!(env.contains(&("MCMINI_FIRST_DEADLOCK".into(), "1".into())));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn dpor_config_mirrors_the_checker_config() {
        let mut config = CheckerConfig::new("/bin/true", vec![]);
        config.max_depth_per_thread = Some(7);
        config.stop_at_first_deadlock = true;
        config.print_at_trace_id = Some(3);

        let dpor = config.dpor();
        assert_eq!(dpor.max_depth_per_runner, Some(7));
        assert!(dpor.stop_at_first_deadlock);
        assert_eq!(dpor.print_at_trace_id, Some(3));
    }
}
