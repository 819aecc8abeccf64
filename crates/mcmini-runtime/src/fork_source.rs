//! Fork-and-exec process source.
//!
//! For vanilla model checking the search starts every execution at the
//! target's entry point, so fork + exec is all a process source needs: the
//! checker creates the shared mailbox segment, spawns the target with the
//! trampoline library preloaded, and hands back a [`ChildProcess`] handle
//! that speaks the rendezvous protocol.  Children are ephemeral; the
//! handle kills the child and releases the segment on drop, so every exit
//! path from the search loop tears the real-world state down.

use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::ptr::{self, NonNull};
use std::time::Duration;

use log::{debug, info, warn};
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use mcmini_model::RunnerId;
use mcmini_protocol::{
    self as protocol, MailboxSegment, MailboxView, RunnerMailbox, MAX_RUNNERS, PAYLOAD_WORDS,
    SEGMENT_MAGIC, SEGMENT_SIZE,
};

use crate::process::{ChildProcess, ProcessError, ProcessSource};

/// How long a released runner may take to reach its next instrumented
/// call before the child is declared faulty.
pub const DEFAULT_POST_TIMEOUT: Duration = Duration::from_secs(3);

/// Trampoline library preloaded into every child.
pub const DEFAULT_PRELOAD_LIBRARY: &str = "libmcmini.so";

fn errno_io(err: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

// ═══════════════════════════════════════════════════════════════════════
//  Target
// ═══════════════════════════════════════════════════════════════════════

/// The executable under test and its argv.
#[derive(Debug, Clone)]
pub struct Target {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl Target {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { executable: executable.into(), args }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Shared segment
// ═══════════════════════════════════════════════════════════════════════

/// The mapped POSIX shared-memory segment holding every runner mailbox.
struct SharedSegment {
    name: String,
    ptr: NonNull<MailboxSegment>,
}

impl SharedSegment {
    fn create(name: &str) -> Result<Self, ProcessError> {
        // A previous checker instance that crashed may have leaked the
        // segment; the name is pid-derived, so it is ours to reclaim.
        let _ = shm_unlink(name);

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o600),
        )
        .map_err(|e| ProcessError::ShmCreate { name: name.to_string(), source: errno_io(e) })?;

        ftruncate(&fd, SEGMENT_SIZE as libc::off_t)
            .map_err(|e| ProcessError::ShmCreate { name: name.to_string(), source: errno_io(e) })?;

        let length = NonZeroUsize::new(SEGMENT_SIZE).expect("mailbox segment is not empty");
        let mapping = unsafe {
            mmap(None, length, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE, MapFlags::MAP_SHARED, &fd, 0)
        }
        .map_err(|e| ProcessError::ShmMap(errno_io(e)))?;
        let ptr = mapping.cast::<MailboxSegment>();

        let segment = Self { name: name.to_string(), ptr };
        unsafe {
            ptr::addr_of_mut!((*segment.ptr.as_ptr()).magic).write_volatile(SEGMENT_MAGIC);
        }
        for runner in 0..MAX_RUNNERS {
            let mb = segment.mailbox_ptr(runner);
            // pshared = 1: both sides of the fork wait on these.
            for sem in [
                unsafe { ptr::addr_of_mut!((*mb).posted) },
                unsafe { ptr::addr_of_mut!((*mb).released) },
            ] {
                if unsafe { libc::sem_init(sem, 1, 0) } != 0 {
                    return Err(ProcessError::SemInit(io::Error::last_os_error()));
                }
            }
        }
        Ok(segment)
    }

    fn mailbox_ptr(&self, index: usize) -> *mut RunnerMailbox {
        debug_assert!(index < MAX_RUNNERS);
        unsafe { ptr::addr_of_mut!((*self.ptr.as_ptr()).mailboxes).cast::<RunnerMailbox>().add(index) }
    }

    fn mailbox(&self, runner: RunnerId) -> Result<*mut RunnerMailbox, ProcessError> {
        let index = runner.raw() as usize;
        if index >= MAX_RUNNERS {
            return Err(ProcessError::RunnerOutOfRange(runner));
        }
        Ok(self.mailbox_ptr(index))
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        for runner in 0..MAX_RUNNERS {
            let mb = self.mailbox_ptr(runner);
            unsafe {
                libc::sem_destroy(ptr::addr_of_mut!((*mb).posted));
                libc::sem_destroy(ptr::addr_of_mut!((*mb).released));
            }
        }
        if let Err(e) = unsafe { munmap(self.ptr.cast(), SEGMENT_SIZE) } {
            warn!("failed to unmap mailbox segment {}: {e}", self.name);
        }
        if let Err(e) = shm_unlink(self.name.as_str()) {
            warn!("failed to unlink mailbox segment {}: {e}", self.name);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Fork source
// ═══════════════════════════════════════════════════════════════════════

/// Spawns fresh children of one fixed target.
pub struct ForkProcessSource {
    target: Target,
    preload_library: Option<PathBuf>,
    child_env: Vec<(String, String)>,
    post_timeout: Duration,
}

impl ForkProcessSource {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            preload_library: Some(PathBuf::from(DEFAULT_PRELOAD_LIBRARY)),
            child_env: Vec::new(),
            post_timeout: DEFAULT_POST_TIMEOUT,
        }
    }

    /// Additional environment applied to every child (the `MCMINI_*`
    /// contract of the configuration).
    pub fn with_child_env(mut self, env: Vec<(String, String)>) -> Self {
        self.child_env = env;
        self
    }

    pub fn with_preload_library(mut self, library: Option<PathBuf>) -> Self {
        self.preload_library = library;
        self
    }

    pub fn with_post_timeout(mut self, timeout: Duration) -> Self {
        self.post_timeout = timeout;
        self
    }
}

impl ProcessSource for ForkProcessSource {
    fn force_new_process(&mut self) -> Result<Box<dyn ChildProcess>, ProcessError> {
        let name = protocol::shm_name(std::process::id());
        let segment = SharedSegment::create(&name)?;

        let mut command = Command::new(&self.target.executable);
        command.args(&self.target.args).env(protocol::ENV_SHM_NAME, &name);
        if let Some(library) = &self.preload_library {
            command.env("LD_PRELOAD", library);
        }
        for (key, value) in &self.child_env {
            command.env(key, value);
        }

        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            target: self.target.to_string(),
            source,
        })?;
        info!("spawned child {} for `{}`", child.id(), self.target);

        Ok(Box::new(ForkChild {
            segment,
            child,
            post_timeout: self.post_timeout,
            alive: true,
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Fork child
// ═══════════════════════════════════════════════════════════════════════

/// A live instrumented child plus its mailbox segment.
struct ForkChild {
    segment: SharedSegment,
    child: Child,
    post_timeout: Duration,
    alive: bool,
}

impl ForkChild {
    /// Wait for the runner's *posted* signal, with the configured timeout.
    fn await_posted(&mut self, runner: RunnerId, mb: *mut RunnerMailbox) -> Result<(), ProcessError> {
        let mut deadline = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut deadline) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        deadline.tv_sec += self.post_timeout.as_secs() as libc::time_t;
        deadline.tv_nsec += self.post_timeout.subsec_nanos() as libc::c_long;
        if deadline.tv_nsec >= 1_000_000_000 {
            deadline.tv_sec += 1;
            deadline.tv_nsec -= 1_000_000_000;
        }

        loop {
            let rc = unsafe { libc::sem_timedwait(ptr::addr_of_mut!((*mb).posted), &deadline) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => {
                    return match self.child.try_wait() {
                        Ok(Some(status)) => {
                            self.alive = false;
                            Err(ProcessError::ChildDied(status.to_string()))
                        }
                        Ok(None) => Err(ProcessError::PostTimeout(runner, self.post_timeout)),
                        Err(e) => Err(e.into()),
                    };
                }
                _ => return Err(err.into()),
            }
        }
    }
}

impl ChildProcess for ForkChild {
    fn execute_runner(&mut self, runner: RunnerId) -> Result<MailboxView, ProcessError> {
        if !self.alive {
            return Err(ProcessError::NotAlive);
        }
        let mb = self.segment.mailbox(runner)?;
        if unsafe { libc::sem_post(ptr::addr_of_mut!((*mb).released)) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        self.await_posted(runner, mb)?;

        let tag = unsafe { ptr::addr_of!((*mb).tag).read_volatile() };
        let mut payload = [0u64; PAYLOAD_WORDS];
        let words = unsafe { ptr::addr_of!((*mb).payload).cast::<u64>() };
        for (i, word) in payload.iter_mut().enumerate() {
            *word = unsafe { words.add(i).read_volatile() };
        }
        debug!("runner {runner} posted {} ({tag:#x})", protocol::tag_name(tag));
        Ok(MailboxView::new(tag, payload))
    }

    fn release_runner_final(&mut self, runner: RunnerId) -> Result<(), ProcessError> {
        if !self.alive {
            return Err(ProcessError::NotAlive);
        }
        let mb = self.segment.mailbox(runner)?;
        if unsafe { libc::sem_post(ptr::addr_of_mut!((*mb).released)) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn terminate(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;
        if let Err(e) = self.child.kill() {
            warn!("failed to kill child {}: {e}", self.child.id());
        }
        match self.child.wait() {
            Ok(status) => debug!("child {} reaped ({status})", self.child.id()),
            Err(e) => warn!("failed to reap child {}: {e}", self.child.id()),
        }
    }
}

impl Drop for ForkChild {
    fn drop(&mut self) {
        self.terminate();
        // The segment unlinks itself when it drops right after.
    }
}
