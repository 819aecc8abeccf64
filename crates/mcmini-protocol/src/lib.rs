//! Wire protocol for checker ↔ trampoline mailbox communication.
//!
//! This crate defines the shared-memory layout, transition tags, and
//! environment-variable contract used between the `mcmini` checker process
//! and the trampoline library (`libmcmini.so`) preloaded into the target.
//!
//! # Transport
//!
//! Communication uses a **POSIX shared-memory segment** created by the
//! checker before the target is spawned.  The segment holds one
//! [`RunnerMailbox`] per runner (target-side thread), each a fixed-layout
//! block carrying a transition tag, a small payload of machine words, and a
//! pair of process-shared semaphores used as one-shot rendezvous signals:
//!
//! 1. Checker posts the runner's *released* semaphore
//! 2. Runner wakes inside its instrumented wrapper, performs the real
//!    primitive call, and runs user code up to its next instrumented call
//! 3. Runner writes the tag and payload of its *next* intended operation
//!    into its mailbox and posts *posted*
//! 4. Checker wakes from *posted*, translates the payload through its
//!    address map, and schedules the next step
//!
//! At most one runner is ever released before its posting is observed, so
//! at any instant at most one thread in the target is unblocked.  The
//! payload words carry child-side addresses (`pthread_mutex_t*`,
//! `pthread_t`, …); the checker never dereferences them, it only uses them
//! as identities.
//!
//! The trampoline locates the segment through [`ENV_SHM_NAME`], which the
//! checker sets to [`shm_name`]`(checker_pid)` when spawning the target.

// ═══════════════════════════════════════════════════════════════════════
//  Segment geometry
// ═══════════════════════════════════════════════════════════════════════

/// Maximum number of runners (threads) a single target may create.
///
/// The segment is sized for the worst case up front; the checker reports an
/// execution error if the target exceeds this.
pub const MAX_RUNNERS: usize = 64;

/// Number of payload words in each mailbox.
///
/// Two words suffice for every current transition (`cond-enqueue` carries a
/// condition-variable address and a mutex address); the extra room is for
/// future transition kinds.
pub const PAYLOAD_WORDS: usize = 4;

/// Magic value written at the head of the segment by the checker.
///
/// The trampoline refuses to run if the value does not match, which catches
/// stale segments from a dead checker with a recycled pid.
pub const SEGMENT_MAGIC: u64 = 0x4d43_4d49_4e49_0001; // "MCMINI", version 1

/// Name of the shared-memory segment for a checker with the given pid.
///
/// Both sides derive the name independently; the pid keeps concurrent
/// checker instances apart.
pub fn shm_name(checker_pid: u32) -> String {
    format!("/mcmini-{checker_pid}")
}

// ═══════════════════════════════════════════════════════════════════════
//  Transition tags
// ═══════════════════════════════════════════════════════════════════════

/// Target announced a `pthread_mutex_init`.  Payload: mutex address.
pub const TAG_MUTEX_INIT: u64 = 0x01;

/// Target announced a `pthread_mutex_lock`.  Payload: mutex address.
pub const TAG_MUTEX_LOCK: u64 = 0x02;

/// Target announced a `pthread_mutex_unlock`.  Payload: mutex address.
pub const TAG_MUTEX_UNLOCK: u64 = 0x03;

/// Target announced a `pthread_create`.  Payload: the new thread's
/// `pthread_t`, posted by the creator after the real create returned.
pub const TAG_THREAD_CREATE: u64 = 0x10;

/// A thread is about to run its start routine.
///
/// Never posted through a mailbox: the start step of a new thread is
/// installed by the checker when the creating `TAG_THREAD_CREATE` is
/// translated.  The tag exists so the registry key space covers every
/// transition kind.
pub const TAG_THREAD_START: u64 = 0x11;

/// Target thread finished its start routine.  No payload.
pub const TAG_THREAD_EXIT: u64 = 0x12;

/// Target announced a `pthread_join`.  Payload: target `pthread_t`.
pub const TAG_THREAD_JOIN: u64 = 0x13;

/// The main thread returned from `main` and parked in the trampoline's
/// exit loop.  No payload; the runner never posts again.
pub const TAG_PROCESS_EXIT: u64 = 0x1f;

/// Target announced a `pthread_cond_init`.  Payload: condition address.
pub const TAG_COND_INIT: u64 = 0x20;

/// First half of a `pthread_cond_wait`: enqueue on the condition and
/// release the mutex.  Payload: condition address, mutex address.
pub const TAG_COND_ENQUEUE: u64 = 0x21;

/// Target announced a `pthread_cond_signal`.  Payload: condition address.
pub const TAG_COND_SIGNAL: u64 = 0x22;

/// Target announced a `pthread_cond_broadcast`.  Payload: condition address.
pub const TAG_COND_BROADCAST: u64 = 0x23;

/// Second half of a `pthread_cond_wait`: consume a wake and re-acquire the
/// mutex.  Payload: condition address, mutex address.
pub const TAG_COND_WAIT_RESUME: u64 = 0x24;

/// Target announced a `pthread_cond_destroy`.  Payload: condition address.
pub const TAG_COND_DESTROY: u64 = 0x25;

// ═══════════════════════════════════════════════════════════════════════
//  Environment contract
// ═══════════════════════════════════════════════════════════════════════

/// Name of the shared-memory segment, set by the checker for the child.
pub const ENV_SHM_NAME: &str = "MCMINI_SHM_NAME";

/// Per-runner transition cap forwarded to the child.
pub const ENV_MAX_DEPTH_PER_THREAD: &str = "MCMINI_MAX_DEPTH_PER_THREAD";

/// Trace id at which the child enables its own debugging hooks.
pub const ENV_DEBUG_AT_TRACE_ID: &str = "MCMINI_DEBUG_AT_TRACE_ID";

/// Trace id at which diagnostics are printed.
pub const ENV_PRINT_AT_TRACE_ID: &str = "MCMINI_PRINT_AT_TRACE_ID";

/// Stop after the first deadlock.
pub const ENV_FIRST_DEADLOCK: &str = "MCMINI_FIRST_DEADLOCK";

/// Enable forward-progress checking in the child.
pub const ENV_CHECK_FORWARD_PROGRESS: &str = "MCMINI_CHECK_FORWARD_PROGRESS";

/// Marker for long-running test configurations.
pub const ENV_LONG_TEST: &str = "MCMINI_LONG_TEST";

/// Suppress non-essential output.
pub const ENV_QUIET: &str = "MCMINI_QUIET";

/// Enable verbose diagnostics.
pub const ENV_VERBOSE: &str = "MCMINI_VERBOSE";

/// Set in the subprocess spawned by record mode.
pub const ENV_RECORD: &str = "MCMINI_RECORD";

// ═══════════════════════════════════════════════════════════════════════
//  Mailbox layout
// ═══════════════════════════════════════════════════════════════════════

/// Fixed-layout per-runner mailbox shared between checker and trampoline.
///
/// The runner writes `tag` and `payload` and posts `posted`; the checker
/// posts `released`.  The semaphores are initialised by the checker with
/// `sem_init(pshared = 1)` before the target is spawned and destroyed when
/// the child is torn down.  A freshly `ftruncate`d segment is all zeroes,
/// which is a valid pre-`sem_init` state for every field.
#[repr(C)]
pub struct RunnerMailbox {
    /// Transition tag of the runner's next intended operation (`TAG_*`).
    pub tag: u64,
    /// Child-side addresses of the primitives the operation refers to.
    pub payload: [u64; PAYLOAD_WORDS],
    /// Posted by the runner once tag and payload are written.
    pub posted: libc::sem_t,
    /// Posted by the checker to let the runner proceed.
    pub released: libc::sem_t,
}

/// The full shared segment: a header followed by one mailbox per runner.
#[repr(C)]
pub struct MailboxSegment {
    /// Must equal [`SEGMENT_MAGIC`].
    pub magic: u64,
    /// Reserved for future protocol revisions.
    pub _reserved: [u64; 7],
    /// One mailbox per runner, indexed by runner id.
    pub mailboxes: [RunnerMailbox; MAX_RUNNERS],
}

/// Size in bytes of the shared segment.
pub const SEGMENT_SIZE: usize = core::mem::size_of::<MailboxSegment>();

// Word-aligned layout; the semaphores impose the strictest alignment.
const _: () = assert!(core::mem::align_of::<RunnerMailbox>() >= core::mem::align_of::<u64>());
const _: () = assert!(core::mem::size_of::<MailboxSegment>() % core::mem::size_of::<u64>() == 0);

// ═══════════════════════════════════════════════════════════════════════
//  Mailbox view
// ═══════════════════════════════════════════════════════════════════════

/// A plain-data copy of one posting, detached from the shared segment.
///
/// The child handle copies tag and payload out of the volatile mailbox the
/// moment `posted` fires; everything downstream (coordinator, transition
/// callbacks) works on this owned view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxView {
    pub tag: u64,
    pub payload: [u64; PAYLOAD_WORDS],
}

impl MailboxView {
    pub const fn new(tag: u64, payload: [u64; PAYLOAD_WORDS]) -> Self {
        Self { tag, payload }
    }

    /// View with a tag and no meaningful payload.
    pub const fn tag_only(tag: u64) -> Self {
        Self { tag, payload: [0; PAYLOAD_WORDS] }
    }

    /// The `i`-th payload word, interpreted as a child-side address.
    pub fn address(&self, i: usize) -> u64 {
        self.payload[i]
    }
}

/// Human-readable name of a transition tag, for diagnostics.
pub fn tag_name(tag: u64) -> &'static str {
    match tag {
        TAG_MUTEX_INIT => "mutex_init",
        TAG_MUTEX_LOCK => "mutex_lock",
        TAG_MUTEX_UNLOCK => "mutex_unlock",
        TAG_THREAD_CREATE => "thread_create",
        TAG_THREAD_START => "thread_start",
        TAG_THREAD_EXIT => "thread_exit",
        TAG_THREAD_JOIN => "thread_join",
        TAG_PROCESS_EXIT => "process_exit",
        TAG_COND_INIT => "cond_init",
        TAG_COND_ENQUEUE => "cond_enqueue",
        TAG_COND_SIGNAL => "cond_signal",
        TAG_COND_BROADCAST => "cond_broadcast",
        TAG_COND_WAIT_RESUME => "cond_wait_resume",
        TAG_COND_DESTROY => "cond_destroy",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_unique() {
        let tags = [
            TAG_MUTEX_INIT,
            TAG_MUTEX_LOCK,
            TAG_MUTEX_UNLOCK,
            TAG_THREAD_CREATE,
            TAG_THREAD_START,
            TAG_THREAD_EXIT,
            TAG_THREAD_JOIN,
            TAG_PROCESS_EXIT,
            TAG_COND_INIT,
            TAG_COND_ENQUEUE,
            TAG_COND_SIGNAL,
            TAG_COND_BROADCAST,
            TAG_COND_WAIT_RESUME,
            TAG_COND_DESTROY,
        ];
        for (i, a) in tags.iter().enumerate() {
            for b in &tags[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn every_tag_has_a_name() {
        for tag in [
            TAG_MUTEX_INIT,
            TAG_MUTEX_LOCK,
            TAG_MUTEX_UNLOCK,
            TAG_THREAD_CREATE,
            TAG_THREAD_START,
            TAG_THREAD_EXIT,
            TAG_THREAD_JOIN,
            TAG_PROCESS_EXIT,
            TAG_COND_INIT,
            TAG_COND_ENQUEUE,
            TAG_COND_SIGNAL,
            TAG_COND_BROADCAST,
            TAG_COND_WAIT_RESUME,
            TAG_COND_DESTROY,
        ] {
            assert_ne!(tag_name(tag), "unknown");
        }
        assert_eq!(tag_name(0xdead), "unknown");
    }

    #[test]
    fn payload_fits_two_pointer_operands() {
        // cond-enqueue carries a condition address and a mutex address.
        assert!(PAYLOAD_WORDS >= 2);
    }

    #[test]
    fn segment_holds_all_mailboxes() {
        assert!(SEGMENT_SIZE >= MAX_RUNNERS * core::mem::size_of::<RunnerMailbox>());
        // Header is eight words.
        assert_eq!(
            SEGMENT_SIZE - MAX_RUNNERS * core::mem::size_of::<RunnerMailbox>(),
            8 * core::mem::size_of::<u64>()
        );
    }

    #[test]
    fn shm_names_are_per_checker() {
        assert_eq!(shm_name(42), "/mcmini-42");
        assert_ne!(shm_name(1), shm_name(2));
        assert!(shm_name(7).starts_with('/'));
    }

    #[test]
    fn view_exposes_payload_addresses() {
        let view = MailboxView::new(TAG_COND_ENQUEUE, [0x7f00, 0x7f40, 0, 0]);
        assert_eq!(view.address(0), 0x7f00);
        assert_eq!(view.address(1), 0x7f40);
        assert_eq!(MailboxView::tag_only(TAG_THREAD_EXIT).payload, [0; PAYLOAD_WORDS]);
    }
}
