//! Monotonic timestamps and thread identity for the tracing hot path.
//!
//! Prefers `CLOCK_MONOTONIC_RAW` where the platform has it (immune to NTP
//! slewing, which matters to offline log readers comparing deltas), falls
//! back to `CLOCK_MONOTONIC` on other unix targets, and to a process-epoch
//! `Instant` everywhere else.

/// Whether timestamps come from the raw (unslewed) monotonic clock.
/// Recorded in the event-log header flags so readers know what they got.
pub(crate) const RAW_CLOCK: bool = cfg!(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos"
));

#[cfg(all(
    unix,
    any(target_os = "linux", target_os = "android", target_os = "macos")
))]
const CLOCK_ID: libc::clockid_t = libc::CLOCK_MONOTONIC_RAW;

#[cfg(all(
    unix,
    not(any(target_os = "linux", target_os = "android", target_os = "macos"))
))]
const CLOCK_ID: libc::clockid_t = libc::CLOCK_MONOTONIC;

/// Current monotonic time in nanoseconds.
#[cfg(unix)]
pub fn now_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::clock_gettime(CLOCK_ID, &mut ts) };
    debug_assert!(ret == 0, "clock_gettime failed");
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Current monotonic time in nanoseconds (non-unix fallback; the epoch is
/// the first call, which keeps per-thread ordering intact).
#[cfg(not(unix))]
pub fn now_ns() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Kernel thread id on Linux; log files are named `<pid>.<tid>.bin` and the
/// kernel id is what offline tools can correlate with other system traces.
#[cfg(target_os = "linux")]
pub(crate) fn thread_id() -> u32 {
    (unsafe { libc::gettid() }) as u32
}

/// Process-unique thread id elsewhere. Only uniqueness matters: the id
/// keys file names and header fields, nothing else.
#[cfg(not(target_os = "linux"))]
pub(crate) fn thread_id() -> u32 {
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static TID: Cell<u32> = const { Cell::new(0) };
    }
    TID.with(|c| {
        let mut id = c.get();
        if id == 0 {
            id = NEXT.fetch_add(1, Ordering::Relaxed);
            c.set(id);
        }
        id
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let mut prev = now_ns();
        for _ in 0..1000 {
            let t = now_ns();
            assert!(t >= prev, "clock went backwards: {prev} -> {t}");
            prev = t;
        }
    }

    #[test]
    fn clock_advances_during_sleep() {
        let before = now_ns();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let after = now_ns();
        assert!(
            after - before >= 5_000_000,
            "expected >=5ms to elapse, got {}ns",
            after - before
        );
    }

    #[test]
    fn thread_ids_are_stable_and_distinct() {
        let here = thread_id();
        assert_eq!(here, thread_id(), "id must be stable within a thread");

        let other = std::thread::spawn(thread_id).join().unwrap();
        assert_ne!(here, other, "distinct threads must get distinct ids");
    }
}
