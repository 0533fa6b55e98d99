//! # Host-wide monotonic timestamps.
//!
//! [`monotonic_timestamp`] returns seconds as `f64` with these properties:
//!
//! - precision of one millisecond or better
//! - unaffected by wall-clock adjustments and daylight saving
//! - comparable across all threads and processes on the same host
//! - monotonically non-decreasing between reboots
//!
//! The epoch is unspecified (typically boot time). `std::time::Instant` is
//! deliberately not used: its readings are opaque and only comparable within
//! one process, while tick timestamps must line up across workers.

/// Returns a host-wide monotonic timestamp in seconds.
#[cfg(unix)]
pub fn monotonic_timestamp() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // CLOCK_MONOTONIC cannot fail with a valid timespec pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as f64 + ts.tv_nsec as f64 * 1e-9
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn is_non_decreasing() {
        let a = monotonic_timestamp();
        let b = monotonic_timestamp();
        assert!(b >= a);
    }

    #[test]
    fn tracks_elapsed_time() {
        let a = monotonic_timestamp();
        std::thread::sleep(Duration::from_millis(20));
        let b = monotonic_timestamp();
        let elapsed = b - a;
        assert!(elapsed >= 0.015, "elapsed {elapsed}");
        assert!(elapsed < 1.0, "elapsed {elapsed}");
    }

    #[test]
    fn agrees_across_threads() {
        let before = monotonic_timestamp();
        let sampled = std::thread::spawn(monotonic_timestamp).join().unwrap();
        let after = monotonic_timestamp();
        assert!(sampled >= before);
        assert!(sampled <= after);
    }
}
