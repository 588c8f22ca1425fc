//! TEAM_480: Scheduler collaborator
//!
//! The VFS never creates threads; it only needs to give up the CPU while
//! another thread finishes resolving a pending cache entry. Callers sleep on a
//! [`WaitChannel`] derived from the (filesystem, key) pair and are woken when
//! that exact entry is resolved or dropped.
//!
//! A channel is a hash, so two keys may share one. Sleepers always re-check
//! their condition, which turns a collision into a spurious wakeup and nothing
//! worse.

use core::hash::{Hash, Hasher};

/// TEAM_480: Identity of something a thread can wait for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaitChannel(u64);

impl WaitChannel {
    /// Channel for `key` within filesystem `fs`.
    pub fn new(fs: u64, key: &[u8]) -> Self {
        let mut h = Fnv1a::default();
        fs.hash(&mut h);
        h.write(key);
        Self(h.finish())
    }

    /// Channel for a dentry key: directory identity plus name.
    pub fn for_name(fs: u64, dir: u64, name: &str) -> Self {
        let mut h = Fnv1a::default();
        fs.hash(&mut h);
        dir.hash(&mut h);
        h.write(name.as_bytes());
        Self(h.finish())
    }
}

struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }
}

impl Hasher for Fnv1a {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= u64::from(*b);
            self.0 = self.0.wrapping_mul(0x0100_0000_01b3);
        }
    }
}

/// TEAM_480: What the VFS needs from the scheduler
pub trait Scheduler: Send + Sync {
    /// Give up the CPU for a moment.
    fn reschedule(&self);

    /// Block until `still_blocked` returns false or a wakeup on `chan`
    /// arrives. Returning early is allowed; callers loop.
    fn sleep(&self, _chan: WaitChannel, still_blocked: &dyn Fn() -> bool) {
        while still_blocked() {
            self.reschedule();
        }
    }

    /// Wake every thread sleeping on `chan`.
    fn wakeup(&self, _chan: WaitChannel) {}
}

/// TEAM_480: Busy-yield scheduler for bare kernels
///
/// Sleeping degenerates into spinning until the condition clears.
#[derive(Clone, Copy, Debug, Default)]
pub struct YieldScheduler;

impl Scheduler for YieldScheduler {
    fn reschedule(&self) {
        core::hint::spin_loop();
    }
}

#[cfg(feature = "std")]
pub use threaded::ThreadScheduler;

#[cfg(feature = "std")]
mod threaded {
    extern crate std;

    use std::sync::{Arc, Condvar, Mutex};
    use std::time::Duration;

    use los_utils::HashMap;

    use super::{Scheduler, WaitChannel};

    /// Upper bound on one condvar wait; the predicate is re-checked after.
    const WAIT_SLICE: Duration = Duration::from_millis(10);

    struct Sleepers {
        cv: Arc<Condvar>,
        count: usize,
    }

    /// TEAM_480: Scheduler for hosted builds, one condvar per busy channel
    #[derive(Default)]
    pub struct ThreadScheduler {
        waiters: Mutex<HashMap<WaitChannel, Sleepers>>,
    }

    impl ThreadScheduler {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Scheduler for ThreadScheduler {
        fn reschedule(&self) {
            std::thread::yield_now();
        }

        fn sleep(&self, chan: WaitChannel, still_blocked: &dyn Fn() -> bool) {
            let Ok(mut map) = self.waiters.lock() else {
                self.reschedule();
                return;
            };
            let cv = {
                let entry = map.entry(chan).or_insert_with(|| Sleepers {
                    cv: Arc::new(Condvar::new()),
                    count: 0,
                });
                entry.count += 1;
                Arc::clone(&entry.cv)
            };
            // Checked under the waiter lock: a wakeup cannot slip in between.
            while still_blocked() {
                map = match cv.wait_timeout(map, WAIT_SLICE) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
            if let Some(entry) = map.get_mut(&chan) {
                entry.count -= 1;
                if entry.count == 0 {
                    map.remove(&chan);
                }
            }
        }

        fn wakeup(&self, chan: WaitChannel) {
            if let Ok(map) = self.waiters.lock() {
                if let Some(entry) = map.get(&chan) {
                    entry.cv.notify_all();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_distinguish_keys() {
        assert_eq!(WaitChannel::new(1, b"abc"), WaitChannel::new(1, b"abc"));
        assert_ne!(WaitChannel::new(1, b"abc"), WaitChannel::new(2, b"abc"));
        assert_ne!(WaitChannel::new(1, b"abc"), WaitChannel::new(1, b"abd"));
        assert_ne!(
            WaitChannel::for_name(1, 7, "etc"),
            WaitChannel::for_name(1, 8, "etc")
        );
    }

    #[test]
    fn test_yield_scheduler_sleep_returns_when_clear() {
        use core::cell::Cell;
        let polls = Cell::new(0);
        YieldScheduler.sleep(WaitChannel::new(0, b""), &|| {
            polls.set(polls.get() + 1);
            polls.get() < 3
        });
        assert_eq!(polls.get(), 3);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_thread_scheduler_wakeup() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let sched = Arc::new(ThreadScheduler::new());
        let busy = Arc::new(AtomicBool::new(true));
        let chan = WaitChannel::new(3, b"entry");

        let (s, b) = (Arc::clone(&sched), Arc::clone(&busy));
        let sleeper = std::thread::spawn(move || {
            s.sleep(chan, &|| b.load(Ordering::SeqCst));
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        busy.store(false, Ordering::SeqCst);
        sched.wakeup(chan);
        sleeper.join().unwrap();
    }
}
