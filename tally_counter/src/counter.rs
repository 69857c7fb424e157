//! Rollover orchestration and range queries.

use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::PoisonError;

#[cfg(not(loom))]
use std::sync::{
    Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicU64, Ordering},
};

#[cfg(loom)]
use loom::sync::{
    Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicU64, Ordering},
};

use tracing::debug;

use crate::bucket::Bucket;
use crate::window::Window;
use crate::{Clock, Config, RealClock};

/// Seconds an active window spans before recording rolls it: a window opened
/// at `x` holds the seconds `[x, x + 59]`.
const WINDOW_SECONDS: u64 = 60;

const SECONDS_PER_HOUR: u64 = 3600;

/// A recording at `now` must roll the window first when none has been opened
/// yet or the open one has reached its span.
fn rollover_due(now: u64, opened_at: u64) -> bool {
    opened_at == 0 || now.saturating_sub(opened_at) >= WINDOW_SECONDS
}

/// Whether everything the counter holds is too old for `horizon`: the active
/// window opened more than `horizon - 1` seconds ago, or was never opened.
/// Anything in the history log is older still.
fn expired(now: u64, opened_at: u64, horizon: u64) -> bool {
    opened_at == 0 || now.saturating_sub(opened_at) > horizon - 1
}

#[derive(Debug, Default)]
struct State {
    /// The window currently receiving events; absent until the first event
    /// is ever recorded.
    active: Option<Window>,
    /// Closed windows, oldest first. Append-only apart from retention
    /// eviction; entries are never mutated after insertion.
    history: Vec<Arc<Window>>,
}

/// An approximate event-rate counter.
///
/// Writers call [`Counter::record_event`]; readers ask for the event count
/// over the last minute, hour, N hours, or day. Both sides may run
/// concurrently from any number of threads.
///
/// One `RwLock` guards the active window and the history log. Its write side
/// is the single exclusive region of the whole structure, taken only to roll
/// a window, open the first bucket of a second, or evict beyond the retention
/// cap. The common write — another event in a second that already has a
/// bucket — is an atomic increment under the shared side. Readers clone
/// `Arc` handles to the windows they need and walk them after releasing the
/// lock, so a walk racing a rollover sees the log as it was: weakly
/// consistent, at most one boundary second off.
#[derive(Debug)]
pub struct Counter<C = RealClock> {
    clock: C,
    /// Epoch second at which the active window opened; 0 until the first
    /// event is recorded. Written only inside the exclusive region.
    opened_at: AtomicU64,
    state: RwLock<State>,
    max_retained_windows: Option<NonZeroUsize>,
}

impl Counter<RealClock> {
    /// Create a counter driven by the system wall clock.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, RealClock)
    }
}

impl<C> Counter<C>
where
    C: Clock,
{
    /// Create a counter with the given clock.
    #[must_use]
    pub fn with_clock(config: Config, clock: C) -> Self {
        Self {
            clock,
            opened_at: AtomicU64::new(0),
            state: RwLock::new(State::default()),
            max_retained_windows: config.max_retained_windows,
        }
    }

    /// Record one event occurrence at the current wall-clock second.
    ///
    /// Rolls the active window first when it is due. Both the rollover and
    /// the creation of a second's first bucket are double-checked: an
    /// unguarded peek decides whether the exclusive region is needed at all,
    /// and the condition is re-tested inside it, so concurrent writers roll
    /// at most once and never open two buckets for the same second. Once the
    /// bucket exists, recording is a single atomic increment under the
    /// shared side of the lock.
    ///
    /// Never fails.
    pub fn record_event(&self) {
        let now = self.clock.epoch_seconds();

        if rollover_due(now, self.opened_at.load(Ordering::SeqCst)) {
            self.roll_window(now);
        }

        {
            let state = self.read_state();
            if let Some(bucket) = state.active.as_ref().and_then(Window::newest) {
                // A head newer than `now` means the wall clock stepped back
                // between operations; the event folds into the head bucket,
                // keeping insertion order non-decreasing.
                if bucket.second() >= now {
                    bucket.increment();
                    return;
                }
            }
        }

        let mut state = self.write_state();
        let window = state.active.get_or_insert_with(Window::new);
        if let Some(bucket) = window.newest() {
            if bucket.second() >= now {
                bucket.increment();
                return;
            }
        }
        window.push_newest(Arc::new(Bucket::open(now)));
    }

    /// Approximate number of events recorded in the last minute.
    ///
    /// Combines the still-fresh active window with the buckets of the most
    /// recently closed window younger than 59 seconds. Returns 0 once the
    /// active window is more than two window spans old — everything the
    /// counter holds is then outside the minute horizon.
    ///
    /// A query racing a rollover may count or miss one boundary second;
    /// that imprecision is part of the contract.
    #[must_use]
    pub fn count_last_minute(&self) -> u64 {
        let now = self.clock.epoch_seconds();
        let opened_at = self.opened_at.load(Ordering::SeqCst);
        if expired(now, opened_at, 2 * WINDOW_SECONDS) {
            return 0;
        }

        let previous = {
            let state = self.read_state();
            state.history.last().map(Arc::clone)
        };
        let tail = previous.map_or(0, |window| {
            window
                .iter()
                .filter(|bucket| now.saturating_sub(bucket.second()) < WINDOW_SECONDS - 1)
                .map(|bucket| bucket.count())
                .sum()
        });

        tail + self.current_interval_value(now, opened_at, WINDOW_SECONDS)
    }

    /// Approximate number of events recorded in the last `hours` hours.
    ///
    /// Walks the history log newest to oldest: a closed window whose oldest
    /// bucket is younger than `hours * 3600 - 1` seconds counts whole; one
    /// younger than `hours * 3600 + 59` straddles the horizon and counts
    /// bucket by bucket; the first window older than both ends the walk,
    /// since everything past it is older still.
    ///
    /// With the default retention cap, horizons beyond 24 hours see at most
    /// the retained day of history.
    #[must_use]
    pub fn count_last_hours(&self, hours: NonZeroU32) -> u64 {
        let now = self.clock.epoch_seconds();
        let opened_at = self.opened_at.load(Ordering::SeqCst);
        let horizon = u64::from(hours.get()) * SECONDS_PER_HOUR;
        if expired(now, opened_at, horizon) {
            return 0;
        }

        let head = self.current_interval_value(now, opened_at, horizon);

        let closed: Vec<Arc<Window>> = self.read_state().history.clone();
        let mut sum = 0;
        for window in closed.iter().rev() {
            let Some(oldest) = window.oldest() else {
                continue;
            };
            let age = now.saturating_sub(oldest.second());
            if age < horizon - 1 {
                sum += window.total();
            } else if age < horizon + WINDOW_SECONDS - 1 {
                sum += window
                    .iter()
                    .filter(|bucket| now.saturating_sub(bucket.second()) < horizon)
                    .map(|bucket| bucket.count())
                    .sum::<u64>();
            } else {
                break;
            }
        }

        head + sum
    }

    /// Approximate number of events recorded in the last hour.
    #[must_use]
    pub fn count_last_hour(&self) -> u64 {
        self.count_last_hours(NonZeroU32::MIN)
    }

    /// Approximate number of events recorded in the last 24 hours.
    #[must_use]
    pub fn count_last_day(&self) -> u64 {
        // SAFETY: 24 is a non-zero u32.
        const DAY: NonZeroU32 = unsafe { NonZeroU32::new_unchecked(24) };
        self.count_last_hours(DAY)
    }

    /// Sum of the active window while it is still fresh for `interval`.
    ///
    /// Returns 0 rather than partial data once the window is `interval` or
    /// more seconds old. Buckets dated after `now` — a wall clock that
    /// stepped back between operations — are excluded.
    fn current_interval_value(&self, now: u64, opened_at: u64, interval: u64) -> u64 {
        if now.saturating_sub(opened_at) >= interval {
            return 0;
        }
        let buckets = {
            let state = self.read_state();
            state.active.as_ref().map_or_else(Vec::new, Window::snapshot)
        };
        buckets
            .iter()
            .filter(|bucket| bucket.second() <= now)
            .map(|bucket| bucket.count())
            .sum()
    }

    /// Close the active window into the history log and open a fresh one.
    ///
    /// The rollover condition is re-tested under the exclusive region; a
    /// writer that lost the race to another rollover leaves the fresh window
    /// alone.
    fn roll_window(&self, now: u64) {
        let mut state = self.write_state();
        let opened_at = self.opened_at.load(Ordering::SeqCst);
        if !rollover_due(now, opened_at) {
            return;
        }

        if let Some(window) = state.active.take() {
            // An empty window carries no information and is not retained.
            if !window.is_empty() {
                debug!(
                    window_opened_at = opened_at,
                    buckets = window.len(),
                    "active window rolled into history"
                );
                state.history.push(Arc::new(window));
                if let Some(cap) = self.max_retained_windows {
                    let excess = state.history.len().saturating_sub(cap.get());
                    if excess > 0 {
                        state.history.drain(..excess);
                        debug!(
                            evicted = excess,
                            cap = cap.get(),
                            "retention cap evicted oldest windows"
                        );
                    }
                }
            }
        }
        state.active = Some(Window::new());
        self.opened_at.store(now, Ordering::SeqCst);
    }

    /// A poisoned lock only means some writer panicked mid-update; counts
    /// are monotonic and remain usable, so poisoning is ignored.
    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}



#[cfg(kani)]
mod verification {
    use super::{WINDOW_SECONDS, expired, rollover_due};

    // While records are still landing in the open window, no query horizon
    // of at least one window span can consider the counter expired.
    #[kani::proof]
    fn fresh_window_never_expired() {
        let now: u64 = kani::any();
        let opened_at: u64 = kani::any();
        let horizon: u64 = kani::any();
        kani::assume(opened_at != 0);
        kani::assume(horizon >= WINDOW_SECONDS);
        if !rollover_due(now, opened_at) {
            assert!(!expired(now, opened_at, horizon));
        }
    }
}
