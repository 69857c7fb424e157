//! In-process approximate event-rate counting.
//!
//! This library answers one question: how many events has this process seen
//! in the last minute, the last hour, the last N hours? Callers report each
//! occurrence with [`Counter::record_event`] and the counter aggregates them
//! into per-second buckets; individual event records are never kept.
//!
//! # Mechanism
//!
//! The engine is a rolling-window aggregation in three layers. A bucket holds
//! the event count for one epoch second. The active window is the mutable run
//! of buckets opened within the last minute, newest first. When an event
//! arrives sixty or more seconds after the active window opened, the window
//! rolls: it is frozen, appended to a history log of closed windows, and a
//! fresh window takes its place.
//!
//! Queries combine the active window with a tail-truncated suffix of the
//! history log. The minute query takes the still-fresh active window plus the
//! buckets of the previous window younger than 59 seconds. The hour-scale
//! queries walk the history log newest to oldest, taking closed windows whole
//! while they sit inside the horizon, filtering bucket-by-bucket where a
//! window straddles it, and stopping at the first window beyond it.
//!
//! # Approximation
//!
//! Totals are deliberately approximate at window boundaries: a query racing a
//! rollover may count or miss the events of one boundary second. Counts are
//! weakly consistent, never corrupted, and readers do not block writers for
//! the duration of a walk. A counter that has received no events inside a
//! query's horizon reports 0; that is an answer, not an error.
//!
//! Per-second and aggregate counts are 64-bit on the assumption that event
//! volume cannot practically overflow them.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use std::num::NonZeroUsize;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

mod bucket;
mod counter;
mod window;

pub use counter::Counter;

/// The `Clock` used by every counter.
///
/// All operations sample the clock once at their start; nothing holds a
/// timestamp across operations.
pub trait Clock {
    /// Wall-clock seconds since the Unix epoch.
    fn epoch_seconds(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
/// A clock that reads the system wall clock.
pub struct RealClock;

impl Clock for RealClock {
    /// A wall clock set before the Unix epoch reads as 0, the same value an
    /// untouched counter carries, so such a clock records nothing queryable
    /// rather than failing.
    fn epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}

/// Closed windows a 24-hour query can touch when windows roll at the fastest
/// possible cadence, `ceil((86_400 + 59) / 60)`.
// SAFETY: 1441 is a non-zero usize.
pub const DAY_HORIZON_WINDOWS: NonZeroUsize = unsafe { NonZeroUsize::new_unchecked(1441) };

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
/// Configuration of a [`Counter`].
pub struct Config {
    /// Closed windows retained for queries. `None` keeps every window for the
    /// life of the process, growing by one entry per rollover. The default
    /// retains [`DAY_HORIZON_WINDOWS`], the most any supported query can
    /// reach.
    #[serde(default = "default_max_retained_windows")]
    pub max_retained_windows: Option<NonZeroUsize>,
}

fn default_max_retained_windows() -> Option<NonZeroUsize> {
    Some(DAY_HORIZON_WINDOWS)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retained_windows: default_max_retained_windows(),
        }
    }
}

static GLOBAL: OnceCell<Counter> = OnceCell::new();

/// The process-wide counter, lazily initialized with the default [`Config`]
/// on first access. Every call returns the same instance.
///
/// Prefer constructing a [`Counter`] and sharing it explicitly; this accessor
/// exists for callers with no place to thread one through.
pub fn global() -> &'static Counter {
    GLOBAL.get_or_init(|| Counter::new(Config::default()))
}

#[cfg(all(test, not(loom)))]
mod test {
    use super::{Clock, Config, DAY_HORIZON_WINDOWS, RealClock, global};

    #[test]
    fn real_clock_reads_epoch_seconds() {
        let clock = RealClock;
        let first = clock.epoch_seconds();
        let second = clock.epoch_seconds();
        assert!(first > 1_500_000_000);
        assert!(second >= first);
    }

    #[test]
    fn global_returns_one_instance() {
        let first = global();
        let second = global();
        assert!(std::ptr::eq(first, second));

        first.record_event();
        second.record_event();
        assert!(second.count_last_minute() >= 2);
    }

    #[test]
    fn config_default_covers_day_horizon() {
        let config = Config::default();
        assert_eq!(config.max_retained_windows, Some(DAY_HORIZON_WINDOWS));
        assert_eq!(DAY_HORIZON_WINDOWS.get(), 1441);
    }

    #[test]
    fn config_deserializes_defaults() {
        let config: Config = serde_json::from_str("{}").expect("valid config");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn config_accepts_unbounded_retention() {
        let config: Config =
            serde_json::from_str(r#"{"max_retained_windows": null}"#).expect("valid config");
        assert_eq!(config.max_retained_windows, None);
    }

    #[test]
    fn config_rejects_unknown_fields() {
        let result = serde_json::from_str::<Config>(r#"{"retained": 10}"#);
        assert!(result.is_err());
    }

    #[test]
    fn config_rejects_zero_retention() {
        let result = serde_json::from_str::<Config>(r#"{"max_retained_windows": 0}"#);
        assert!(result.is_err());
    }
}
