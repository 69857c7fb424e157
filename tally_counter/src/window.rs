//! Windows of per-second buckets and the history log entry type.

use std::collections::VecDeque;

#[cfg(not(loom))]
use std::sync::Arc;

#[cfg(loom)]
use loom::sync::Arc;

use crate::bucket::Bucket;

/// An ordered run of buckets, newest first.
///
/// One `Window` is active at a time, receiving buckets as events arrive;
/// every rollover freezes it behind an `Arc` and appends it to the history
/// log, after which it is never mutated again. Buckets arrive in strictly
/// increasing second order, so the head is always the bucket for the most
/// recent second that received an event and the back is the oldest.
#[derive(Debug, Default)]
pub(crate) struct Window {
    buckets: VecDeque<Arc<Bucket>>,
}

impl Window {
    pub(crate) fn new() -> Self {
        Self {
            buckets: VecDeque::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    /// The bucket for the most recent second that received an event.
    pub(crate) fn newest(&self) -> Option<&Arc<Bucket>> {
        self.buckets.front()
    }

    /// The bucket for the oldest second in the window.
    pub(crate) fn oldest(&self) -> Option<&Arc<Bucket>> {
        self.buckets.back()
    }

    pub(crate) fn push_newest(&mut self, bucket: Arc<Bucket>) {
        debug_assert!(
            self.newest()
                .is_none_or(|head| head.second() < bucket.second()),
            "buckets must arrive in increasing second order"
        );
        self.buckets.push_front(bucket);
    }

    /// Buckets newest to oldest.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Bucket>> {
        self.buckets.iter()
    }

    /// Sum of every bucket in the window.
    pub(crate) fn total(&self) -> u64 {
        self.buckets.iter().map(|bucket| bucket.count()).sum()
    }

    /// Handles to every bucket, newest first. A snapshot lets a reader walk
    /// the window after releasing the lock that guards it; counts read
    /// through the handles stay live.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Bucket>> {
        self.buckets.iter().cloned().collect()
    }
}


#[cfg(kani)]
mod verification {
    use super::{Arc, Window};
    use crate::bucket::Bucket;

    // A closed window whose oldest bucket sits strictly inside a query
    // horizon contributes its full total: the per-bucket filter applied to
    // straddling windows selects every bucket of an interior window.
    #[kani::proof]
    #[kani::unwind(8)]
    fn interior_window_filter_selects_all() {
        let now: u64 = kani::any();
        let secs: u64 = kani::any();
        kani::assume(secs >= 60);

        let oldest: u64 = kani::any();
        let mid: u64 = kani::any();
        let newest: u64 = kani::any();
        kani::assume(oldest < mid && mid < newest && newest <= now);
        kani::assume(now - oldest < secs - 1);

        let mut window = Window::new();
        window.push_newest(Arc::new(Bucket::open(oldest)));
        window.push_newest(Arc::new(Bucket::open(mid)));
        window.push_newest(Arc::new(Bucket::open(newest)));

        let filtered: u64 = window
            .iter()
            .filter(|bucket| now.saturating_sub(bucket.second()) < secs)
            .map(|bucket| bucket.count())
            .sum();
        assert_eq!(filtered, window.total());
    }
}
