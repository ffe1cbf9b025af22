//! # Polling
//!
//! A recurring-task primitive shared by the coordinators. A [`Poller`]
//! delivers ticks at a fixed interval while the host is visible. Ticks that
//! fall due while the host is hidden are skipped rather than queued.
//!
//! An absent or zero interval means "not scheduled". Coordinators stop their
//! poller as soon as the awaited terminal state is observed, and dropping a
//! poller (or the future driving it) cancels any further ticks.

use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::sync::watch;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Whether the host page or app is in the foreground.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    /// Foreground: polling proceeds.
    #[default]
    Visible,

    /// Background: polling ticks are skipped.
    Hidden,
}

/// Host-side control of visibility. The host keeps the handle and flips it on
/// lifecycle events; pollers observe the change through a subscription.
#[derive(Debug)]
pub struct VisibilityHandle {
    tx: watch::Sender<Visibility>,
}

impl Default for VisibilityHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityHandle {
    /// Create a handle with the host initially visible.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Visibility::Visible);
        Self { tx }
    }

    /// Record a visibility change.
    pub fn set(&self, visibility: Visibility) {
        self.tx.send_replace(visibility);
    }

    /// Current visibility.
    #[must_use]
    pub fn get(&self) -> Visibility {
        *self.tx.borrow()
    }

    /// Subscribe to visibility changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

/// A fixed-interval ticker that is paused while the host is hidden.
#[derive(Debug)]
pub struct Poller {
    visibility: watch::Receiver<Visibility>,
    timer: Option<Interval>,
    seq: u64,
}

impl Poller {
    /// Create a stopped poller observing the given visibility.
    #[must_use]
    pub const fn new(visibility: watch::Receiver<Visibility>) -> Self {
        Self {
            visibility,
            timer: None,
            seq: 0,
        }
    }

    /// Arm the poller. The first tick is due one interval from now. Any
    /// previously armed timer is replaced. `None` or a zero interval leaves
    /// the poller stopped.
    pub fn start(&mut self, interval: Option<Duration>) {
        self.timer = interval.filter(|d| !d.is_zero()).map(|period| {
            let mut timer = time::interval_at(deadline(period), period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        });
    }

    /// Cancel future ticks.
    pub fn stop(&mut self) {
        self.timer = None;
    }

    /// Whether a timer is armed.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Continue numbering ticks after `seq`, so responses from this poller
    /// are never mistaken for ones older than a value already applied by an
    /// earlier subscription.
    pub fn resume_after(&mut self, seq: u64) {
        self.seq = self.seq.max(seq);
    }

    /// Sequence number of the most recently delivered tick.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Wait for the next tick delivered while visible. Returns the tick's
    /// sequence number, or `None` if the poller is stopped.
    pub async fn tick(&mut self) -> Option<u64> {
        loop {
            let timer = self.timer.as_mut()?;
            timer.tick().await;
            if *self.visibility.borrow() == Visibility::Visible {
                self.seq += 1;
                return Some(self.seq);
            }
            tracing::trace!("host hidden, skipping poll");
        }
    }
}

/// The instant `after` from now. Durations too large to represent saturate
/// to a point decades away, which is never reached in practice.
pub(crate) fn deadline(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A value updated from sequenced responses. Responses carrying a sequence
/// number at or below the last applied one are discarded, so a late reply to
/// an earlier poll can never overwrite a newer observation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sequenced<T> {
    value: T,
    applied: u64,
}

impl<T> Sequenced<T> {
    /// Wrap an initial value (sequence zero).
    pub const fn new(value: T) -> Self {
        Self { value, applied: 0 }
    }

    /// Apply `value` if `seq` is newer than the last applied response.
    /// Returns whether the value was applied.
    pub fn apply(&mut self, seq: u64, value: T) -> bool {
        if seq <= self.applied {
            tracing::warn!(seq, applied = self.applied, "discarding stale response");
            return false;
        }
        self.applied = seq;
        self.value = value;
        true
    }

    /// The current value.
    pub const fn get(&self) -> &T {
        &self.value
    }

    /// Mutable access for edits that come from command responses rather
    /// than polls. Does not change the applied sequence number.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Sequence number of the last applied response.
    pub const fn applied(&self) -> u64 {
        self.applied
    }
}

impl<T: Serialize> Serialize for Sequenced<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}
