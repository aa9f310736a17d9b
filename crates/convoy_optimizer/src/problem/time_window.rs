use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::problem::scale::{
    Duration, UserDuration, scale_from_user_duration, user_duration_since,
};

/// Closed interval in internal duration units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Duration,
    pub end: Duration,
}

impl TimeWindow {
    pub fn new(start: Duration, end: Duration) -> Self {
        TimeWindow { start, end }
    }

    pub fn from_user(start: UserDuration, end: UserDuration) -> Self {
        TimeWindow {
            start: scale_from_user_duration(start),
            end: scale_from_user_duration(end),
        }
    }

    /// Boundary constructor: timestamps are reduced to user seconds relative
    /// to `epoch` before scaling. The core never stores a timestamp.
    pub fn from_timestamps(epoch: Timestamp, start: Timestamp, end: Timestamp) -> Self {
        TimeWindow::from_user(
            user_duration_since(epoch, start),
            user_duration_since(epoch, end),
        )
    }

    pub fn contains(&self, t: Duration) -> bool {
        self.start <= t && t <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        TimeWindow {
            start: 0,
            end: scale_from_user_duration(UserDuration::MAX),
        }
    }
}

/// Ordered, non-overlapping time windows. Always non-empty: entities without
/// an explicit window get the default full-horizon one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindows(SmallVec<[TimeWindow; 1]>);

impl Default for TimeWindows {
    fn default() -> Self {
        TimeWindows(smallvec::smallvec![TimeWindow::default()])
    }
}

impl TimeWindows {
    pub fn single(tw: TimeWindow) -> Self {
        TimeWindows(smallvec::smallvec![tw])
    }

    pub fn from_vec(tws: Vec<TimeWindow>) -> Self {
        if tws.is_empty() {
            TimeWindows::default()
        } else {
            TimeWindows(SmallVec::from_vec(tws))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeWindow> {
        self.0.iter()
    }

    /// First window that still admits a service starting at or after `t`,
    /// i.e. the first one whose end is not already past.
    pub fn first_admitting(&self, t: Duration) -> Option<&TimeWindow> {
        self.0.iter().find(|tw| t <= tw.end)
    }

    /// Last window that could have started by `t`, scanned from the back.
    pub fn latest_admitting(&self, t: Duration) -> Option<&TimeWindow> {
        self.0.iter().rev().find(|tw| tw.start <= t)
    }

    pub fn back(&self) -> &TimeWindow {
        self.0.last().expect("time windows are never empty")
    }

    /// Windows must be individually valid, sorted and pairwise disjoint.
    pub fn are_consistent(&self) -> bool {
        if !self.0.iter().all(TimeWindow::is_valid) {
            return false;
        }
        self.0.windows(2).all(|pair| pair[0].end < pair[1].start)
    }
}
