use jiff::{SignedDuration, Timestamp};

use crate::problem::error::ProblemError;

/// Wire units: plain seconds, meters and cost units as provided by callers.
pub type UserDuration = u32;
pub type UserDistance = u32;
pub type UserCost = u32;

/// Internal units. Durations and costs carry a fixed decimal factor so that
/// per-hour cost rates keep sub-unit precision; distances are stored as-is.
pub type Duration = u64;
pub type Distance = u64;
pub type Cost = i64;
pub type Priority = u32;

pub const DURATION_FACTOR: u64 = 100;
pub const COST_FACTOR: i64 = 100;

pub fn scale_from_user_duration(d: UserDuration) -> Duration {
    DURATION_FACTOR * u64::from(d)
}

pub fn scale_to_user_duration(d: Duration) -> UserDuration {
    ((d + DURATION_FACTOR / 2) / DURATION_FACTOR) as UserDuration
}

pub fn scale_from_user_distance(d: UserDistance) -> Distance {
    u64::from(d)
}

pub fn scale_from_user_cost(c: UserCost) -> Cost {
    COST_FACTOR * i64::from(c)
}

pub fn scale_to_user_cost(c: Cost) -> UserCost {
    ((c + COST_FACTOR / 2) / COST_FACTOR) as UserCost
}

/// Boundary addition on user-visible costs. Internal arithmetic saturates
/// instead, see [`crate::problem::eval`].
pub fn add_without_overflow(a: UserCost, b: UserCost) -> Result<UserCost, ProblemError> {
    a.checked_add(b).ok_or(ProblemError::Overflow)
}

/// Seconds elapsed from `epoch` to `t`, clamped at zero. This is the only
/// place timestamps enter the crate; everything downstream works in user
/// seconds or internal units.
pub fn user_duration_since(epoch: Timestamp, t: Timestamp) -> UserDuration {
    let elapsed = t.duration_since(epoch);
    if elapsed.is_negative() {
        0
    } else {
        elapsed.as_secs().min(u64::from(UserDuration::MAX) as i64) as UserDuration
    }
}

pub fn user_duration_from(d: SignedDuration) -> UserDuration {
    if d.is_negative() {
        0
    } else {
        d.as_secs().min(u64::from(UserDuration::MAX) as i64) as UserDuration
    }
}
