use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Index, Sub, SubAssign};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

type Components = SmallVec<[i64; 2]>;

/// Fixed-width load vector.
///
/// Stored amounts (pickups, deliveries, capacities) are non-negative;
/// intermediate deltas computed from them may dip below zero componentwise.
/// All amounts in a finalized problem share the same dimension, so the
/// componentwise operations below assume equal lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount(Components);

impl Amount {
    pub fn zero(size: usize) -> Self {
        let mut components = SmallVec::with_capacity(size);
        components.resize(size, 0);
        Amount(components)
    }

    /// An amount with every component at `i64::MAX`, used as the "no limit"
    /// sentinel for break load margins.
    pub fn max_amount(size: usize) -> Self {
        let mut components = SmallVec::with_capacity(size);
        components.resize(size, i64::MAX);
        Amount(components)
    }

    pub fn from_vec(components: Vec<i64>) -> Self {
        Amount(SmallVec::from_vec(components))
    }

    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }

    pub fn get(&self, index: usize) -> i64 {
        self.0[index]
    }

    pub fn set(&mut self, index: usize, value: i64) {
        self.0[index] = value;
    }

    /// Zero-pad (or truncate) to the problem-wide dimension.
    pub fn resize(&mut self, size: usize) {
        self.0.resize(size, 0);
    }

    pub fn min_assign(&mut self, other: &Amount) {
        debug_assert_eq!(self.size(), other.size());
        for (a, &b) in self.0.iter_mut().zip(other.0.iter()) {
            *a = (*a).min(b);
        }
    }

    pub fn max_assign(&mut self, other: &Amount) {
        debug_assert_eq!(self.size(), other.size());
        for (a, &b) in self.0.iter_mut().zip(other.0.iter()) {
            *a = (*a).max(b);
        }
    }
}

impl Index<usize> for Amount {
    type Output = i64;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        debug_assert_eq!(self.size(), rhs.size());
        for (a, &b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a += b;
        }
    }
}

impl SubAssign<&Amount> for Amount {
    fn sub_assign(&mut self, rhs: &Amount) {
        debug_assert_eq!(self.size(), rhs.size());
        for (a, &b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a -= b;
        }
    }
}

impl Add<&Amount> for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub<&Amount> for &Amount {
    type Output = Amount;

    fn sub(self, rhs: &Amount) -> Amount {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

/// Componentwise dominance: `a <= b` iff every component of `a` is at most the
/// matching component of `b`. Mixed amounts are incomparable (`None`).
impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Amount) -> Option<Ordering> {
        debug_assert_eq!(self.size(), other.size());

        let mut has_lt = false;
        let mut has_gt = false;
        for (&a, &b) in self.0.iter().zip(other.0.iter()) {
            match a.cmp(&b) {
                Ordering::Less => has_lt = true,
                Ordering::Greater => has_gt = true,
                Ordering::Equal => {}
            }
        }

        match (has_lt, has_gt) {
            (true, true) => None,
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => Some(Ordering::Equal),
        }
    }
}
