use fxhash::FxHashMap;

use crate::problem::amount::Amount;
use crate::problem::job::{JobIdx, JobType, TagId};
use crate::problem::routing_problem::RoutingProblem;
use crate::problem::vehicle::VehicleIdx;
use crate::solver::solution::pinning;

/// Per-vehicle load profile: the job sequence together with every derived
/// quantity needed to answer capacity probes in O(amount dimension).
///
/// Ranks index jobs, steps index the gaps between them: step 0 is before the
/// vehicle start, step `len` after the last job.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRoute {
    zero: Amount,

    // fwd_pickups[i] / fwd_deliveries[i]: single-job totals over [0, i].
    fwd_pickups: Vec<Amount>,
    fwd_deliveries: Vec<Amount>,

    // bwd_deliveries[i] / bwd_pickups[i]: single-job totals pending after i.
    bwd_deliveries: Vec<Amount>,
    bwd_pickups: Vec<Amount>,

    // pd_loads[i]: shipment load carried at rank i (inclusive).
    pd_loads: Vec<Amount>,

    nb_pickups: Vec<u32>,
    nb_deliveries: Vec<u32>,

    // current_loads[s]: vehicle load at step s.
    current_loads: Vec<Amount>,

    // Componentwise running peak of current_loads up to / after each step.
    fwd_peaks: Vec<Amount>,
    bwd_peaks: Vec<Amount>,

    delivery_margin: Amount,
    pickup_margin: Amount,

    // Exclusive-tag occurrences in the current sequence.
    tag_counts: FxHashMap<TagId, u32>,

    pub(crate) v_rank: VehicleIdx,
    pub(crate) v_type: usize,
    pub(crate) capacity: Amount,

    pub(crate) route: Vec<JobIdx>,
}

impl RawRoute {
    pub fn new(problem: &RoutingProblem, v_rank: VehicleIdx, amount_size: usize) -> Self {
        let vehicle = problem.vehicle(v_rank);
        let zero = Amount::zero(amount_size);

        RawRoute {
            route: Vec::new(),
            fwd_pickups: Vec::new(),
            fwd_deliveries: Vec::new(),
            bwd_deliveries: Vec::new(),
            bwd_pickups: Vec::new(),
            pd_loads: Vec::new(),
            nb_pickups: Vec::new(),
            nb_deliveries: Vec::new(),
            current_loads: vec![zero.clone(); 2],
            fwd_peaks: vec![zero.clone(); 2],
            bwd_peaks: vec![zero.clone(); 2],
            delivery_margin: vehicle.capacity().clone(),
            pickup_margin: vehicle.capacity().clone(),
            tag_counts: FxHashMap::default(),
            v_rank,
            v_type: vehicle.type_rank(),
            capacity: vehicle.capacity().clone(),
            zero,
        }
    }

    pub fn vehicle_rank(&self) -> VehicleIdx {
        self.v_rank
    }

    pub fn jobs(&self) -> &[JobIdx] {
        &self.route
    }

    pub fn len(&self) -> usize {
        self.route.len()
    }

    pub fn is_empty(&self) -> bool {
        self.route.is_empty()
    }

    pub fn set_route(&mut self, problem: &RoutingProblem, route: Vec<JobIdx>) {
        self.route = route;
        self.update_amounts(problem);
    }

    /// Recompute every derived array from the job sequence.
    pub fn update_amounts(&mut self, problem: &RoutingProblem) {
        let n = self.route.len();
        let step_size = n + 2;
        self.fwd_pickups.resize(n, self.zero.clone());
        self.fwd_deliveries.resize(n, self.zero.clone());
        self.bwd_deliveries.resize(n, self.zero.clone());
        self.bwd_pickups.resize(n, self.zero.clone());
        self.pd_loads.resize(n, self.zero.clone());
        self.nb_pickups.resize(n, 0);
        self.nb_deliveries.resize(n, 0);

        self.current_loads.resize(step_size, self.zero.clone());
        self.fwd_peaks.resize(step_size, self.zero.clone());
        self.bwd_peaks.resize(step_size, self.zero.clone());

        self.tag_counts.clear();
        for &job_rank in &self.route {
            for &tag in problem.job(job_rank).tag_ids() {
                *self.tag_counts.entry(tag).or_insert(0) += 1;
            }
        }

        if self.route.is_empty() {
            // Keep peak and load checks consistent with empty routes.
            self.fwd_peaks.fill(self.zero.clone());
            self.bwd_peaks.fill(self.zero.clone());
            self.current_loads.fill(self.zero.clone());
            self.delivery_margin = self.capacity.clone();
            self.pickup_margin = self.capacity.clone();
            return;
        }

        let mut current_pickups = self.zero.clone();
        let mut current_deliveries = self.zero.clone();
        let mut current_pd_load = self.zero.clone();
        let mut current_nb_pickups = 0u32;
        let mut current_nb_deliveries = 0u32;

        for i in 0..n {
            let job = problem.job(self.route[i]);
            match job.job_type() {
                JobType::Single => {
                    current_pickups += job.pickup();
                    current_deliveries += job.delivery();
                }
                JobType::Pickup => {
                    current_pd_load += job.pickup();
                    current_nb_pickups += 1;
                }
                JobType::Delivery => {
                    debug_assert!(job.delivery() <= &current_pd_load);
                    current_pd_load -= job.delivery();
                    current_nb_deliveries += 1;
                }
            }
            self.fwd_pickups[i] = current_pickups.clone();
            self.fwd_deliveries[i] = current_deliveries.clone();
            self.pd_loads[i] = current_pd_load.clone();
            debug_assert!(current_nb_deliveries <= current_nb_pickups);
            self.nb_pickups[i] = current_nb_pickups;
            self.nb_deliveries[i] = current_nb_deliveries;
        }
        debug_assert!(self.pd_loads[n - 1].is_zero());

        current_deliveries = self.zero.clone();
        current_pickups = self.zero.clone();

        self.current_loads[n + 1] = self.fwd_pickups[n - 1].clone();
        debug_assert!(self.current_loads[n + 1] <= self.capacity);

        for i in (0..n).rev() {
            self.bwd_deliveries[i] = current_deliveries.clone();
            self.bwd_pickups[i] = current_pickups.clone();
            let mut load = self.fwd_pickups[i].clone();
            load += &self.pd_loads[i];
            load += &current_deliveries;
            debug_assert!(load <= self.capacity);
            self.current_loads[i + 1] = load;

            let job = problem.job(self.route[i]);
            if job.job_type() == JobType::Single {
                current_deliveries += job.delivery();
                current_pickups += job.pickup();
            }
        }
        self.current_loads[0] = current_deliveries;
        debug_assert!(self.current_loads[0] <= self.capacity);

        let mut peak = self.current_loads[0].clone();
        self.fwd_peaks[0] = peak.clone();
        for s in 1..step_size {
            peak.max_assign(&self.current_loads[s]);
            self.fwd_peaks[s] = peak.clone();
        }

        peak = self.current_loads[step_size - 1].clone();
        self.bwd_peaks[step_size - 1] = peak.clone();
        for s in (0..step_size - 1).rev() {
            peak.max_assign(&self.current_loads[s]);
            self.bwd_peaks[s] = peak.clone();
        }

        let pickups_sum = &self.fwd_pickups[n - 1];
        for r in 0..self.zero.size() {
            self.delivery_margin
                .set(r, self.capacity.get(r) - self.current_loads[0].get(r));
            self.pickup_margin
                .set(r, self.capacity.get(r) - pickups_sum.get(r));
        }
    }

    pub fn has_pending_delivery_after_rank(&self, rank: usize) -> bool {
        self.nb_deliveries[rank] < self.nb_pickups[rank]
    }

    pub fn has_delivery_after_rank(&self, rank: usize) -> bool {
        debug_assert!(rank < self.nb_deliveries.len());
        self.nb_deliveries[rank] < *self.nb_deliveries.last().unwrap()
    }

    pub fn has_pickup_up_to_rank(&self, rank: usize) -> bool {
        debug_assert!(rank < self.nb_pickups.len());
        0 < self.nb_pickups[rank]
    }

    pub fn fwd_peak(&self, rank: usize) -> &Amount {
        &self.fwd_peaks[rank]
    }

    pub fn bwd_peak(&self, rank: usize) -> &Amount {
        &self.bwd_peaks[rank]
    }

    pub fn max_load(&self) -> &Amount {
        self.fwd_peaks.last().unwrap()
    }

    /// Max load of the sub-route spanning `[0, rank)`.
    pub fn sub_route_max_load_before(&self, rank: usize) -> Amount {
        debug_assert!(0 < rank && rank < self.len());
        &self.fwd_peaks[rank] - &self.bwd_deliveries[rank - 1]
    }

    /// Max load of the sub-route spanning `[rank, len)`.
    pub fn sub_route_max_load_after(&self, rank: usize) -> Amount {
        debug_assert!(0 < rank && rank < self.len());
        &self.bwd_peaks[rank] - &self.fwd_pickups[rank - 1]
    }

    pub fn is_valid_addition_for_capacity(
        &self,
        _problem: &RoutingProblem,
        pickup: &Amount,
        delivery: &Amount,
        rank: usize,
    ) -> bool {
        debug_assert!(rank <= self.route.len());

        &self.fwd_peaks[rank] + delivery <= self.capacity
            && &self.bwd_peaks[rank] + pickup <= self.capacity
    }

    /// Current load at `rank` still admits `pickup`, ignoring everything else.
    pub fn is_valid_addition_for_load(
        &self,
        _problem: &RoutingProblem,
        pickup: &Amount,
        rank: usize,
    ) -> bool {
        debug_assert!(rank <= self.route.len());

        let load = if self.route.is_empty() {
            &self.zero
        } else {
            &self.current_loads[rank]
        };
        load + pickup <= self.capacity
    }

    /// Capacity check for replacing `[first_rank, last_rank)` with a load,
    /// accounting for the amounts that disappear with the replaced jobs.
    pub fn is_valid_addition_for_capacity_margins(
        &self,
        _problem: &RoutingProblem,
        pickup: &Amount,
        delivery: &Amount,
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        debug_assert!(1 <= last_rank);
        debug_assert!(last_rank <= self.route.len() + 1);

        let first_deliveries = if first_rank == 0 {
            &self.current_loads[0]
        } else {
            &self.bwd_deliveries[first_rank - 1]
        };
        let first_pickups = if first_rank == 0 {
            &self.zero
        } else {
            &self.fwd_pickups[first_rank - 1]
        };

        let replaced_deliveries = first_deliveries - &self.bwd_deliveries[last_rank - 1];

        let fwd_bound = &self.capacity + &replaced_deliveries;
        let fwd_ok = &self.fwd_peaks[first_rank] + delivery <= fwd_bound;

        let mut bwd_bound = &self.capacity + &self.fwd_pickups[last_rank - 1];
        bwd_bound -= first_pickups;
        let bwd_ok = &self.bwd_peaks[last_rank] + pickup <= bwd_bound;

        fwd_ok && bwd_ok
    }

    /// Capacity check for replacing `[first_rank, last_rank)` with the given
    /// jobs, simulating the load trajectory through the inserted range.
    /// `delivery` is the delivery sum of the inserted jobs.
    pub fn is_valid_addition_for_capacity_inclusion(
        &self,
        problem: &RoutingProblem,
        mut delivery: Amount,
        jobs: &[JobIdx],
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        debug_assert!(first_rank <= last_rank);
        debug_assert!(last_rank <= self.route.len() + 1);

        if !pinning::range_addition_ok(problem, self.v_rank, &self.route, jobs, first_rank, last_rank)
        {
            return false;
        }

        let init_load = if self.route.is_empty() {
            &self.zero
        } else {
            &self.current_loads[0]
        };
        let first_deliveries = if first_rank == 0 {
            init_load
        } else {
            &self.bwd_deliveries[first_rank - 1]
        };
        let last_deliveries = if last_rank == 0 {
            init_load
        } else {
            &self.bwd_deliveries[last_rank - 1]
        };

        let replaced_deliveries = first_deliveries - last_deliveries;

        if !self.route.is_empty() {
            delivery += &self.current_loads[first_rank];
        }
        delivery -= &replaced_deliveries;

        let mut valid = delivery <= self.capacity;

        for &job_rank in jobs {
            if !valid {
                break;
            }
            let job = problem.job(job_rank);
            delivery += job.pickup();
            delivery -= job.delivery();
            valid = delivery <= self.capacity;
        }

        valid
    }

    /// New exclusive-tag counts after replacing `[first_rank, last_rank)`
    /// with `jobs` must stay within the per-route limits.
    pub fn exclusive_tags_ok(
        &self,
        problem: &RoutingProblem,
        jobs: &[JobIdx],
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        let mut inserted: smallvec::SmallVec<[(TagId, u32); 4]> = smallvec::SmallVec::new();
        for &job_rank in jobs {
            for &tag in problem.job(job_rank).tag_ids() {
                match inserted.iter_mut().find(|(t, _)| *t == tag) {
                    Some((_, count)) => *count += 1,
                    None => inserted.push((tag, 1)),
                }
            }
        }
        if inserted.is_empty() {
            return true;
        }
        inserted.sort_unstable_by_key(|&(tag, _)| tag);

        for &(tag, added) in &inserted {
            let removed = self.route[first_rank..last_rank]
                .iter()
                .map(|&j| {
                    problem
                        .job(j)
                        .tag_ids()
                        .iter()
                        .filter(|&&t| t == tag)
                        .count() as u32
                })
                .sum::<u32>();
            let existing = self.tag_counts.get(&tag).copied().unwrap_or(0);
            let new_count = existing - removed + added;
            if new_count > problem.tag_limit(self.v_rank, tag) {
                return false;
            }
        }

        true
    }

    pub fn tag_count(&self, tag: TagId) -> u32 {
        self.tag_counts.get(&tag).copied().unwrap_or(0)
    }

    pub fn job_deliveries_sum(&self) -> &Amount {
        if self.route.is_empty() {
            &self.zero
        } else {
            &self.current_loads[0]
        }
    }

    pub fn job_pickups_sum(&self) -> &Amount {
        if self.route.is_empty() {
            &self.zero
        } else {
            self.fwd_pickups.last().unwrap()
        }
    }

    pub fn delivery_margin(&self) -> &Amount {
        &self.delivery_margin
    }

    pub fn pickup_margin(&self) -> &Amount {
        &self.pickup_margin
    }

    /// Sum of single-job pickups over ranks `[i, j)`.
    pub fn pickup_in_range(&self, i: usize, j: usize) -> Amount {
        debug_assert!(i <= j && j <= self.fwd_pickups.len());
        if i == j || self.route.is_empty() {
            return self.zero.clone();
        }
        if i == 0 {
            return self.fwd_pickups[j - 1].clone();
        }
        &self.fwd_pickups[j - 1] - &self.fwd_pickups[i - 1]
    }

    /// Sum of single-job deliveries over ranks `[i, j)`.
    pub fn delivery_in_range(&self, i: usize, j: usize) -> Amount {
        debug_assert!(i <= j && j <= self.bwd_deliveries.len());
        if i == j || self.route.is_empty() {
            return self.zero.clone();
        }
        let before_deliveries = if i == 0 {
            &self.current_loads[0]
        } else {
            &self.bwd_deliveries[i - 1]
        };
        before_deliveries - &self.bwd_deliveries[j - 1]
    }

    pub fn bwd_deliveries(&self, i: usize) -> &Amount {
        &self.bwd_deliveries[i]
    }

    pub fn fwd_deliveries(&self, i: usize) -> &Amount {
        &self.fwd_deliveries[i]
    }

    pub fn bwd_pickups(&self, i: usize) -> &Amount {
        &self.bwd_pickups[i]
    }

    pub fn fwd_pickups(&self, i: usize) -> &Amount {
        &self.fwd_pickups[i]
    }

    pub fn load_at_step(&self, s: usize) -> &Amount {
        &self.current_loads[s]
    }

    pub fn nb_pickups(&self, i: usize) -> u32 {
        self.nb_pickups[i]
    }

    pub fn nb_deliveries(&self, i: usize) -> u32 {
        self.nb_deliveries[i]
    }

    pub fn add(&mut self, problem: &RoutingProblem, job_rank: JobIdx, rank: usize) {
        self.route.insert(rank, job_rank);
        self.update_amounts(problem);
    }

    pub fn remove(&mut self, problem: &RoutingProblem, rank: usize, count: usize) {
        self.route.drain(rank..rank + count);
        self.update_amounts(problem);
    }

    /// Replace `[first_rank, last_rank)` with the given jobs.
    pub fn replace(
        &mut self,
        problem: &RoutingProblem,
        jobs: &[JobIdx],
        first_rank: usize,
        last_rank: usize,
    ) {
        debug_assert!(first_rank <= last_rank);

        self.route
            .splice(first_rank..last_rank, jobs.iter().copied());
        self.update_amounts(problem);
    }
}
