use crate::problem::amount::Amount;
use crate::problem::error::ProblemError;
use crate::problem::job::{JobIdx, JobType};
use crate::problem::location::LocationIdx;
use crate::problem::routing_problem::RoutingProblem;
use crate::problem::scale::Duration;
use crate::problem::time_window::TimeWindow;
use crate::problem::vehicle::{VehicleBreak, VehicleIdx};
use crate::solver::solution::pinning;
use crate::solver::solution::raw_route::RawRoute;

/// Timing context left of an insertion point.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PreviousInfo {
    pub earliest: Duration,
    pub travel: Duration,
    pub location: Option<LocationIdx>,
}

/// Timing context right of an insertion point.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NextInfo {
    pub latest: Duration,
    pub travel: Duration,
}

/// Outcome of deciding whether a break goes before or after a task. At most
/// one of the two flags is set; neither means the pair cannot be scheduled.
pub(crate) struct OrderChoice<'a> {
    pub add_job_first: bool,
    pub add_break_first: bool,
    pub j_tw: Option<&'a TimeWindow>,
    pub b_tw: Option<&'a TimeWindow>,
}

impl<'a> OrderChoice<'a> {
    fn new(
        problem: &'a RoutingProblem,
        job_rank: JobIdx,
        b: &'a VehicleBreak,
        previous: &PreviousInfo,
    ) -> Self {
        OrderChoice {
            add_job_first: false,
            add_break_first: false,
            j_tw: problem
                .job(job_rank)
                .tws()
                .first_admitting(previous.earliest + previous.travel),
            b_tw: b.tws().first_admitting(previous.earliest),
        }
    }
}

/// Timed route: the load profile of [`RawRoute`] extended with service-time
/// propagation and break placement.
///
/// `breaks_at_rank[i]` counts the breaks scheduled right before the job at
/// rank `i`; slot `len` holds the breaks before the vehicle end. The break at
/// absolute rank `r` then lives in the half-open slot
/// `[breaks_counts[i] - breaks_at_rank[i], breaks_counts[i])`.
#[derive(Debug, Clone, PartialEq)]
pub struct TwRoute {
    raw: RawRoute,

    v_start: Duration,
    v_end: Duration,

    earliest: Vec<Duration>,
    latest: Vec<Duration>,
    action_time: Vec<Duration>,

    breaks_at_rank: Vec<usize>,
    breaks_counts: Vec<usize>,
    break_earliest: Vec<Duration>,
    break_latest: Vec<Duration>,

    // Componentwise min, over breaks up to / from a given break rank, of
    // `max_load - load_at_break`.
    fwd_smallest_breaks_load_margin: Vec<Amount>,
    bwd_smallest_breaks_load_margin: Vec<Amount>,

    earliest_end: Duration,

    // Soft-pin bookkeeping, populated by seed_relaxed_from_job_ranks only.
    baseline_service_start: Vec<Duration>,
    is_pinned_step: Vec<bool>,
}

impl TwRoute {
    /// Build an empty timed route. Validates that the vehicle's breaks can be
    /// sequenced inside its time window in both directions.
    pub fn new(
        problem: &RoutingProblem,
        v_rank: VehicleIdx,
        amount_size: usize,
    ) -> Result<Self, ProblemError> {
        let vehicle = problem.vehicle(v_rank);
        let breaks = vehicle.breaks();
        let nb_breaks = breaks.len();
        let break_error = ProblemError::InconsistentBreaks {
            vehicle_id: vehicle.id(),
        };

        let mut break_earliest = vec![0; nb_breaks];
        let mut break_latest = vec![0; nb_breaks];
        let mut fwd_smallest_breaks_load_margin = vec![Amount::zero(0); nb_breaks];
        let mut bwd_smallest_breaks_load_margin = vec![Amount::zero(0); nb_breaks];

        let v_start = vehicle.tw().start;
        let v_end = vehicle.tw().end;

        let mut previous_earliest = v_start;
        let mut fwd_smallest_margin = Amount::max_amount(amount_size);

        for (i, b) in breaks.iter().enumerate() {
            let b_tw = b
                .tws()
                .first_admitting(previous_earliest)
                .ok_or_else(|| break_error.clone())?;

            break_earliest[i] = previous_earliest.max(b_tw.start);
            previous_earliest = break_earliest[i] + b.service();

            if let Some(max_load) = b.max_load() {
                fwd_smallest_margin.min_assign(max_load);
            }
            fwd_smallest_breaks_load_margin[i] = fwd_smallest_margin.clone();
        }

        let mut next_latest = v_end;
        let mut bwd_smallest_margin = Amount::max_amount(amount_size);

        for (i, b) in breaks.iter().enumerate().rev() {
            if next_latest < b.service() {
                return Err(break_error);
            }
            next_latest -= b.service();

            let b_tw = b
                .tws()
                .latest_admitting(next_latest)
                .ok_or_else(|| break_error.clone())?;

            break_latest[i] = next_latest.min(b_tw.end);
            next_latest = break_latest[i];

            if break_latest[i] < break_earliest[i] {
                return Err(break_error);
            }

            if let Some(max_load) = b.max_load() {
                bwd_smallest_margin.min_assign(max_load);
            }
            bwd_smallest_breaks_load_margin[i] = bwd_smallest_margin.clone();
        }

        Ok(TwRoute {
            raw: RawRoute::new(problem, v_rank, amount_size),
            v_start,
            v_end,
            earliest: Vec::new(),
            latest: Vec::new(),
            action_time: Vec::new(),
            breaks_at_rank: vec![nb_breaks],
            breaks_counts: vec![nb_breaks],
            break_earliest,
            break_latest,
            fwd_smallest_breaks_load_margin,
            bwd_smallest_breaks_load_margin,
            earliest_end: v_start,
            baseline_service_start: Vec::new(),
            is_pinned_step: Vec::new(),
        })
    }

    pub fn raw(&self) -> &RawRoute {
        &self.raw
    }

    pub fn vehicle_rank(&self) -> VehicleIdx {
        self.raw.v_rank
    }

    pub fn jobs(&self) -> &[JobIdx] {
        &self.raw.route
    }

    pub fn len(&self) -> usize {
        self.raw.route.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.route.is_empty()
    }

    pub fn earliest(&self, rank: usize) -> Duration {
        self.earliest[rank]
    }

    pub fn latest(&self, rank: usize) -> Duration {
        self.latest[rank]
    }

    pub fn action_time(&self, rank: usize) -> Duration {
        self.action_time[rank]
    }

    pub fn earliest_end(&self) -> Duration {
        self.earliest_end
    }

    pub fn v_start(&self) -> Duration {
        self.v_start
    }

    pub fn v_end(&self) -> Duration {
        self.v_end
    }

    pub fn breaks_at_rank(&self, rank: usize) -> usize {
        self.breaks_at_rank[rank]
    }

    pub fn breaks_counts(&self, rank: usize) -> usize {
        self.breaks_counts[rank]
    }

    pub fn break_earliest(&self, break_rank: usize) -> Duration {
        self.break_earliest[break_rank]
    }

    pub fn break_latest(&self, break_rank: usize) -> Duration {
        self.break_latest[break_rank]
    }

    pub fn fwd_smallest_breaks_load_margin(&self, break_rank: usize) -> &Amount {
        &self.fwd_smallest_breaks_load_margin[break_rank]
    }

    pub fn bwd_smallest_breaks_load_margin(&self, break_rank: usize) -> &Amount {
        &self.bwd_smallest_breaks_load_margin[break_rank]
    }

    pub fn baseline_service_start(&self, rank: usize) -> Duration {
        self.baseline_service_start[rank]
    }

    /// Whether the seeded step at `rank` carries a pinned task. Only
    /// meaningful on routes built by [`TwRoute::seed_relaxed_from_job_ranks`].
    pub fn is_pinned_step(&self, rank: usize) -> bool {
        self.is_pinned_step[rank]
    }

    fn job_action_time(
        &self,
        problem: &RoutingProblem,
        job_rank: JobIdx,
        previous_location: Option<LocationIdx>,
    ) -> Duration {
        let job = problem.job(job_rank);
        if Some(job.location()) == previous_location {
            job.service(self.raw.v_type)
        } else {
            job.setup(self.raw.v_type) + job.service(self.raw.v_type)
        }
    }

    pub(crate) fn previous_info(
        &self,
        problem: &RoutingProblem,
        job_rank: JobIdx,
        rank: usize,
    ) -> PreviousInfo {
        let vehicle = problem.vehicle(self.raw.v_rank);
        let job_location = problem.job(job_rank).location();

        let mut previous = PreviousInfo {
            earliest: self.v_start,
            travel: 0,
            location: None,
        };
        if rank > 0 {
            let previous_job = problem.job(self.raw.route[rank - 1]);
            previous.earliest = self.earliest[rank - 1] + self.action_time[rank - 1];
            previous.travel =
                problem.duration(self.raw.v_rank, previous_job.location(), job_location);
            previous.location = Some(previous_job.location());
        } else if let Some(start) = vehicle.start() {
            previous.location = Some(start);
            previous.travel = problem.duration(self.raw.v_rank, start, job_location);
        }

        previous
    }

    pub(crate) fn next_info(
        &self,
        problem: &RoutingProblem,
        job_rank: JobIdx,
        rank: usize,
    ) -> NextInfo {
        let vehicle = problem.vehicle(self.raw.v_rank);
        let job_location = problem.job(job_rank).location();

        let mut next = NextInfo {
            latest: self.v_end,
            travel: 0,
        };
        if rank == self.raw.route.len() {
            if let Some(end) = vehicle.end() {
                next.travel = problem.duration(self.raw.v_rank, job_location, end);
            }
        } else {
            next.latest = self.latest[rank];
            next.travel = problem.duration(
                self.raw.v_rank,
                job_location,
                problem.job(self.raw.route[rank]).location(),
            );
        }

        next
    }

    /// Propagate earliest service dates forward from `rank`, rescheduling the
    /// breaks met on the way. Stops as soon as a date is unchanged.
    pub(crate) fn fwd_update_earliest_from(&mut self, problem: &RoutingProblem, rank: usize) {
        let vehicle = problem.vehicle(self.raw.v_rank);

        let mut current_earliest = self.earliest[rank];
        let mut handle_last_breaks = true;

        for i in rank + 1..self.raw.route.len() {
            let next_job_rank = self.raw.route[i];
            let next_job = problem.job(next_job_rank);
            let mut remaining_travel = problem.duration(
                self.raw.v_rank,
                problem.job(self.raw.route[i - 1]).location(),
                next_job.location(),
            );
            let mut previous_action_time = self.action_time[i - 1];

            debug_assert!(self.breaks_at_rank[i] <= self.breaks_counts[i]);
            let mut break_rank = self.breaks_counts[i] - self.breaks_at_rank[i];

            for _ in 0..self.breaks_at_rank[i] {
                let b = &vehicle.breaks()[break_rank];
                current_earliest += previous_action_time;

                match b.tws().first_admitting(current_earliest) {
                    None => {
                        // Soft-pinned slack can push a break beyond every TW;
                        // keep the best effort and skip the route-end breaks.
                        current_earliest = b.tws().back().end;
                        self.break_earliest[break_rank] = current_earliest;
                        handle_last_breaks = false;
                        break;
                    }
                    Some(b_tw) => {
                        if current_earliest < b_tw.start {
                            let margin = b_tw.start - current_earliest;
                            remaining_travel = remaining_travel.saturating_sub(margin);
                            current_earliest = b_tw.start;
                        }
                        self.break_earliest[break_rank] = current_earliest;
                        previous_action_time = b.service();
                        break_rank += 1;
                    }
                }
            }

            current_earliest += previous_action_time + remaining_travel;

            match next_job.tws().first_admitting(current_earliest) {
                None => {
                    // Same clamping for jobs pushed past their last TW.
                    current_earliest = next_job.tws().back().end;
                    self.earliest[i] = current_earliest;
                    handle_last_breaks = false;
                    break;
                }
                Some(j_tw) => {
                    current_earliest = current_earliest.max(j_tw.start);
                }
            }

            debug_assert!(
                problem.pinned_soft_timing()
                    || current_earliest <= self.latest[i]
                    || (i == rank + 1 && self.latest[i] == 0)
            );
            if current_earliest == self.earliest[i] {
                // Monotone fixed point reached.
                handle_last_breaks = false;
                break;
            }

            self.earliest[i] = current_earliest;
        }

        if handle_last_breaks {
            // Breaks right before the vehicle end.
            let i = self.raw.route.len();
            let mut remaining_travel = match vehicle.end() {
                Some(end) => problem.duration(
                    self.raw.v_rank,
                    problem.job(self.raw.route[i - 1]).location(),
                    end,
                ),
                None => 0,
            };
            let mut previous_action_time = self.action_time[i - 1];

            debug_assert!(self.breaks_at_rank[i] <= self.breaks_counts[i]);
            let mut break_rank = self.breaks_counts[i] - self.breaks_at_rank[i];

            for _ in 0..self.breaks_at_rank[i] {
                let b = &vehicle.breaks()[break_rank];
                current_earliest += previous_action_time;

                match b.tws().first_admitting(current_earliest) {
                    None => {
                        current_earliest = b.tws().back().end;
                        self.break_earliest[break_rank] = current_earliest;
                        break;
                    }
                    Some(b_tw) => {
                        if current_earliest < b_tw.start {
                            let margin = b_tw.start - current_earliest;
                            remaining_travel = remaining_travel.saturating_sub(margin);
                            current_earliest = b_tw.start;
                        }
                        self.break_earliest[break_rank] = current_earliest;
                        previous_action_time = b.service();
                        break_rank += 1;
                    }
                }
            }

            self.earliest_end = current_earliest + previous_action_time + remaining_travel;
            debug_assert!(problem.pinned_soft_timing() || self.earliest_end <= self.v_end);
        }
    }

    /// Propagate latest service dates backward from `rank`.
    pub(crate) fn bwd_update_latest_from(&mut self, problem: &RoutingProblem, mut rank: usize) {
        let vehicle = problem.vehicle(self.raw.v_rank);

        debug_assert!(!self.raw.route.is_empty());
        if rank >= self.raw.route.len() {
            rank = self.raw.route.len() - 1;
        }
        let mut current_latest = self.latest[rank];
        let mut handle_first_breaks = true;

        for next_i in (1..=rank).rev() {
            let previous_job = problem.job(self.raw.route[next_i - 1]);
            let mut remaining_travel = if next_i < self.raw.route.len() {
                problem.duration(
                    self.raw.v_rank,
                    previous_job.location(),
                    problem.job(self.raw.route[next_i]).location(),
                )
            } else {
                0
            };

            debug_assert!(self.breaks_at_rank[next_i] <= self.breaks_counts[next_i]);
            let mut break_rank = self.breaks_counts[next_i];

            for _ in 0..self.breaks_at_rank[next_i] {
                break_rank -= 1;

                let b = &vehicle.breaks()[break_rank];
                debug_assert!(problem.pinned_soft_timing() || b.service() <= current_latest);
                current_latest = current_latest.saturating_sub(b.service());

                match b.tws().latest_admitting(current_latest) {
                    None => {
                        // Soft timing can leave breaks past their windows;
                        // clamp to the last end and keep going.
                        current_latest = b.tws().back().end;
                        self.break_latest[break_rank] = current_latest;
                    }
                    Some(b_tw) => {
                        if b_tw.end < current_latest {
                            let margin = current_latest - b_tw.end;
                            remaining_travel = remaining_travel.saturating_sub(margin);
                            current_latest = b_tw.end;
                        }
                        self.break_latest[break_rank] = current_latest;
                    }
                }
            }

            // Allow the previous job to finish late when soft pins already
            // violated the window; the subtraction then floors at zero.
            let gap = self.action_time[next_i - 1] + remaining_travel;
            current_latest = current_latest.saturating_sub(gap);

            match previous_job.tws().latest_admitting(current_latest) {
                None => {
                    current_latest = previous_job.tws().back().end;
                    self.latest[next_i - 1] = current_latest;
                    continue;
                }
                Some(j_tw) => {
                    current_latest = current_latest.min(j_tw.end);
                }
            }

            if current_latest < self.earliest[next_i - 1] {
                // Soft pinning may keep a job past its window; clamp so
                // downstream code keeps seeing a non-negative slack.
                current_latest = self.earliest[next_i - 1];
            }
            if current_latest == self.latest[next_i - 1] {
                handle_first_breaks = false;
                break;
            }

            self.latest[next_i - 1] = current_latest;
        }

        if handle_first_breaks {
            // Breaks before the first job.
            let mut break_rank = self.breaks_counts[0];

            for _ in 0..self.breaks_at_rank[0] {
                break_rank -= 1;
                let b = &vehicle.breaks()[break_rank];

                debug_assert!(problem.pinned_soft_timing() || b.service() <= current_latest);
                current_latest = current_latest.saturating_sub(b.service());

                match b.tws().latest_admitting(current_latest) {
                    None => {
                        current_latest = b.tws().back().end;
                        self.break_latest[break_rank] = current_latest;
                    }
                    Some(b_tw) => {
                        if b_tw.end < current_latest {
                            current_latest = b_tw.end;
                        }
                        self.break_latest[break_rank] = current_latest;
                    }
                }
            }
        }
    }

    /// Recompute the latest date of the last job (and of the breaks before
    /// the vehicle end) from the vehicle time window.
    pub(crate) fn update_last_latest_date(&mut self, problem: &RoutingProblem) {
        debug_assert!(!self.raw.route.is_empty());

        let vehicle = problem.vehicle(self.raw.v_rank);
        let last_rank = self.raw.route.len() - 1;
        let mut next = self.next_info(problem, self.raw.route[last_rank], self.raw.route.len());

        let mut break_rank = self.breaks_counts[self.raw.route.len()];
        for _ in 0..self.breaks_at_rank[self.raw.route.len()] {
            break_rank -= 1;
            let b = &vehicle.breaks()[break_rank];

            debug_assert!(problem.pinned_soft_timing() || b.service() <= next.latest);
            next.latest = next.latest.saturating_sub(b.service());

            match b.tws().latest_admitting(next.latest) {
                None => {
                    next.latest = b.tws().back().end;
                    self.break_latest[break_rank] = next.latest;
                }
                Some(b_tw) => {
                    if b_tw.end < next.latest {
                        let margin = next.latest - b_tw.end;
                        next.travel = next.travel.saturating_sub(margin);
                        next.latest = b_tw.end;
                    }
                    self.break_latest[break_rank] = next.latest;
                }
            }
        }

        let job = problem.job(self.raw.route[last_rank]);
        let gap = self.action_time[last_rank] + next.travel;
        debug_assert!(problem.pinned_soft_timing() || gap <= next.latest);
        next.latest = next.latest.saturating_sub(gap);

        match job.tws().latest_admitting(next.latest) {
            None => {
                self.latest[last_rank] = job.tws().back().end;
            }
            Some(j_tw) => {
                self.latest[last_rank] = next.latest.min(j_tw.end);
            }
        }
    }

    /// Recompute action times forward from `rank`, following location reuse.
    pub(crate) fn fwd_update_action_time_from(&mut self, problem: &RoutingProblem, rank: usize) {
        let mut current_location = problem.job(self.raw.route[rank]).location();

        for i in rank + 1..self.raw.route.len() {
            let next_action_time =
                self.job_action_time(problem, self.raw.route[i], Some(current_location));
            self.action_time[i] = next_action_time;
            current_location = problem.job(self.raw.route[i]).location();
        }
    }

    pub(crate) fn fwd_update_breaks_load_margin_from(
        &mut self,
        problem: &RoutingProblem,
        rank: usize,
    ) {
        let vehicle = problem.vehicle(self.raw.v_rank);

        let mut fwd_smallest = if self.breaks_counts[rank] == 0 {
            Amount::max_amount(problem.amount_size())
        } else {
            self.fwd_smallest_breaks_load_margin[self.breaks_counts[rank] - 1].clone()
        };

        for i in rank..=self.raw.route.len() {
            if self.breaks_at_rank[i] == 0 {
                continue;
            }
            let current_load = self.raw.load_at_step(i).clone();

            for break_rank in self.breaks_counts[i] - self.breaks_at_rank[i]..self.breaks_counts[i]
            {
                let b = &vehicle.breaks()[break_rank];
                debug_assert!(b.is_valid_for_load(&current_load));

                let current_margin = match b.max_load() {
                    Some(max_load) => max_load - &current_load,
                    None => Amount::max_amount(problem.amount_size()),
                };
                fwd_smallest.min_assign(&current_margin);

                debug_assert!(problem.zero_amount() <= &fwd_smallest);
                self.fwd_smallest_breaks_load_margin[break_rank] = fwd_smallest.clone();
            }
        }
    }

    pub(crate) fn bwd_update_breaks_load_margin_from(
        &mut self,
        problem: &RoutingProblem,
        rank: usize,
    ) {
        let vehicle = problem.vehicle(self.raw.v_rank);

        let mut bwd_smallest = if self.breaks_counts[rank] == *self.breaks_counts.last().unwrap() {
            Amount::max_amount(problem.amount_size())
        } else {
            self.bwd_smallest_breaks_load_margin[self.breaks_counts[rank]].clone()
        };

        for i in (0..=rank).rev() {
            if self.breaks_at_rank[i] == 0 {
                continue;
            }
            let current_load = self.raw.load_at_step(i).clone();

            for bwd_break_count in 0..self.breaks_at_rank[i] {
                let break_rank = self.breaks_counts[i] - 1 - bwd_break_count;
                let b = &vehicle.breaks()[break_rank];
                debug_assert!(b.is_valid_for_load(&current_load));

                let current_margin = match b.max_load() {
                    Some(max_load) => max_load - &current_load,
                    None => Amount::max_amount(problem.amount_size()),
                };
                bwd_smallest.min_assign(&current_margin);

                debug_assert!(problem.zero_amount() <= &bwd_smallest);
                self.bwd_smallest_breaks_load_margin[break_rank] = bwd_smallest.clone();
            }
        }
    }

    /// Decide whether the next due break goes before or after the next task.
    ///
    /// Feasible orderings are screened on both time windows and break load
    /// caps; ties on end date break on the earlier deadline. A pickup only
    /// goes first if its delivery remains placeable afterwards.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn order_choice<'a>(
        &self,
        problem: &'a RoutingProblem,
        job_rank: JobIdx,
        job_action_time: Duration,
        b: &'a VehicleBreak,
        previous: &PreviousInfo,
        next: &NextInfo,
        current_load: &Amount,
        check_max_load: bool,
    ) -> OrderChoice<'a> {
        let mut oc = OrderChoice::new(problem, job_rank, b, previous);
        let vehicle = problem.vehicle(self.raw.v_rank);
        let job = problem.job(job_rank);

        let (Some(j_tw), Some(b_tw)) = (oc.j_tw, oc.b_tw) else {
            // If either job or break cannot fit first, no ordering is valid.
            return oc;
        };

        // Try job first, then break.
        let earliest_job_end =
            (previous.earliest + previous.travel).max(j_tw.start) + job_action_time;
        let mut job_then_break_margin = 0;

        let Some(new_b_tw) = b.tws().first_admitting(earliest_job_end) else {
            // Break does not fit after the job; break first is the only
            // option, load permitting.
            oc.add_break_first = !check_max_load || b.is_valid_for_load(current_load);
            return oc;
        };

        let mut travel_after_break = next.travel;
        let job_then_break_end = if earliest_job_end < new_b_tw.start {
            job_then_break_margin = new_b_tw.start - earliest_job_end;
            travel_after_break = travel_after_break.saturating_sub(job_then_break_margin);
            b_tw.start + b.service()
        } else {
            earliest_job_end + b.service()
        };

        if job_then_break_end + travel_after_break > next.latest {
            // Starting the break is possible but the next step is not.
            oc.add_break_first = true;
            return oc;
        }

        if check_max_load && job.job_type() == JobType::Single {
            let mut load_after_job = current_load.clone();
            load_after_job += job.pickup();
            load_after_job -= job.delivery();

            let break_rank = vehicle.break_rank(b.id());
            if !b.is_valid_for_load(&load_after_job)
                || !(job.pickup() <= &self.bwd_smallest_breaks_load_margin[break_rank])
            {
                // Break won't fit right after the job for load reasons.
                oc.add_break_first = b.is_valid_for_load(current_load);
                return oc;
            }
        }

        // Try break first, then job.
        if check_max_load && !b.is_valid_for_load(current_load) {
            oc.add_job_first = true;
            return oc;
        }

        let mut travel_after_break = previous.travel;
        let mut earliest_job_start = previous.earliest;

        if previous.earliest < b_tw.start {
            let margin = b_tw.start - previous.earliest;
            travel_after_break = travel_after_break.saturating_sub(margin);
            earliest_job_start = b_tw.start;
        }

        earliest_job_start += b.service() + travel_after_break;

        let Some(new_j_tw) = job.tws().first_admitting(earliest_job_start) else {
            // Job does not fit after the break.
            oc.add_job_first = true;
            return oc;
        };
        let break_then_job_end = earliest_job_start.max(new_j_tw.start) + job_action_time;

        if break_then_job_end + next.travel > next.latest {
            // Arrival at the job is fine but the next step is not.
            oc.add_job_first = true;
            return oc;
        }

        // Both orderings are doable on timing.

        if job.job_type() == JobType::Pickup {
            // Favor pickup first only if the matching delivery still fits in
            // pickup -> break -> delivery or pickup -> delivery -> break.
            // Otherwise a myopic pickup-then-break choice can make the
            // delivery infeasible while break -> pickup -> delivery is valid.
            let delivery_rank = problem.matching_delivery(job_rank);
            let matching_d = problem.job(delivery_rank);
            debug_assert_eq!(matching_d.job_type(), JobType::Delivery);

            let full_delivery_travel =
                problem.duration(self.raw.v_rank, job.location(), matching_d.location());
            let delivery_travel = full_delivery_travel.saturating_sub(job_then_break_margin);

            let pb_d_candidate = job_then_break_end + delivery_travel;
            if matching_d.tws().first_admitting(pb_d_candidate).is_some() {
                let mut load_after_pickup = current_load.clone();
                load_after_pickup += job.pickup();
                if !check_max_load || b.is_valid_for_load(&load_after_pickup) {
                    // pickup -> break -> delivery works, pickup goes first.
                    oc.add_job_first = true;
                    return oc;
                }
            }

            let delivery_candidate = earliest_job_end + full_delivery_travel;
            if let Some(d_tw) = matching_d.tws().first_admitting(delivery_candidate) {
                let matching_d_action_time = if matching_d.location() == job.location() {
                    matching_d.service(self.raw.v_type)
                } else {
                    matching_d.setup(self.raw.v_type) + matching_d.service(self.raw.v_type)
                };

                let break_candidate =
                    delivery_candidate.max(d_tw.start) + matching_d_action_time;

                if b.tws().first_admitting(break_candidate).is_some() {
                    // pickup -> delivery -> break works, pickup goes first.
                    debug_assert!(!check_max_load || b.is_valid_for_load(current_load));
                    oc.add_job_first = true;
                    return oc;
                }
            }

            // Pickup first leads to infeasible options.
            oc.add_break_first = true;
            return oc;
        }

        // Pick the ordering minimizing the earliest end of the sequence.
        if break_then_job_end < job_then_break_end {
            oc.add_break_first = true;
        } else if break_then_job_end == job_then_break_end {
            // Tie: earliest deadline first, except deliveries always go
            // before the break. A postponed unconstrained delivery can
            // introduce arbitrary waits between zero max_load breaks.
            if job.job_type() == JobType::Delivery || j_tw.end <= b_tw.end {
                oc.add_job_first = true;
            } else {
                oc.add_break_first = true;
            }
        } else {
            oc.add_job_first = true;
        }

        oc
    }

    /// TW feasibility of replacing `[first_rank, last_rank)` with `jobs`,
    /// without mutating anything. `delivery` is the delivery sum of the
    /// inserted jobs.
    pub fn is_valid_addition_for_tw(
        &self,
        problem: &RoutingProblem,
        delivery: &Amount,
        jobs: &[JobIdx],
        first_rank: usize,
        last_rank: usize,
        check_max_load: bool,
    ) -> bool {
        let n = self.raw.route.len();
        if first_rank > n || last_rank > n || first_rank > last_rank {
            return false;
        }
        debug_assert_eq!(self.earliest.len(), n);
        debug_assert_eq!(self.latest.len(), n);
        debug_assert_eq!(self.action_time.len(), n);
        debug_assert_eq!(self.breaks_at_rank.len(), n + 1);
        debug_assert_eq!(self.breaks_counts.len(), n + 1);

        if !pinning::range_addition_ok(
            problem,
            self.raw.v_rank,
            &self.raw.route,
            jobs,
            first_rank,
            last_rank,
        ) {
            return false;
        }

        if !self.raw.exclusive_tags_ok(problem, jobs, first_rank, last_rank) {
            return false;
        }

        let vehicle = problem.vehicle(self.raw.v_rank);

        // First-leg distance cap only constrains head insertions.
        if first_rank == 0
            && !jobs.is_empty()
            && let (Some(start), Some(max_distance)) =
                (vehicle.start(), vehicle.max_first_leg_distance())
            && problem.distance(self.raw.v_rank, start, problem.job(jobs[0]).location())
                > max_distance
        {
            return false;
        }

        // Zero-budget soft pinning: no prepend on a route already carrying
        // pinned work.
        if problem.pinned_soft_timing()
            && problem.pinned_violation_budget() == 0
            && first_rank == 0
            && !self.raw.route.is_empty()
            && self
                .raw
                .route
                .iter()
                .any(|&job_rank| problem.job(job_rank).pinned())
        {
            return false;
        }

        let check_max_load = vehicle.has_break_max_load() && check_max_load;

        let mut current = PreviousInfo {
            earliest: 0,
            travel: 0,
            location: None,
        };
        let mut next = NextInfo {
            latest: 0,
            travel: 0,
        };

        if let (Some(&first_job), Some(&last_job)) = (jobs.first(), jobs.last()) {
            current = self.previous_info(problem, first_job, first_rank);
            next = self.next_info(problem, last_job, last_rank);
        } else {
            // Pure removal.
            current.earliest = self.v_start;
            next.latest = self.v_end;

            if first_rank > 0 {
                let previous_job = problem.job(self.raw.route[first_rank - 1]);
                current.earliest = self.earliest[first_rank - 1] + self.action_time[first_rank - 1];
                current.location = Some(previous_job.location());

                if last_rank < n {
                    next.latest = self.latest[last_rank];
                    next.travel = problem.duration(
                        self.raw.v_rank,
                        previous_job.location(),
                        problem.job(self.raw.route[last_rank]).location(),
                    );
                } else if let Some(end) = vehicle.end() {
                    next.travel = problem.duration(self.raw.v_rank, previous_job.location(), end);
                }
            } else if last_rank < n {
                next.latest = self.latest[last_rank];
                if let Some(start) = vehicle.start() {
                    current.location = Some(start);
                    next.travel = problem.duration(
                        self.raw.v_rank,
                        start,
                        problem.job(self.raw.route[last_rank]).location(),
                    );
                }
            } else {
                // Emptying the whole route is valid.
                return true;
            }
        }

        // Zero-budget soft pinning: no insertion right before a pinned step.
        if problem.pinned_soft_timing()
            && problem.pinned_violation_budget() == 0
            && last_rank < n
            && problem.job(self.raw.route[last_rank]).pinned()
        {
            return false;
        }

        // Break range covered by the replacement.
        let mut current_break = self.breaks_counts[first_rank] - self.breaks_at_rank[first_rank];
        let mut last_break = self.breaks_counts[last_rank];
        let max_breaks = vehicle.breaks().len();
        if last_break > max_breaks {
            last_break = max_breaks;
        }
        if current_break > last_break {
            current_break = last_break;
        }

        // Current load across the walk; the initial value drops the removed
        // range's deliveries.
        let mut current_load = problem.zero_amount().clone();
        if check_max_load {
            let previous_init_load = if self.raw.route.is_empty() {
                problem.zero_amount().clone()
            } else {
                self.raw.load_at_step(first_rank).clone()
            };
            debug_assert!(self.raw.delivery_in_range(first_rank, last_rank) <= previous_init_load);

            let mut delta_delivery = delivery.clone();
            delta_delivery -= &self.raw.delivery_in_range(first_rank, last_rank);

            if current_break != 0
                && !(delta_delivery <= self.fwd_smallest_breaks_load_margin[current_break - 1])
            {
                return false;
            }

            current_load = previous_init_load;
            current_load += &delta_delivery;
        }

        // Walk inserted jobs and replaced breaks, deciding the interleaving
        // with order_choice.
        let mut job_cursor = 0;
        while job_cursor < jobs.len() || current_break != last_break {
            if job_cursor == jobs.len() {
                // Breaks after the last inserted job.
                let b = &vehicle.breaks()[current_break];

                let Some(b_tw) = b.tws().first_admitting(current.earliest) else {
                    return false;
                };
                if check_max_load && !b.is_valid_for_load(&current_load) {
                    return false;
                }

                if current.earliest < b_tw.start {
                    let margin = b_tw.start - current.earliest;
                    next.travel = next.travel.saturating_sub(margin);
                    current.earliest = b_tw.start;
                }
                current.earliest += b.service();

                current_break += 1;
                continue;
            }

            let job_rank = jobs[job_cursor];
            let job = problem.job(job_rank);

            if current_break == last_break {
                // Jobs after the last replaced break.
                current.earliest += current.travel;

                let Some(j_tw) = job.tws().first_admitting(current.earliest) else {
                    return false;
                };
                let job_action_time = self.job_action_time(problem, job_rank, current.location);
                current.location = Some(job.location());
                // Soft timing may have drifted past the latest TW; use the
                // clamped start to stay consistent with propagation.
                let job_start = current.earliest.max(j_tw.start);
                current.earliest = job_start + job_action_time;

                if check_max_load {
                    debug_assert!(job.delivery() <= &current_load);
                    current_load += job.pickup();
                    current_load -= job.delivery();
                }

                job_cursor += 1;
                if job_cursor < jobs.len() {
                    current.travel = problem.duration(
                        self.raw.v_rank,
                        job.location(),
                        problem.job(jobs[job_cursor]).location(),
                    );
                }
                continue;
            }

            // Both jobs and breaks remain: decide the ordering.
            let b = &vehicle.breaks()[current_break];
            let job_action_time = self.job_action_time(problem, job_rank, current.location);

            let oc = self.order_choice(
                problem,
                job_rank,
                job_action_time,
                b,
                &current,
                &next,
                &current_load,
                check_max_load,
            );

            if !oc.add_job_first && !oc.add_break_first {
                return false;
            }
            debug_assert!(oc.add_job_first ^ oc.add_break_first);

            if oc.add_break_first {
                if check_max_load && !b.is_valid_for_load(&current_load) {
                    return false;
                }

                let b_tw = oc.b_tw.unwrap();
                if current.earliest < b_tw.start {
                    let margin = b_tw.start - current.earliest;
                    current.travel = current.travel.saturating_sub(margin);
                    current.earliest = b_tw.start;
                }
                current.earliest += b.service();

                current_break += 1;
            }
            if oc.add_job_first {
                current.location = Some(job.location());

                let j_tw = oc.j_tw.unwrap();
                let job_start = (current.earliest + current.travel).max(j_tw.start);
                current.earliest = job_start + job_action_time;

                if check_max_load {
                    debug_assert!(job.delivery() <= &current_load);
                    current_load += job.pickup();
                    current_load -= job.delivery();
                }

                job_cursor += 1;
                if job_cursor < jobs.len() {
                    current.travel = problem.duration(
                        self.raw.v_rank,
                        job.location(),
                        problem.job(jobs[job_cursor]).location(),
                    );
                }
            }
        }

        if check_max_load && last_break < vehicle.breaks().len() {
            let previous_final_load = if self.raw.route.is_empty() {
                problem.zero_amount().clone()
            } else {
                self.raw.load_at_step(last_rank).clone()
            };

            let mut delta_pickup = current_load.clone();
            delta_pickup -= &previous_final_load;

            if !(delta_pickup <= self.bwd_smallest_breaks_load_margin[last_break]) {
                return false;
            }
        }

        if last_rank < n
            && Some(problem.job(self.raw.route[last_rank]).location()) != current.location
        {
            // Setup time now applies to the task right after the replaced
            // range.
            let job_after = problem.job(self.raw.route[last_rank]);
            let mut new_action_time =
                job_after.setup(self.raw.v_type) + job_after.service(self.raw.v_type);

            if self.action_time[last_rank] < new_action_time {
                // Action time increased: the local margin check below may
                // pass while shifting the next task's earliest date breaks
                // something downstream.
                let mut earliest_after = current.earliest + next.travel;
                let Some(j_after_tw) = job_after.tws().first_admitting(earliest_after) else {
                    return false;
                };
                earliest_after = earliest_after.max(j_after_tw.start);

                let mut next_after =
                    self.next_info(problem, self.raw.route[last_rank], last_rank + 1);

                let mut break_rank =
                    self.breaks_counts[last_rank + 1] - self.breaks_at_rank[last_rank + 1];
                for _ in 0..self.breaks_at_rank[last_rank + 1] {
                    let b = &vehicle.breaks()[break_rank];
                    earliest_after += new_action_time;

                    let Some(b_tw) = b.tws().first_admitting(earliest_after) else {
                        return false;
                    };
                    if earliest_after < b_tw.start {
                        let margin = b_tw.start - earliest_after;
                        next_after.travel = next_after.travel.saturating_sub(margin);
                        earliest_after = b_tw.start;
                    }

                    new_action_time = b.service();
                    break_rank += 1;
                }

                if earliest_after + new_action_time + next_after.travel > next_after.latest {
                    return false;
                }
            }
        }

        let tw_ok = current.earliest + next.travel <= next.latest;

        if !tw_ok && !problem.pinned_soft_timing() {
            return false;
        }

        if problem.pinned_soft_timing()
            && last_rank < n
            && !self.baseline_service_start.is_empty()
        {
            // Added delay at the next original step, measured against the
            // seeded baseline.
            let arrival_with_insertion = current.earliest + next.travel;
            let baseline = if last_rank < self.baseline_service_start.len() {
                self.baseline_service_start[last_rank]
            } else {
                *self.baseline_service_start.last().unwrap()
            };
            let delta = arrival_with_insertion.saturating_sub(baseline);

            // Allowed delay is capped by every pinned step at or after
            // last_rank.
            let mut allowed = Duration::MAX;
            for k in last_rank..n {
                let job = problem.job(self.raw.route[k]);
                if !job.pinned() {
                    continue;
                }
                let base_k = if k < self.baseline_service_start.len() {
                    self.baseline_service_start[k]
                } else {
                    baseline
                };

                let step_allowed = match job.tws().first_admitting(base_k) {
                    Some(tw) => (tw.end - base_k).min(problem.pinned_violation_budget()),
                    None => 0,
                };
                allowed = allowed.min(step_allowed);
            }

            if allowed == Duration::MAX {
                // No pinned steps ahead.
                return tw_ok;
            }
            if delta > allowed {
                return false;
            }
        }

        tw_ok
    }

    /// Single-job TW probe for inserting `job_rank` at `rank`.
    pub fn is_valid_addition_for_tw_single(
        &self,
        problem: &RoutingProblem,
        job_rank: JobIdx,
        rank: usize,
    ) -> bool {
        if !pinning::single_addition_ok(problem, self.raw.v_rank, &self.raw.route, job_rank, rank) {
            return false;
        }

        let jobs = [job_rank];
        self.is_valid_addition_for_tw(
            problem,
            problem.job(job_rank).delivery(),
            &jobs,
            rank,
            rank,
            true,
        )
    }

    /// Replace the whole sequence with a TW-valid ordering.
    pub fn set_route(&mut self, problem: &RoutingProblem, jobs: &[JobIdx]) {
        let mut delivery = problem.zero_amount().clone();
        for &job_rank in jobs {
            let job = problem.job(job_rank);
            if job.job_type() == JobType::Single {
                delivery += job.delivery();
            }
        }

        let len = self.raw.route.len();
        self.replace(problem, &delivery, jobs, 0, len);
    }

    pub fn add(&mut self, problem: &RoutingProblem, job_rank: JobIdx, rank: usize) {
        let delivery = problem.job(job_rank).delivery().clone();
        self.replace(problem, &delivery, &[job_rank], rank, rank);
    }

    pub fn remove(&mut self, problem: &RoutingProblem, rank: usize, count: usize) {
        let zero = problem.zero_amount().clone();
        self.replace(problem, &zero, &[], rank, rank + count);
    }

    /// Replace `[first_rank, last_rank)` with `jobs`, a TW-valid move per
    /// [`TwRoute::is_valid_addition_for_tw`]. Re-derives every timing, break
    /// and load array.
    pub fn replace(
        &mut self,
        problem: &RoutingProblem,
        delivery: &Amount,
        jobs: &[JobIdx],
        first_rank: usize,
        last_rank: usize,
    ) {
        debug_assert!(first_rank <= last_rank);
        debug_assert!(last_rank <= self.raw.route.len());

        let vehicle = problem.vehicle(self.raw.v_rank);
        let check_max_load = vehicle.has_break_max_load();

        let mut current = PreviousInfo {
            earliest: 0,
            travel: 0,
            location: None,
        };
        let mut next = NextInfo {
            latest: 0,
            travel: 0,
        };

        if let (Some(&first_job), Some(&last_job)) = (jobs.first(), jobs.last()) {
            current = self.previous_info(problem, first_job, first_rank);
            next = self.next_info(problem, last_job, last_rank);
        } else {
            current.earliest = self.v_start;
            next.latest = self.v_end;

            if first_rank > 0 {
                let previous_job = problem.job(self.raw.route[first_rank - 1]);
                current.earliest = self.earliest[first_rank - 1] + self.action_time[first_rank - 1];
                current.location = Some(previous_job.location());

                if last_rank < self.raw.route.len() {
                    next.latest = self.latest[last_rank];
                    next.travel = problem.duration(
                        self.raw.v_rank,
                        previous_job.location(),
                        problem.job(self.raw.route[last_rank]).location(),
                    );
                } else if let Some(end) = vehicle.end() {
                    next.travel = problem.duration(self.raw.v_rank, previous_job.location(), end);
                }
            } else if last_rank < self.raw.route.len() {
                next.latest = self.latest[last_rank];
                if let Some(start) = vehicle.start() {
                    current.location = Some(start);
                    next.travel = problem.duration(
                        self.raw.v_rank,
                        start,
                        problem.job(self.raw.route[last_rank]).location(),
                    );
                }
            }
        }

        let mut current_break = self.breaks_counts[first_rank] - self.breaks_at_rank[first_rank];
        let last_break = self.breaks_counts[last_rank];

        // Load bookkeeping across the modified range.
        let previous_init_load = if self.raw.route.is_empty() {
            problem.zero_amount().clone()
        } else {
            self.raw.load_at_step(first_rank).clone()
        };
        let previous_final_load = if self.raw.route.is_empty() {
            problem.zero_amount().clone()
        } else {
            self.raw.load_at_step(last_rank).clone()
        };
        debug_assert!(self.raw.delivery_in_range(first_rank, last_rank) <= previous_init_load);
        let mut delta_delivery = delivery.clone();
        delta_delivery -= &self.raw.delivery_in_range(first_rank, last_rank);
        let mut current_load = previous_init_load;
        current_load += &delta_delivery;

        // Break load margins before the modified range shift by the delivery
        // delta; saturate so a negative delta cannot overflow a sentinel.
        debug_assert!(
            current_break == 0
                || delta_delivery <= self.fwd_smallest_breaks_load_margin[current_break - 1]
        );
        for i in 0..current_break {
            debug_assert!(delta_delivery <= self.fwd_smallest_breaks_load_margin[i]);
            let margin = &mut self.fwd_smallest_breaks_load_margin[i];
            for a in 0..delta_delivery.size() {
                margin.set(a, margin.get(a).saturating_sub(delta_delivery.get(a)));
            }
        }

        let mut previous_breaks_counts = if first_rank != 0 {
            self.breaks_counts[first_rank - 1]
        } else {
            0
        };

        // Resize the parallel arrays. Overwrite earliest/latest in the
        // replaced range with +inf/0 so unchanged values cannot stop the
        // propagation below early.
        let erase_count = last_rank - first_rank;
        let add_count = jobs.len();

        if add_count < erase_count {
            let to_erase = erase_count - add_count;
            let range = first_rank..first_rank + to_erase;
            self.raw.route.drain(range.clone());
            self.earliest.drain(range.clone());
            self.latest.drain(range.clone());
            self.action_time.drain(range.clone());
            self.breaks_at_rank.drain(range.clone());
            self.breaks_counts.drain(range);

            self.earliest[first_rank..first_rank + add_count].fill(Duration::MAX);
            self.latest[first_rank..first_rank + add_count].fill(0);
        } else {
            self.earliest[first_rank..first_rank + erase_count].fill(Duration::MAX);
            self.latest[first_rank..first_rank + erase_count].fill(0);

            let to_insert = add_count - erase_count;
            self.raw
                .route
                .splice(first_rank..first_rank, std::iter::repeat_n(JobIdx::new(0), to_insert));
            self.earliest
                .splice(first_rank..first_rank, std::iter::repeat_n(0, to_insert));
            self.latest
                .splice(first_rank..first_rank, std::iter::repeat_n(0, to_insert));
            self.action_time
                .splice(first_rank..first_rank, std::iter::repeat_n(0, to_insert));
            self.breaks_at_rank
                .splice(first_rank..first_rank, std::iter::repeat_n(0, to_insert));
            self.breaks_counts
                .splice(first_rank..first_rank, std::iter::repeat_n(0, to_insert));
        }

        debug_assert_eq!(self.breaks_at_rank.len(), self.raw.route.len() + 1);
        debug_assert_eq!(self.breaks_counts.len(), self.raw.route.len() + 1);

        let mut current_job_rank = first_rank;
        let mut breaks_before = 0usize;

        // Write the inserted range, re-deciding break placement on the way.
        let mut job_cursor = 0;
        while job_cursor < jobs.len() || current_break != last_break {
            if job_cursor == jobs.len() {
                if current_break >= vehicle.breaks().len() {
                    current_break = last_break;
                    continue;
                }
                let b = &vehicle.breaks()[current_break];
                debug_assert!(!check_max_load || b.is_valid_for_load(&current_load));

                let b_tw = b
                    .tws()
                    .first_admitting(current.earliest)
                    .expect("validated insertion: break fits its time windows");

                if current.earliest < b_tw.start {
                    let margin = b_tw.start - current.earliest;
                    next.travel = next.travel.saturating_sub(margin);
                    current.earliest = b_tw.start;
                }
                self.break_earliest[current_break] = current.earliest;
                current.earliest += b.service();

                self.write_break_load_margin(problem, current_break, &current_load);

                breaks_before += 1;
                current_break += 1;
                continue;
            }

            let job_rank = jobs[job_cursor];
            let job = problem.job(job_rank);

            if current_break == last_break {
                current.earliest += current.travel;

                let j_tw = job
                    .tws()
                    .first_admitting(current.earliest)
                    .expect("validated insertion: job fits its time windows");
                current.earliest = current.earliest.max(j_tw.start);

                let job_action_time = self.job_action_time(problem, job_rank, current.location);
                self.raw.route[current_job_rank] = job_rank;
                self.earliest[current_job_rank] = current.earliest;
                self.breaks_at_rank[current_job_rank] = breaks_before;
                self.breaks_counts[current_job_rank] = previous_breaks_counts + breaks_before;
                self.action_time[current_job_rank] = job_action_time;

                current.location = Some(job.location());
                current.earliest += job_action_time;

                current_job_rank += 1;
                previous_breaks_counts += breaks_before;
                breaks_before = 0;

                debug_assert!(job.delivery() <= &current_load);
                current_load += job.pickup();
                current_load -= job.delivery();

                job_cursor += 1;
                if job_cursor < jobs.len() {
                    current.travel = problem.duration(
                        self.raw.v_rank,
                        job.location(),
                        problem.job(jobs[job_cursor]).location(),
                    );
                }
                continue;
            }

            if current_break >= vehicle.breaks().len() {
                current_break = last_break;
                continue;
            }
            let b = &vehicle.breaks()[current_break];
            let job_action_time = self.job_action_time(problem, job_rank, current.location);

            let oc = self.order_choice(
                problem,
                job_rank,
                job_action_time,
                b,
                &current,
                &next,
                &current_load,
                check_max_load,
            );

            debug_assert!(oc.add_job_first ^ oc.add_break_first);
            let (add_break_first, b_tw_start, j_tw_start) = (
                oc.add_break_first,
                oc.b_tw.map(|tw| tw.start),
                oc.j_tw.map(|tw| tw.start),
            );

            if add_break_first {
                debug_assert!(!check_max_load || b.is_valid_for_load(&current_load));

                let b_tw_start = b_tw_start.unwrap();
                if current.earliest < b_tw_start {
                    let margin = b_tw_start - current.earliest;
                    current.travel = current.travel.saturating_sub(margin);
                    current.earliest = b_tw_start;
                }
                self.break_earliest[current_break] = current.earliest;
                current.earliest += b.service();

                self.write_break_load_margin(problem, current_break, &current_load);

                breaks_before += 1;
                current_break += 1;
            } else {
                current.earliest =
                    (current.earliest + current.travel).max(j_tw_start.unwrap());

                self.raw.route[current_job_rank] = job_rank;
                self.earliest[current_job_rank] = current.earliest;
                self.breaks_at_rank[current_job_rank] = breaks_before;
                self.breaks_counts[current_job_rank] = previous_breaks_counts + breaks_before;
                self.action_time[current_job_rank] = job_action_time;

                current.earliest += job_action_time;
                current.location = Some(job.location());

                current_job_rank += 1;
                previous_breaks_counts += breaks_before;
                breaks_before = 0;

                debug_assert!(job.delivery() <= &current_load);
                current_load += job.pickup();
                current_load -= job.delivery();

                job_cursor += 1;
                if job_cursor < jobs.len() {
                    current.travel = problem.duration(
                        self.raw.v_rank,
                        job.location(),
                        problem.job(jobs[job_cursor]).location(),
                    );
                }
            }
        }

        debug_assert_eq!(current_job_rank, first_rank + add_count);

        // Break load margins after the modified range shift by the pickup
        // delta.
        let mut delta_pickup = current_load.clone();
        delta_pickup -= &previous_final_load;
        for i in last_break..vehicle.breaks().len() {
            debug_assert!(delta_pickup <= self.bwd_smallest_breaks_load_margin[i]);
            let margin = &mut self.bwd_smallest_breaks_load_margin[i];
            for a in 0..delta_pickup.size() {
                margin.set(a, margin.get(a).saturating_sub(delta_pickup.get(a)));
            }
        }

        // Remaining breaks due before the next original step.
        self.breaks_at_rank[current_job_rank] = breaks_before;
        self.breaks_counts[current_job_rank] = previous_breaks_counts + breaks_before;

        if !self.raw.route.is_empty() {
            let n = self.raw.route.len();
            let replace_last_jobs = current_job_rank == n;

            if replace_last_jobs {
                self.earliest_end = current.earliest + next.travel;
            } else {
                // current_job_rank is the first non-replaced job.
                if current_job_rank == 0 {
                    // Head erased without replacement: recompute the new
                    // first job's earliest date and action time directly.
                    let job = problem.job(self.raw.route[0]);
                    current.earliest += next.travel;
                    match job.tws().first_admitting(current.earliest) {
                        Some(j_tw) => {
                            self.earliest[0] = current.earliest.max(j_tw.start);
                        }
                        None => {
                            self.earliest[0] = job.tws().back().end;
                        }
                    }
                    let head_action_time =
                        self.job_action_time(problem, self.raw.route[0], current.location);
                    self.action_time[0] = head_action_time;
                }

                // Recompute the whole suffix from the anchor; sentinel values
                // keep the forward propagation from stopping on stale data.
                let anchor = first_rank.saturating_sub(1);
                for i in anchor + 1..n {
                    self.earliest[i] = self.v_end;
                    self.latest[i] = self.v_end;
                }
                self.fwd_update_action_time_from(problem, anchor);
                self.fwd_update_earliest_from(problem, anchor);
            }

            // Latest dates are rebuilt from the route end.
            self.update_last_latest_date(problem);
            self.bwd_update_latest_from(problem, n - 1);
        }

        self.raw.update_amounts(problem);

        if last_break < vehicle.breaks().len() {
            self.fwd_update_breaks_load_margin_from(problem, current_job_rank);
        }
        if last_break > 0 {
            self.bwd_update_breaks_load_margin_from(problem, current_job_rank);
        }

        debug_assert!(self.check_consistency(problem));
    }

    /// Record the forward smallest break load margin for a just-placed break.
    fn write_break_load_margin(
        &mut self,
        problem: &RoutingProblem,
        break_rank: usize,
        current_load: &Amount,
    ) {
        let vehicle = problem.vehicle(self.raw.v_rank);
        let b = &vehicle.breaks()[break_rank];

        let current_margin = match b.max_load() {
            Some(max_load) => max_load - current_load,
            None => Amount::max_amount(problem.amount_size()),
        };

        if break_rank == 0 {
            self.fwd_smallest_breaks_load_margin[0] = current_margin;
        } else {
            let mut margin = self.fwd_smallest_breaks_load_margin[break_rank - 1].clone();
            margin.min_assign(&current_margin);
            self.fwd_smallest_breaks_load_margin[break_rank] = margin;
        }
    }

    /// Seed the route from raw job ranks, ignoring time windows. Baseline
    /// service starts are recorded for soft-pin slack accounting and all
    /// breaks park in the trailing slot.
    pub fn seed_relaxed_from_job_ranks(&mut self, problem: &RoutingProblem, job_ranks: &[JobIdx]) {
        self.raw.set_route(problem, job_ranks.to_vec());

        let vehicle = problem.vehicle(self.raw.v_rank);
        let n = self.raw.route.len();

        self.earliest = vec![0; n];
        self.latest = vec![self.v_end; n];
        self.action_time = vec![0; n];
        self.breaks_at_rank = vec![0; n + 1];
        self.breaks_counts = vec![0; n + 1];
        self.baseline_service_start = vec![0; n];
        self.is_pinned_step = vec![false; n];

        let mut current_earliest = self.v_start;
        let mut previous_location = vehicle.start();

        for i in 0..n {
            let job = problem.job(self.raw.route[i]);
            if let Some(previous) = previous_location {
                current_earliest += problem.duration(self.raw.v_rank, previous, job.location());
            }
            self.earliest[i] = current_earliest;
            self.baseline_service_start[i] = current_earliest;
            self.is_pinned_step[i] = job.pinned();

            let job_action_time = self.job_action_time(problem, self.raw.route[i], previous_location);
            self.action_time[i] = job_action_time;
            current_earliest += job_action_time;
            previous_location = Some(job.location());
        }

        // Park every break in the trailing sentinel slot.
        self.breaks_at_rank[n] = vehicle.breaks().len();
        self.breaks_counts[n] = vehicle.breaks().len();

        self.earliest_end = current_earliest;
    }

    // Delegated load-profile predicates, so callers probe one object.

    pub fn is_valid_addition_for_capacity(
        &self,
        problem: &RoutingProblem,
        pickup: &Amount,
        delivery: &Amount,
        rank: usize,
    ) -> bool {
        self.raw
            .is_valid_addition_for_capacity(problem, pickup, delivery, rank)
    }

    pub fn is_valid_addition_for_load(
        &self,
        problem: &RoutingProblem,
        pickup: &Amount,
        rank: usize,
    ) -> bool {
        self.raw.is_valid_addition_for_load(problem, pickup, rank)
    }

    pub fn is_valid_addition_for_capacity_margins(
        &self,
        problem: &RoutingProblem,
        pickup: &Amount,
        delivery: &Amount,
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        self.raw
            .is_valid_addition_for_capacity_margins(problem, pickup, delivery, first_rank, last_rank)
    }

    pub fn is_valid_addition_for_capacity_inclusion(
        &self,
        problem: &RoutingProblem,
        delivery: Amount,
        jobs: &[JobIdx],
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        self.raw
            .is_valid_addition_for_capacity_inclusion(problem, delivery, jobs, first_rank, last_rank)
    }

    /// Debug-build invariant sweep, used as a postcondition of mutators.
    fn check_consistency(&self, problem: &RoutingProblem) -> bool {
        let n = self.raw.route.len();
        let vehicle = problem.vehicle(self.raw.v_rank);

        if self.earliest.len() != n
            || self.latest.len() != n
            || self.action_time.len() != n
            || self.breaks_at_rank.len() != n + 1
            || self.breaks_counts.len() != n + 1
        {
            return false;
        }

        let placed: usize = self.breaks_at_rank.iter().sum();
        if placed != vehicle.breaks().len() {
            return false;
        }

        let mut running = 0;
        for i in 0..=n {
            running += self.breaks_at_rank[i];
            if self.breaks_counts[i] != running {
                return false;
            }
        }

        for i in 0..n {
            if self.earliest[i] > self.latest[i] {
                return false;
            }
        }

        let mut previous_location = vehicle.start();
        for i in 0..n {
            let expected = self.job_action_time(problem, self.raw.route[i], previous_location);
            if self.action_time[i] != expected {
                return false;
            }
            previous_location = Some(problem.job(self.raw.route[i]).location());
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::scale::scale_from_user_duration;
    use crate::problem::time_window::TimeWindows;
    use crate::test_utils::ProblemFixture;

    fn minutes(m: u64) -> Duration {
        scale_from_user_duration((m * 60) as u32)
    }

    #[test]
    fn test_construction_validates_breaks() {
        // Vehicle TW [0, 100s]; break window entirely after it.
        let mut f = ProblemFixture::with_locations(2);
        f.add_single(|_| {});
        f.add_vehicle(|v| {
            v.set_time_window(TimeWindow::from_user(0, 100));
            v.add_break(crate::problem::vehicle::VehicleBreak::new(
                1,
                TimeWindows::single(TimeWindow::from_user(200, 300)),
                10,
                None,
            ));
        });
        let problem = f.build();

        let result = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size());
        assert_eq!(
            result.err(),
            Some(ProblemError::InconsistentBreaks { vehicle_id: 1 })
        );
    }

    #[test]
    fn test_construction_break_windows() {
        // Vehicle TW [0, 1000s], break [300, 400]s with 50s service.
        let mut f = ProblemFixture::with_locations(2);
        f.add_single(|_| {});
        f.add_vehicle(|v| {
            v.set_time_window(TimeWindow::from_user(0, 1000));
            v.add_break(crate::problem::vehicle::VehicleBreak::new(
                1,
                TimeWindows::single(TimeWindow::from_user(300, 400)),
                50,
                None,
            ));
        });
        let problem = f.build();

        let route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        assert_eq!(route.break_earliest(0), scale_from_user_duration(300));
        assert_eq!(route.break_latest(0), scale_from_user_duration(400));
        assert_eq!(route.breaks_at_rank(0), 1);
        assert_eq!(route.breaks_counts(0), 1);
    }

    // Two colocated jobs, one break: the forward pass puts the break where
    // the route ends soonest, after the second job.
    #[test]
    fn test_break_placement_minimizes_end() {
        let mut f = ProblemFixture::with_locations(2);
        // Both jobs on location 0, service 10 min each, wide TW.
        f.add_single(|j| {
            j.set_location(0usize).set_service(600);
        });
        f.add_single(|j| {
            j.set_location(0usize).set_service(600);
        });
        f.add_vehicle(|v| {
            v.set_time_window(TimeWindow::from_user(0, 6000));
            v.add_break(crate::problem::vehicle::VehicleBreak::new(
                1,
                TimeWindows::single(TimeWindow::from_user(1800, 2400)),
                300,
                None,
            ));
        });
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();

        assert!(route.is_valid_addition_for_tw_single(&problem, JobIdx::new(0), 0));
        route.add(&problem, JobIdx::new(0), 0);
        assert_eq!(route.breaks_at_rank(0), 0);
        assert_eq!(route.breaks_at_rank(1), 1);

        assert!(route.is_valid_addition_for_tw_single(&problem, JobIdx::new(1), 1));
        route.add(&problem, JobIdx::new(1), 1);

        // Job 0 at [0, 10min), job 1 at [10, 20min), break at 30min.
        assert_eq!(route.breaks_at_rank(0), 0);
        assert_eq!(route.breaks_at_rank(1), 0);
        assert_eq!(route.breaks_at_rank(2), 1);
        assert_eq!(route.earliest(0), 0);
        assert_eq!(route.earliest(1), minutes(10));
        assert_eq!(route.break_earliest(0), minutes(30));
        assert_eq!(route.earliest_end(), minutes(35));

        // Colocated follow-up job carries no setup.
        assert_eq!(route.action_time(1), minutes(10));
    }

    #[test]
    fn test_break_before_job_when_required() {
        // Tight break window forces break-first before a late-window job.
        let mut f = ProblemFixture::with_travel(2, 60);
        f.add_single(|j| {
            j.set_location(1usize)
                .set_service(600)
                .set_time_windows(TimeWindows::single(TimeWindow::from_user(1200, 4000)));
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 6000));
            v.add_break(crate::problem::vehicle::VehicleBreak::new(
                1,
                TimeWindows::single(TimeWindow::from_user(0, 300)),
                120,
                None,
            ));
        });
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        assert!(route.is_valid_addition_for_tw_single(&problem, JobIdx::new(0), 0));
        route.add(&problem, JobIdx::new(0), 0);

        // Break sits before the job.
        assert_eq!(route.breaks_at_rank(0), 1);
        assert_eq!(route.breaks_at_rank(1), 0);
        assert_eq!(route.earliest(0), scale_from_user_duration(1200));
    }

    #[test]
    fn test_tw_infeasible_insertion_rejected() {
        let mut f = ProblemFixture::with_travel(3, 600);
        // Job 0 reachable; job 1's window only admits a direct first leg.
        f.add_single(|j| {
            j.set_location(1usize)
                .set_time_windows(TimeWindows::single(TimeWindow::from_user(0, 4000)));
        });
        f.add_single(|j| {
            j.set_location(2usize)
                .set_time_windows(TimeWindows::single(TimeWindow::from_user(0, 700)));
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 10000));
        });
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        route.add(&problem, JobIdx::new(0), 0);

        // Arriving after job 0 lands at 1200s, past job 1's 700s deadline.
        assert!(!route.is_valid_addition_for_tw_single(&problem, JobIdx::new(1), 1));
        // Ahead of job 0 the direct 600s leg still fits the window.
        assert!(route.is_valid_addition_for_tw_single(&problem, JobIdx::new(1), 0));
    }

    #[test]
    fn test_add_remove_round_trip() {
        let mut f = ProblemFixture::with_travel(4, 60);
        for i in 0..3 {
            f.add_single(move |j| {
                j.set_location(i + 1).set_service(60);
            });
        }
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_end(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        route.add(&problem, JobIdx::new(0), 0);
        route.add(&problem, JobIdx::new(1), 1);

        let snapshot = route.clone();
        route.add(&problem, JobIdx::new(2), 1);
        route.remove(&problem, 1, 1);
        assert_eq!(route, snapshot);
    }

    #[test]
    fn test_replace_round_trip() {
        let mut f = ProblemFixture::with_travel(5, 60);
        for i in 0..4 {
            f.add_single(move |j| {
                j.set_location(i + 1).set_service(60);
            });
        }
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        route.add(&problem, JobIdx::new(0), 0);
        route.add(&problem, JobIdx::new(1), 1);
        route.add(&problem, JobIdx::new(2), 2);

        let snapshot = route.clone();
        let original = [JobIdx::new(1)];
        let replacement = [JobIdx::new(3)];

        assert!(route.is_valid_addition_for_tw(
            &problem,
            problem.job(JobIdx::new(3)).delivery(),
            &replacement,
            1,
            2,
            true
        ));
        route.replace(
            &problem,
            problem.job(JobIdx::new(3)).delivery(),
            &replacement,
            1,
            2,
        );
        assert_eq!(route.jobs()[1], JobIdx::new(3));

        route.replace(
            &problem,
            problem.job(JobIdx::new(1)).delivery(),
            &original,
            1,
            2,
        );
        assert_eq!(route, snapshot);
    }

    #[test]
    fn test_setup_only_on_location_change() {
        let mut f = ProblemFixture::with_travel(3, 60);
        f.add_single(|j| {
            j.set_location(1usize).set_setup(120).set_service(60);
        });
        f.add_single(|j| {
            j.set_location(1usize).set_setup(120).set_service(60);
        });
        f.add_single(|j| {
            j.set_location(2usize).set_setup(120).set_service(60);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        route.add(&problem, JobIdx::new(0), 0);
        route.add(&problem, JobIdx::new(1), 1);
        route.add(&problem, JobIdx::new(2), 2);

        // First visit pays setup, the colocated follow-up does not, the
        // relocation pays it again.
        assert_eq!(route.action_time(0), scale_from_user_duration(180));
        assert_eq!(route.action_time(1), scale_from_user_duration(60));
        assert_eq!(route.action_time(2), scale_from_user_duration(180));

        // Removing the first job shifts the setup onto the next one.
        route.remove(&problem, 0, 1);
        assert_eq!(route.action_time(0), scale_from_user_duration(180));
    }

    #[test]
    fn test_pinned_first_enforced() {
        let mut f = ProblemFixture::with_travel(4, 60);
        f.add_single(|j| {
            j.set_location(1usize)
                .set_pinned(true)
                .set_pinned_position(crate::problem::job::PinnedPosition::First)
                .set_allowed_vehicles(vec![1]);
        });
        f.add_single(|j| {
            j.set_location(2usize);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        let problem = f.build();

        let route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();

        // Head insertion of anything but the pinned job is rejected.
        assert!(!route.is_valid_addition_for_tw_single(&problem, JobIdx::new(1), 0));
        assert!(route.is_valid_addition_for_tw_single(&problem, JobIdx::new(0), 0));
    }

    #[test]
    fn test_pinned_first_pair_holds() {
        let mut f = ProblemFixture::with_travel(5, 60);
        f.add_shipment(
            crate::test_utils::amount(&[2]),
            |p| {
                p.set_pinned(true)
                    .set_pinned_position(crate::problem::job::PinnedPosition::First)
                    .set_allowed_vehicles(vec![1]);
            },
            |_d| {},
        );
        f.add_single(|j| {
            j.set_location(3usize);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_capacity(crate::test_utils::amount(&[5]));
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();

        // Singles cannot claim the anchored head slots.
        assert!(!route.is_valid_addition_for_tw_single(&problem, JobIdx::new(2), 0));
        // The pair itself goes in as a range.
        let pair = [JobIdx::new(0), JobIdx::new(1)];
        assert!(route.is_valid_addition_for_tw(
            &problem,
            problem.zero_amount(),
            &pair,
            0,
            0,
            true
        ));
        route.replace(&problem, problem.zero_amount(), &pair, 0, 0);

        // No wedge between the anchored pickup and delivery, but appending
        // after the pair is fine.
        assert!(!route.is_valid_addition_for_tw_single(&problem, JobIdx::new(2), 1));
        assert!(route.is_valid_addition_for_tw_single(&problem, JobIdx::new(2), 2));
        route.add(&problem, JobIdx::new(2), 2);
        assert_eq!(route.jobs()[..2], [JobIdx::new(0), JobIdx::new(1)]);
    }

    #[test]
    fn test_set_route_matches_incremental_adds() {
        let mut f = ProblemFixture::with_travel(4, 60);
        for i in 0..3 {
            f.add_single(move |j| {
                j.set_location(i + 1).set_service(60);
            });
        }
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        let problem = f.build();

        let mut incremental = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        incremental.add(&problem, JobIdx::new(0), 0);
        incremental.add(&problem, JobIdx::new(1), 1);
        incremental.add(&problem, JobIdx::new(2), 2);

        let mut direct = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        direct.set_route(&problem, &[JobIdx::new(0), JobIdx::new(1), JobIdx::new(2)]);

        assert_eq!(direct, incremental);
    }

    #[test]
    fn test_exclusive_tag_quota() {
        let mut f = ProblemFixture::with_travel(4, 60);
        f.add_single(|j| {
            j.set_location(1usize).add_exclusive_tag("zone-a");
        });
        f.add_single(|j| {
            j.set_location(2usize).add_exclusive_tag("zone-a");
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        route.add(&problem, JobIdx::new(0), 0);

        // Second bearer of the same tag busts the default limit of one.
        assert!(!route.is_valid_addition_for_tw_single(&problem, JobIdx::new(1), 1));
        // Replacing the current bearer is fine.
        assert!(route.is_valid_addition_for_tw(
            &problem,
            problem.job(JobIdx::new(1)).delivery(),
            &[JobIdx::new(1)],
            0,
            1,
            true
        ));
    }

    #[test]
    fn test_exclusive_tag_limit_override() {
        let mut f = ProblemFixture::with_travel(5, 60);
        for i in 0..3 {
            f.add_single(move |j| {
                j.set_location(i + 1).add_exclusive_tag("zone-a");
            });
        }
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        f.set_tag_limit(1, "zone-a", 2);
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        route.add(&problem, JobIdx::new(0), 0);

        // The raised limit admits a second bearer but not a third.
        assert!(route.is_valid_addition_for_tw_single(&problem, JobIdx::new(1), 1));
        route.add(&problem, JobIdx::new(1), 1);
        assert!(!route.is_valid_addition_for_tw_single(&problem, JobIdx::new(2), 2));
    }

    #[test]
    fn test_first_leg_distance_cap() {
        let mut f = ProblemFixture::with_travel(3, 60);
        f.set_distance(500);
        f.add_single(|j| {
            j.set_location(1usize);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
            v.set_max_first_leg_distance(400);
        });
        f.add_vehicle(|v| {
            v.set_id(2);
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
            v.set_max_first_leg_distance(600);
        });
        let problem = f.build();

        let capped = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        assert!(!capped.is_valid_addition_for_tw_single(&problem, JobIdx::new(0), 0));

        let roomy = TwRoute::new(&problem, VehicleIdx::new(1), problem.amount_size()).unwrap();
        assert!(roomy.is_valid_addition_for_tw_single(&problem, JobIdx::new(0), 0));
    }

    #[test]
    fn test_soft_pin_budget_gates_delay() {
        let mut f = ProblemFixture::with_travel(4, 0);
        // Pinned job with a tight deadline 10s past its baseline.
        f.add_single(|j| {
            j.set_location(1usize)
                .set_service(100)
                .set_pinned(true)
                .set_time_windows(TimeWindows::single(TimeWindow::from_user(0, 10)));
        });
        // Two candidate fillers delaying the pinned job by their service.
        f.add_single(|j| {
            j.set_location(2usize).set_service(8);
        });
        f.add_single(|j| {
            j.set_location(3usize).set_service(12);
        });
        f.add_vehicle(|v| {
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        f.set_pinned_soft_timing(Some(10));
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        route.seed_relaxed_from_job_ranks(&problem, &[JobIdx::new(0)]);
        assert_eq!(route.baseline_service_start(0), 0);

        // Delay of 8s fits min(budget, tw.end - baseline) = 10s; 12s does not.
        assert!(route.is_valid_addition_for_tw_single(&problem, JobIdx::new(1), 0));
        assert!(!route.is_valid_addition_for_tw_single(&problem, JobIdx::new(2), 0));
    }

    #[test]
    fn test_soft_pin_zero_budget_forbids_prepend() {
        let mut f = ProblemFixture::with_travel(3, 0);
        f.add_single(|j| {
            j.set_location(1usize).set_pinned(true);
        });
        f.add_single(|j| {
            j.set_location(2usize);
        });
        f.add_vehicle(|v| {
            v.set_time_window(TimeWindow::from_user(0, 100_000));
        });
        f.set_pinned_soft_timing(Some(0));
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        route.seed_relaxed_from_job_ranks(&problem, &[JobIdx::new(0)]);

        // Head insertion and insertion right before the pinned step are both
        // barred; appending is fine.
        assert!(!route.is_valid_addition_for_tw_single(&problem, JobIdx::new(1), 0));
        assert!(route.is_valid_addition_for_tw_single(&problem, JobIdx::new(1), 1));
    }

    #[test]
    fn test_breaks_conserved_across_mutations() {
        let mut f = ProblemFixture::with_travel(5, 60);
        for i in 0..3 {
            f.add_single(move |j| {
                j.set_location(i + 1).set_service(60);
            });
        }
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_time_window(TimeWindow::from_user(0, 100_000));
            v.add_break(crate::problem::vehicle::VehicleBreak::new(
                1,
                TimeWindows::single(TimeWindow::from_user(0, 50_000)),
                60,
                None,
            ));
            v.add_break(crate::problem::vehicle::VehicleBreak::new(
                2,
                TimeWindows::single(TimeWindow::from_user(0, 90_000)),
                60,
                None,
            ));
        });
        let problem = f.build();

        let mut route = TwRoute::new(&problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
        route.add(&problem, JobIdx::new(0), 0);
        route.add(&problem, JobIdx::new(1), 1);
        route.add(&problem, JobIdx::new(2), 1);
        route.remove(&problem, 0, 2);

        let placed: usize = (0..=route.len()).map(|i| route.breaks_at_rank(i)).sum();
        assert_eq!(placed, 2);
    }
}
