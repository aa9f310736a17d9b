use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::problem::amount::Amount;
use crate::problem::error::ProblemError;
use crate::problem::eval::Eval;
use crate::problem::job::{Job, JobIdx, JobType, PinnedPosition, TagId};
use crate::problem::location::LocationIdx;
use crate::problem::scale::{
    Cost, Distance, Duration, UserDuration, scale_from_user_duration,
};
use crate::problem::travel_cost_matrix::TravelMatrices;
use crate::problem::vehicle::{Vehicle, VehicleIdx};

/// A boundary requirement on a vehicle's route: either a single job that must
/// hold the first (or last) rank, or a shipment pair that must hold the first
/// (or last) two ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinnedAnchor {
    Job(JobIdx),
    Shipment { pickup: JobIdx, delivery: JobIdx },
}

/// The finalized problem. Built once through [`RoutingProblemBuilder`] and
/// read-only afterwards; route state references jobs and vehicles by rank.
pub struct RoutingProblem {
    jobs: Vec<Job>,
    vehicles: Vec<Vehicle>,
    matrices: Vec<TravelMatrices>,
    vehicle_profile_rank: Vec<usize>,
    vehicle_types: Vec<String>,
    amount_size: usize,
    zero: Amount,
    compatibility: Vec<bool>,
    penalties: Vec<Cost>,
    tag_names: Vec<String>,
    tag_limit_overrides: FxHashMap<(usize, TagId), u32>,
    pinned_first: Vec<Option<PinnedAnchor>>,
    pinned_last: Vec<Option<PinnedAnchor>>,
    job_id_to_rank: FxHashMap<u64, JobIdx>,
    pickup_id_to_rank: FxHashMap<u64, JobIdx>,
    delivery_id_to_rank: FxHashMap<u64, JobIdx>,
    pinned_soft_timing: bool,
    pinned_violation_budget: Duration,
    include_action_time_in_budget: bool,
    budget_densify_candidates_k: usize,
}

impl RoutingProblem {
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, rank: JobIdx) -> &Job {
        &self.jobs[rank]
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn vehicle(&self, rank: VehicleIdx) -> &Vehicle {
        &self.vehicles[rank]
    }

    pub fn amount_size(&self) -> usize {
        self.amount_size
    }

    pub fn zero_amount(&self) -> &Amount {
        &self.zero
    }

    /// Distinct vehicle type labels, in dense-rank order.
    pub fn vehicle_types(&self) -> &[String] {
        &self.vehicle_types
    }

    /// The delivery paired with a pickup always sits at the next job rank.
    pub fn matching_delivery(&self, pickup: JobIdx) -> JobIdx {
        debug_assert_eq!(self.jobs[pickup].job_type(), JobType::Pickup);
        JobIdx::new(pickup.get() + 1)
    }

    pub fn duration(&self, v_rank: VehicleIdx, from: LocationIdx, to: LocationIdx) -> Duration {
        self.matrices[self.vehicle_profile_rank[v_rank.get()]].duration(from, to)
    }

    pub fn distance(&self, v_rank: VehicleIdx, from: LocationIdx, to: LocationIdx) -> Distance {
        self.matrices[self.vehicle_profile_rank[v_rank.get()]].distance(from, to)
    }

    pub fn eval(&self, v_rank: VehicleIdx, from: LocationIdx, to: LocationIdx) -> Eval {
        let v = &self.vehicles[v_rank];
        let m = &self.matrices[self.vehicle_profile_rank[v_rank.get()]];
        let duration = m.duration(from, to);
        let distance = m.distance(from, to);
        let cost = m
            .cost(from, to)
            .unwrap_or_else(|| v.cost_from_metrics(duration, distance));

        Eval::new(cost, duration, distance)
    }

    pub fn vehicle_ok_with_job(&self, v_rank: VehicleIdx, job_rank: JobIdx) -> bool {
        self.compatibility[v_rank.get() * self.jobs.len() + job_rank.get()]
    }

    pub fn job_vehicle_penalty(&self, job_rank: JobIdx, v_rank: VehicleIdx) -> Cost {
        self.penalties[job_rank.get() * self.vehicles.len() + v_rank.get()]
    }

    pub fn tag_name(&self, tag: TagId) -> &str {
        &self.tag_names[tag.get()]
    }

    /// Per-route cap for an exclusive tag on the given vehicle; defaults to 1.
    pub fn tag_limit(&self, v_rank: VehicleIdx, tag: TagId) -> u32 {
        self.tag_limit_overrides
            .get(&(v_rank.get(), tag))
            .copied()
            .unwrap_or(1)
    }

    pub fn pinned_first_for_vehicle(&self, v_rank: VehicleIdx) -> Option<&PinnedAnchor> {
        self.pinned_first[v_rank.get()].as_ref()
    }

    pub fn pinned_last_for_vehicle(&self, v_rank: VehicleIdx) -> Option<&PinnedAnchor> {
        self.pinned_last[v_rank.get()].as_ref()
    }

    pub fn pinned_soft_timing(&self) -> bool {
        self.pinned_soft_timing
    }

    pub fn pinned_violation_budget(&self) -> Duration {
        self.pinned_violation_budget
    }

    pub fn include_action_time_in_budget(&self) -> bool {
        self.include_action_time_in_budget
    }

    pub fn budget_densify_candidates_k(&self) -> usize {
        self.budget_densify_candidates_k
    }

    pub fn job_rank_of_id(&self, id: u64) -> Option<JobIdx> {
        self.job_id_to_rank.get(&id).copied()
    }

    pub fn pickup_rank_of_id(&self, id: u64) -> Option<JobIdx> {
        self.pickup_id_to_rank.get(&id).copied()
    }

    pub fn delivery_rank_of_id(&self, id: u64) -> Option<JobIdx> {
        self.delivery_id_to_rank.get(&id).copied()
    }
}

#[derive(Default)]
pub struct RoutingProblemBuilder {
    jobs: Vec<Job>,
    vehicles: Vec<Vehicle>,
    matrices: FxHashMap<String, TravelMatrices>,
    tag_limits: Vec<(u64, String, u32)>,
    pinned_soft_timing: bool,
    pinned_violation_budget: UserDuration,
    include_action_time_in_budget: bool,
    budget_densify_candidates_k: Option<usize>,
}

impl RoutingProblemBuilder {
    pub fn add_job(&mut self, job: Job) -> &mut RoutingProblemBuilder {
        debug_assert_eq!(job.job_type(), JobType::Single);
        self.jobs.push(job);
        self
    }

    /// Pickup and delivery land on adjacent ranks, preserving the pairing
    /// invariant relied upon throughout the route state.
    pub fn add_shipment(&mut self, pickup: Job, delivery: Job) -> &mut RoutingProblemBuilder {
        debug_assert_eq!(pickup.job_type(), JobType::Pickup);
        debug_assert_eq!(delivery.job_type(), JobType::Delivery);
        self.jobs.push(pickup);
        self.jobs.push(delivery);
        self
    }

    pub fn add_vehicle(&mut self, vehicle: Vehicle) -> &mut RoutingProblemBuilder {
        self.vehicles.push(vehicle);
        self
    }

    pub fn set_matrices(
        &mut self,
        profile: impl Into<String>,
        matrices: TravelMatrices,
    ) -> &mut RoutingProblemBuilder {
        self.matrices.insert(profile.into(), matrices);
        self
    }

    pub fn set_pinned_soft_timing(&mut self, enabled: bool) -> &mut RoutingProblemBuilder {
        self.pinned_soft_timing = enabled;
        self
    }

    pub fn set_pinned_violation_budget(&mut self, budget: UserDuration) -> &mut RoutingProblemBuilder {
        self.pinned_violation_budget = budget;
        self
    }

    pub fn set_include_action_time_in_budget(&mut self, enabled: bool) -> &mut RoutingProblemBuilder {
        self.include_action_time_in_budget = enabled;
        self
    }

    pub fn set_budget_densify_candidates_k(&mut self, k: usize) -> &mut RoutingProblemBuilder {
        self.budget_densify_candidates_k = Some(k.max(1));
        self
    }

    pub fn set_exclusive_tag_limit(
        &mut self,
        vehicle_id: u64,
        tag: impl Into<String>,
        limit: u32,
    ) -> &mut RoutingProblemBuilder {
        self.tag_limits.push((vehicle_id, tag.into(), limit));
        self
    }

    pub fn build(self) -> Result<RoutingProblem, ProblemError> {
        let RoutingProblemBuilder {
            mut jobs,
            mut vehicles,
            matrices,
            tag_limits,
            pinned_soft_timing,
            pinned_violation_budget,
            include_action_time_in_budget,
            budget_densify_candidates_k,
        } = self;

        let amount_size = jobs
            .iter()
            .flat_map(|j| [j.pickup().size(), j.delivery().size()])
            .chain(vehicles.iter().map(|v| v.capacity().size()))
            .chain(
                vehicles
                    .iter()
                    .flat_map(|v| v.breaks())
                    .filter_map(|b| b.max_load().map(Amount::size)),
            )
            .max()
            .unwrap_or(0);

        for job in &mut jobs {
            job.resize_amounts(amount_size);
        }

        // Dense vehicle-type ranks, in first-seen order.
        let mut vehicle_types: Vec<String> = Vec::new();
        for v in &vehicles {
            if !vehicle_types.iter().any(|t| t == v.vehicle_type()) {
                vehicle_types.push(v.vehicle_type().to_owned());
            }
        }
        for v in &mut vehicles {
            let type_rank = vehicle_types
                .iter()
                .position(|t| t == v.vehicle_type())
                .unwrap();
            v.finalize(type_rank, amount_size);
        }
        for job in &mut jobs {
            job.resolve_action_times(&vehicle_types);
        }

        // Validate pairing, time windows and locations.
        Self::check_jobs(&jobs)?;
        let (matrices, vehicle_profile_rank) = Self::check_vehicles(&vehicles, matrices, &jobs)?;

        // Exclusive-tag interning.
        let mut tag_names: Vec<String> = Vec::new();
        let mut tag_rank = |name: &str, tag_names: &mut Vec<String>| -> TagId {
            match tag_names.iter().position(|t| t == name) {
                Some(rank) => TagId::new(rank),
                None => {
                    tag_names.push(name.to_owned());
                    TagId::new(tag_names.len() - 1)
                }
            }
        };
        for job in &mut jobs {
            let ids: SmallVec<[TagId; 2]> = job
                .exclusive_tag_names()
                .iter()
                .map(|name| tag_rank(name, &mut tag_names))
                .collect();
            job.set_tag_ids(ids);
        }

        let mut tag_limit_overrides = FxHashMap::default();
        for (vehicle_id, tag, limit) in tag_limits {
            if let Some(v_rank) = vehicles.iter().position(|v| v.id() == vehicle_id) {
                let tag_id = tag_rank(&tag, &mut tag_names);
                tag_limit_overrides.insert((v_rank, tag_id), limit);
            }
        }

        // Compatibility: a vehicle must carry every skill a job requires, be
        // allowed by the job and fit its amounts in isolation.
        let mut compatibility = vec![true; vehicles.len() * jobs.len()];
        for (v_rank, v) in vehicles.iter().enumerate() {
            for (j_rank, job) in jobs.iter().enumerate() {
                let skills_ok = job.skills().is_subset(v.skills());
                let allowed_ok = job.allowed_vehicles().is_empty()
                    || job.allowed_vehicles().contains(&v.id());
                let capacity_ok =
                    job.pickup() <= v.capacity() && job.delivery() <= v.capacity();

                compatibility[v_rank * jobs.len() + j_rank] =
                    skills_ok && allowed_ok && capacity_ok;
            }
        }

        // Per-(job, vehicle) objective penalties.
        let mut penalties = vec![0; jobs.len() * vehicles.len()];
        for (j_rank, job) in jobs.iter().enumerate() {
            for &(vehicle_id, penalty) in job.vehicle_penalties() {
                if let Some(v_rank) = vehicles.iter().position(|v| v.id() == vehicle_id) {
                    penalties[j_rank * vehicles.len() + v_rank] = penalty;
                }
            }
        }

        // Pinned boundary anchors, derived from pinned_position. A job can
        // only anchor a vehicle it explicitly names; the first claim on a
        // given boundary wins.
        let mut pinned_first: Vec<Option<PinnedAnchor>> = vec![None; vehicles.len()];
        let mut pinned_last: Vec<Option<PinnedAnchor>> = vec![None; vehicles.len()];
        for (j_rank, job) in jobs.iter().enumerate() {
            if job.pinned_position() == PinnedPosition::None
                || job.job_type() == JobType::Delivery
            {
                continue;
            }

            let anchor = match job.job_type() {
                JobType::Single => PinnedAnchor::Job(JobIdx::new(j_rank)),
                JobType::Pickup => PinnedAnchor::Shipment {
                    pickup: JobIdx::new(j_rank),
                    delivery: JobIdx::new(j_rank + 1),
                },
                JobType::Delivery => unreachable!(),
            };

            for &vehicle_id in job.allowed_vehicles() {
                if let Some(v_rank) = vehicles.iter().position(|v| v.id() == vehicle_id) {
                    let slot = match job.pinned_position() {
                        PinnedPosition::First => &mut pinned_first[v_rank],
                        PinnedPosition::Last => &mut pinned_last[v_rank],
                        PinnedPosition::None => unreachable!(),
                    };
                    if slot.is_none() {
                        *slot = Some(anchor);
                    }
                }
            }
        }

        let mut job_id_to_rank = FxHashMap::default();
        let mut pickup_id_to_rank = FxHashMap::default();
        let mut delivery_id_to_rank = FxHashMap::default();
        for (j_rank, job) in jobs.iter().enumerate() {
            let rank = JobIdx::new(j_rank);
            match job.job_type() {
                JobType::Single => job_id_to_rank.insert(job.id(), rank),
                JobType::Pickup => pickup_id_to_rank.insert(job.id(), rank),
                JobType::Delivery => delivery_id_to_rank.insert(job.id(), rank),
            };
        }

        Ok(RoutingProblem {
            zero: Amount::zero(amount_size),
            jobs,
            vehicles,
            matrices,
            vehicle_profile_rank,
            vehicle_types,
            amount_size,
            compatibility,
            penalties,
            tag_names,
            tag_limit_overrides,
            pinned_first,
            pinned_last,
            job_id_to_rank,
            pickup_id_to_rank,
            delivery_id_to_rank,
            pinned_soft_timing,
            pinned_violation_budget: scale_from_user_duration(pinned_violation_budget),
            include_action_time_in_budget,
            budget_densify_candidates_k: budget_densify_candidates_k.unwrap_or(20),
        })
    }

    fn check_jobs(jobs: &[Job]) -> Result<(), ProblemError> {
        for (j_rank, job) in jobs.iter().enumerate() {
            if !job.tws().are_consistent() {
                return Err(ProblemError::InvalidTimeWindows { id: job.id() });
            }

            match job.job_type() {
                JobType::Pickup => {
                    let paired = jobs
                        .get(j_rank + 1)
                        .is_some_and(|d| d.job_type() == JobType::Delivery);
                    if !paired {
                        return Err(ProblemError::UnpairedShipment { id: job.id() });
                    }
                }
                JobType::Delivery => {
                    let paired = j_rank > 0 && jobs[j_rank - 1].job_type() == JobType::Pickup;
                    if !paired {
                        return Err(ProblemError::UnpairedShipment { id: job.id() });
                    }
                }
                JobType::Single => {}
            }
        }
        Ok(())
    }

    fn check_vehicles(
        vehicles: &[Vehicle],
        matrices: FxHashMap<String, TravelMatrices>,
        jobs: &[Job],
    ) -> Result<(Vec<TravelMatrices>, Vec<usize>), ProblemError> {
        let mut profiles: Vec<String> = Vec::new();
        let mut flat: Vec<TravelMatrices> = Vec::new();
        let mut vehicle_profile_rank = Vec::with_capacity(vehicles.len());

        for v in vehicles {
            if !v.tw().is_valid() {
                return Err(ProblemError::InvalidTimeWindows { id: v.id() });
            }
            for b in v.breaks() {
                if !b.tws().are_consistent() {
                    return Err(ProblemError::InvalidTimeWindows { id: b.id() });
                }
            }

            let rank = match profiles.iter().position(|p| p == v.profile()) {
                Some(rank) => rank,
                None => {
                    let m = matrices
                        .get(v.profile())
                        .ok_or_else(|| ProblemError::UnknownProfile {
                            profile: v.profile().to_owned(),
                        })?
                        .clone();
                    profiles.push(v.profile().to_owned());
                    flat.push(m);
                    profiles.len() - 1
                }
            };
            vehicle_profile_rank.push(rank);

            let n = flat[rank].num_locations();
            let out_of_bounds = jobs
                .iter()
                .map(|j| j.location().get())
                .chain(v.start().map(|l| l.get()))
                .chain(v.end().map(|l| l.get()))
                .find(|&l| l >= n);
            if let Some(index) = out_of_bounds {
                return Err(ProblemError::InvalidLocation { index });
            }
        }

        Ok((flat, vehicle_profile_rank))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::job::JobBuilder;
    use crate::problem::vehicle::VehicleBuilder;

    fn single(id: u64, location: usize) -> Job {
        let mut builder = JobBuilder::default();
        builder.set_id(id).set_location(location);
        builder.build()
    }

    fn vehicle(id: u64) -> Vehicle {
        let mut builder = VehicleBuilder::default();
        builder.set_id(id).set_capacity(Amount::from_vec(vec![10]));
        builder.build()
    }

    fn builder_with_matrix(n: usize) -> RoutingProblemBuilder {
        let mut builder = RoutingProblemBuilder::default();
        builder.set_matrices("car", TravelMatrices::from_constant(n, 60, 100));
        builder
    }

    #[test]
    fn test_build_basic() {
        let mut builder = builder_with_matrix(3);
        builder.add_job(single(1, 0)).add_job(single(2, 1));
        builder.add_vehicle(vehicle(1));

        let problem = builder.build().unwrap();
        assert_eq!(problem.jobs().len(), 2);
        assert_eq!(problem.amount_size(), 1);
        assert!(problem.vehicle_ok_with_job(VehicleIdx::new(0), JobIdx::new(0)));
    }

    #[test]
    fn test_unknown_profile() {
        let mut builder = RoutingProblemBuilder::default();
        builder.add_vehicle(vehicle(1));
        assert!(matches!(
            builder.build(),
            Err(ProblemError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn test_unpaired_shipment_rejected() {
        let mut builder = builder_with_matrix(3);
        let mut pickup = JobBuilder::default();
        pickup
            .set_id(1)
            .set_job_type(JobType::Pickup)
            .set_location(0);
        // Push a lone pickup through add_job's raw storage.
        builder.jobs.push(pickup.build());
        builder.add_vehicle(vehicle(1));

        assert!(matches!(
            builder.build(),
            Err(ProblemError::UnpairedShipment { id: 1 })
        ));
    }

    #[test]
    fn test_amounts_padded_to_common_dimension() {
        let mut builder = builder_with_matrix(3);
        let mut job = JobBuilder::default();
        job.set_id(1)
            .set_location(0)
            .set_pickup(Amount::from_vec(vec![1]));
        builder.add_job(job.build());

        let mut v = VehicleBuilder::default();
        v.set_id(1).set_capacity(Amount::from_vec(vec![4, 2]));
        builder.add_vehicle(v.build());

        let problem = builder.build().unwrap();
        assert_eq!(problem.amount_size(), 2);
        assert_eq!(
            problem.job(JobIdx::new(0)).pickup(),
            &Amount::from_vec(vec![1, 0])
        );
    }

    #[test]
    fn test_pinned_anchor_derivation() {
        let mut builder = builder_with_matrix(3);
        let mut job = JobBuilder::default();
        job.set_id(9)
            .set_location(1)
            .set_pinned(true)
            .set_pinned_position(PinnedPosition::First)
            .set_allowed_vehicles(vec![1]);
        builder.add_job(job.build());
        builder.add_job(single(2, 2));
        builder.add_vehicle(vehicle(1));

        let problem = builder.build().unwrap();
        assert_eq!(
            problem.pinned_first_for_vehicle(VehicleIdx::new(0)),
            Some(&PinnedAnchor::Job(JobIdx::new(0)))
        );
        assert_eq!(problem.pinned_last_for_vehicle(VehicleIdx::new(0)), None);
        // The anchored job stays compatible with its vehicle only.
        assert!(problem.vehicle_ok_with_job(VehicleIdx::new(0), JobIdx::new(0)));
    }

    #[test]
    fn test_tag_limits_default_and_override() {
        let mut builder = builder_with_matrix(2);
        let mut job = JobBuilder::default();
        job.set_id(1).set_location(0).add_exclusive_tag("frozen");
        builder.add_job(job.build());
        builder.add_vehicle(vehicle(1));
        builder.set_exclusive_tag_limit(1, "frozen", 3);

        let problem = builder.build().unwrap();
        let tag = problem.job(JobIdx::new(0)).tag_ids()[0];
        assert_eq!(problem.tag_limit(VehicleIdx::new(0), tag), 3);
        assert_eq!(problem.tag_name(tag), "frozen");
    }
}
