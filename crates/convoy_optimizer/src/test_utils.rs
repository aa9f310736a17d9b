use crate::problem::amount::Amount;
use crate::problem::job::{Job, JobBuilder, JobIdx, JobType};
use crate::problem::routing_problem::{RoutingProblem, RoutingProblemBuilder};
use crate::problem::scale::{UserDistance, UserDuration};
use crate::problem::travel_cost_matrix::TravelMatrices;
use crate::problem::vehicle::{Vehicle, VehicleBuilder, VehicleIdx};

pub(crate) fn amount(components: &[i64]) -> Amount {
    Amount::from_vec(components.to_vec())
}

/// Small synthetic-problem builder for unit tests: jobs default to one
/// location each, vehicles to the "car" profile, travel times to a constant.
pub(crate) struct ProblemFixture {
    jobs: Vec<Job>,
    vehicles: Vec<Vehicle>,
    durations: Vec<Vec<UserDuration>>,
    distances: Vec<Vec<UserDistance>>,
    pinned_soft_budget: Option<UserDuration>,
    include_action_time_in_budget: bool,
    densify_k: Option<usize>,
    tag_limits: Vec<(u64, String, u32)>,
}

impl ProblemFixture {
    pub fn with_locations(num_locations: usize) -> Self {
        Self::with_travel(num_locations, 0)
    }

    pub fn with_travel(num_locations: usize, travel: UserDuration) -> Self {
        let mut durations = vec![vec![travel; num_locations]; num_locations];
        for (i, row) in durations.iter_mut().enumerate() {
            row[i] = 0;
        }

        ProblemFixture {
            jobs: Vec::new(),
            vehicles: Vec::new(),
            durations,
            distances: vec![vec![0; num_locations]; num_locations],
            pinned_soft_budget: None,
            include_action_time_in_budget: false,
            densify_k: None,
            tag_limits: Vec::new(),
        }
    }

    pub fn num_locations(&self) -> usize {
        self.durations.len()
    }

    /// Constant off-diagonal distance for every pair.
    pub fn set_distance(&mut self, distance: UserDistance) {
        let n = self.num_locations();
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    self.distances[i][j] = distance;
                }
            }
        }
    }

    pub fn add_single(&mut self, configure: impl FnOnce(&mut JobBuilder)) -> JobIdx {
        let rank = self.jobs.len();
        let mut builder = JobBuilder::default();
        builder
            .set_id((rank + 1) as u64)
            .set_location(rank.min(self.num_locations() - 1));
        configure(&mut builder);
        self.jobs.push(builder.build());
        JobIdx::new(rank)
    }

    pub fn add_shipment(
        &mut self,
        moved: Amount,
        configure_pickup: impl FnOnce(&mut JobBuilder),
        configure_delivery: impl FnOnce(&mut JobBuilder),
    ) -> (JobIdx, JobIdx) {
        let rank = self.jobs.len();
        let n = self.num_locations();

        let mut pickup = JobBuilder::default();
        pickup
            .set_id((rank + 1) as u64)
            .set_job_type(JobType::Pickup)
            .set_location(rank.min(n - 1))
            .set_amount(moved.clone());
        configure_pickup(&mut pickup);

        let mut delivery = JobBuilder::default();
        delivery
            .set_id((rank + 2) as u64)
            .set_job_type(JobType::Delivery)
            .set_location((rank + 1).min(n - 1))
            .set_amount(moved);
        configure_delivery(&mut delivery);

        self.jobs.push(pickup.build());
        self.jobs.push(delivery.build());
        (JobIdx::new(rank), JobIdx::new(rank + 1))
    }

    pub fn add_vehicle(&mut self, configure: impl FnOnce(&mut VehicleBuilder)) -> VehicleIdx {
        let rank = self.vehicles.len();
        let mut builder = VehicleBuilder::default();
        builder.set_id((rank + 1) as u64);
        configure(&mut builder);
        self.vehicles.push(builder.build());
        VehicleIdx::new(rank)
    }

    /// `Some(budget)` enables soft pinning with the given violation budget.
    pub fn set_pinned_soft_timing(&mut self, budget: Option<UserDuration>) {
        self.pinned_soft_budget = budget;
    }

    pub fn set_include_action_time_in_budget(&mut self, enabled: bool) {
        self.include_action_time_in_budget = enabled;
    }

    pub fn set_densify_k(&mut self, k: usize) {
        self.densify_k = Some(k);
    }

    pub fn set_tag_limit(&mut self, vehicle_id: u64, tag: &str, limit: u32) {
        self.tag_limits.push((vehicle_id, tag.to_owned(), limit));
    }

    pub fn build(&self) -> RoutingProblem {
        let mut builder = RoutingProblemBuilder::default();

        let mut i = 0;
        while i < self.jobs.len() {
            match self.jobs[i].job_type() {
                JobType::Pickup => {
                    builder.add_shipment(self.jobs[i].clone(), self.jobs[i + 1].clone());
                    i += 2;
                }
                JobType::Single => {
                    builder.add_job(self.jobs[i].clone());
                    i += 1;
                }
                JobType::Delivery => unreachable!("delivery is added with its pickup"),
            }
        }
        for vehicle in &self.vehicles {
            builder.add_vehicle(vehicle.clone());
        }

        builder.set_matrices(
            "car",
            TravelMatrices::from_user(
                self.durations.clone(),
                Some(self.distances.clone()),
                None,
            ),
        );

        if let Some(budget) = self.pinned_soft_budget {
            builder.set_pinned_soft_timing(true);
            builder.set_pinned_violation_budget(budget);
        }
        builder.set_include_action_time_in_budget(self.include_action_time_in_budget);
        if let Some(k) = self.densify_k {
            builder.set_budget_densify_candidates_k(k);
        }
        for (vehicle_id, tag, limit) in &self.tag_limits {
            builder.set_exclusive_tag_limit(*vehicle_id, tag.clone(), *limit);
        }

        builder.build().expect("fixture problem must build")
    }
}
