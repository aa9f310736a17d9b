use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::define_index_newtype;
use crate::problem::amount::Amount;
use crate::problem::location::LocationIdx;
use crate::problem::scale::{
    Cost, Duration, Priority, UserCost, UserDuration, scale_from_user_cost,
    scale_from_user_duration,
};
use crate::problem::skill::Skill;
use crate::problem::time_window::TimeWindows;

define_index_newtype!(JobIdx, Job);

// Interned exclusive-tag label, dense per problem.
define_index_newtype!(TagId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    Single,
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinnedPosition {
    #[default]
    None,
    First,
    Last,
}

/// A task in the finalized job table. Pickups sit at rank `r` with their
/// delivery at rank `r + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    id: u64,
    job_type: JobType,
    location: LocationIdx,
    default_setup: Duration,
    default_service: Duration,
    setup_per_type: FxHashMap<String, UserDuration>,
    service_per_type: FxHashMap<String, UserDuration>,
    delivery: Amount,
    pickup: Amount,
    skills: FxHashSet<Skill>,
    priority: Priority,
    tws: TimeWindows,
    description: String,
    vehicle_penalties: Vec<(u64, Cost)>,
    exclusive_tags: SmallVec<[String; 2]>,
    budget: Cost,
    pinned: bool,
    pinned_position: PinnedPosition,
    allowed_vehicles: Vec<u64>,

    // Filled at input finalization, indexed by dense vehicle-type rank.
    #[serde(skip)]
    setups: Vec<Duration>,
    #[serde(skip)]
    services: Vec<Duration>,
    #[serde(skip)]
    tag_ids: SmallVec<[TagId; 2]>,
}

impl Job {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn location(&self) -> LocationIdx {
        self.location
    }

    pub fn pickup(&self) -> &Amount {
        &self.pickup
    }

    pub fn delivery(&self) -> &Amount {
        &self.delivery
    }

    pub fn skills(&self) -> &FxHashSet<Skill> {
        &self.skills
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn tws(&self) -> &TimeWindows {
        &self.tws
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn budget(&self) -> Cost {
        self.budget
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    pub fn pinned_position(&self) -> PinnedPosition {
        self.pinned_position
    }

    pub fn allowed_vehicles(&self) -> &[u64] {
        &self.allowed_vehicles
    }

    pub fn vehicle_penalties(&self) -> &[(u64, Cost)] {
        &self.vehicle_penalties
    }

    /// Setup time under the given vehicle-type rank. Only valid after
    /// finalization.
    pub fn setup(&self, vehicle_type: usize) -> Duration {
        self.setups[vehicle_type]
    }

    pub fn service(&self, vehicle_type: usize) -> Duration {
        self.services[vehicle_type]
    }

    /// Sorted, deduplicated tag ids; filled at finalization.
    pub fn tag_ids(&self) -> &[TagId] {
        &self.tag_ids
    }

    pub fn is_valid_start(&self, t: Duration) -> bool {
        self.tws.iter().any(|tw| tw.contains(t))
    }

    pub(crate) fn exclusive_tag_names(&self) -> &[String] {
        &self.exclusive_tags
    }

    pub(crate) fn resolve_action_times(&mut self, vehicle_types: &[String]) {
        self.setups = vehicle_types
            .iter()
            .map(|t| {
                self.setup_per_type
                    .get(t)
                    .map(|&d| scale_from_user_duration(d))
                    .unwrap_or(self.default_setup)
            })
            .collect();
        self.services = vehicle_types
            .iter()
            .map(|t| {
                self.service_per_type
                    .get(t)
                    .map(|&d| scale_from_user_duration(d))
                    .unwrap_or(self.default_service)
            })
            .collect();
    }

    pub(crate) fn set_tag_ids(&mut self, mut ids: SmallVec<[TagId; 2]>) {
        ids.sort_unstable();
        ids.dedup();
        self.tag_ids = ids;
    }

    pub(crate) fn resize_amounts(&mut self, size: usize) {
        self.pickup.resize(size);
        self.delivery.resize(size);
    }
}

#[derive(Default)]
pub struct JobBuilder {
    id: Option<u64>,
    job_type: Option<JobType>,
    location: Option<LocationIdx>,
    default_setup: Option<UserDuration>,
    default_service: Option<UserDuration>,
    setup_per_type: FxHashMap<String, UserDuration>,
    service_per_type: FxHashMap<String, UserDuration>,
    delivery: Option<Amount>,
    pickup: Option<Amount>,
    skills: Vec<Skill>,
    priority: Option<Priority>,
    tws: Option<TimeWindows>,
    description: Option<String>,
    vehicle_penalties: Vec<(u64, Cost)>,
    exclusive_tags: Vec<String>,
    budget: Option<UserCost>,
    pinned: Option<bool>,
    pinned_position: Option<PinnedPosition>,
    allowed_vehicles: Vec<u64>,
}

impl JobBuilder {
    pub fn set_id(&mut self, id: u64) -> &mut JobBuilder {
        self.id = Some(id);
        self
    }

    pub fn set_job_type(&mut self, job_type: JobType) -> &mut JobBuilder {
        self.job_type = Some(job_type);
        self
    }

    pub fn set_location(&mut self, location: impl Into<LocationIdx>) -> &mut JobBuilder {
        self.location = Some(location.into());
        self
    }

    pub fn set_setup(&mut self, setup: UserDuration) -> &mut JobBuilder {
        self.default_setup = Some(setup);
        self
    }

    pub fn set_service(&mut self, service: UserDuration) -> &mut JobBuilder {
        self.default_service = Some(service);
        self
    }

    pub fn set_setup_for_type(
        &mut self,
        vehicle_type: impl Into<String>,
        setup: UserDuration,
    ) -> &mut JobBuilder {
        self.setup_per_type.insert(vehicle_type.into(), setup);
        self
    }

    pub fn set_service_for_type(
        &mut self,
        vehicle_type: impl Into<String>,
        service: UserDuration,
    ) -> &mut JobBuilder {
        self.service_per_type.insert(vehicle_type.into(), service);
        self
    }

    pub fn set_delivery(&mut self, delivery: Amount) -> &mut JobBuilder {
        self.delivery = Some(delivery);
        self
    }

    pub fn set_pickup(&mut self, pickup: Amount) -> &mut JobBuilder {
        self.pickup = Some(pickup);
        self
    }

    /// Amount moved by a shipment leg; stored on the matching side.
    pub fn set_amount(&mut self, amount: Amount) -> &mut JobBuilder {
        match self.job_type {
            Some(JobType::Pickup) => self.pickup = Some(amount),
            Some(JobType::Delivery) => self.delivery = Some(amount),
            _ => {
                self.pickup = Some(amount.clone());
                self.delivery = Some(amount);
            }
        }
        self
    }

    pub fn set_skills(&mut self, skills: Vec<String>) -> &mut JobBuilder {
        self.skills = skills.into_iter().map(Skill::new).collect();
        self
    }

    pub fn set_priority(&mut self, priority: Priority) -> &mut JobBuilder {
        self.priority = Some(priority);
        self
    }

    pub fn set_time_windows(&mut self, tws: TimeWindows) -> &mut JobBuilder {
        self.tws = Some(tws);
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut JobBuilder {
        self.description = Some(description.into());
        self
    }

    pub fn add_vehicle_penalty(&mut self, vehicle_id: u64, penalty: Cost) -> &mut JobBuilder {
        self.vehicle_penalties.push((vehicle_id, penalty));
        self
    }

    pub fn add_exclusive_tag(&mut self, tag: impl Into<String>) -> &mut JobBuilder {
        self.exclusive_tags.push(tag.into());
        self
    }

    pub fn set_budget(&mut self, budget: UserCost) -> &mut JobBuilder {
        self.budget = Some(budget);
        self
    }

    pub fn set_pinned(&mut self, pinned: bool) -> &mut JobBuilder {
        self.pinned = Some(pinned);
        self
    }

    pub fn set_pinned_position(&mut self, position: PinnedPosition) -> &mut JobBuilder {
        self.pinned_position = Some(position);
        self
    }

    pub fn set_allowed_vehicles(&mut self, vehicle_ids: Vec<u64>) -> &mut JobBuilder {
        self.allowed_vehicles = vehicle_ids;
        self
    }

    pub fn build(self) -> Job {
        Job {
            id: self.id.expect("job id is required"),
            job_type: self.job_type.unwrap_or(JobType::Single),
            location: self.location.expect("job location is required"),
            default_setup: scale_from_user_duration(self.default_setup.unwrap_or(0)),
            default_service: scale_from_user_duration(self.default_service.unwrap_or(0)),
            setup_per_type: self.setup_per_type,
            service_per_type: self.service_per_type,
            delivery: self.delivery.unwrap_or(Amount::zero(0)),
            pickup: self.pickup.unwrap_or(Amount::zero(0)),
            skills: FxHashSet::from_iter(self.skills),
            priority: self.priority.unwrap_or(0),
            tws: self.tws.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            vehicle_penalties: self.vehicle_penalties,
            exclusive_tags: SmallVec::from_vec(self.exclusive_tags),
            budget: scale_from_user_cost(self.budget.unwrap_or(0)),
            pinned: self.pinned.unwrap_or(false),
            pinned_position: self.pinned_position.unwrap_or_default(),
            allowed_vehicles: self.allowed_vehicles,
            setups: Vec::new(),
            services: Vec::new(),
            tag_ids: SmallVec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let mut builder = JobBuilder::default();
        builder.set_id(7).set_location(3);
        let job = builder.build();

        assert_eq!(job.id(), 7);
        assert_eq!(job.job_type(), JobType::Single);
        assert_eq!(job.location().get(), 3);
        assert_eq!(job.budget(), 0);
        assert!(!job.pinned());
        assert!(job.is_valid_start(0));
    }

    #[test]
    fn test_resolve_action_times_per_type() {
        let mut builder = JobBuilder::default();
        builder
            .set_id(1)
            .set_location(0)
            .set_setup(10)
            .set_service(20)
            .set_service_for_type("truck", 40);
        let mut job = builder.build();

        job.resolve_action_times(&[String::from("car"), String::from("truck")]);

        assert_eq!(job.setup(0), scale_from_user_duration(10));
        assert_eq!(job.service(0), scale_from_user_duration(20));
        assert_eq!(job.setup(1), scale_from_user_duration(10));
        assert_eq!(job.service(1), scale_from_user_duration(40));
    }

    #[test]
    fn test_tag_ids_sorted_unique() {
        let mut builder = JobBuilder::default();
        builder.set_id(1).set_location(0);
        let mut job = builder.build();

        job.set_tag_ids(smallvec::smallvec![
            TagId::new(3),
            TagId::new(1),
            TagId::new(3)
        ]);

        assert_eq!(job.tag_ids(), &[TagId::new(1), TagId::new(3)]);
    }
}
