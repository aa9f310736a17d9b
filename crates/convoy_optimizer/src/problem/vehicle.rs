use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::define_index_newtype;
use crate::problem::amount::Amount;
use crate::problem::location::LocationIdx;
use crate::problem::scale::{
    COST_FACTOR, Cost, Distance, Duration, UserCost, UserDistance, UserDuration,
    scale_from_user_cost, scale_from_user_duration,
};
use crate::problem::skill::Skill;
use crate::problem::time_window::{TimeWindow, TimeWindows};

define_index_newtype!(VehicleIdx, Vehicle);

fn div_round(n: u64, d: u64) -> u64 {
    (n + d / 2) / d
}

/// A driver break with its own time windows, service time and an optional cap
/// on the load the vehicle may carry while the break is taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleBreak {
    id: u64,
    tws: TimeWindows,
    service: Duration,
    max_load: Option<Amount>,
    description: String,
}

impl VehicleBreak {
    pub fn new(id: u64, tws: TimeWindows, service: UserDuration, max_load: Option<Amount>) -> Self {
        VehicleBreak {
            id,
            tws,
            service: scale_from_user_duration(service),
            max_load,
            description: String::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tws(&self) -> &TimeWindows {
        &self.tws
    }

    pub fn service(&self) -> Duration {
        self.service
    }

    pub fn max_load(&self) -> Option<&Amount> {
        self.max_load.as_ref()
    }

    pub fn is_valid_for_load(&self, load: &Amount) -> bool {
        match &self.max_load {
            Some(max_load) => load <= max_load,
            None => true,
        }
    }

    pub(crate) fn resize_max_load(&mut self, size: usize) {
        if let Some(max_load) = &mut self.max_load {
            max_load.resize(size);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    id: u64,
    profile: String,
    vehicle_type: String,
    start: Option<LocationIdx>,
    end: Option<LocationIdx>,
    capacity: Amount,
    skills: FxHashSet<Skill>,
    tw: TimeWindow,
    breaks: Vec<VehicleBreak>,
    fixed_cost: Cost,
    per_hour: UserCost,
    per_km: UserCost,
    max_first_leg_distance: Option<Distance>,
    description: String,

    // Finalized fields.
    #[serde(skip)]
    type_rank: usize,
    #[serde(skip)]
    has_break_max_load: bool,
}

impl Vehicle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn vehicle_type(&self) -> &str {
        &self.vehicle_type
    }

    /// Dense rank of this vehicle's type, valid after finalization. Indexes
    /// the per-type setup/service vectors on jobs.
    pub fn type_rank(&self) -> usize {
        self.type_rank
    }

    pub fn start(&self) -> Option<LocationIdx> {
        self.start
    }

    pub fn end(&self) -> Option<LocationIdx> {
        self.end
    }

    pub fn has_start(&self) -> bool {
        self.start.is_some()
    }

    pub fn has_end(&self) -> bool {
        self.end.is_some()
    }

    pub fn capacity(&self) -> &Amount {
        &self.capacity
    }

    pub fn skills(&self) -> &FxHashSet<Skill> {
        &self.skills
    }

    pub fn tw(&self) -> &TimeWindow {
        &self.tw
    }

    pub fn breaks(&self) -> &[VehicleBreak] {
        &self.breaks
    }

    pub fn has_break_max_load(&self) -> bool {
        self.has_break_max_load
    }

    /// Rank of the break with the given id in this vehicle's break sequence.
    pub fn break_rank(&self, break_id: u64) -> usize {
        self.breaks
            .iter()
            .position(|b| b.id() == break_id)
            .expect("unknown break id")
    }

    pub fn fixed_cost(&self) -> Cost {
        self.fixed_cost
    }

    pub fn max_first_leg_distance(&self) -> Option<Distance> {
        self.max_first_leg_distance
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn user_cost_from_user_metrics(
        &self,
        duration: UserDuration,
        distance: UserDistance,
    ) -> UserCost {
        let hourly = div_round(u64::from(self.per_hour) * u64::from(duration), 3600);
        let metric = div_round(u64::from(self.per_km) * u64::from(distance), 1000);
        (hourly + metric) as UserCost
    }

    /// Travel cost in internal units from internal metrics. The duration
    /// factor carries straight through into the cost factor, so no
    /// intermediate down-scaling is needed.
    pub fn cost_from_metrics(&self, duration: Duration, distance: Distance) -> Cost {
        let hourly = div_round(u64::from(self.per_hour) * duration, 3600);
        let metric = div_round(
            u64::from(self.per_km) * distance * (COST_FACTOR as u64),
            1000,
        );
        (hourly + metric) as Cost
    }

    pub fn can_skip_break_max_load_check(&self) -> bool {
        !self.has_break_max_load
    }

    pub(crate) fn finalize(&mut self, type_rank: usize, amount_size: usize) {
        self.type_rank = type_rank;
        self.capacity.resize(amount_size);
        for b in &mut self.breaks {
            b.resize_max_load(amount_size);
        }
        self.has_break_max_load = self.breaks.iter().any(|b| b.max_load().is_some());
    }
}

#[derive(Default)]
pub struct VehicleBuilder {
    id: Option<u64>,
    profile: Option<String>,
    vehicle_type: Option<String>,
    start: Option<LocationIdx>,
    end: Option<LocationIdx>,
    capacity: Option<Amount>,
    skills: Vec<Skill>,
    tw: Option<TimeWindow>,
    breaks: Vec<VehicleBreak>,
    fixed_cost: Option<UserCost>,
    per_hour: Option<UserCost>,
    per_km: Option<UserCost>,
    max_first_leg_distance: Option<UserDistance>,
    description: Option<String>,
}

impl VehicleBuilder {
    pub fn set_id(&mut self, id: u64) -> &mut VehicleBuilder {
        self.id = Some(id);
        self
    }

    pub fn set_profile(&mut self, profile: impl Into<String>) -> &mut VehicleBuilder {
        self.profile = Some(profile.into());
        self
    }

    pub fn set_vehicle_type(&mut self, vehicle_type: impl Into<String>) -> &mut VehicleBuilder {
        self.vehicle_type = Some(vehicle_type.into());
        self
    }

    pub fn set_start(&mut self, start: impl Into<LocationIdx>) -> &mut VehicleBuilder {
        self.start = Some(start.into());
        self
    }

    pub fn set_end(&mut self, end: impl Into<LocationIdx>) -> &mut VehicleBuilder {
        self.end = Some(end.into());
        self
    }

    pub fn set_capacity(&mut self, capacity: Amount) -> &mut VehicleBuilder {
        self.capacity = Some(capacity);
        self
    }

    pub fn set_skills(&mut self, skills: Vec<String>) -> &mut VehicleBuilder {
        self.skills = skills.into_iter().map(Skill::new).collect();
        self
    }

    pub fn set_time_window(&mut self, tw: TimeWindow) -> &mut VehicleBuilder {
        self.tw = Some(tw);
        self
    }

    pub fn add_break(&mut self, b: VehicleBreak) -> &mut VehicleBuilder {
        self.breaks.push(b);
        self
    }

    pub fn set_fixed_cost(&mut self, fixed_cost: UserCost) -> &mut VehicleBuilder {
        self.fixed_cost = Some(fixed_cost);
        self
    }

    pub fn set_costs(&mut self, per_hour: UserCost, per_km: UserCost) -> &mut VehicleBuilder {
        self.per_hour = Some(per_hour);
        self.per_km = Some(per_km);
        self
    }

    pub fn set_max_first_leg_distance(&mut self, distance: UserDistance) -> &mut VehicleBuilder {
        self.max_first_leg_distance = Some(distance);
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut VehicleBuilder {
        self.description = Some(description.into());
        self
    }

    pub fn build(self) -> Vehicle {
        Vehicle {
            id: self.id.expect("vehicle id is required"),
            profile: self.profile.unwrap_or_else(|| String::from("car")),
            vehicle_type: self.vehicle_type.unwrap_or_default(),
            start: self.start,
            end: self.end,
            capacity: self.capacity.unwrap_or(Amount::zero(0)),
            skills: FxHashSet::from_iter(self.skills),
            tw: self.tw.unwrap_or_default(),
            breaks: self.breaks,
            fixed_cost: scale_from_user_cost(self.fixed_cost.unwrap_or(0)),
            // Default rate prices one cost unit per second of travel.
            per_hour: self.per_hour.unwrap_or(3600),
            per_km: self.per_km.unwrap_or(0),
            max_first_leg_distance: self.max_first_leg_distance.map(u64::from),
            description: self.description.unwrap_or_default(),
            type_rank: 0,
            has_break_max_load: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_load_validity() {
        let b = VehicleBreak::new(
            1,
            TimeWindows::default(),
            300,
            Some(Amount::from_vec(vec![5])),
        );

        assert!(b.is_valid_for_load(&Amount::from_vec(vec![5])));
        assert!(!b.is_valid_for_load(&Amount::from_vec(vec![6])));

        let unbounded = VehicleBreak::new(2, TimeWindows::default(), 300, None);
        assert!(unbounded.is_valid_for_load(&Amount::from_vec(vec![1 << 40])));
    }

    #[test]
    fn test_default_costs_price_travel_time() {
        let mut builder = VehicleBuilder::default();
        builder.set_id(1);
        let v = builder.build();

        // One user cost unit per travelled second, carried into internal units.
        assert_eq!(v.user_cost_from_user_metrics(60, 0), 60);
        assert_eq!(
            v.cost_from_metrics(scale_from_user_duration(60), 0),
            scale_from_user_cost(60)
        );
    }

    #[test]
    fn test_mixed_rate_costs() {
        let mut builder = VehicleBuilder::default();
        builder.set_id(1).set_costs(7200, 500);
        let v = builder.build();

        // 2 per second over 30s, plus 0.5 per meter over 1km.
        assert_eq!(v.user_cost_from_user_metrics(30, 1000), 60 + 500);
    }

    #[test]
    fn test_finalize_flags_break_max_load() {
        let mut builder = VehicleBuilder::default();
        builder.set_id(1).set_capacity(Amount::from_vec(vec![10]));
        builder.add_break(VehicleBreak::new(
            1,
            TimeWindows::default(),
            0,
            Some(Amount::from_vec(vec![3])),
        ));
        let mut v = builder.build();
        assert!(!v.has_break_max_load());

        v.finalize(0, 1);
        assert!(v.has_break_max_load());
        assert_eq!(v.type_rank(), 0);
    }
}
