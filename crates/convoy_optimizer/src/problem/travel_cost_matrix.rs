use serde::{Deserialize, Serialize};

use crate::problem::location::LocationIdx;
use crate::problem::scale::{
    Cost, Distance, Duration, UserCost, UserDistance, UserDuration, scale_from_user_cost,
    scale_from_user_distance, scale_from_user_duration,
};

/// Flat row-major travel matrices for one profile, in internal units.
/// `index = from * num_locations + to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelMatrices {
    durations: Vec<Duration>,
    distances: Vec<Distance>,
    costs: Option<Vec<Cost>>,
    num_locations: usize,
}

impl TravelMatrices {
    pub fn from_user(
        durations: Vec<Vec<UserDuration>>,
        distances: Option<Vec<Vec<UserDistance>>>,
        costs: Option<Vec<Vec<UserCost>>>,
    ) -> Self {
        let num_locations = durations.len();
        debug_assert!(durations.iter().all(|row| row.len() == num_locations));

        let flat_durations = durations
            .into_iter()
            .flatten()
            .map(scale_from_user_duration)
            .collect();

        let flat_distances = match distances {
            Some(distances) => {
                debug_assert_eq!(distances.len(), num_locations);
                distances
                    .into_iter()
                    .flatten()
                    .map(scale_from_user_distance)
                    .collect()
            }
            None => vec![0; num_locations * num_locations],
        };

        let flat_costs = costs.map(|costs| {
            debug_assert_eq!(costs.len(), num_locations);
            costs
                .into_iter()
                .flatten()
                .map(scale_from_user_cost)
                .collect()
        });

        TravelMatrices {
            durations: flat_durations,
            distances: flat_distances,
            costs: flat_costs,
            num_locations,
        }
    }

    /// Uniform matrices, handy for synthetic problems and tests.
    pub fn from_constant(
        num_locations: usize,
        duration: UserDuration,
        distance: UserDistance,
    ) -> Self {
        let mut durations = vec![scale_from_user_duration(duration); num_locations * num_locations];
        let mut distances = vec![scale_from_user_distance(distance); num_locations * num_locations];
        for i in 0..num_locations {
            durations[i * num_locations + i] = 0;
            distances[i * num_locations + i] = 0;
        }

        TravelMatrices {
            durations,
            distances,
            costs: None,
            num_locations,
        }
    }

    #[inline(always)]
    fn get_index(&self, from: LocationIdx, to: LocationIdx) -> usize {
        from.get() * self.num_locations + to.get()
    }

    #[inline(always)]
    pub fn duration(&self, from: LocationIdx, to: LocationIdx) -> Duration {
        self.durations[self.get_index(from, to)]
    }

    #[inline(always)]
    pub fn distance(&self, from: LocationIdx, to: LocationIdx) -> Distance {
        self.distances[self.get_index(from, to)]
    }

    /// Custom cost entry, if a cost matrix was provided for this profile.
    #[inline(always)]
    pub fn cost(&self, from: LocationIdx, to: LocationIdx) -> Option<Cost> {
        self.costs.as_ref().map(|c| c[self.get_index(from, to)])
    }

    pub fn num_locations(&self) -> usize {
        self.num_locations
    }
}
