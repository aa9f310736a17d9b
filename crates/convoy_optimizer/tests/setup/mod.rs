use convoy_optimizer::problem::amount::Amount;
use convoy_optimizer::problem::job::{Job, JobBuilder};
use convoy_optimizer::problem::routing_problem::{RoutingProblem, RoutingProblemBuilder};
use convoy_optimizer::problem::travel_cost_matrix::TravelMatrices;
use convoy_optimizer::problem::vehicle::{Vehicle, VehicleBuilder};

pub fn amount(components: &[i64]) -> Amount {
    Amount::from_vec(components.to_vec())
}

pub fn single_job(id: u64, location: usize, configure: impl FnOnce(&mut JobBuilder)) -> Job {
    let mut builder = JobBuilder::default();
    builder.set_id(id).set_location(location);
    configure(&mut builder);
    builder.build()
}

pub fn vehicle(id: u64, configure: impl FnOnce(&mut VehicleBuilder)) -> Vehicle {
    let mut builder = VehicleBuilder::default();
    builder.set_id(id);
    configure(&mut builder);
    builder.build()
}

/// Problem over explicit duration rows (user seconds), zero distances.
pub fn problem_with_durations(
    durations: Vec<Vec<u32>>,
    jobs: Vec<Job>,
    vehicles: Vec<Vehicle>,
    configure: impl FnOnce(&mut RoutingProblemBuilder),
) -> RoutingProblem {
    let mut builder = RoutingProblemBuilder::default();
    builder.set_matrices("car", TravelMatrices::from_user(durations, None, None));
    for job in jobs {
        builder.add_job(job);
    }
    for v in vehicles {
        builder.add_vehicle(v);
    }
    configure(&mut builder);
    builder.build().expect("scenario problem must build")
}

/// Problem with a constant travel time between distinct locations.
pub fn problem_with_constant_travel(
    num_locations: usize,
    travel: u32,
    jobs: Vec<Job>,
    vehicles: Vec<Vehicle>,
    configure: impl FnOnce(&mut RoutingProblemBuilder),
) -> RoutingProblem {
    let mut builder = RoutingProblemBuilder::default();
    builder.set_matrices(
        "car",
        TravelMatrices::from_constant(num_locations, travel, 0),
    );
    for job in jobs {
        builder.add_job(job);
    }
    for v in vehicles {
        builder.add_vehicle(v);
    }
    configure(&mut builder);
    builder.build().expect("scenario problem must build")
}
