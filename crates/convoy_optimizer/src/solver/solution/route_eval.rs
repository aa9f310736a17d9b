//! Eval helpers over raw job sequences: insertion cost deltas, full-route
//! evaluation and the action-time accounting used by budget checks.

use crate::problem::eval::Eval;
use crate::problem::job::{Job, JobIdx, JobType};
use crate::problem::location::LocationIdx;
use crate::problem::routing_problem::RoutingProblem;
use crate::problem::scale::{
    Cost, Duration, scale_from_user_cost, scale_to_user_duration,
};
use crate::problem::vehicle::{Vehicle, VehicleIdx};

fn setup_for_prev(job: &Job, v_type: usize, prev: Option<LocationIdx>) -> Duration {
    if prev == Some(job.location()) {
        0
    } else {
        job.setup(v_type)
    }
}

/// Travel-only cost of inserting `job_rank` into `route` at `rank`.
pub fn addition_cost_travel(
    problem: &RoutingProblem,
    job_rank: JobIdx,
    v_rank: VehicleIdx,
    route: &[JobIdx],
    rank: usize,
) -> Eval {
    debug_assert!(rank <= route.len());

    let vehicle = problem.vehicle(v_rank);
    let job_location = problem.job(job_rank).location();

    let mut previous_eval = Eval::default();
    let mut next_eval = Eval::default();
    let mut old_edge_eval = Eval::default();

    if rank == route.len() {
        if route.is_empty() {
            if let Some(start) = vehicle.start() {
                previous_eval = problem.eval(v_rank, start, job_location);
            }
            if let Some(end) = vehicle.end() {
                next_eval = problem.eval(v_rank, job_location, end);
            }
        } else {
            // Appending after a real job.
            let previous_location = problem.job(route[rank - 1]).location();
            previous_eval = problem.eval(v_rank, previous_location, job_location);
            if let Some(end) = vehicle.end() {
                old_edge_eval = problem.eval(v_rank, previous_location, end);
                next_eval = problem.eval(v_rank, job_location, end);
            }
        }
    } else {
        // Inserting before one of the jobs.
        let next_location = problem.job(route[rank]).location();
        next_eval = problem.eval(v_rank, job_location, next_location);

        if rank == 0 {
            if let Some(start) = vehicle.start() {
                previous_eval = problem.eval(v_rank, start, job_location);
                old_edge_eval = problem.eval(v_rank, start, next_location);
            }
        } else {
            let previous_location = problem.job(route[rank - 1]).location();
            previous_eval = problem.eval(v_rank, previous_location, job_location);
            old_edge_eval = problem.eval(v_rank, previous_location, next_location);
        }
    }

    previous_eval + next_eval - old_edge_eval
}

/// Insertion cost including the per-(job, vehicle) objective penalty.
pub fn addition_cost(
    problem: &RoutingProblem,
    job_rank: JobIdx,
    v_rank: VehicleIdx,
    route: &[JobIdx],
    rank: usize,
) -> Eval {
    let mut eval = addition_cost_travel(problem, job_rank, v_rank, route, rank);
    eval.cost = eval
        .cost
        .saturating_add(problem.job_vehicle_penalty(job_rank, v_rank));
    eval
}

/// Travel-only cost of inserting a pickup at `pickup_rank` and its delivery
/// at `delivery_rank`, the latter counted in the route *with* the pickup.
pub fn addition_cost_travel_pd(
    problem: &RoutingProblem,
    job_rank: JobIdx,
    v_rank: VehicleIdx,
    route: &[JobIdx],
    pickup_rank: usize,
    delivery_rank: usize,
) -> Eval {
    debug_assert!(pickup_rank < delivery_rank && delivery_rank <= route.len() + 1);

    let vehicle = problem.vehicle(v_rank);
    let mut eval = addition_cost_travel(problem, job_rank, v_rank, route, pickup_rank);

    if delivery_rank == pickup_rank + 1 {
        // Delivery right after pickup.
        let pickup_location = problem.job(job_rank).location();
        let delivery_location = problem.job(problem.matching_delivery(job_rank)).location();
        eval += problem.eval(v_rank, pickup_location, delivery_location);

        let mut after_delivery = Eval::default();
        let mut remove_after_pickup = Eval::default();

        if pickup_rank == route.len() {
            if let Some(end) = vehicle.end() {
                after_delivery = problem.eval(v_rank, delivery_location, end);
                remove_after_pickup = problem.eval(v_rank, pickup_location, end);
            }
        } else {
            let next_location = problem.job(route[pickup_rank]).location();
            after_delivery = problem.eval(v_rank, delivery_location, next_location);
            remove_after_pickup = problem.eval(v_rank, pickup_location, next_location);
        }

        eval += after_delivery;
        eval -= remove_after_pickup;
    } else {
        // Disjoint edge sets for pickup and delivery insertions.
        eval += addition_cost_travel(
            problem,
            problem.matching_delivery(job_rank),
            v_rank,
            route,
            delivery_rank - 1,
        );
    }

    eval
}

pub fn addition_cost_pd(
    problem: &RoutingProblem,
    job_rank: JobIdx,
    v_rank: VehicleIdx,
    route: &[JobIdx],
    pickup_rank: usize,
    delivery_rank: usize,
) -> Eval {
    // Shipment penalties apply once, on the pickup.
    let mut eval =
        addition_cost_travel_pd(problem, job_rank, v_rank, route, pickup_rank, delivery_rank);
    eval.cost = eval
        .cost
        .saturating_add(problem.job_vehicle_penalty(job_rank, v_rank));
    eval
}

/// Full route evaluation for an arbitrary ordering of job ranks. Includes the
/// vehicle fixed cost for non-empty routes and, when configured, the priced
/// action time.
pub fn route_eval_for_vehicle(
    problem: &RoutingProblem,
    v_rank: VehicleIdx,
    route: &[JobIdx],
) -> Eval {
    let vehicle = problem.vehicle(v_rank);
    let mut eval = Eval::default();
    if route.is_empty() {
        return eval;
    }

    let mut previous_location = vehicle.start();
    for &job_rank in route {
        let location = problem.job(job_rank).location();
        if let Some(previous) = previous_location {
            eval += problem.eval(v_rank, previous, location);
        }
        previous_location = Some(location);
    }
    if let (Some(previous), Some(end)) = (previous_location, vehicle.end()) {
        eval += problem.eval(v_rank, previous, end);
    }

    eval.cost = eval.cost.saturating_add(vehicle.fixed_cost());
    if problem.include_action_time_in_budget() {
        let action_time = route_action_time(problem, v_rank, route);
        eval.cost = eval
            .cost
            .saturating_add(action_cost_from_duration(vehicle, action_time));
    }

    eval
}

/// Summed setup and service time along the route, following location reuse.
pub fn route_action_time(problem: &RoutingProblem, v_rank: VehicleIdx, route: &[JobIdx]) -> Duration {
    let vehicle = problem.vehicle(v_rank);
    let v_type = vehicle.type_rank();

    let mut total = 0;
    let mut prev = vehicle.start();
    for &job_rank in route {
        let job = problem.job(job_rank);
        total += setup_for_prev(job, v_type, prev);
        total += job.service(v_type);
        prev = Some(job.location());
    }
    total
}

/// Price a duration at the vehicle's hourly rate, via user units.
pub fn action_cost_from_duration(vehicle: &Vehicle, duration: Duration) -> Cost {
    if duration == 0 {
        return 0;
    }
    let user_duration = scale_to_user_duration(duration);
    let user_cost = vehicle.user_cost_from_user_metrics(user_duration, 0);
    scale_from_user_cost(user_cost)
}

/// Signed variant for insertion/removal deltas.
pub fn action_cost_from_duration_delta(vehicle: &Vehicle, delta: i64) -> Cost {
    if delta >= 0 {
        action_cost_from_duration(vehicle, delta as Duration)
    } else {
        -action_cost_from_duration(vehicle, (-delta) as Duration)
    }
}

/// Budget carried by a task; shipments count theirs once, on the pickup.
pub fn job_budget(job: &Job) -> Cost {
    if job.job_type() == JobType::Delivery {
        0
    } else {
        job.budget()
    }
}

pub fn route_budget_sum(problem: &RoutingProblem, route: &[JobIdx]) -> Cost {
    route.iter().fold(0, |sum: Cost, &job_rank| {
        sum.saturating_add(job_budget(problem.job(job_rank)))
    })
}

/// Change in total action time when inserting a single job at `insert_rank`:
/// the job's own setup and service, plus the setup shift on the job that now
/// follows it.
pub fn action_time_delta_single(
    problem: &RoutingProblem,
    v_rank: VehicleIdx,
    route: &[JobIdx],
    job_rank: JobIdx,
    insert_rank: usize,
) -> i64 {
    let vehicle = problem.vehicle(v_rank);
    let v_type = vehicle.type_rank();
    let job = problem.job(job_rank);

    let prev = if insert_rank == 0 {
        vehicle.start()
    } else {
        Some(problem.job(route[insert_rank - 1]).location())
    };

    let mut delta = setup_for_prev(job, v_type, prev) as i64;
    delta += job.service(v_type) as i64;

    if insert_rank < route.len() {
        let next = problem.job(route[insert_rank]);
        let old_setup = setup_for_prev(next, v_type, prev);
        let new_setup = setup_for_prev(next, v_type, Some(job.location()));
        delta += new_setup as i64 - old_setup as i64;
    }
    delta
}

fn action_time_delta_pd_contiguous(
    problem: &RoutingProblem,
    v_rank: VehicleIdx,
    pickup_job: JobIdx,
) -> i64 {
    let vehicle = problem.vehicle(v_rank);
    let v_type = vehicle.type_rank();
    let pickup = problem.job(pickup_job);
    let delivery = problem.job(problem.matching_delivery(pickup_job));

    let mut delta = setup_for_prev(pickup, v_type, vehicle.start()) as i64;
    delta += pickup.service(v_type) as i64;
    delta += setup_for_prev(delivery, v_type, Some(pickup.location())) as i64;
    delta += delivery.service(v_type) as i64;
    delta
}

/// Change in total action time when inserting a pickup/delivery pair at
/// `(pickup_rank, delivery_rank)`, both counted in the original route.
pub fn action_time_delta_pd(
    problem: &RoutingProblem,
    v_rank: VehicleIdx,
    route: &[JobIdx],
    pickup_rank: usize,
    delivery_rank: usize,
    pickup_job: JobIdx,
) -> i64 {
    debug_assert!(delivery_rank >= pickup_rank);
    if delivery_rank == pickup_rank {
        return action_time_delta_pd_contiguous(problem, v_rank, pickup_job);
    }

    let vehicle = problem.vehicle(v_rank);
    let v_type = vehicle.type_rank();
    let pickup = problem.job(pickup_job);
    let delivery = problem.job(problem.matching_delivery(pickup_job));

    let mut delta = 0i64;

    // Pickup insertion effects.
    let prev_p = if pickup_rank == 0 {
        vehicle.start()
    } else {
        Some(problem.job(route[pickup_rank - 1]).location())
    };
    delta += setup_for_prev(pickup, v_type, prev_p) as i64;
    delta += pickup.service(v_type) as i64;

    if pickup_rank < route.len() {
        let next_after_p = problem.job(route[pickup_rank]);
        let old_setup = setup_for_prev(next_after_p, v_type, prev_p);
        let new_setup = setup_for_prev(next_after_p, v_type, Some(pickup.location()));
        delta += new_setup as i64 - old_setup as i64;
    }

    // Delivery insertion effects.
    let prev_d = if delivery_rank == 0 {
        vehicle.start()
    } else {
        Some(problem.job(route[delivery_rank - 1]).location())
    };
    delta += setup_for_prev(delivery, v_type, prev_d) as i64;
    delta += delivery.service(v_type) as i64;

    if delivery_rank < route.len() {
        let next_after_d = problem.job(route[delivery_rank]);
        let old_setup = setup_for_prev(next_after_d, v_type, prev_d);
        let new_setup = setup_for_prev(next_after_d, v_type, Some(delivery.location()));
        delta += new_setup as i64 - old_setup as i64;
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::scale::{scale_from_user_cost, scale_from_user_duration};
    use crate::test_utils::ProblemFixture;

    fn fixture() -> ProblemFixture {
        let mut f = ProblemFixture::with_travel(5, 60);
        for i in 0..4 {
            f.add_single(move |j| {
                j.set_location(i + 1).set_service(30).set_setup(10);
            });
        }
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_end(0usize);
            v.set_fixed_cost(1000);
        });
        f
    }

    #[test]
    fn test_addition_cost_matches_route_eval_delta() {
        let problem = fixture().build();
        let v = VehicleIdx::new(0);

        let base = vec![JobIdx::new(0), JobIdx::new(1)];
        let mut extended = base.clone();
        extended.insert(1, JobIdx::new(2));

        let delta = addition_cost_travel(&problem, JobIdx::new(2), v, &base, 1);
        let expected = route_eval_for_vehicle(&problem, v, &extended)
            - route_eval_for_vehicle(&problem, v, &base);

        // Fixed cost cancels between the two non-empty evaluations.
        assert_eq!(delta, expected);
    }

    #[test]
    fn test_addition_cost_pd_matches_route_eval_delta() {
        let mut f = ProblemFixture::with_travel(6, 60);
        f.add_single(|j| {
            j.set_location(1usize);
        });
        f.add_single(|j| {
            j.set_location(2usize);
        });
        f.add_shipment(
            crate::test_utils::amount(&[1]),
            |p| {
                p.set_location(3usize);
            },
            |d| {
                d.set_location(4usize);
            },
        );
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_capacity(crate::test_utils::amount(&[5]));
        });
        let problem = f.build();
        let v = VehicleIdx::new(0);

        let base = vec![JobIdx::new(0), JobIdx::new(1)];

        // Pickup at rank 1, delivery right behind it.
        let delta = addition_cost_travel_pd(&problem, JobIdx::new(2), v, &base, 1, 2);
        let extended = vec![
            JobIdx::new(0),
            JobIdx::new(2),
            JobIdx::new(3),
            JobIdx::new(1),
        ];
        let expected = route_eval_for_vehicle(&problem, v, &extended)
            - route_eval_for_vehicle(&problem, v, &base);
        assert_eq!(delta, expected);

        // Delivery separated from its pickup by one job.
        let delta = addition_cost_travel_pd(&problem, JobIdx::new(2), v, &base, 1, 3);
        let extended = vec![
            JobIdx::new(0),
            JobIdx::new(2),
            JobIdx::new(1),
            JobIdx::new(3),
        ];
        let expected = route_eval_for_vehicle(&problem, v, &extended)
            - route_eval_for_vehicle(&problem, v, &base);
        assert_eq!(delta, expected);
    }

    #[test]
    fn test_route_eval_includes_fixed_cost_only_when_used() {
        let problem = fixture().build();
        let v = VehicleIdx::new(0);

        assert_eq!(route_eval_for_vehicle(&problem, v, &[]), Eval::default());

        let eval = route_eval_for_vehicle(&problem, v, &[JobIdx::new(0)]);
        // Two 60s legs at the default one-cost-unit-per-second rate, plus the
        // fixed cost.
        assert_eq!(eval.duration, scale_from_user_duration(120));
        assert_eq!(
            eval.cost,
            scale_from_user_cost(120) + scale_from_user_cost(1000)
        );
    }

    #[test]
    fn test_route_action_time_with_colocation() {
        let mut f = ProblemFixture::with_travel(3, 60);
        f.add_single(|j| {
            j.set_location(1usize).set_setup(10).set_service(30);
        });
        f.add_single(|j| {
            j.set_location(1usize).set_setup(10).set_service(30);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
        });
        let problem = f.build();

        let total = route_action_time(
            &problem,
            VehicleIdx::new(0),
            &[JobIdx::new(0), JobIdx::new(1)],
        );
        // Setup paid once, services twice.
        assert_eq!(total, scale_from_user_duration(10 + 30 + 30));
    }

    #[test]
    fn test_action_time_delta_single_tracks_setup_shift() {
        let mut f = ProblemFixture::with_travel(3, 60);
        f.add_single(|j| {
            j.set_location(1usize).set_setup(10).set_service(30);
        });
        f.add_single(|j| {
            j.set_location(1usize).set_setup(10).set_service(30);
        });
        f.add_single(|j| {
            j.set_location(2usize).set_setup(10).set_service(30);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
        });
        let problem = f.build();
        let v = VehicleIdx::new(0);

        // Inserting the colocated job before its twin removes the twin's
        // setup: +10 +30 -10.
        let route = [JobIdx::new(1)];
        let delta = action_time_delta_single(&problem, v, &route, JobIdx::new(0), 0);
        assert_eq!(delta, scale_from_user_duration(30) as i64);

        // Inserting at a fresh location pays its own setup and leaves the
        // next job's setup untouched.
        let delta = action_time_delta_single(&problem, v, &route, JobIdx::new(2), 0);
        assert_eq!(delta, scale_from_user_duration(40) as i64);
    }

    #[test]
    fn test_job_budget_skips_deliveries() {
        let mut f = ProblemFixture::with_locations(4);
        f.add_shipment(
            crate::test_utils::amount(&[1]),
            |p| {
                p.set_budget(700);
            },
            |d| {
                d.set_budget(900);
            },
        );
        f.add_vehicle(|v| {
            v.set_capacity(crate::test_utils::amount(&[5]));
        });
        let problem = f.build();

        assert_eq!(
            job_budget(problem.job(JobIdx::new(0))),
            scale_from_user_cost(700)
        );
        assert_eq!(job_budget(problem.job(JobIdx::new(1))), 0);
        assert_eq!(
            route_budget_sum(&problem, &[JobIdx::new(0), JobIdx::new(1)]),
            scale_from_user_cost(700)
        );
    }

    #[test]
    fn test_action_cost_pricing() {
        let mut f = ProblemFixture::with_locations(2);
        f.add_single(|_| {});
        f.add_vehicle(|v| {
            v.set_costs(7200, 0);
        });
        let problem = f.build();
        let vehicle = problem.vehicle(VehicleIdx::new(0));

        // 2 cost units per second at the 7200/h rate.
        assert_eq!(
            action_cost_from_duration(vehicle, scale_from_user_duration(30)),
            scale_from_user_cost(60)
        );
        assert_eq!(
            action_cost_from_duration_delta(vehicle, -(scale_from_user_duration(30) as i64)),
            -scale_from_user_cost(60)
        );
        assert_eq!(action_cost_from_duration(vehicle, 0), 0);
    }
}
