use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use convoy_optimizer::problem::amount::Amount;
use convoy_optimizer::problem::job::{JobBuilder, JobIdx};
use convoy_optimizer::problem::routing_problem::{RoutingProblem, RoutingProblemBuilder};
use convoy_optimizer::problem::time_window::{TimeWindow, TimeWindows};
use convoy_optimizer::problem::travel_cost_matrix::TravelMatrices;
use convoy_optimizer::problem::vehicle::{VehicleBreak, VehicleBuilder, VehicleIdx};
use convoy_optimizer::solver::solution::tw_route::TwRoute;

const ROUTE_SIZE: usize = 50;

fn build_problem() -> RoutingProblem {
    let mut builder = RoutingProblemBuilder::default();
    builder.set_matrices(
        "car",
        TravelMatrices::from_constant(ROUTE_SIZE + 2, 120, 1500),
    );

    for i in 0..ROUTE_SIZE + 1 {
        let mut job = JobBuilder::default();
        job.set_id((i + 1) as u64)
            .set_location(i + 1)
            .set_service(180)
            .set_pickup(Amount::from_vec(vec![1, 0]))
            .set_delivery(Amount::from_vec(vec![0, 1]))
            .set_time_windows(TimeWindows::single(TimeWindow::from_user(0, 500_000)));
        builder.add_job(job.build());
    }

    let mut vehicle = VehicleBuilder::default();
    vehicle
        .set_id(1)
        .set_start(0usize)
        .set_end(0usize)
        .set_capacity(Amount::from_vec(vec![200, 200]))
        .set_time_window(TimeWindow::from_user(0, 1_000_000));
    vehicle.add_break(VehicleBreak::new(
        1,
        TimeWindows::single(TimeWindow::from_user(10_000, 20_000)),
        600,
        None,
    ));
    builder.add_vehicle(vehicle.build());

    builder.build().expect("bench problem must build")
}

fn seeded_route(problem: &RoutingProblem) -> TwRoute {
    let mut route = TwRoute::new(problem, VehicleIdx::new(0), problem.amount_size()).unwrap();
    for rank in 0..ROUTE_SIZE {
        route.add(problem, JobIdx::new(rank), rank);
    }
    route
}

fn bench_capacity_probe(c: &mut Criterion) {
    let problem = build_problem();
    let route = seeded_route(&problem);
    let probe = problem.job(JobIdx::new(ROUTE_SIZE));

    c.bench_function("is_valid_addition_for_capacity", |b| {
        b.iter(|| {
            let mut valid = true;
            for rank in 0..=route.len() {
                valid &= route.is_valid_addition_for_capacity(
                    black_box(&problem),
                    probe.pickup(),
                    probe.delivery(),
                    black_box(rank),
                );
            }
            valid
        })
    });
}

fn bench_tw_probe(c: &mut Criterion) {
    let problem = build_problem();
    let route = seeded_route(&problem);

    c.bench_function("is_valid_addition_for_tw", |b| {
        b.iter(|| {
            let mut valid = true;
            for rank in 0..=route.len() {
                valid &= route.is_valid_addition_for_tw_single(
                    black_box(&problem),
                    black_box(JobIdx::new(ROUTE_SIZE)),
                    black_box(rank),
                );
            }
            valid
        })
    });
}

criterion_group!(benches, bench_capacity_probe, bench_tw_probe);
criterion_main!(benches);
