//! Post-solve budget repair: make every kept route satisfy
//! `sum of task budgets >= internal route cost`, by densifying from the
//! unassigned pool, shedding tasks, or dropping the route.

use fxhash::FxHashSet;
use tracing::{debug, warn};

use crate::problem::job::{JobIdx, JobType};
use crate::problem::routing_problem::RoutingProblem;
use crate::problem::scale::Cost;
use crate::problem::vehicle::VehicleIdx;
use crate::solver::solution::route_eval;
use crate::solver::solution::tw_route::TwRoute;
use crate::solver::solution::{AssignedRoute, Solution};

struct DensifyCandidate {
    job_rank: JobIdx,
    is_shipment: bool,
    budget: Cost,
}

fn internal_cost(problem: &RoutingProblem, route: &AssignedRoute) -> Cost {
    route_eval::route_eval_for_vehicle(problem, route.vehicle, &route.job_ranks).cost
}

fn internal_cost_of_ranks(
    problem: &RoutingProblem,
    vehicle: VehicleIdx,
    ranks: &[JobIdx],
) -> Cost {
    route_eval::route_eval_for_vehicle(problem, vehicle, ranks).cost
}

/// Enforce the route-level budget invariant on a finalized solution.
///
/// Per deficit route, in order: insert the best affordable unassigned single
/// or pickup/delivery pair (largest strictly positive balance gain), then
/// greedily remove non-pinned tasks while profitable, and finally drop the
/// route altogether, surfacing its tasks as unassigned.
pub fn repair_budget(problem: &RoutingProblem, solution: &mut Solution) {
    let mut kept_routes = Vec::with_capacity(solution.routes.len());
    let mut extra_unassigned: Vec<JobIdx> = Vec::new();
    let mut unassigned: FxHashSet<JobIdx> = solution.unassigned.iter().copied().collect();
    let mut changed = false;

    let routes = std::mem::take(&mut solution.routes);
    for route in routes {
        let v_rank = route.vehicle;
        let vehicle = problem.vehicle(v_rank);

        let cur_cost = internal_cost(problem, &route);
        let cur_budget = route_eval::route_budget_sum(problem, &route.job_ranks);
        let has_any_budget = route
            .job_ranks
            .iter()
            .any(|&r| route_eval::job_budget(problem.job(r)) > 0);

        // Routes carrying no budget at all are exempt from enforcement.
        if !has_any_budget || cur_budget >= cur_cost {
            kept_routes.push(route);
            continue;
        }

        // Densify: top-K unassigned candidates by descending budget.
        let mut candidates: Vec<DensifyCandidate> = unassigned
            .iter()
            .filter_map(|&u| match problem.job(u).job_type() {
                JobType::Pickup => {
                    let delivery = problem.matching_delivery(u);
                    unassigned.contains(&delivery).then(|| DensifyCandidate {
                        job_rank: u,
                        is_shipment: true,
                        budget: route_eval::job_budget(problem.job(u)),
                    })
                }
                JobType::Single => Some(DensifyCandidate {
                    job_rank: u,
                    is_shipment: false,
                    budget: route_eval::job_budget(problem.job(u)),
                }),
                JobType::Delivery => None,
            })
            .collect();
        candidates.sort_by(|a, b| b.budget.cmp(&a.budget).then(a.job_rank.cmp(&b.job_rank)));
        candidates.truncate(problem.budget_densify_candidates_k());

        let mut best_gain: Cost = 0;
        let mut best_new_ranks: Vec<JobIdx> = Vec::new();
        let mut best_added: Option<(JobIdx, Option<JobIdx>)> = None;

        if let Ok(mut tw) = TwRoute::new(problem, v_rank, problem.amount_size()) {
            tw.seed_relaxed_from_job_ranks(problem, &route.job_ranks);

            for candidate in &candidates {
                if candidate.is_shipment {
                    let pickup = candidate.job_rank;
                    let delivery = problem.matching_delivery(pickup);

                    for pickup_r in 0..=tw.len() {
                        for delivery_r in pickup_r..=tw.len() {
                            // Inserted range: pickup, the jobs in between,
                            // then the delivery.
                            let mut modified = Vec::with_capacity(delivery_r - pickup_r + 2);
                            modified.push(pickup);
                            let mut range_delivery = problem.zero_amount().clone();
                            for t in pickup_r..delivery_r {
                                let between_rank = tw.jobs()[t];
                                modified.push(between_rank);
                                let between = problem.job(between_rank);
                                if between.job_type() == JobType::Single {
                                    range_delivery += between.delivery();
                                }
                            }
                            modified.push(delivery);

                            if !tw.is_valid_addition_for_capacity_inclusion(
                                problem,
                                range_delivery.clone(),
                                &modified,
                                pickup_r,
                                delivery_r,
                            ) {
                                continue;
                            }
                            if !tw.is_valid_addition_for_tw(
                                problem,
                                &range_delivery,
                                &modified,
                                pickup_r,
                                delivery_r,
                                true,
                            ) {
                                continue;
                            }

                            let delivery_after = if delivery_r == pickup_r {
                                pickup_r + 1
                            } else {
                                delivery_r + 1
                            };
                            let delta_eval = route_eval::addition_cost_travel_pd(
                                problem,
                                pickup,
                                v_rank,
                                tw.jobs(),
                                pickup_r,
                                delivery_after,
                            );
                            let mut delta_cost = delta_eval.cost;
                            if problem.include_action_time_in_budget() {
                                let action_delta = route_eval::action_time_delta_pd(
                                    problem,
                                    v_rank,
                                    tw.jobs(),
                                    pickup_r,
                                    delivery_r,
                                    pickup,
                                );
                                delta_cost = delta_cost.saturating_add(
                                    route_eval::action_cost_from_duration_delta(
                                        vehicle,
                                        action_delta,
                                    ),
                                );
                            }

                            let budget_added = route_eval::job_budget(problem.job(pickup));
                            let new_cost = cur_cost.saturating_add(delta_cost);
                            let new_budget = cur_budget.saturating_add(budget_added);
                            let gain = (new_budget - new_cost) - (cur_budget - cur_cost);

                            if new_budget >= new_cost && gain > best_gain {
                                let mut cand_ranks = tw.jobs().to_vec();
                                cand_ranks.insert(pickup_r, pickup);
                                let insert_d = if delivery_r == pickup_r {
                                    pickup_r + 1
                                } else {
                                    delivery_r + 1
                                };
                                cand_ranks.insert(insert_d, delivery);
                                best_gain = gain;
                                best_new_ranks = cand_ranks;
                                best_added = Some((pickup, Some(delivery)));
                            }
                        }
                    }
                } else {
                    let job_rank = candidate.job_rank;
                    let job = problem.job(job_rank);

                    for rank in 0..=tw.len() {
                        if !tw.is_valid_addition_for_capacity(
                            problem,
                            job.pickup(),
                            job.delivery(),
                            rank,
                        ) || !tw.is_valid_addition_for_tw_single(problem, job_rank, rank)
                        {
                            continue;
                        }

                        let delta_eval = route_eval::addition_cost_travel(
                            problem,
                            job_rank,
                            v_rank,
                            tw.jobs(),
                            rank,
                        );
                        let mut delta_cost = delta_eval.cost;
                        if problem.include_action_time_in_budget() {
                            let action_delta = route_eval::action_time_delta_single(
                                problem,
                                v_rank,
                                tw.jobs(),
                                job_rank,
                                rank,
                            );
                            delta_cost = delta_cost.saturating_add(
                                route_eval::action_cost_from_duration_delta(vehicle, action_delta),
                            );
                        }

                        let budget_added = route_eval::job_budget(job);
                        let new_cost = cur_cost.saturating_add(delta_cost);
                        let new_budget = cur_budget.saturating_add(budget_added);
                        let gain = (new_budget - new_cost) - (cur_budget - cur_cost);

                        if new_budget >= new_cost && gain > best_gain {
                            let mut cand_ranks = tw.jobs().to_vec();
                            cand_ranks.insert(rank, job_rank);
                            best_gain = gain;
                            best_new_ranks = cand_ranks;
                            best_added = Some((job_rank, None));
                        }
                    }
                }
            }
        }

        if best_gain > 0 && !best_new_ranks.is_empty() {
            if let Some((added, added_delivery)) = best_added {
                unassigned.remove(&added);
                if let Some(delivery) = added_delivery {
                    unassigned.remove(&delivery);
                }
            }
            debug!(
                vehicle = vehicle.id(),
                gain = best_gain,
                "budget repair: densified deficit route"
            );
            kept_routes.push(AssignedRoute::from_ranks(problem, v_rank, best_new_ranks));
            changed = true;
            continue;
        }

        // Shed: greedy removal of the task (or pair) with the best balance
        // delta, until balanced or no removal is profitable.
        let mut ranks_local = route.job_ranks.clone();
        let mut removed_ranks: Vec<JobIdx> = Vec::new();

        while !ranks_local.is_empty() {
            let cur_cost_local = internal_cost_of_ranks(problem, v_rank, &ranks_local);
            let cur_budget_local = route_eval::route_budget_sum(problem, &ranks_local);
            if cur_budget_local >= cur_cost_local {
                break;
            }

            let mut best_delta: Cost = 0;
            let mut best_after_removal: Vec<JobIdx> = Vec::new();
            let mut best_removed: Option<(JobIdx, Option<JobIdx>)> = None;

            for (position, &job_rank) in ranks_local.iter().enumerate() {
                let job = problem.job(job_rank);
                if job.pinned() {
                    continue;
                }

                let (candidate, removed) = match job.job_type() {
                    JobType::Single => {
                        let mut candidate = ranks_local.clone();
                        candidate.remove(position);
                        (candidate, (job_rank, None))
                    }
                    JobType::Pickup => {
                        let delivery = problem.matching_delivery(job_rank);
                        let Some(delivery_position) =
                            ranks_local.iter().position(|&r| r == delivery)
                        else {
                            continue;
                        };
                        if problem.job(delivery).pinned() {
                            continue;
                        }
                        let candidate = ranks_local
                            .iter()
                            .enumerate()
                            .filter(|&(q, _)| q != position && q != delivery_position)
                            .map(|(_, &r)| r)
                            .collect();
                        (candidate, (job_rank, Some(delivery)))
                    }
                    JobType::Delivery => continue,
                };

                let new_cost = internal_cost_of_ranks(problem, v_rank, &candidate);
                let new_budget = route_eval::route_budget_sum(problem, &candidate);
                let delta = (new_budget - new_cost) - (cur_budget_local - cur_cost_local);

                if delta > best_delta {
                    best_delta = delta;
                    best_after_removal = candidate;
                    best_removed = Some(removed);
                }
            }

            let Some((removed_job, removed_delivery)) = best_removed else {
                break;
            };
            if best_delta <= 0 {
                break;
            }

            removed_ranks.push(removed_job);
            if let Some(delivery) = removed_delivery {
                removed_ranks.push(delivery);
            }
            ranks_local = best_after_removal;
        }

        let final_cost = internal_cost_of_ranks(problem, v_rank, &ranks_local);
        let final_budget = route_eval::route_budget_sum(problem, &ranks_local);

        if !ranks_local.is_empty() && final_budget >= final_cost {
            debug!(
                vehicle = vehicle.id(),
                removed = removed_ranks.len(),
                "budget repair: shed tasks from deficit route"
            );
            kept_routes.push(AssignedRoute::from_ranks(problem, v_rank, ranks_local));
            extra_unassigned.extend(removed_ranks);
        } else {
            warn!(
                vehicle = vehicle.id(),
                tasks = route.job_ranks.len(),
                "budget repair: dropping unbalanced route"
            );
            extra_unassigned.extend(route.job_ranks.iter().copied());
        }
        changed = true;
    }

    solution.routes = kept_routes;

    if changed {
        let mut merged: Vec<JobIdx> = solution
            .unassigned
            .iter()
            .copied()
            .filter(|rank| unassigned.contains(rank))
            .collect();
        merged.extend(extra_unassigned);
        solution.unassigned = merged;
        solution.rebuild_summary(problem);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ProblemFixture;

    // Travel legs cost 60 user units at the default rate; jobs carry explicit
    // budgets so routes start out over or under water.
    fn fixture() -> ProblemFixture {
        ProblemFixture::with_travel(6, 60)
    }

    fn solution_with_route(
        problem: &crate::problem::routing_problem::RoutingProblem,
        ranks: Vec<JobIdx>,
        unassigned: Vec<JobIdx>,
    ) -> Solution {
        let route = AssignedRoute::from_ranks(problem, VehicleIdx::new(0), ranks);
        Solution::new(problem, vec![route], unassigned)
    }

    #[test]
    fn test_balanced_route_untouched() {
        let mut f = fixture();
        // One leg out: cost 60. Budget 100 covers it.
        f.add_single(|j| {
            j.set_location(1usize).set_budget(100);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
        });
        let problem = f.build();

        let mut solution = solution_with_route(&problem, vec![JobIdx::new(0)], vec![]);
        let before = solution.routes.clone();
        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes, before);
        assert!(solution.unassigned.is_empty());
    }

    #[test]
    fn test_budgetless_route_exempt() {
        let mut f = fixture();
        f.add_single(|j| {
            j.set_location(1usize);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
        });
        let problem = f.build();

        let mut solution = solution_with_route(&problem, vec![JobIdx::new(0)], vec![]);
        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes.len(), 1);
        assert!(solution.unassigned.is_empty());
    }

    #[test]
    fn test_densify_inserts_profitable_candidate() {
        let mut f = fixture();
        // Route: start(0) -> J0(1), cost 60, budget 50: deficit 10.
        f.add_single(|j| {
            j.set_location(1usize).set_budget(50);
        });
        // Unassigned J1 at location 1 too: adds one 0-cost leg (colocated)
        // and 200 budget.
        f.add_single(|j| {
            j.set_location(1usize).set_budget(200);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
        });
        let problem = f.build();

        let mut solution =
            solution_with_route(&problem, vec![JobIdx::new(0)], vec![JobIdx::new(1)]);
        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes.len(), 1);
        assert_eq!(solution.routes[0].job_ranks.len(), 2);
        assert!(solution.routes[0].job_ranks.contains(&JobIdx::new(1)));
        assert!(solution.unassigned.is_empty());

        let cost = internal_cost(&problem, &solution.routes[0]);
        let budget = route_eval::route_budget_sum(&problem, &solution.routes[0].job_ranks);
        assert!(budget >= cost);
    }

    #[test]
    fn test_shed_removes_unprofitable_task() {
        let mut f = fixture();
        // J0 pays its way; J1 at a far location does not.
        f.add_single(|j| {
            j.set_location(1usize).set_budget(100);
        });
        f.add_single(|j| {
            j.set_location(2usize).set_budget(1);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
        });
        let problem = f.build();

        let mut solution = solution_with_route(
            &problem,
            vec![JobIdx::new(0), JobIdx::new(1)],
            vec![],
        );
        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes.len(), 1);
        assert_eq!(solution.routes[0].job_ranks, vec![JobIdx::new(0)]);
        assert_eq!(solution.unassigned, vec![JobIdx::new(1)]);
    }

    #[test]
    fn test_drop_when_nothing_helps() {
        let mut f = fixture();
        // Lone job with a budget far below the two 60-unit legs.
        f.add_single(|j| {
            j.set_location(1usize).set_budget(10);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_end(0usize);
        });
        let problem = f.build();

        let mut solution = solution_with_route(&problem, vec![JobIdx::new(0)], vec![]);
        repair_budget(&problem, &mut solution);

        // Shedding empties the route, which is equivalent to dropping it.
        assert!(solution.routes.is_empty());
        assert_eq!(solution.unassigned, vec![JobIdx::new(0)]);
        assert_eq!(solution.summary.routes, 0);
        assert_eq!(solution.summary.unassigned, 1);
    }

    #[test]
    fn test_pinned_tasks_never_shed() {
        let mut f = fixture();
        f.add_single(|j| {
            j.set_location(1usize).set_budget(10).set_pinned(true);
        });
        f.add_single(|j| {
            j.set_location(2usize).set_budget(5);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
        });
        let problem = f.build();

        let mut solution = solution_with_route(
            &problem,
            vec![JobIdx::new(0), JobIdx::new(1)],
            vec![],
        );
        repair_budget(&problem, &mut solution);

        // Only the unpinned job may be shed; the pinned one cannot balance
        // the route alone, so the route is dropped wholesale.
        assert!(solution.routes.is_empty());
        assert!(solution.unassigned.contains(&JobIdx::new(0)));
        assert!(solution.unassigned.contains(&JobIdx::new(1)));
    }

    #[test]
    fn test_action_time_priced_into_budget() {
        let mut f = fixture();
        // Travel 60 plus 100s of service at the default rate: cost 160
        // against budget 150.
        f.add_single(|j| {
            j.set_location(1usize).set_service(100).set_budget(150);
        });
        // Highest-budget candidate sits one more leg away and loses money;
        // the colocated one is profitable.
        f.add_single(|j| {
            j.set_location(2usize).set_budget(30);
        });
        f.add_single(|j| {
            j.set_location(1usize).set_budget(20);
        });
        f.add_vehicle(|v| {
            v.set_start(0usize);
        });
        f.set_include_action_time_in_budget(true);

        // With the full candidate list the colocated job balances the route.
        let problem = f.build();
        let mut solution = solution_with_route(
            &problem,
            vec![JobIdx::new(0)],
            vec![JobIdx::new(1), JobIdx::new(2)],
        );
        repair_budget(&problem, &mut solution);
        assert_eq!(solution.routes.len(), 1);
        assert!(solution.routes[0].job_ranks.contains(&JobIdx::new(2)));

        // Truncating to the single highest-budget candidate leaves only the
        // losing option, and the route drops.
        f.set_densify_k(1);
        let problem = f.build();
        let mut solution = solution_with_route(
            &problem,
            vec![JobIdx::new(0)],
            vec![JobIdx::new(1), JobIdx::new(2)],
        );
        repair_budget(&problem, &mut solution);
        assert!(solution.routes.is_empty());
        assert!(solution.unassigned.contains(&JobIdx::new(0)));
    }

    #[test]
    fn test_densify_with_shipment_pair() {
        let mut f = fixture();
        f.add_single(|j| {
            j.set_location(1usize).set_budget(50);
        });
        // Shipment colocated with the route's only stop: zero added travel,
        // all budget.
        f.add_shipment(
            crate::test_utils::amount(&[1]),
            |p| {
                p.set_location(1usize).set_budget(500);
            },
            |d| {
                d.set_location(1usize);
            },
        );
        f.add_vehicle(|v| {
            v.set_start(0usize);
            v.set_capacity(crate::test_utils::amount(&[5]));
        });
        let problem = f.build();

        let mut solution = solution_with_route(
            &problem,
            vec![JobIdx::new(0)],
            vec![JobIdx::new(1), JobIdx::new(2)],
        );
        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes.len(), 1);
        assert_eq!(solution.routes[0].job_ranks.len(), 3);
        assert!(solution.unassigned.is_empty());

        // The pickup still precedes its delivery.
        let ranks = &solution.routes[0].job_ranks;
        let p = ranks.iter().position(|&r| r == JobIdx::new(1)).unwrap();
        let d = ranks.iter().position(|&r| r == JobIdx::new(2)).unwrap();
        assert!(p < d);
    }
}
