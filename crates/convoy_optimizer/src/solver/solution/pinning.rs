use crate::problem::job::JobIdx;
use crate::problem::routing_problem::{PinnedAnchor, RoutingProblem};
use crate::problem::vehicle::VehicleIdx;

/// Boundary gate for inserting a single job at `rank`. Returns false whenever
/// the insertion would dislodge a pinned-first or pinned-last anchor.
pub(crate) fn single_addition_ok(
    problem: &RoutingProblem,
    v_rank: VehicleIdx,
    route: &[JobIdx],
    job_rank: JobIdx,
    rank: usize,
) -> bool {
    if let Some(anchor) = problem.pinned_first_for_vehicle(v_rank) {
        match anchor {
            PinnedAnchor::Job(required) => {
                if rank == 0 && job_rank != *required {
                    return false;
                }
            }
            PinnedAnchor::Shipment { .. } => {
                // Ranks 0 and 1 belong to the anchored pair.
                if rank <= 1 {
                    return false;
                }
            }
        }
    }

    if let Some(anchor) = problem.pinned_last_for_vehicle(v_rank) {
        match anchor {
            PinnedAnchor::Job(required) => {
                if rank == route.len() && job_rank != *required {
                    return false;
                }
            }
            PinnedAnchor::Shipment { .. } => {
                if rank >= route.len().saturating_sub(1) {
                    return false;
                }
            }
        }
    }

    true
}

/// Boundary gate for replacing `[first_rank, last_rank)` with `jobs`. Checks
/// what the resulting head and tail would look like without simulating the
/// whole replace.
pub(crate) fn range_addition_ok(
    problem: &RoutingProblem,
    v_rank: VehicleIdx,
    route: &[JobIdx],
    jobs: &[JobIdx],
    first_rank: usize,
    last_rank: usize,
) -> bool {
    let insert_len = jobs.len();

    if let Some(anchor) = problem.pinned_first_for_vehicle(v_rank) {
        match anchor {
            PinnedAnchor::Job(required) => {
                if first_rank == 0 {
                    let new_first = if insert_len > 0 {
                        jobs[0]
                    } else if last_rank < route.len() {
                        route[last_rank]
                    } else {
                        // Route empty after the operation: the pinned-first
                        // job is gone.
                        return false;
                    };
                    if new_first != *required {
                        return false;
                    }
                }
            }
            PinnedAnchor::Shipment { pickup, delivery } => {
                if first_rank == 0 {
                    let n0 = if insert_len >= 1 {
                        Some(jobs[0])
                    } else if last_rank < route.len() {
                        Some(route[last_rank])
                    } else {
                        None
                    };
                    let n1 = if insert_len >= 2 {
                        Some(jobs[1])
                    } else if insert_len == 1 {
                        (last_rank < route.len()).then(|| route[last_rank])
                    } else {
                        (last_rank + 1 < route.len()).then(|| route[last_rank + 1])
                    };
                    if n0 != Some(*pickup) || n1 != Some(*delivery) {
                        return false;
                    }
                }
                // No wedge between the anchored pickup and delivery.
                if first_rank == 1
                    && insert_len > 0
                    && route.len() >= 2
                    && route[0] == *pickup
                    && route[1] == *delivery
                {
                    return false;
                }
            }
        }
    }

    if let Some(anchor) = problem.pinned_last_for_vehicle(v_rank) {
        match anchor {
            PinnedAnchor::Job(required) => {
                if last_rank == route.len() {
                    let new_last = if insert_len > 0 {
                        Some(jobs[insert_len - 1])
                    } else if first_rank > 0 {
                        Some(route[first_rank - 1])
                    } else {
                        None
                    };
                    if new_last != Some(*required) {
                        return false;
                    }
                }
            }
            PinnedAnchor::Shipment { pickup, delivery } => {
                if last_rank == route.len() {
                    if insert_len < 2 {
                        return false;
                    }
                    if jobs[insert_len - 2] != *pickup || jobs[insert_len - 1] != *delivery {
                        return false;
                    }
                }
                if first_rank == route.len().saturating_sub(1)
                    && insert_len > 0
                    && route.len() >= 2
                    && route[route.len() - 2] == *pickup
                    && route[route.len() - 1] == *delivery
                {
                    return false;
                }
            }
        }
    }

    true
}
