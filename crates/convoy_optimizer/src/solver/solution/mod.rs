pub(crate) mod pinning;
pub mod raw_route;
pub mod route_eval;
pub mod tw_route;

use crate::problem::amount::Amount;
use crate::problem::eval::Eval;
use crate::problem::job::{JobIdx, JobType};
use crate::problem::routing_problem::RoutingProblem;
use crate::problem::scale::Priority;
use crate::problem::vehicle::VehicleIdx;

/// One finalized route: a vehicle and its ordered job ranks, with the route
/// evaluation per [`route_eval::route_eval_for_vehicle`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedRoute {
    pub vehicle: VehicleIdx,
    pub job_ranks: Vec<JobIdx>,
    pub eval: Eval,
}

impl AssignedRoute {
    pub fn from_ranks(
        problem: &RoutingProblem,
        vehicle: VehicleIdx,
        job_ranks: Vec<JobIdx>,
    ) -> Self {
        let eval = route_eval::route_eval_for_vehicle(problem, vehicle, &job_ranks);
        AssignedRoute {
            vehicle,
            job_ranks,
            eval,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolutionSummary {
    pub routes: u32,
    pub unassigned: u32,
    pub eval: Eval,
    pub delivery: Amount,
    pub pickup: Amount,
    pub priority: Priority,
}

/// A finalized solution: kept routes plus the tasks left unassigned.
#[derive(Debug, Clone)]
pub struct Solution {
    pub routes: Vec<AssignedRoute>,
    pub unassigned: Vec<JobIdx>,
    pub summary: SolutionSummary,
}

impl Solution {
    pub fn new(
        problem: &RoutingProblem,
        routes: Vec<AssignedRoute>,
        unassigned: Vec<JobIdx>,
    ) -> Self {
        let mut solution = Solution {
            routes,
            unassigned,
            summary: SolutionSummary::default(),
        };
        solution.rebuild_summary(problem);
        solution
    }

    pub fn rebuild_summary(&mut self, problem: &RoutingProblem) {
        let mut summary = SolutionSummary {
            routes: self.routes.len() as u32,
            unassigned: self.unassigned.len() as u32,
            eval: Eval::default(),
            delivery: problem.zero_amount().clone(),
            pickup: problem.zero_amount().clone(),
            priority: 0,
        };

        for route in &self.routes {
            summary.eval += route.eval;
            for &job_rank in &route.job_ranks {
                let job = problem.job(job_rank);
                summary.priority += job.priority();
                match job.job_type() {
                    JobType::Single => {
                        summary.delivery += job.delivery();
                        summary.pickup += job.pickup();
                    }
                    // Shipment amounts are counted once, on the pickup leg.
                    JobType::Pickup => summary.pickup += job.pickup(),
                    JobType::Delivery => {}
                }
            }
        }

        self.summary = summary;
    }
}
