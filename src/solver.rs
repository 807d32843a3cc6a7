use crate::config::HighsOptions;
use crate::error::SolverError;
use crate::model::{
    Comparison, Constraint, Direction, LinearExpr, Model, Values, VarKind, VariableDef,
    is_assignment_feasible,
};
use good_lp::solvers::{ResolutionError, SolutionStatus};
use good_lp::{
    Expression, ProblemVariables, Solution, SolverModel, Variable, constraint, default_solver,
    variable,
};
use log::{info, trace, warn};
use std::time::{Duration, Instant};

/// Feasibility tolerance used when checking a backend's assignment.
pub const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Everything a backend needs for one solve, in the crate's own representation.
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    pub variables: &'a [VariableDef],
    pub constraints: &'a [Constraint],
    pub objective: &'a LinearExpr,
    pub direction: Direction,
    pub timeout: Option<Duration>,
}

impl<'a> SolveRequest<'a> {
    /// Request for the model's active objective; `None` if no objective is set.
    pub fn for_model(model: &'a Model, timeout: Option<Duration>) -> Option<Self> {
        let active = model.active_objective()?;
        Some(SolveRequest {
            variables: model.variables(),
            constraints: model.constraints(),
            objective: &active.expr,
            direction: active.direction,
            timeout,
        })
    }

    /// True if `values` satisfies bounds, integrality and every constraint.
    pub fn accepts(&self, values: &Values) -> bool {
        is_assignment_feasible(self.variables, self.constraints, values, FEASIBILITY_TOLERANCE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    /// Time limit reached; `values` holds the best feasible assignment if one was found.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    pub values: Option<Values>,
    pub objective_value: Option<f64>,
}

impl SolveOutcome {
    pub fn without_values(status: SolveStatus) -> Self {
        SolveOutcome {
            status,
            values: None,
            objective_value: None,
        }
    }
}

/// A MILP solving capability. Implementations translate the request into their native
/// representation and never leak it back to the caller.
pub trait SolverBackend {
    fn name(&self) -> &str;

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolveOutcome, SolverError>;
}

impl<S: SolverBackend + ?Sized> SolverBackend for &S {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolveOutcome, SolverError> {
        (**self).solve(request)
    }
}

/// Solves with the HiGHS ILP solver through `good_lp`.
#[derive(Debug, Clone, Default)]
pub struct HighsBackend {
    options: HighsOptions,
}

impl HighsBackend {
    pub fn new(options: HighsOptions) -> Self {
        HighsBackend { options }
    }
}

/// Status for a run HiGHS could not finish with a solution. `None` is a backend error.
fn failure_status(error: &ResolutionError, time_limited: bool) -> Option<SolveStatus> {
    match error {
        ResolutionError::Infeasible => Some(SolveStatus::Infeasible),
        ResolutionError::Unbounded => Some(SolveStatus::Unbounded),
        // HiGHS stopped by its time limit before finding any incumbent
        ResolutionError::Other("NoSolutionFound") if time_limited => Some(SolveStatus::TimedOut),
        _ => None,
    }
}

/// Status for a run that produced a solution. A gap-limited stop is within the configured
/// `mip_rel_gap` and counts as optimal.
fn solution_status(status: SolutionStatus) -> SolveStatus {
    match status {
        SolutionStatus::Optimal | SolutionStatus::GapLimit => SolveStatus::Optimal,
        SolutionStatus::TimeLimit => SolveStatus::TimedOut,
    }
}

fn to_expression(expr: &LinearExpr, vars: &[Variable]) -> Expression {
    expr.terms()
        .map(|(v, coefficient)| coefficient * vars[v.index()])
        .sum::<Expression>()
        + expr.constant_term()
}

fn declare(def: &VariableDef) -> good_lp::VariableDefinition {
    let declared = variable().name(def.name.clone());
    match def.kind {
        VarKind::Binary => declared.binary(),
        VarKind::Integer { min, max } => declared.integer().min(min).max(max),
        VarKind::Continuous { min, max } => declared.min(min).max(max),
    }
}

impl SolverBackend for HighsBackend {
    fn name(&self) -> &str {
        "HiGHS"
    }

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolveOutcome, SolverError> {
        let start_time = Instant::now();
        let mut problem = ProblemVariables::new();
        let vars: Vec<Variable> = request
            .variables
            .iter()
            .map(|def| problem.add(declare(def)))
            .collect();

        let objective = to_expression(request.objective, &vars);
        let unsolved = match request.direction {
            Direction::Minimize => problem.minimise(objective.clone()),
            Direction::Maximize => problem.maximise(objective.clone()),
        };
        let mut model = unsolved
            .using(default_solver)
            .set_option("threads", self.options.threads)
            .set_option("random_seed", self.options.random_seed)
            .set_option("mip_rel_gap", self.options.mip_rel_gap)
            .set_option(
                "log_to_console",
                if self.options.log_to_console { "true" } else { "false" },
            );
        if let Some(timeout) = request.timeout {
            model = model.set_option("time_limit", timeout.as_secs_f64());
        }

        for c in request.constraints {
            let lhs = to_expression(&c.expr, &vars);
            let rhs = c.rhs;
            model.add_constraint(match c.comparison {
                Comparison::LessOrEqual => constraint!(lhs <= rhs),
                Comparison::Equal => constraint!(lhs == rhs),
                Comparison::GreaterOrEqual => constraint!(lhs >= rhs),
            });
        }

        trace!(
            "Starting HiGHS with {} variables and {} constraints...",
            vars.len(),
            request.constraints.len()
        );
        let solution = match model.solve() {
            Ok(s) => s,
            Err(e) => {
                let Some(status) = failure_status(&e, request.timeout.is_some()) else {
                    return Err(SolverError::Backend {
                        backend: self.name().to_string(),
                        message: e.to_string(),
                    });
                };
                info!("HiGHS reports {status:?} after {:.2?}", start_time.elapsed());
                return Ok(SolveOutcome::without_values(status));
            }
        };
        let duration = start_time.elapsed();

        let values = Values::new(vars.iter().map(|v| solution.value(*v)).collect());
        let objective_value = solution.eval(&objective);
        match solution_status(solution.status()) {
            SolveStatus::TimedOut if request.accepts(&values) => {
                warn!("Time limit reached after {duration:.2?}; incumbent objective {objective_value}");
                Ok(SolveOutcome {
                    status: SolveStatus::TimedOut,
                    values: Some(values),
                    objective_value: Some(objective_value),
                })
            }
            SolveStatus::TimedOut => {
                warn!("Time limit reached after {duration:.2?} without a feasible incumbent");
                Ok(SolveOutcome::without_values(SolveStatus::TimedOut))
            }
            status => {
                info!("Solution found in {duration:.2?} (objective {objective_value})");
                Ok(SolveOutcome {
                    status,
                    values: Some(values),
                    objective_value: Some(objective_value),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstraintKind, VarId};

    struct Problem {
        variables: Vec<VariableDef>,
        constraints: Vec<Constraint>,
    }

    fn var(i: usize) -> VarId {
        VarId::from_index(i)
    }

    fn knapsack() -> Problem {
        // x0 + x1 + x2 <= 2
        Problem {
            variables: (0..3)
                .map(|i| VariableDef {
                    name: format!("x{i}"),
                    kind: VarKind::Binary,
                })
                .collect(),
            constraints: vec![Constraint {
                name: "cap".into(),
                kind: ConstraintKind::LoadBound,
                expr: [var(0), var(1), var(2)].into_iter().collect(),
                comparison: Comparison::LessOrEqual,
                rhs: 2.0,
            }],
        }
    }

    fn request<'a>(
        problem: &'a Problem,
        objective: &'a LinearExpr,
        direction: Direction,
    ) -> SolveRequest<'a> {
        SolveRequest {
            variables: &problem.variables,
            constraints: &problem.constraints,
            objective,
            direction,
            timeout: None,
        }
    }

    #[test]
    fn solves_small_binary_program() {
        let problem = knapsack();
        let objective: LinearExpr = [(var(0), 3.0), (var(1), 2.0), (var(2), 1.0)]
            .into_iter()
            .collect();
        let outcome = HighsBackend::default()
            .solve(&request(&problem, &objective, Direction::Maximize))
            .unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert!((outcome.objective_value.unwrap() - 5.0).abs() < 1e-6);
        let values = outcome.values.unwrap();
        assert!((values.get(var(0)) - 1.0).abs() < 1e-6);
        assert!((values.get(var(1)) - 1.0).abs() < 1e-6);
        assert!(values.get(var(2)).abs() < 1e-6);
    }

    #[test]
    fn reports_infeasibility() {
        let mut problem = knapsack();
        problem.constraints.push(Constraint {
            name: "too_many".into(),
            kind: ConstraintKind::Coverage,
            expr: [var(0), var(1), var(2)].into_iter().collect(),
            comparison: Comparison::Equal,
            rhs: 3.0,
        });
        let objective = LinearExpr::new();
        let outcome = HighsBackend::default()
            .solve(&request(&problem, &objective, Direction::Minimize))
            .unwrap();
        assert_eq!(outcome.status, SolveStatus::Infeasible);
        assert!(outcome.values.is_none());
    }

    #[test]
    fn request_checks_assignments() {
        let problem = knapsack();
        let objective = LinearExpr::new();
        let req = request(&problem, &objective, Direction::Minimize);
        assert!(req.accepts(&Values::new(vec![1.0, 1.0, 0.0])));
        assert!(!req.accepts(&Values::new(vec![1.0, 1.0, 1.0])));
        assert!(!req.accepts(&Values::new(vec![0.5, 0.0, 0.0])));
    }

    #[test]
    fn time_limit_without_incumbent_is_a_timeout() {
        let no_solution = ResolutionError::Other("NoSolutionFound");
        assert_eq!(failure_status(&no_solution, true), Some(SolveStatus::TimedOut));
        // without a limit the same error means the backend failed
        assert_eq!(failure_status(&no_solution, false), None);
        assert_eq!(failure_status(&ResolutionError::Other("ModelEmpty"), true), None);
        assert_eq!(
            failure_status(&ResolutionError::Infeasible, true),
            Some(SolveStatus::Infeasible)
        );
        assert_eq!(
            failure_status(&ResolutionError::Unbounded, false),
            Some(SolveStatus::Unbounded)
        );
    }

    #[test]
    fn gap_limit_is_not_a_timeout() {
        assert_eq!(solution_status(SolutionStatus::Optimal), SolveStatus::Optimal);
        assert_eq!(solution_status(SolutionStatus::GapLimit), SolveStatus::Optimal);
        assert_eq!(solution_status(SolutionStatus::TimeLimit), SolveStatus::TimedOut);
    }

    #[test]
    fn relative_gap_option_is_accepted() {
        let problem = knapsack();
        let objective: LinearExpr = [(var(0), 1.0), (var(1), 1.0)].into_iter().collect();
        let backend = HighsBackend::new(HighsOptions {
            mip_rel_gap: 0.05,
            ..HighsOptions::default()
        });
        let outcome = backend
            .solve(&request(&problem, &objective, Direction::Maximize))
            .unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert!((outcome.objective_value.unwrap() - 2.0).abs() < 1e-6);
    }
}
