//! Lexicographic optimization: objectives are solved one at a time in priority order, and
//! each optimum is pinned into the model before the next objective is considered.

use crate::config::{OptimizerConfig, Pinning, TimeoutPolicy};
use crate::error::ScheduleError;
use crate::model::{
    ActiveObjective, Comparison, Constraint, ConstraintKind, Direction, LinearExpr, Model, Values,
};
use crate::objectives::Objective;
use crate::solver::{FEASIBILITY_TOLERANCE, SolveOutcome, SolveRequest, SolveStatus, SolverBackend};
use itertools::Itertools;
use log::{info, trace, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const FEASIBILITY: &str = "feasibility";
const MAX_REPORTED_VIOLATIONS: usize = 10;

/// Cooperative cancellation flag, checked before every solve.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Infeasible,
    LexicographicConflict,
    Unbounded,
    TimedOut,
    Cancelled,
    Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerState {
    Idle,
    Solving(usize),
    Pinned(usize),
    Done,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    Optimal,
    /// Time limit hit; the incumbent's value was accepted as the step optimum.
    AcceptedTimeout,
}

/// Result of one lexicographic step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub index: usize,
    pub label: String,
    pub direction: Direction,
    pub status: StepStatus,
    /// The value pinned for this objective.
    pub value: f64,
    pub expr: LinearExpr,
}

/// Outcome of a complete run.
#[derive(Debug, Clone)]
pub struct LexicographicRun {
    /// The model including every pinning constraint.
    pub model: Model,
    pub steps: Vec<StepRecord>,
    /// Assignment from the last solve.
    pub values: Values,
}

impl LexicographicRun {
    /// Value of each step's objective under the final assignment.
    pub fn achieved(&self) -> impl Iterator<Item = f64> + '_ {
        self.steps.iter().map(|step| step.expr.eval(&self.values))
    }
}

pub struct LexicographicOptimizer<S> {
    solver: S,
    config: OptimizerConfig,
    cancellation: Option<CancellationToken>,
    state: OptimizerState,
    completed: Vec<StepRecord>,
}

impl<S: SolverBackend> LexicographicOptimizer<S> {
    pub fn new(solver: S, config: OptimizerConfig) -> Self {
        LexicographicOptimizer {
            solver,
            config,
            cancellation: None,
            state: OptimizerState::Idle,
            completed: Vec::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    /// Steps pinned by the latest `optimize` call, kept when the run fails part way.
    pub fn completed(&self) -> &[StepRecord] {
        &self.completed
    }

    fn transition(&mut self, next: OptimizerState) {
        trace!("Optimizer state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, kind: FailureKind, error: ScheduleError) -> ScheduleError {
        self.transition(OptimizerState::Failed(kind));
        error
    }

    /// Runs every objective in list order. Index 0 has the highest priority; the order is
    /// never changed.
    ///
    /// With no objectives a single feasibility solve is made.
    pub fn optimize(
        &mut self,
        model: Model,
        objectives: &[Objective],
    ) -> Result<LexicographicRun, ScheduleError> {
        self.transition(OptimizerState::Idle);
        self.completed.clear();
        self.config.validate()?;
        for pinning in objectives.iter().filter_map(Objective::pinning) {
            pinning.validate()?;
        }

        if objectives.is_empty() {
            return self.find_feasible(model);
        }

        let mut model = model;
        let mut steps = Vec::with_capacity(objectives.len());
        let mut values = Values::default();
        for (index, objective) in objectives.iter().enumerate() {
            let (next, record, step_values) = self.step(model, index, objective)?;
            model = next;
            self.completed.push(record.clone());
            steps.push(record);
            values = step_values;
        }
        self.transition(OptimizerState::Done);
        info!("Lexicographic optimization finished after {} step(s)", steps.len());
        Ok(LexicographicRun {
            model,
            steps,
            values,
        })
    }

    /// One step: sets the objective as active, solves, and returns the model with the
    /// objective's value pinned.
    pub fn step(
        &mut self,
        mut model: Model,
        index: usize,
        objective: &Objective,
    ) -> Result<(Model, StepRecord, Values), ScheduleError> {
        self.check_cancelled(index)?;
        self.transition(OptimizerState::Solving(index));

        let label = objective.label().to_string();
        let direction = objective.direction();
        info!("Step {index}: {label}");
        let expr = objective.evaluate(&mut model);
        model.set_active_objective(ActiveObjective {
            label: label.clone(),
            expr: expr.clone(),
            direction,
        });

        let outcome = self.solve_active(&model)?;
        let (status, values) = match (outcome.status, outcome.values) {
            (SolveStatus::Optimal, Some(values)) => (StepStatus::Optimal, values),
            (SolveStatus::Optimal, None) => {
                return Err(self.fail(
                    FailureKind::Backend,
                    ScheduleError::Extraction(format!(
                        "{} reported an optimum for `{label}` without values",
                        self.solver.name()
                    )),
                ));
            }
            (SolveStatus::Infeasible, _) if index == 0 => {
                let reason = self.infeasibility_reason(&model);
                return Err(self.fail(
                    FailureKind::Infeasible,
                    ScheduleError::InfeasibleModel { reason },
                ));
            }
            (SolveStatus::Infeasible, _) => {
                return Err(self.fail(
                    FailureKind::LexicographicConflict,
                    ScheduleError::LexicographicConflict {
                        index,
                        objective: label,
                    },
                ));
            }
            (SolveStatus::Unbounded, _) => {
                return Err(self.fail(
                    FailureKind::Unbounded,
                    ScheduleError::SolverUnbounded {
                        index,
                        objective: label,
                    },
                ));
            }
            (SolveStatus::TimedOut, Some(values))
                if self.config.on_timeout == TimeoutPolicy::AcceptBestFound =>
            {
                warn!("Accepting best found value for `{label}` after time limit");
                (StepStatus::AcceptedTimeout, values)
            }
            (SolveStatus::TimedOut, values) => {
                let best_found = values.map(|v| expr.eval(&v)).or(outcome.objective_value);
                return Err(self.fail(
                    FailureKind::TimedOut,
                    ScheduleError::SolverTimeout {
                        index,
                        objective: label,
                        best_found,
                    },
                ));
            }
        };

        let pinning = objective.pinning().unwrap_or(self.config.pinning);
        let value = pinned_value(&pinning, &expr, &model, &values);
        model.add_constraint(pin(&pinning, index, &expr, direction, value));
        info!("Step {index}: pinned `{label}` at {value}");
        self.transition(OptimizerState::Pinned(index));

        let record = StepRecord {
            index,
            label,
            direction,
            status,
            value,
            expr,
        };
        Ok((model, record, values))
    }

    fn find_feasible(&mut self, mut model: Model) -> Result<LexicographicRun, ScheduleError> {
        self.check_cancelled(0)?;
        self.transition(OptimizerState::Solving(0));
        model.set_active_objective(ActiveObjective {
            label: FEASIBILITY.to_string(),
            expr: LinearExpr::new(),
            direction: Direction::Minimize,
        });
        let outcome = self.solve_active(&model)?;
        let values = match (outcome.status, outcome.values) {
            (SolveStatus::Optimal, Some(values)) => values,
            (SolveStatus::Optimal, None) => {
                return Err(self.fail(
                    FailureKind::Backend,
                    ScheduleError::Extraction(format!(
                        "{} reported a feasible schedule without values",
                        self.solver.name()
                    )),
                ));
            }
            (SolveStatus::TimedOut, Some(values))
                if self.config.on_timeout == TimeoutPolicy::AcceptBestFound =>
            {
                warn!("Accepting best found schedule after time limit");
                values
            }
            (SolveStatus::TimedOut, _) => {
                return Err(self.fail(
                    FailureKind::TimedOut,
                    ScheduleError::SolverTimeout {
                        index: 0,
                        objective: FEASIBILITY.to_string(),
                        best_found: None,
                    },
                ));
            }
            (SolveStatus::Infeasible, _) => {
                let reason = self.infeasibility_reason(&model);
                return Err(self.fail(
                    FailureKind::Infeasible,
                    ScheduleError::InfeasibleModel { reason },
                ));
            }
            (SolveStatus::Unbounded, _) => {
                return Err(self.fail(
                    FailureKind::Unbounded,
                    ScheduleError::SolverUnbounded {
                        index: 0,
                        objective: FEASIBILITY.to_string(),
                    },
                ));
            }
        };
        self.transition(OptimizerState::Done);
        Ok(LexicographicRun {
            model,
            steps: Vec::new(),
            values,
        })
    }

    /// Names the constraints a greedy placement cannot satisfy.
    fn infeasibility_reason(&self, model: &Model) -> String {
        let violated = model.greedy_violations(FEASIBILITY_TOLERANCE);
        let mut reason = format!("{} found no feasible schedule", self.solver.name());
        if !violated.is_empty() {
            let shown = violated.iter().take(MAX_REPORTED_VIOLATIONS).join(", ");
            reason.push_str(&format!("; violated constraints: {shown}"));
            if violated.len() > MAX_REPORTED_VIOLATIONS {
                reason.push_str(&format!(" and {} more", violated.len() - MAX_REPORTED_VIOLATIONS));
            }
        }
        reason
    }

    fn check_cancelled(&mut self, index: usize) -> Result<(), ScheduleError> {
        if self.cancellation.as_ref().is_some_and(|c| c.is_cancelled()) {
            info!("Optimization cancelled before step {index}");
            return Err(self.fail(FailureKind::Cancelled, ScheduleError::Cancelled { index }));
        }
        Ok(())
    }

    fn solve_active(&mut self, model: &Model) -> Result<SolveOutcome, ScheduleError> {
        let Some(request) = SolveRequest::for_model(model, self.config.timeout) else {
            return Err(self.fail(
                FailureKind::Backend,
                ScheduleError::Extraction("no active objective to solve".to_string()),
            ));
        };
        if request.variables.is_empty() {
            // nothing to decide, and HiGHS rejects a model without columns
            trace!("Model has no variables; evaluating constraints directly");
            let values = Values::default();
            if !request.accepts(&values) {
                return Ok(SolveOutcome::without_values(SolveStatus::Infeasible));
            }
            return Ok(SolveOutcome {
                status: SolveStatus::Optimal,
                objective_value: Some(request.objective.constant_term()),
                values: Some(values),
            });
        }
        match self.solver.solve(&request) {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail(FailureKind::Backend, e.into())),
        }
    }
}

/// The objective's value under `values`, rounded when only integers are attainable and the
/// pinning is exact.
fn pinned_value(pinning: &Pinning, expr: &LinearExpr, model: &Model, values: &Values) -> f64 {
    let value = expr.eval(values);
    match pinning {
        Pinning::Exact if expr.is_integral(model.variables()) => value.round(),
        _ => value,
    }
}

fn pin(
    pinning: &Pinning,
    index: usize,
    expr: &LinearExpr,
    direction: Direction,
    value: f64,
) -> Constraint {
    let (comparison, rhs) = match (*pinning, direction) {
        (Pinning::Exact, _) => (Comparison::Equal, value),
        (Pinning::Tolerance { relative, absolute }, Direction::Minimize) => {
            (Comparison::LessOrEqual, value + (relative * value.abs()).max(absolute))
        }
        (Pinning::Tolerance { relative, absolute }, Direction::Maximize) => {
            (Comparison::GreaterOrEqual, value - (relative * value.abs()).max(absolute))
        }
    };
    Constraint {
        name: format!("pin_objective_{index}"),
        kind: ConstraintKind::Pinning,
        expr: expr.clone(),
        comparison,
        rhs,
    }
}
