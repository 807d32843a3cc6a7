use crate::builder::build;
use crate::config::{ModelOptions, OptimizerConfig};
use crate::data::{RoomId, Schedule, ScheduledSession};
use crate::error::{EntityKind, ScheduleError, ValidationError};
use crate::extract::extract;
use crate::model::Direction;
use crate::objectives::Objective;
use crate::optimizer::{CancellationToken, LexicographicOptimizer, StepRecord, StepStatus};
use crate::registry::EntityRegistry;
use crate::solver::SolverBackend;
use log::{error, info};
use serde::Serialize;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Consumer of a finished schedule, e.g. a table or calendar view.
pub trait ScheduleRenderer {
    type Error: Display;

    fn render(&mut self, sessions: &[ScheduledSession]) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveSummary {
    pub label: String,
    pub direction: Direction,
    pub status: StepStatus,
    /// Optimum fixed for this objective during its step.
    pub pinned: f64,
    /// Value under the final assignment; absent when the run failed.
    pub achieved: Option<f64>,
}

impl ObjectiveSummary {
    fn new(step: &StepRecord, achieved: Option<f64>) -> Self {
        ObjectiveSummary {
            label: step.label.clone(),
            direction: step.direction,
            status: step.status,
            pinned: step.value,
            achieved,
        }
    }
}

/// What the latest `lexicographic_optimize` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// One entry per completed step, in priority order.
    pub objectives: Vec<ObjectiveSummary>,
    pub variables: usize,
    pub constraints: usize,
    pub failure: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct Scheduler<S> {
    registry: EntityRegistry,
    solver: S,
    config: OptimizerConfig,
    model_options: ModelOptions,
    cancellation: Option<CancellationToken>,
    schedule: Option<Schedule>,
    report: Option<RunReport>,
}

impl<S: SolverBackend> Scheduler<S> {
    pub fn new(solver: S, config: OptimizerConfig) -> Self {
        Scheduler {
            registry: EntityRegistry::new(),
            solver,
            config,
            model_options: ModelOptions::default(),
            cancellation: None,
            schedule: None,
            report: None,
        }
    }

    pub fn with_model_options(mut self, options: ModelOptions) -> Self {
        self.model_options = options;
        self
    }

    pub fn model_options(&self) -> &ModelOptions {
        &self.model_options
    }

    /// Keeps courses of `course_type` out of `rooms` in every later run.
    pub fn avoid_rooms_for_course_type<I>(&mut self, rooms: I, course_type: impl Into<String>)
    where
        I: IntoIterator,
        I::Item: Into<RoomId>,
    {
        self.invalidate();
        let options = std::mem::take(&mut self.model_options);
        self.model_options = options.avoid_rooms_for_course_type(rooms, course_type);
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        self.invalidate();
        &mut self.registry
    }

    fn invalidate(&mut self) {
        self.schedule = None;
        self.report = None;
    }

    pub fn load_rooms<R: Read>(&mut self, reader: R) -> Result<usize, ScheduleError> {
        Ok(self.registry_mut().load_rooms(reader)?)
    }

    pub fn load_courses<R: Read>(&mut self, reader: R) -> Result<usize, ScheduleError> {
        Ok(self.registry_mut().load_courses(reader)?)
    }

    pub fn load_time_slots<R: Read>(&mut self, reader: R) -> Result<usize, ScheduleError> {
        Ok(self.registry_mut().load_time_slots(reader)?)
    }

    pub fn load_instructors<R: Read>(&mut self, reader: R) -> Result<usize, ScheduleError> {
        Ok(self.registry_mut().load_instructors(reader)?)
    }

    pub fn load_rooms_from_path(&mut self, path: impl AsRef<Path>) -> Result<usize, ScheduleError> {
        let reader = open(path.as_ref(), EntityKind::Room)?;
        self.load_rooms(reader)
    }

    pub fn load_courses_from_path(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<usize, ScheduleError> {
        let reader = open(path.as_ref(), EntityKind::Course)?;
        self.load_courses(reader)
    }

    pub fn load_time_slots_from_path(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<usize, ScheduleError> {
        let reader = open(path.as_ref(), EntityKind::TimeSlot)?;
        self.load_time_slots(reader)
    }

    pub fn load_instructors_from_path(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<usize, ScheduleError> {
        let reader = open(path.as_ref(), EntityKind::Instructor)?;
        self.load_instructors(reader)
    }

    /// Builds the model from the loaded entities and optimizes `objectives` in priority
    /// order (index 0 first). The report is kept for failed runs too.
    pub fn lexicographic_optimize(
        &mut self,
        objectives: &[Objective],
    ) -> Result<Schedule, ScheduleError> {
        self.invalidate();
        let model = match build(&self.registry, &self.model_options) {
            Ok(model) => model,
            Err(e) => {
                self.report = Some(RunReport {
                    objectives: Vec::new(),
                    variables: 0,
                    constraints: 0,
                    failure: Some(e.to_string()),
                });
                return Err(e);
            }
        };
        let (variables, constraints) = (model.variables().len(), model.constraints().len());
        info!(
            "Optimizing {} objective(s) over {variables} variables and {constraints} constraints",
            objectives.len()
        );

        let mut optimizer = LexicographicOptimizer::new(&self.solver, self.config.clone());
        if let Some(token) = &self.cancellation {
            optimizer = optimizer.with_cancellation(token.clone());
        }
        let result = optimizer
            .optimize(model, objectives)
            .and_then(|run| extract(&run.model, &run.values).map(|schedule| (run, schedule)));

        match result {
            Ok((run, schedule)) => {
                self.report = Some(RunReport {
                    objectives: run
                        .steps
                        .iter()
                        .zip(run.achieved())
                        .map(|(step, achieved)| ObjectiveSummary::new(step, Some(achieved)))
                        .collect(),
                    variables,
                    constraints,
                    failure: None,
                });
                info!("Scheduled {} session(s)", schedule.len());
                self.schedule = Some(schedule.clone());
                Ok(schedule)
            }
            Err(e) => {
                error!("Scheduling failed: {e}");
                self.report = Some(RunReport {
                    objectives: optimizer
                        .completed()
                        .iter()
                        .map(|step| ObjectiveSummary::new(step, None))
                        .collect(),
                    variables,
                    constraints,
                    failure: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    /// Hands the flat session list of the latest schedule to `renderer`.
    pub fn visualize_schedule<R: ScheduleRenderer>(
        &self,
        renderer: &mut R,
    ) -> Result<(), ScheduleError> {
        let schedule = self.schedule.as_ref().ok_or(ScheduleError::NoSchedule)?;
        renderer
            .render(schedule.sessions())
            .map_err(|e| ScheduleError::Render(e.to_string()))
    }
}

fn open(path: &Path, entity: EntityKind) -> Result<BufReader<File>, ValidationError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ValidationError::Io { entity, source })
}
