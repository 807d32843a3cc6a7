//! Course timetabling as a mixed-integer linear program.
//!
//! Entities are loaded into an [`registry::EntityRegistry`], turned into a binary assignment
//! model by [`builder::build`], and optimized for an ordered list of
//! [`objectives::Objective`]s by the [`optimizer::LexicographicOptimizer`]. Each objective's
//! optimum is pinned before the next one is solved, so a lower-priority objective never
//! degrades a higher-priority one. [`scheduler::Scheduler`] ties the pipeline together.

pub mod builder;
pub mod config;
pub mod data;
pub mod error;
pub mod extract;
pub mod model;
pub mod objectives;
pub mod optimizer;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod solver;

pub use config::{OptimizerConfig, Pinning, TimeoutPolicy};
pub use data::{Schedule, ScheduledSession};
pub use error::ScheduleError;
pub use objectives::{Objective, ObjectiveRegistry};
pub use scheduler::{ScheduleRenderer, Scheduler};
pub use solver::{HighsBackend, SolverBackend};
