use std::fmt;

/// The entity collection a validation problem was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Room,
    Course,
    TimeSlot,
    Instructor,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Room => "room",
            EntityKind::Course => "course",
            EntityKind::TimeSlot => "time slot",
            EntityKind::Instructor => "instructor",
        })
    }
}

/// Malformed or incomplete input entities. Raised at load time, before any model is built.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("duplicate {entity} id `{id}`")]
    DuplicateId { entity: EntityKind, id: String },

    #[error("{entity} record #{row} is missing required field(s): {}", .fields.join(", "))]
    MissingFields {
        entity: EntityKind,
        row: usize,
        fields: Vec<&'static str>,
    },

    #[error("{entity} `{id}` has an invalid `{field}`: {reason}")]
    InvalidField {
        entity: EntityKind,
        id: String,
        field: &'static str,
        reason: String,
    },

    #[error("{entity} `{id}` references unknown {target} `{reference}`")]
    UnknownReference {
        entity: EntityKind,
        id: String,
        target: EntityKind,
        reference: String,
    },

    #[error("malformed {entity} data: {source}")]
    Malformed {
        entity: EntityKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not read {entity} data: {source}")]
    Io {
        entity: EntityKind,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectiveError {
    #[error("no objective registered under `{0}`")]
    UnknownName(String),

    #[error("an objective is already registered under `{0}`")]
    DuplicateName(String),

    #[error("invalid parameters for objective `{name}`: {reason}")]
    InvalidParameters { name: String, reason: String },
}

/// Failure inside a solver backend that is not a solve status.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("{backend} failed: {message}")]
    Backend { backend: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pinning tolerance must be finite and non-negative, got {0}")]
    InvalidTolerance(f64),

    #[error("solve timeout must be positive")]
    InvalidTimeout,

    #[error("invalid value `{value}` for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Every way a scheduling run can stop.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The hard constraints admit no schedule; no objective was optimized.
    #[error("hard constraints are unsatisfiable: {reason}")]
    InfeasibleModel { reason: String },

    /// A later objective cannot coexist with the optima pinned before it.
    /// This indicates a modelling or pinning defect, not bad input.
    #[error(
        "objective #{index} ({objective}) admits no solution under the optima pinned for higher-priority objectives"
    )]
    LexicographicConflict { index: usize, objective: String },

    #[error("objective #{index} ({objective}) is unbounded")]
    SolverUnbounded { index: usize, objective: String },

    #[error("solve for objective #{index} ({objective}) hit the time limit {}", describe_incumbent(.best_found))]
    SolverTimeout {
        index: usize,
        objective: String,
        best_found: Option<f64>,
    },

    #[error("optimization cancelled before objective #{index}")]
    Cancelled { index: usize },

    #[error(transparent)]
    Backend(#[from] SolverError),

    #[error("solver assignment is inconsistent: {0}")]
    Extraction(String),

    #[error(transparent)]
    Objective(#[from] ObjectiveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no schedule has been produced yet")]
    NoSchedule,

    #[error("renderer failed: {0}")]
    Render(String),
}

fn describe_incumbent(best_found: &Option<f64>) -> String {
    match best_found {
        Some(v) => format!("with best found value {v}"),
        None => "without a feasible incumbent".to_string(),
    }
}
