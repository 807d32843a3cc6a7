use crate::data::RoomId;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

/// How an objective's optimum is fixed before the next objective is optimized.
///
/// `Exact` never lets a lower-priority objective degrade a higher one but relies on the
/// backend reproducing the optimum within its feasibility tolerance. `Tolerance` trades a
/// bounded degradation for robustness against that noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Pinning {
    /// `expr == v`, with `v` rounded when the expression can only take integer values.
    Exact,
    /// One-sided band of width `max(relative * |v|, absolute)` on the improving side.
    Tolerance {
        relative: f64,
        #[serde(default)]
        absolute: f64,
    },
}

impl Pinning {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Pinning::Tolerance { relative, absolute } = *self {
            for value in [relative, absolute] {
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigError::InvalidTolerance(value));
                }
            }
        }
        Ok(())
    }
}

/// What to do when a solve hits its time limit with a feasible incumbent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutPolicy {
    #[default]
    Abort,
    /// Treat the incumbent's value as the step optimum and continue.
    AcceptBestFound,
}

/// Settings of one lexicographic run. There is no `Default`: the pinning mode must be
/// chosen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub pinning: Pinning,
    /// Per-solve time limit.
    pub timeout: Option<Duration>,
    pub on_timeout: TimeoutPolicy,
}

impl OptimizerConfig {
    pub fn new(pinning: Pinning) -> Self {
        OptimizerConfig {
            pinning,
            timeout: None,
            on_timeout: TimeoutPolicy::Abort,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.on_timeout = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pinning.validate()?;
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Solve options as sent over the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SolveOptions {
    pub pinning: Pinning,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub on_timeout: TimeoutPolicy,
}

impl TryFrom<SolveOptions> for OptimizerConfig {
    type Error = ConfigError;

    fn try_from(options: SolveOptions) -> Result<Self, Self::Error> {
        let mut config = OptimizerConfig::new(options.pinning).with_timeout_policy(options.on_timeout);
        if let Some(seconds) = options.timeout_seconds {
            let timeout =
                Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::InvalidTimeout)?;
            config = config.with_timeout(timeout);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Rooms that courses of one type must never use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoomRestriction {
    pub course_type: String,
    pub rooms: BTreeSet<RoomId>,
}

/// Settings that shape the model built from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ModelOptions {
    /// Minutes a room stays blocked after a session ends.
    pub room_turnover_minutes: u16,
    pub avoid_rooms: Vec<RoomRestriction>,
}

impl ModelOptions {
    pub const DEFAULT_ROOM_TURNOVER_MINUTES: u16 = 15;

    pub fn with_room_turnover(mut self, minutes: u16) -> Self {
        self.room_turnover_minutes = minutes;
        self
    }

    pub fn avoid_rooms_for_course_type<I>(mut self, rooms: I, course_type: impl Into<String>) -> Self
    where
        I: IntoIterator,
        I::Item: Into<RoomId>,
    {
        self.avoid_rooms.push(RoomRestriction {
            course_type: course_type.into(),
            rooms: rooms.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// True if a course of `course_type` may not use `room`.
    pub fn is_room_avoided(&self, course_type: Option<&str>, room: &str) -> bool {
        let Some(course_type) = course_type else {
            return false;
        };
        self.avoid_rooms
            .iter()
            .any(|r| r.course_type == course_type && r.rooms.contains(room))
    }
}

impl Default for ModelOptions {
    fn default() -> Self {
        ModelOptions {
            room_turnover_minutes: Self::DEFAULT_ROOM_TURNOVER_MINUTES,
            avoid_rooms: Vec::new(),
        }
    }
}

/// Options handed to HiGHS on every solve.
#[derive(Debug, Clone, PartialEq)]
pub struct HighsOptions {
    pub threads: i32,
    pub random_seed: i32,
    pub log_to_console: bool,
    /// Relative MIP gap at which HiGHS stops. Zero proves optimality, which exact pinning
    /// relies on.
    pub mip_rel_gap: f64,
}

impl Default for HighsOptions {
    // single thread and fixed seed for reproducibility
    fn default() -> Self {
        HighsOptions {
            threads: 1,
            random_seed: 1234,
            log_to_console: false,
            mip_rel_gap: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_concurrent_solves: usize,
}

impl ServerConfig {
    pub const ADDR_ENV: &'static str = "TIMETABLE_SOLVER_ADDR";
    pub const MAX_SOLVES_ENV: &'static str = "TIMETABLE_SOLVER_MAX_SOLVES";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ServerConfig::default();
        if let Some(value) = lookup(Self::ADDR_ENV) {
            config.bind_addr = value.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidEnv {
                    key: Self::ADDR_ENV,
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(value) = lookup(Self::MAX_SOLVES_ENV) {
            config.max_concurrent_solves = match value.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: Self::MAX_SOLVES_ENV,
                        value,
                        reason: "expected a positive integer".to_string(),
                    });
                }
            };
        }
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_concurrent_solves: 2,
        }
    }
}
