//! Named soft objectives over a model's decision variables.
//!
//! Every objective has the same two-method contract, [`Objective::evaluate`] and
//! [`Objective::direction`]. The set of measures is closed; callers extend the library by
//! registering new names in an [`ObjectiveRegistry`] whose constructors compose the
//! existing measures, typically through [`Objective::count_matching`].

use crate::config::Pinning;
use crate::data::{ClockTime, CourseId, DayPattern, InstructorId, RoomId, TimeSlot};
use crate::error::ObjectiveError;
use crate::model::{
    Comparison, Constraint, ConstraintKind, Decision, DecisionKey, Direction, LinearExpr, Model,
    VarKind,
};
use itertools::Itertools;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Declarative predicate over a (decision, time slot) pair. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionFilter {
    /// Slot starts strictly before this time.
    pub start_before: Option<ClockTime>,
    /// Slot starts strictly after this time.
    pub start_after: Option<ClockTime>,
    pub rooms: Option<BTreeSet<RoomId>>,
    pub instructors: Option<BTreeSet<InstructorId>>,
    pub courses: Option<BTreeSet<CourseId>>,
    /// Course has one of these types. Untyped courses never match.
    pub course_types: Option<BTreeSet<String>>,
    /// Slot meets on at least one of these days.
    pub days: Option<DayPattern>,
}

impl SessionFilter {
    pub fn matches(&self, key: &DecisionKey, slot: &TimeSlot, course_type: Option<&str>) -> bool {
        self.start_before.is_none_or(|cutoff| slot.start < cutoff)
            && self.start_after.is_none_or(|cutoff| slot.start > cutoff)
            && self.rooms.as_ref().is_none_or(|r| r.contains(&key.room))
            && self
                .instructors
                .as_ref()
                .is_none_or(|i| i.contains(&key.instructor))
            && self.courses.as_ref().is_none_or(|c| c.contains(&key.course))
            && self
                .course_types
                .as_ref()
                .is_none_or(|types| course_type.is_some_and(|t| types.contains(t)))
            && self
                .days
                .as_ref()
                .is_none_or(|days| days.iter().any(|d| slot.days.contains(d)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Measure {
    /// Number of selected sessions.
    CountSessions,
    /// Minutes past the cutoff, summed over every meeting day of each selected session.
    MinutesAfter(ClockTime),
    /// Smallest weekly session count among the instructors considered.
    MinInstructorLoad,
    /// Number of (root, day pattern) pairs where at least two sections sharing a root course
    /// meet on exactly that pattern.
    RootDayPairs {
        days: Vec<DayPattern>,
        roots: Option<BTreeSet<String>>,
    },
}

/// A soft objective: a measure over the sessions passing `filter`, optimized in one
/// direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    label: String,
    direction: Direction,
    filter: SessionFilter,
    measure: Measure,
    pinning: Option<Pinning>,
}

impl Objective {
    fn new(label: String, direction: Direction, filter: SessionFilter, measure: Measure) -> Self {
        Objective {
            label,
            direction,
            filter,
            measure,
            pinning: None,
        }
    }

    pub fn minimize_sessions_before(cutoff: ClockTime) -> Self {
        let filter = SessionFilter {
            start_before: Some(cutoff),
            ..SessionFilter::default()
        };
        Self::new(
            format!("Minimize sessions before {cutoff}"),
            Direction::Minimize,
            filter,
            Measure::CountSessions,
        )
    }

    pub fn minimize_sessions_after(cutoff: ClockTime) -> Self {
        let filter = SessionFilter {
            start_after: Some(cutoff),
            ..SessionFilter::default()
        };
        Self::new(
            format!("Minimize sessions after {cutoff}"),
            Direction::Minimize,
            filter,
            Measure::CountSessions,
        )
    }

    pub fn minimize_minutes_after(cutoff: ClockTime) -> Self {
        Self::new(
            format!("Minimize minutes after {cutoff}"),
            Direction::Minimize,
            SessionFilter::default(),
            Measure::MinutesAfter(cutoff),
        )
    }

    pub fn maximize_preferred_rooms<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RoomId>,
    {
        Self::preferred_rooms(rooms, Direction::Maximize)
    }

    pub fn minimize_preferred_rooms<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RoomId>,
    {
        Self::preferred_rooms(rooms, Direction::Minimize)
    }

    fn preferred_rooms<I, S>(rooms: I, direction: Direction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RoomId>,
    {
        let rooms: BTreeSet<RoomId> = rooms.into_iter().map(Into::into).collect();
        let verb = match direction {
            Direction::Minimize => "Minimize",
            Direction::Maximize => "Maximize",
        };
        let label = format!("{verb} preferred rooms ({})", rooms.iter().join(", "));
        let filter = SessionFilter {
            rooms: Some(rooms),
            ..SessionFilter::default()
        };
        Self::new(label, direction, filter, Measure::CountSessions)
    }

    pub fn maximize_instructor_load_balance() -> Self {
        Self::new(
            "Maximize instructor load balance".to_string(),
            Direction::Maximize,
            SessionFilter::default(),
            Measure::MinInstructorLoad,
        )
    }

    /// Rewards lab sections of `course_types` that share a root course (the id up to its
    /// last `-`) and meet together on one of `days`. Each (root, pattern) pair with two or
    /// more such sections counts once.
    pub fn maximize_lab_root_day_pairs<T, D>(course_types: T, days: D) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        D: IntoIterator<Item = DayPattern>,
    {
        let days: Vec<DayPattern> = days.into_iter().sorted().dedup().collect();
        let filter = SessionFilter {
            course_types: Some(course_types.into_iter().map(Into::into).collect()),
            ..SessionFilter::default()
        };
        Self::new(
            format!("Pair lab roots on days ({})", days.iter().join(", ")),
            Direction::Maximize,
            filter,
            Measure::RootDayPairs { days, roots: None },
        )
    }

    /// Limits a root pairing objective to the given root courses. Other measures are
    /// returned unchanged.
    pub fn for_roots<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Measure::RootDayPairs { roots: only, .. } = &mut self.measure {
            let roots: BTreeSet<String> = roots.into_iter().map(Into::into).collect();
            self.label = format!("{} for ({})", self.label, roots.iter().join(", "));
            *only = Some(roots);
        }
        self
    }

    pub fn count_matching(
        label: impl Into<String>,
        direction: Direction,
        filter: SessionFilter,
    ) -> Self {
        Self::new(label.into(), direction, filter, Measure::CountSessions)
    }

    /// Restricts the objective to sessions taught by `instructor`.
    pub fn for_instructor(mut self, instructor: impl Into<InstructorId>) -> Self {
        let instructor = instructor.into();
        self.label = format!("{} for {instructor}", self.label);
        self.filter.instructors = Some(BTreeSet::from([instructor]));
        self
    }

    /// Restricts the objective to courses of `course_type`.
    pub fn for_course_type(mut self, course_type: impl Into<String>) -> Self {
        let course_type = course_type.into();
        self.label = format!("{} ({course_type})", self.label);
        self.filter.course_types = Some(BTreeSet::from([course_type]));
        self
    }

    /// Pins this objective's optimum with `pinning` instead of the run's default.
    pub fn with_pinning(mut self, pinning: Pinning) -> Self {
        self.pinning = Some(pinning);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn pinning(&self) -> Option<Pinning> {
        self.pinning
    }

    /// Builds the objective expression over `model`'s variables. Objectives that need
    /// auxiliary variables append them, with their linking constraints, to the model.
    pub fn evaluate(&self, model: &mut Model) -> LinearExpr {
        let expr: LinearExpr = match &self.measure {
            Measure::CountSessions => selected(model, &self.filter).map(|(d, _)| d.var).collect(),
            Measure::MinutesAfter(cutoff) => selected(model, &self.filter)
                .filter_map(|(d, slot)| {
                    let late = slot.end.minutes().saturating_sub(cutoff.minutes());
                    (late > 0).then(|| (d.var, f64::from(late) * slot.days.len() as f64))
                })
                .collect(),
            Measure::MinInstructorLoad => min_instructor_load(model, &self.filter),
            Measure::RootDayPairs { days, roots } => {
                root_day_pairs(model, &self.filter, days, roots.as_ref())
            }
        };
        if expr.is_empty() {
            warn!("Objective '{}' selects no variables", self.label);
        }
        expr
    }
}

/// Decisions whose session passes `filter`.
fn selected<'m>(
    model: &'m Model,
    filter: &'m SessionFilter,
) -> impl Iterator<Item = (&'m Decision, &'m TimeSlot)> + 'm {
    model
        .decision_slots()
        .filter(move |(d, slot)| filter.matches(&d.key, slot, model.course_type(&d.key.course)))
}

fn min_instructor_load(model: &mut Model, filter: &SessionFilter) -> LinearExpr {
    let loads: BTreeMap<InstructorId, LinearExpr> = selected(model, filter)
        .map(|(d, _)| (d.key.instructor.clone(), d.var))
        .into_group_map()
        .into_iter()
        .map(|(instructor, vars)| (instructor, vars.into_iter().collect()))
        .collect();
    let Some(upper) = loads.values().map(LinearExpr::len).min() else {
        return LinearExpr::new();
    };

    // floor <= load_i for every instructor, maximised by the solver
    let floor = model.add_variable(
        format!("min_instructor_load_{}", model.variables().len()),
        VarKind::Integer {
            min: 0.0,
            max: upper as f64,
        },
    );
    for (instructor, load) in loads {
        let mut gap = load;
        gap.add_term(floor, -1.0);
        model.add_constraint(Constraint {
            name: format!("min_load_link_{}_{}", floor.index(), instructor),
            kind: ConstraintKind::ObjectiveLink,
            expr: gap,
            comparison: Comparison::GreaterOrEqual,
            rhs: 0.0,
        });
    }
    LinearExpr::new().with_term(floor, 1.0)
}

/// `ABC 101-011` has root `ABC 101`; an id without `-` is its own root.
fn root_of(course: &str) -> &str {
    course.rsplit_once('-').map_or(course, |(root, _)| root)
}

fn root_day_pairs(
    model: &mut Model,
    filter: &SessionFilter,
    days: &[DayPattern],
    roots: Option<&BTreeSet<String>>,
) -> LinearExpr {
    // root -> pattern -> sessions of that root meeting on exactly the pattern
    let mut sections: BTreeMap<String, BTreeSet<CourseId>> = BTreeMap::new();
    let mut on_days: BTreeMap<(String, usize), LinearExpr> = BTreeMap::new();
    for (decision, slot) in selected(model, filter) {
        let root = root_of(&decision.key.course);
        if roots.is_some_and(|only| !only.contains(root)) {
            continue;
        }
        sections
            .entry(root.to_string())
            .or_default()
            .insert(decision.key.course.clone());
        if let Some(pattern) = days.iter().position(|d| *d == slot.days) {
            on_days
                .entry((root.to_string(), pattern))
                .or_default()
                .add_term(decision.var, 1.0);
        }
    }

    let mut expr = LinearExpr::new();
    for (root, courses) in &sections {
        if courses.len() < 2 {
            continue;
        }
        for (index, pattern) in days.iter().enumerate() {
            let Some(count) = on_days.get(&(root.clone(), index)) else {
                continue;
            };
            // 2 * pair <= sessions of the root on this pattern
            let tag = format!("{}_{pattern}", root.replace(' ', "_"));
            let pair = model.add_variable(
                format!("pair_{tag}_{}", model.variables().len()),
                VarKind::Binary,
            );
            let mut link = count.clone();
            link.add_term(pair, -2.0);
            model.add_constraint(Constraint {
                name: format!("pair_root_{tag}_{}", pair.index()),
                kind: ConstraintKind::ObjectiveLink,
                expr: link,
                comparison: Comparison::GreaterOrEqual,
                rhs: 0.0,
            });
            expr.add_term(pair, 1.0);
        }
    }
    debug!("Root pairing objective uses {} pair variable(s)", expr.len());
    expr
}

/// Builds an objective from JSON parameters; the error explains what is wrong with them.
pub type ObjectiveConstructor = fn(&Value) -> Result<Objective, String>;

/// Name-keyed objective constructors.
#[derive(Debug, Clone, Default)]
pub struct ObjectiveRegistry {
    constructors: BTreeMap<String, ObjectiveConstructor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CutoffParams {
    cutoff: ClockTime,
    #[serde(default)]
    instructor: Option<InstructorId>,
    #[serde(default)]
    course_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RoomParams {
    rooms: BTreeSet<RoomId>,
    #[serde(default)]
    instructor: Option<InstructorId>,
    #[serde(default)]
    course_type: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LoadBalanceParams {
    #[serde(default)]
    instructors: Option<BTreeSet<InstructorId>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RootPairParams {
    course_types: BTreeSet<String>,
    preferred_days: Vec<DayPattern>,
    #[serde(default)]
    roots: Option<BTreeSet<String>>,
}

#[derive(Deserialize)]
struct CountMatchingParams {
    label: String,
    direction: Direction,
    #[serde(flatten)]
    filter: SessionFilter,
}

fn params<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value.clone()
    };
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn restrict(
    objective: Objective,
    instructor: Option<InstructorId>,
    course_type: Option<String>,
) -> Objective {
    let objective = match instructor {
        Some(instructor) => objective.for_instructor(instructor),
        None => objective,
    };
    match course_type {
        Some(course_type) => objective.for_course_type(course_type),
        None => objective,
    }
}

impl ObjectiveRegistry {
    pub const SESSIONS_BEFORE: &'static str = "minimize_sessions_before";
    pub const SESSIONS_AFTER: &'static str = "minimize_sessions_after";
    pub const MINUTES_AFTER: &'static str = "minimize_minutes_after";
    pub const MAXIMIZE_PREFERRED_ROOMS: &'static str = "maximize_preferred_rooms";
    pub const MINIMIZE_PREFERRED_ROOMS: &'static str = "minimize_preferred_rooms";
    pub const LOAD_BALANCE: &'static str = "maximize_instructor_load_balance";
    pub const LAB_ROOT_DAY_PAIRS: &'static str = "maximize_lab_root_day_pairs";
    pub const COUNT_MATCHING: &'static str = "count_matching";

    /// Parameter key, accepted by every objective, that overrides the run's pinning.
    pub const PINNING_PARAM: &'static str = "pinning";

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let builtins: [(&str, ObjectiveConstructor); 8] = [
            (Self::SESSIONS_BEFORE, |v| {
                let p: CutoffParams = params(v)?;
                let objective = Objective::minimize_sessions_before(p.cutoff);
                Ok(restrict(objective, p.instructor, p.course_type))
            }),
            (Self::SESSIONS_AFTER, |v| {
                let p: CutoffParams = params(v)?;
                let objective = Objective::minimize_sessions_after(p.cutoff);
                Ok(restrict(objective, p.instructor, p.course_type))
            }),
            (Self::MINUTES_AFTER, |v| {
                let p: CutoffParams = params(v)?;
                let objective = Objective::minimize_minutes_after(p.cutoff);
                Ok(restrict(objective, p.instructor, p.course_type))
            }),
            (Self::MAXIMIZE_PREFERRED_ROOMS, |v| {
                let p: RoomParams = params(v)?;
                let objective = Objective::maximize_preferred_rooms(p.rooms);
                Ok(restrict(objective, p.instructor, p.course_type))
            }),
            (Self::MINIMIZE_PREFERRED_ROOMS, |v| {
                let p: RoomParams = params(v)?;
                let objective = Objective::minimize_preferred_rooms(p.rooms);
                Ok(restrict(objective, p.instructor, p.course_type))
            }),
            (Self::LOAD_BALANCE, |v| {
                let p: LoadBalanceParams = params(v)?;
                let mut objective = Objective::maximize_instructor_load_balance();
                if let Some(instructors) = p.instructors {
                    objective.label =
                        format!("{} among {}", objective.label, instructors.iter().join(", "));
                    objective.filter.instructors = Some(instructors);
                }
                Ok(objective)
            }),
            (Self::LAB_ROOT_DAY_PAIRS, |v| {
                let p: RootPairParams = params(v)?;
                if p.course_types.is_empty() || p.preferred_days.is_empty() {
                    return Err("courseTypes and preferredDays must not be empty".to_string());
                }
                let objective =
                    Objective::maximize_lab_root_day_pairs(p.course_types, p.preferred_days);
                Ok(match p.roots {
                    Some(roots) => objective.for_roots(roots),
                    None => objective,
                })
            }),
            (Self::COUNT_MATCHING, |v| {
                let p: CountMatchingParams = params(v)?;
                Ok(Objective::count_matching(p.label, p.direction, p.filter))
            }),
        ];
        let mut registry = Self::empty();
        for (name, constructor) in builtins {
            registry
                .constructors
                .insert(name.to_string(), constructor);
        }
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: ObjectiveConstructor,
    ) -> Result<(), ObjectiveError> {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return Err(ObjectiveError::DuplicateName(name));
        }
        self.constructors.insert(name, constructor);
        Ok(())
    }

    /// Builds the objective registered under `name`. A `pinning` entry in `params` is
    /// taken out before the constructor sees them and becomes the objective's own pinning.
    pub fn construct(&self, name: &str, params: &Value) -> Result<Objective, ObjectiveError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ObjectiveError::UnknownName(name.to_string()))?;
        let invalid = |reason: String| ObjectiveError::InvalidParameters {
            name: name.to_string(),
            reason,
        };

        let mut params = params.clone();
        let pinning = match params.as_object_mut() {
            Some(map) => map.remove(Self::PINNING_PARAM),
            None => None,
        };
        let objective = constructor(&params).map_err(invalid)?;
        match pinning {
            Some(pinning) => {
                let pinning: Pinning =
                    serde_json::from_value(pinning).map_err(|e| invalid(e.to_string()))?;
                pinning.validate().map_err(|e| invalid(e.to_string()))?;
                Ok(objective.with_pinning(pinning))
            }
            None => Ok(objective),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
