//! Backend-independent MILP model: variables, linear expressions, constraints and the
//! single active objective slot.
//!
//! A `Model` only grows: variables and constraints are appended, never removed. The active
//! objective is the one piece of state that is replaced between lexicographic steps.

use crate::data::{CourseId, InstructorId, RoomId, SlotId, TimeSlot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Index of a variable inside its `Model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    pub(crate) fn from_index(index: usize) -> Self {
        VarId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarKind {
    Binary,
    Integer { min: f64, max: f64 },
    Continuous { min: f64, max: f64 },
}

impl VarKind {
    pub fn is_integral(self) -> bool {
        matches!(self, VarKind::Binary | VarKind::Integer { .. })
    }

    pub fn bounds(self) -> (f64, f64) {
        match self {
            VarKind::Binary => (0.0, 1.0),
            VarKind::Integer { min, max } | VarKind::Continuous { min, max } => (min, max),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    pub name: String,
    pub kind: VarKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Minimize,
    Maximize,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Minimize => "minimize",
            Direction::Maximize => "maximize",
        })
    }
}

/// `constant + sum(coefficient * variable)`. Terms are kept sorted by variable so that
/// structurally equal expressions compare equal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearExpr {
    terms: BTreeMap<VarId, f64>,
    constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        if coefficient == 0.0 {
            return;
        }
        let entry = self.terms.entry(var).or_insert(0.0);
        *entry += coefficient;
        if *entry == 0.0 {
            self.terms.remove(&var);
        }
    }

    pub fn with_term(mut self, var: VarId, coefficient: f64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    pub fn terms(&self) -> impl Iterator<Item = (VarId, f64)> + '_ {
        self.terms.iter().map(|(v, c)| (*v, *c))
    }

    pub fn constant_term(&self) -> f64 {
        self.constant
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn eval(&self, values: &Values) -> f64 {
        self.terms
            .iter()
            .map(|(v, c)| c * values.get(*v))
            .sum::<f64>()
            + self.constant
    }

    /// True when every feasible assignment gives an integer value.
    pub fn is_integral(&self, variables: &[VariableDef]) -> bool {
        self.constant.fract() == 0.0
            && self.terms.iter().all(|(v, c)| {
                c.fract() == 0.0
                    && variables
                        .get(v.index())
                        .is_some_and(|def| def.kind.is_integral())
            })
    }
}

impl FromIterator<VarId> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = VarId>>(iter: I) -> Self {
        let mut expr = LinearExpr::new();
        for var in iter {
            expr.add_term(var, 1.0);
        }
        expr
    }
}

impl FromIterator<(VarId, f64)> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = (VarId, f64)>>(iter: I) -> Self {
        let mut expr = LinearExpr::new();
        for (var, coefficient) in iter {
            expr.add_term(var, coefficient);
        }
        expr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    LessOrEqual,
    Equal,
    GreaterOrEqual,
}

/// Which family a constraint belongs to. Used for naming, logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKind {
    Coverage,
    CourseExclusivity,
    RoomExclusivity,
    InstructorExclusivity,
    LoadBound,
    ObjectiveLink,
    Pinning,
}

impl ConstraintKind {
    /// Exclusivity and load families: upper bounds on shared resources.
    pub fn is_resource_bound(self) -> bool {
        matches!(
            self,
            ConstraintKind::CourseExclusivity
                | ConstraintKind::RoomExclusivity
                | ConstraintKind::InstructorExclusivity
                | ConstraintKind::LoadBound
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub expr: LinearExpr,
    pub comparison: Comparison,
    pub rhs: f64,
}

impl Constraint {
    pub fn is_satisfied(&self, values: &Values, tolerance: f64) -> bool {
        let lhs = self.expr.eval(values);
        match self.comparison {
            Comparison::LessOrEqual => lhs <= self.rhs + tolerance,
            Comparison::Equal => (lhs - self.rhs).abs() <= tolerance,
            Comparison::GreaterOrEqual => lhs >= self.rhs - tolerance,
        }
    }
}

/// A variable's value per `VarId`, as returned by a solver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Values(Vec<f64>);

impl Values {
    pub fn new(values: Vec<f64>) -> Self {
        Values(values)
    }

    /// Unknown variables read as zero.
    pub fn get(&self, var: VarId) -> f64 {
        self.0.get(var.index()).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Identity of one scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecisionKey {
    pub course: CourseId,
    pub room: RoomId,
    pub time_slot: SlotId,
    pub instructor: InstructorId,
}

impl fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x[{},{},{},{}]",
            self.course, self.room, self.time_slot, self.instructor
        )
    }
}

/// Binary decision variable: 1 iff a session of `key.course` meets in `key.room` during
/// `key.time_slot`, taught by `key.instructor`.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub key: DecisionKey,
    pub var: VarId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveObjective {
    pub label: String,
    pub expr: LinearExpr,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    variables: Vec<VariableDef>,
    decisions: Vec<Decision>,
    constraints: Vec<Constraint>,
    active: Option<ActiveObjective>,
    time_slots: BTreeMap<SlotId, TimeSlot>,
    sessions: BTreeMap<CourseId, u32>,
    course_types: BTreeMap<CourseId, String>,
    room_turnover: u16,
}

impl Model {
    pub(crate) fn new(
        time_slots: BTreeMap<SlotId, TimeSlot>,
        sessions: BTreeMap<CourseId, u32>,
    ) -> Self {
        Model {
            variables: Vec::new(),
            decisions: Vec::new(),
            constraints: Vec::new(),
            active: None,
            time_slots,
            sessions,
            course_types: BTreeMap::new(),
            room_turnover: 0,
        }
    }

    pub(crate) fn with_course_types(mut self, course_types: BTreeMap<CourseId, String>) -> Self {
        self.course_types = course_types;
        self
    }

    pub fn add_variable(&mut self, name: impl Into<String>, kind: VarKind) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(VariableDef {
            name: name.into(),
            kind,
        });
        id
    }

    pub(crate) fn add_decision(&mut self, key: DecisionKey) -> VarId {
        let var = self.add_variable(key.to_string(), VarKind::Binary);
        self.decisions.push(Decision { key, var });
        var
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn set_active_objective(&mut self, objective: ActiveObjective) {
        self.active = Some(objective);
    }

    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn constraints_of(&self, kind: ConstraintKind) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(move |c| c.kind == kind)
    }

    pub fn active_objective(&self) -> Option<&ActiveObjective> {
        self.active.as_ref()
    }

    pub fn time_slot(&self, id: &str) -> Option<&TimeSlot> {
        self.time_slots.get(id)
    }

    pub fn time_slots(&self) -> &BTreeMap<SlotId, TimeSlot> {
        &self.time_slots
    }

    /// Required sessions per course.
    pub fn required_sessions(&self) -> &BTreeMap<CourseId, u32> {
        &self.sessions
    }

    pub(crate) fn with_room_turnover(mut self, minutes: u16) -> Self {
        self.room_turnover = minutes;
        self
    }

    /// Minutes a room stays blocked after each session.
    pub fn room_turnover(&self) -> u16 {
        self.room_turnover
    }

    pub fn course_type(&self, course: &str) -> Option<&str> {
        self.course_types.get(course).map(String::as_str)
    }

    /// Decisions together with their time slot.
    pub fn decision_slots(&self) -> impl Iterator<Item = (&Decision, &TimeSlot)> {
        self.decisions
            .iter()
            .filter_map(|d| self.time_slots.get(&d.key.time_slot).map(|slot| (d, slot)))
    }

    /// True if `values` satisfies every accumulated constraint and every integrality
    /// requirement within `tolerance`.
    pub fn is_feasible(&self, values: &Values, tolerance: f64) -> bool {
        is_assignment_feasible(&self.variables, &self.constraints, values, tolerance)
    }

    /// Names of the constraints broken by a greedy assignment: each course takes the first
    /// candidates, in decision order, that keep every exclusivity and load bound intact.
    /// On an infeasible model this names the courses that could not be placed.
    pub fn greedy_violations(&self, tolerance: f64) -> Vec<&str> {
        let mut values = Values(vec![0.0; self.variables.len()]);
        let mut placed: BTreeMap<&str, u32> = BTreeMap::new();
        for decision in &self.decisions {
            let course = decision.key.course.as_str();
            let required = self.sessions.get(course).copied().unwrap_or(0);
            let count = placed.entry(course).or_default();
            if *count >= required {
                continue;
            }
            values.0[decision.var.index()] = 1.0;
            let breaks_bound = self.constraints.iter().any(|c| {
                c.kind.is_resource_bound()
                    && c.expr.terms().any(|(v, _)| v == decision.var)
                    && !c.is_satisfied(&values, tolerance)
            });
            if breaks_bound {
                values.0[decision.var.index()] = 0.0;
            } else {
                *count += 1;
            }
        }
        self.constraints
            .iter()
            .filter(|c| !matches!(c.kind, ConstraintKind::ObjectiveLink | ConstraintKind::Pinning))
            .filter(|c| !c.is_satisfied(&values, tolerance))
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Checks variable bounds, integrality and every constraint.
pub fn is_assignment_feasible(
    variables: &[VariableDef],
    constraints: &[Constraint],
    values: &Values,
    tolerance: f64,
) -> bool {
    if values.len() < variables.len() {
        return false;
    }
    let within_domain = variables.iter().enumerate().all(|(i, def)| {
        let value = values.get(VarId(i));
        let (min, max) = def.kind.bounds();
        value >= min - tolerance
            && value <= max + tolerance
            && (!def.kind.is_integral() || (value - value.round()).abs() <= tolerance)
    });
    within_domain && constraints.iter().all(|c| c.is_satisfied(values, tolerance))
}
