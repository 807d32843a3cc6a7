use crate::config::ModelOptions;
use crate::data::{ClockTime, Course, Day, Instructor, Room, TimeSlot};
use crate::error::ScheduleError;
use crate::model::{Comparison, Constraint, ConstraintKind, DecisionKey, LinearExpr, Model, VarId};
use crate::registry::EntityRegistry;
use itertools::Itertools;
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Builds a fresh model from the registry: one binary variable per feasible
/// (course, room, time slot, instructor) combination plus the hard constraints.
///
/// Variables and constraints are generated by walking the entities in ascending id order,
/// so identical input always yields an identical model.
pub fn build(registry: &EntityRegistry, options: &ModelOptions) -> Result<Model, ScheduleError> {
    registry.check_references()?;
    for restriction in &options.avoid_rooms {
        for room in restriction.rooms.iter().filter(|r| registry.room(r).is_none()) {
            warn!("Rooms avoided for `{}` include unknown room `{room}`", restriction.course_type);
        }
    }

    let sessions: BTreeMap<_, _> = registry
        .courses()
        .map(|c| (c.id.clone(), c.sessions))
        .collect();
    let course_types: BTreeMap<_, _> = registry
        .courses()
        .filter_map(|c| Some((c.id.clone(), c.course_type.clone()?)))
        .collect();
    let mut model = Model::new(registry.time_slot_map().clone(), sessions)
        .with_course_types(course_types)
        .with_room_turnover(options.room_turnover_minutes);

    info!(
        "Setting up model with {} courses, {} rooms, {} time slots and {} instructors...",
        registry.courses().count(),
        registry.rooms().count(),
        registry.time_slots().count(),
        registry.instructors().count()
    );

    // x_crti = 1 if a session of course c meets in room r during slot t with instructor i
    // pre-filter; capacity, features, availability and eligibility never become variables
    let mut theoretical = 0usize;
    for course in registry.courses() {
        let mut candidate_slots = BTreeSet::new();
        for room in registry.rooms() {
            for slot in registry.time_slots() {
                for instructor_id in &course.instructors {
                    theoretical += 1;
                    let Some(instructor) = registry.instructor(instructor_id) else {
                        continue;
                    };
                    if is_assignment_possible(course, room, slot, instructor, options) {
                        candidate_slots.insert(slot.id.clone());
                        model.add_decision(DecisionKey {
                            course: course.id.clone(),
                            room: room.id.clone(),
                            time_slot: slot.id.clone(),
                            instructor: instructor.id.clone(),
                        });
                    }
                }
            }
        }
        if (candidate_slots.len() as u64) < u64::from(course.sessions) {
            return Err(ScheduleError::InfeasibleModel {
                reason: format!(
                    "course `{}` needs {} session(s) but only {} time slot(s) can host it",
                    course.id,
                    course.sessions,
                    candidate_slots.len()
                ),
            });
        }
    }
    trace!(
        "Generated {} assignment variables out of a theoretical maximum of {}.",
        model.decisions().len(),
        theoretical
    );

    let points = time_points(registry.time_slots());

    add_coverage_constraints(&mut model, registry);
    add_course_exclusivity_constraints(&mut model, registry, &points);
    add_room_exclusivity_constraints(&mut model, &points, options.room_turnover_minutes);
    add_instructor_exclusivity_constraints(&mut model, &points);
    add_load_constraints(&mut model, registry);

    info!(
        "Model has {} variables and {} constraints",
        model.variables().len(),
        model.constraints().len()
    );
    Ok(model)
}

// implicitly checks the hard constraints on capacity, room features and availability
fn is_assignment_possible(
    course: &Course,
    room: &Room,
    slot: &TimeSlot,
    instructor: &Instructor,
    options: &ModelOptions,
) -> bool {
    // room has capacity and equipment
    if room.capacity < course.enrollment {
        return false;
    }
    if !course.required_features.is_subset(&room.features) {
        return false;
    }

    // course type restrictions on slots and rooms
    let course_type = course.course_type.as_deref();
    if !slot.hosts(course_type) || options.is_room_avoided(course_type, &room.id) {
        return false;
    }

    // session fits in the slot
    if let Some(duration) = course.duration_minutes {
        if slot.duration_minutes() < duration {
            return false;
        }
    }

    // forced placements
    if course.forced_room.as_ref().is_some_and(|r| *r != room.id) {
        return false;
    }
    if course.forced_time_slot.as_ref().is_some_and(|s| *s != slot.id) {
        return false;
    }

    // instructor has to be eligible and available
    course.instructors.contains(&instructor.id) && instructor.is_available(&slot.id)
}

/// Every distinct (day, slot start). Two slots overlap iff one of them covers the start of
/// the other, so "at most one per point" is exactly "no overlapping pair". This still holds
/// when every slot is stretched by the same turnover.
fn time_points<'a>(slots: impl Iterator<Item = &'a TimeSlot>) -> Vec<(Day, ClockTime)> {
    slots
        .flat_map(|slot| slot.days.iter().map(move |day| (day, slot.start)))
        .sorted()
        .dedup()
        .collect()
}

fn sum_constraint(
    name: String,
    kind: ConstraintKind,
    vars: impl IntoIterator<Item = VarId>,
    comparison: Comparison,
    rhs: f64,
) -> Constraint {
    Constraint {
        name,
        kind,
        expr: vars.into_iter().collect::<LinearExpr>(),
        comparison,
        rhs,
    }
}

fn add_coverage_constraints(model: &mut Model, registry: &EntityRegistry) {
    let by_course = model
        .decisions()
        .iter()
        .map(|d| (d.key.course.clone(), d.var))
        .into_group_map();
    let mut count = 0;
    for course in registry.courses() {
        let vars = by_course.get(&course.id).cloned().unwrap_or_default();
        model.add_constraint(sum_constraint(
            format!("cover_{}", course.id),
            ConstraintKind::Coverage,
            vars,
            Comparison::Equal,
            f64::from(course.sessions),
        ));
        count += 1;
    }
    debug!("Added {count} coverage constraints");
}

/// Emits `sum <= 1` for every (group, time point) touched by at least two variables. Each
/// slot occupies its group `turnover` minutes past its end.
fn add_exclusivity_constraints<F>(
    model: &mut Model,
    points: &[(Day, ClockTime)],
    turnover: u16,
    kind: ConstraintKind,
    prefix: &str,
    group_of: F,
) where
    F: Fn(&DecisionKey) -> &str,
{
    let mut groups: BTreeMap<String, Vec<(VarId, TimeSlot)>> = BTreeMap::new();
    for (decision, slot) in model.decision_slots() {
        groups
            .entry(group_of(&decision.key).to_string())
            .or_default()
            .push((decision.var, slot.clone()));
    }

    let mut emitted = Vec::new();
    for (group, vars) in &groups {
        for (day, instant) in points {
            let busy: Vec<VarId> = vars
                .iter()
                .filter(|(_, slot)| slot.occupies(*day, *instant, turnover))
                .map(|(var, _)| *var)
                .collect();
            if busy.len() < 2 {
                continue;
            }
            emitted.push(sum_constraint(
                format!("{prefix}_{group}_{}_{instant}", day.code()),
                kind,
                busy,
                Comparison::LessOrEqual,
                1.0,
            ));
        }
    }
    debug!("Added {} {:?} constraints", emitted.len(), kind);
    for constraint in emitted {
        model.add_constraint(constraint);
    }
}

// a course cannot meet twice at the same time
fn add_course_exclusivity_constraints(
    model: &mut Model,
    registry: &EntityRegistry,
    points: &[(Day, ClockTime)],
) {
    if registry.courses().all(|c| c.sessions <= 1) {
        return;
    }
    add_exclusivity_constraints(
        model,
        points,
        0,
        ConstraintKind::CourseExclusivity,
        "no_course_overlap",
        |key| &key.course,
    );
}

// no room double-booking, with a turnover gap between sessions
fn add_room_exclusivity_constraints(model: &mut Model, points: &[(Day, ClockTime)], turnover: u16) {
    add_exclusivity_constraints(
        model,
        points,
        turnover,
        ConstraintKind::RoomExclusivity,
        "no_room_overlap",
        |key| &key.room,
    );
}

// no instructor overlap
fn add_instructor_exclusivity_constraints(model: &mut Model, points: &[(Day, ClockTime)]) {
    add_exclusivity_constraints(
        model,
        points,
        0,
        ConstraintKind::InstructorExclusivity,
        "no_instructor_overlap",
        |key| &key.instructor,
    );
}

fn add_load_constraints(model: &mut Model, registry: &EntityRegistry) {
    let by_instructor = model
        .decisions()
        .iter()
        .map(|d| (d.key.instructor.clone(), d.var))
        .into_group_map();
    let mut count = 0;
    for instructor in registry.instructors() {
        let (Some(max_load), Some(vars)) = (instructor.max_load, by_instructor.get(&instructor.id))
        else {
            continue;
        };
        model.add_constraint(sum_constraint(
            format!("max_load_{}", instructor.id),
            ConstraintKind::LoadBound,
            vars.iter().copied(),
            Comparison::LessOrEqual,
            f64::from(max_load),
        ));
        count += 1;
    }
    debug!("Added {count} load constraints");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry
            .load_room_records(vec![
                json!({"id": "R1", "capacity": 30}),
                json!({"id": "R2", "capacity": 100, "features": ["projector"]}),
            ])
            .unwrap();
        registry
            .load_time_slot_records(vec![
                json!({"id": "MWF-0800", "days": "MWF", "start": "8:00", "end": "8:50"}),
                json!({"id": "MWF-0900", "days": "MWF", "start": "9:00", "end": "9:50"}),
                json!({"id": "TTH-0800", "days": "TTH", "start": "8:00", "end": "9:15"}),
            ])
            .unwrap();
        registry
            .load_instructor_records(vec![
                json!({"id": "jones", "availability": ["MWF-0900"]}),
                json!({"id": "smith", "maxLoad": 1}),
            ])
            .unwrap();
        registry
            .load_course_records(vec![
                json!({"id": "C1", "enrollment": 80, "instructors": ["smith"]}),
                json!({"id": "C2", "enrollment": 20, "instructors": ["jones", "smith"]}),
                json!({"id": "C3", "enrollment": 10, "instructors": ["jones", "smith"],
                       "requiredFeatures": ["projector"], "durationMinutes": 60}),
            ])
            .unwrap();
        registry
    }

    #[test]
    fn infeasible_combinations_are_never_variables() {
        let model = build(&registry(), &ModelOptions::default()).unwrap();
        for decision in model.decisions() {
            let key = &decision.key;
            // capacity
            assert!(!(key.course == "C1" && key.room == "R1"));
            // availability
            if key.instructor == "jones" {
                assert_eq!(key.time_slot, "MWF-0900");
            }
            // features
            if key.course == "C3" {
                assert_eq!(key.room, "R2");
            }
        }
        // C1: R2 x 3 slots x smith
        assert_eq!(model.decisions().iter().filter(|d| d.key.course == "C1").count(), 3);
        // C3 needs 60 minutes: only TTH-0800 is long enough, and jones is unavailable there
        let c3: Vec<_> = model.decisions().iter().filter(|d| d.key.course == "C3").collect();
        assert_eq!(c3.len(), 1);
        assert_eq!(c3[0].key.time_slot, "TTH-0800");
        assert_eq!(c3[0].key.instructor, "smith");
    }

    #[test]
    fn course_without_candidates_is_infeasible() {
        let mut registry = registry();
        registry
            .load_course_records(vec![json!({"id": "C3", "enrollment": 10,
                "instructors": ["jones"], "durationMinutes": 60})])
            .unwrap();
        let err = build(&registry, &ModelOptions::default()).unwrap_err();
        assert!(matches!(err, ScheduleError::InfeasibleModel { reason } if reason.contains("C3")));
    }

    #[test]
    fn emits_each_constraint_family() {
        let mut registry = registry();
        registry
            .load_course_records(vec![
                json!({"id": "C1", "enrollment": 80, "instructors": ["smith"]}),
                json!({"id": "C2", "enrollment": 20, "instructors": ["jones", "smith"]}),
            ])
            .unwrap();
        let model = build(&registry, &ModelOptions::default()).unwrap();

        let coverage: Vec<_> = model.constraints_of(ConstraintKind::Coverage).collect();
        assert_eq!(coverage.len(), 2);
        assert!(coverage.iter().all(|c| c.comparison == Comparison::Equal && c.rhs == 1.0));

        let load: Vec<_> = model.constraints_of(ConstraintKind::LoadBound).collect();
        assert_eq!(load.len(), 1);
        assert_eq!(load[0].name, "max_load_smith");

        assert!(model.constraints_of(ConstraintKind::RoomExclusivity).count() > 0);
        assert!(model.constraints_of(ConstraintKind::InstructorExclusivity).count() > 0);
        // single-session courses need no course exclusivity
        assert_eq!(model.constraints_of(ConstraintKind::CourseExclusivity).count(), 0);
    }

    #[test]
    fn partially_overlapping_slots_share_a_constraint() {
        let mut registry = EntityRegistry::new();
        registry
            .load_room_records(vec![json!({"id": "R1", "capacity": 50})])
            .unwrap();
        registry
            .load_time_slot_records(vec![
                json!({"id": "T-0830", "days": "T", "start": "08:30", "end": "10:20"}),
                json!({"id": "TH-0830", "days": "TH", "start": "08:30", "end": "10:20"}),
                json!({"id": "TTH-0830", "days": "TTH", "start": "08:30", "end": "09:45"}),
            ])
            .unwrap();
        registry
            .load_instructor_records(vec![json!({"id": "a"}), json!({"id": "b"})])
            .unwrap();
        registry
            .load_course_records(vec![
                json!({"id": "L1", "enrollment": 10, "instructors": ["a"]}),
                json!({"id": "L2", "enrollment": 10, "instructors": ["b"]}),
            ])
            .unwrap();
        let model = build(&registry, &ModelOptions::default()).unwrap();
        let var = |course: &str, slot: &str| {
            model
                .decisions()
                .iter()
                .find(|d| d.key.course == course && d.key.time_slot == slot)
                .map(|d| d.var)
                .unwrap()
        };
        let together = |a: VarId, b: VarId| {
            model.constraints_of(ConstraintKind::RoomExclusivity).any(|c| {
                let vars: Vec<VarId> = c.expr.terms().map(|(v, _)| v).collect();
                vars.contains(&a) && vars.contains(&b)
            })
        };
        assert!(together(var("L1", "T-0830"), var("L2", "TTH-0830")));
        assert!(together(var("L1", "TH-0830"), var("L2", "TTH-0830")));
        assert!(!together(var("L1", "T-0830"), var("L2", "TH-0830")));
    }

    #[test]
    fn multi_session_courses_get_course_exclusivity() {
        let mut registry = EntityRegistry::new();
        registry
            .load_room_records(vec![
                json!({"id": "R1", "capacity": 50}),
                json!({"id": "R2", "capacity": 50}),
            ])
            .unwrap();
        registry
            .load_time_slot_records(vec![
                json!({"id": "M-0800", "days": "M", "start": "08:00", "end": "09:00"}),
                json!({"id": "W-0800", "days": "W", "start": "08:00", "end": "09:00"}),
            ])
            .unwrap();
        registry
            .load_instructor_records(vec![json!({"id": "a"}), json!({"id": "b"})])
            .unwrap();
        registry
            .load_course_records(vec![
                json!({"id": "C1", "enrollment": 10, "instructors": ["a", "b"], "sessions": 2}),
            ])
            .unwrap();
        let model = build(&registry, &ModelOptions::default()).unwrap();
        let coverage = model.constraints_of(ConstraintKind::Coverage).next().unwrap();
        assert_eq!(coverage.rhs, 2.0);
        // one per meeting day, each over 2 rooms x 2 instructors
        let exclusivity: Vec<_> = model
            .constraints_of(ConstraintKind::CourseExclusivity)
            .collect();
        assert_eq!(exclusivity.len(), 2);
        assert!(exclusivity.iter().all(|c| c.expr.len() == 4));
    }

    #[test]
    fn repeated_builds_are_identical() {
        let mut registry = registry();
        registry
            .load_course_records(vec![
                json!({"id": "C2", "enrollment": 20, "instructors": ["smith", "jones"]}),
                json!({"id": "C1", "enrollment": 80, "instructors": ["smith"]}),
            ])
            .unwrap();
        let first = build(&registry, &ModelOptions::default()).unwrap();
        let second = build(&registry, &ModelOptions::default()).unwrap();
        assert_eq!(first.constraints(), second.constraints());
        assert_eq!(first.decisions(), second.decisions());
    }

    #[test]
    fn course_types_restrict_slots_and_rooms() {
        let mut registry = EntityRegistry::new();
        registry
            .load_room_records(vec![
                json!({"id": "AERO 120", "capacity": 60}),
                json!({"id": "AERO 141", "capacity": 60}),
            ])
            .unwrap();
        registry
            .load_time_slot_records(vec![
                json!({"id": "MWF-0900", "days": "MWF", "start": "9:00", "end": "9:50"}),
                json!({"id": "T-1300", "days": "T", "start": "13:00", "end": "15:50",
                       "courseType": "Lab"}),
            ])
            .unwrap();
        registry
            .load_instructor_records(vec![json!({"id": "smith"})])
            .unwrap();
        registry
            .load_course_records(vec![
                json!({"id": "ASEN 2001", "enrollment": 40, "instructors": ["smith"],
                       "courseType": "Lecture"}),
                json!({"id": "ASEN 2001-011", "enrollment": 20, "instructors": ["smith"],
                       "courseType": "Lab"}),
            ])
            .unwrap();
        let options = ModelOptions::default().avoid_rooms_for_course_type(["AERO 141"], "Lecture");
        let model = build(&registry, &options).unwrap();

        let lecture: Vec<_> = model
            .decisions()
            .iter()
            .filter(|d| d.key.course == "ASEN 2001")
            .map(|d| (d.key.room.as_str(), d.key.time_slot.as_str()))
            .collect();
        assert_eq!(lecture, vec![("AERO 120", "MWF-0900")]);
        // the lab may use either room and either slot
        let lab = model.decisions().iter().filter(|d| d.key.course == "ASEN 2001-011");
        assert_eq!(lab.count(), 4);
        assert_eq!(model.course_type("ASEN 2001-011"), Some("Lab"));
    }

    #[test]
    fn rooms_need_a_turnover_gap() {
        let mut registry = EntityRegistry::new();
        registry
            .load_room_records(vec![json!({"id": "R1", "capacity": 50})])
            .unwrap();
        registry
            .load_time_slot_records(vec![
                json!({"id": "MWF-0900", "days": "MWF", "start": "9:00", "end": "9:50"}),
                json!({"id": "MWF-1000", "days": "MWF", "start": "10:00", "end": "10:50"}),
            ])
            .unwrap();
        registry
            .load_instructor_records(vec![json!({"id": "a"}), json!({"id": "b"})])
            .unwrap();
        registry
            .load_course_records(vec![
                json!({"id": "C1", "enrollment": 10, "instructors": ["a"]}),
                json!({"id": "C2", "enrollment": 10, "instructors": ["b"]}),
            ])
            .unwrap();

        // ten minutes between sessions is less than the default turnover
        let model = build(&registry, &ModelOptions::default()).unwrap();
        let room: Vec<_> = model.constraints_of(ConstraintKind::RoomExclusivity).collect();
        assert!(room.iter().any(|c| c.name == "no_room_overlap_R1_M_10:00" && c.expr.len() == 4));
        // instructors need no gap
        assert_eq!(model.constraints_of(ConstraintKind::InstructorExclusivity).count(), 0);

        let model = build(&registry, &ModelOptions::default().with_room_turnover(0)).unwrap();
        assert!(
            model
                .constraints_of(ConstraintKind::RoomExclusivity)
                .all(|c| c.expr.len() == 2)
        );
    }
}
