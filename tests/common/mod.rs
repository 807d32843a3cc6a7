#![allow(dead_code)]

use serde_json::Value;
use std::collections::BTreeMap;
use timetable_solver::config::ModelOptions;
use timetable_solver::data::{ClockTime, TimeSlot};
use timetable_solver::model::Direction;
use timetable_solver::registry::EntityRegistry;
use timetable_solver::{HighsBackend, OptimizerConfig, Pinning, Schedule, Scheduler};

#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub rooms: Vec<Value>,
    pub time_slots: Vec<Value>,
    pub instructors: Vec<Value>,
    pub courses: Vec<Value>,
}

impl Instance {
    pub fn registry(&self) -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        self.load(&mut registry);
        registry
    }

    fn load(&self, registry: &mut EntityRegistry) {
        registry.load_room_records(self.rooms.clone()).unwrap();
        registry.load_time_slot_records(self.time_slots.clone()).unwrap();
        registry.load_instructor_records(self.instructors.clone()).unwrap();
        registry.load_course_records(self.courses.clone()).unwrap();
    }

    pub fn scheduler(&self, pinning: Pinning) -> Scheduler<HighsBackend> {
        let mut scheduler =
            Scheduler::new(HighsBackend::default(), OptimizerConfig::new(pinning));
        self.load(scheduler.registry_mut());
        scheduler
    }
}

/// One single-session course placement.
#[derive(Debug, Clone)]
pub struct Choice {
    pub course: String,
    pub room: String,
    pub slot: TimeSlot,
    pub instructor: String,
}

/// Minutes a room stays blocked after a session, as the default model options apply.
pub const TURNOVER: u16 = ModelOptions::DEFAULT_ROOM_TURNOVER_MINUTES;

fn clashes(a: &Choice, b: &Choice) -> bool {
    (a.room == b.room && a.slot.overlaps_with_turnover(&b.slot, TURNOVER))
        || (a.instructor == b.instructor && a.slot.overlaps(&b.slot))
}

/// Every conflict-free placement of single-session courses, found by exhaustive search.
///
/// Honours capacity, features, course types, session length, forced rooms and slots,
/// instructor availability and instructor load caps.
pub fn enumerate(registry: &EntityRegistry) -> Vec<Vec<Choice>> {
    let candidates: Vec<Vec<Choice>> = registry
        .courses()
        .map(|course| {
            assert_eq!(course.sessions, 1, "{} must be single-session", course.id);
            let course_type = course.course_type.as_deref();
            let mut options = Vec::new();
            for room in registry.rooms() {
                if room.capacity < course.enrollment
                    || !course.required_features.is_subset(&room.features)
                    || course.forced_room.as_ref().is_some_and(|r| *r != room.id)
                {
                    continue;
                }
                for slot in registry.time_slots() {
                    if !slot.hosts(course_type)
                        || course.duration_minutes.is_some_and(|d| slot.duration_minutes() < d)
                        || course.forced_time_slot.as_ref().is_some_and(|s| *s != slot.id)
                    {
                        continue;
                    }
                    for instructor in &course.instructors {
                        let available = registry
                            .instructor(instructor)
                            .is_some_and(|i| i.is_available(&slot.id));
                        if available {
                            options.push(Choice {
                                course: course.id.clone(),
                                room: room.id.clone(),
                                slot: slot.clone(),
                                instructor: instructor.clone(),
                            });
                        }
                    }
                }
            }
            options
        })
        .collect();
    let caps: BTreeMap<String, u32> = registry
        .instructors()
        .filter_map(|i| i.max_load.map(|cap| (i.id.clone(), cap)))
        .collect();

    let mut found = Vec::new();
    extend(&candidates, &caps, &mut Vec::new(), &mut found);
    found
}

fn extend(
    candidates: &[Vec<Choice>],
    caps: &BTreeMap<String, u32>,
    partial: &mut Vec<Choice>,
    found: &mut Vec<Vec<Choice>>,
) {
    let Some((options, rest)) = candidates.split_first() else {
        found.push(partial.clone());
        return;
    };
    for option in options {
        if partial.iter().any(|placed| clashes(placed, option)) {
            continue;
        }
        if let Some(&cap) = caps.get(&option.instructor) {
            let load = partial.iter().filter(|c| c.instructor == option.instructor).count();
            if load as u32 >= cap {
                continue;
            }
        }
        partial.push(option.clone());
        extend(rest, caps, partial, found);
        partial.pop();
    }
}

pub type Measure<'a> = (Direction, Box<dyn Fn(&[Choice]) -> f64 + 'a>);

/// Optimal value of each measure in lexicographic order.
pub fn lexicographic_optimum(mut feasible: Vec<Vec<Choice>>, measures: &[Measure<'_>]) -> Vec<f64> {
    assert!(!feasible.is_empty(), "instance has no feasible placement");
    let mut optima = Vec::new();
    for (direction, measure) in measures {
        let values = feasible.iter().map(|placement| measure(placement));
        let best = match direction {
            Direction::Minimize => values.fold(f64::INFINITY, f64::min),
            Direction::Maximize => values.fold(f64::NEG_INFINITY, f64::max),
        };
        feasible.retain(|placement| (measure(placement) - best).abs() < 1e-9);
        optima.push(best);
    }
    optima
}

pub fn starting_before(cutoff: ClockTime) -> Measure<'static> {
    (
        Direction::Minimize,
        Box::new(move |p: &[Choice]| p.iter().filter(|c| c.slot.start < cutoff).count() as f64),
    )
}

pub fn starting_after(cutoff: ClockTime) -> Measure<'static> {
    (
        Direction::Minimize,
        Box::new(move |p: &[Choice]| p.iter().filter(|c| c.slot.start > cutoff).count() as f64),
    )
}

pub fn in_rooms(rooms: &'static [&'static str]) -> Measure<'static> {
    (
        Direction::Maximize,
        Box::new(move |p: &[Choice]| {
            p.iter().filter(|c| rooms.contains(&c.room.as_str())).count() as f64
        }),
    )
}

pub fn taught_by(instructor: &'static str) -> Measure<'static> {
    (
        Direction::Maximize,
        Box::new(move |p: &[Choice]| p.iter().filter(|c| c.instructor == instructor).count() as f64),
    )
}

/// Minimum session count over the given instructors.
pub fn min_load(instructors: &'static [&'static str]) -> Measure<'static> {
    (
        Direction::Maximize,
        Box::new(move |p: &[Choice]| {
            instructors
                .iter()
                .map(|id| p.iter().filter(|c| c.instructor == *id).count())
                .min()
                .unwrap_or(0) as f64
        }),
    )
}

/// Asserts that no room or instructor is double-booked, rooms get their turnover gap and every
/// course meets as often as required.
pub fn assert_valid(schedule: &Schedule, registry: &EntityRegistry) {
    for course in registry.courses() {
        assert_eq!(
            schedule.sessions_for_course(&course.id).count(),
            course.sessions as usize,
            "sessions of {}",
            course.id
        );
    }
    let sessions = schedule.sessions();
    for (i, a) in sessions.iter().enumerate() {
        let slot_a = registry.time_slot(&a.time_slot_id).unwrap();
        let room = registry.room(&a.room_id).unwrap();
        let course = registry.course(&a.course_id).unwrap();
        assert!(room.capacity >= course.enrollment, "{a} is over capacity");
        assert!(course.instructors.contains(&a.instructor_id), "{a} has the wrong instructor");
        let instructor = registry.instructor(&a.instructor_id).unwrap();
        assert!(instructor.is_available(&a.time_slot_id), "{a} is outside availability");
        for b in &sessions[i + 1..] {
            let slot_b = registry.time_slot(&b.time_slot_id).unwrap();
            if slot_a.overlaps_with_turnover(slot_b, TURNOVER) {
                assert_ne!(a.room_id, b.room_id, "{a} and {b} share a room");
            }
            if slot_a.overlaps(slot_b) {
                assert_ne!(a.instructor_id, b.instructor_id, "{a} and {b} share an instructor");
                assert_ne!(a.course_id, b.course_id, "{a} and {b} are the same course");
            }
        }
    }
}

pub fn time(text: &str) -> ClockTime {
    text.parse().unwrap()
}
