use crate::data::{Schedule, ScheduledSession, TimeSlot};
use crate::error::ScheduleError;
use crate::model::{DecisionKey, Model, Values};
use itertools::Itertools;
use log::debug;

/// A binary decision counts as selected above this value.
const SELECTED: f64 = 0.5;

/// Turns a solver assignment into a schedule, re-checking coverage and every resource
/// conflict instead of trusting the backend.
pub fn extract(model: &Model, values: &Values) -> Result<Schedule, ScheduleError> {
    let selected: Vec<(&DecisionKey, &TimeSlot)> = model
        .decision_slots()
        .filter(|(decision, _)| values.get(decision.var) > SELECTED)
        .map(|(decision, slot)| (&decision.key, slot))
        .collect();
    debug!("{} decision(s) selected", selected.len());

    let by_course = selected
        .iter()
        .copied()
        .into_group_map_by(|&(key, _)| key.course.as_str());
    for (course, &required) in model.required_sessions() {
        let found = by_course.get(course.as_str()).map_or(0, Vec::len);
        if found != required as usize {
            return Err(ScheduleError::Extraction(format!(
                "course {course} has {found} session(s) scheduled, expected {required}"
            )));
        }
    }

    let turnover = model.room_turnover();
    for (i, (a, slot_a)) in selected.iter().enumerate() {
        for (b, slot_b) in &selected[i + 1..] {
            let shared = if a.room == b.room && slot_a.overlaps_with_turnover(slot_b, turnover) {
                Some(format!("room {}", a.room))
            } else if !slot_a.overlaps(slot_b) {
                None
            } else if a.instructor == b.instructor {
                Some(format!("instructor {}", a.instructor))
            } else if a.course == b.course {
                Some(format!("course {}", a.course))
            } else {
                None
            };
            if let Some(resource) = shared {
                return Err(ScheduleError::Extraction(format!(
                    "{resource} is double-booked by {a} and {b}"
                )));
            }
        }
    }

    let sessions = by_course
        .into_values()
        .flat_map(|decisions| {
            decisions
                .into_iter()
                .sorted_by_key(|(key, slot)| {
                    (slot.days.iter().next(), slot.start, key.time_slot.clone())
                })
                .zip(1..)
                .map(|((key, slot), session)| ScheduledSession {
                    course_id: key.course.clone(),
                    session,
                    room_id: key.room.clone(),
                    time_slot_id: key.time_slot.clone(),
                    instructor_id: key.instructor.clone(),
                    days: slot.days.clone(),
                    start: slot.start,
                    end: slot.end,
                })
        })
        .collect();
    Ok(Schedule::new(sessions))
}
