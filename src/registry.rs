//! Validated, read-only collections of rooms, courses, time slots and instructors.
//!
//! Records arrive as JSON arrays (one object per entity). Each record is checked for its
//! required fields before it is deserialized, so a missing field is reported by name
//! rather than as a generic parse failure.

use crate::data::{Course, CourseId, Instructor, InstructorId, Room, RoomId, SlotId, TimeSlot};
use crate::error::{EntityKind, ValidationError};
use log::info;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Read;

/// Common shape of the four entity record types.
trait Entity: DeserializeOwned {
    const KIND: EntityKind;
    const REQUIRED: &'static [&'static str];

    fn id(&self) -> &str;

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> ValidationError {
        ValidationError::InvalidField {
            entity: Self::KIND,
            id: self.id().to_string(),
            field,
            reason: reason.into(),
        }
    }
}

impl Entity for Room {
    const KIND: EntityKind = EntityKind::Room;
    const REQUIRED: &'static [&'static str] = &["id", "capacity"];

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Course {
    const KIND: EntityKind = EntityKind::Course;
    const REQUIRED: &'static [&'static str] = &["id", "enrollment", "instructors"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.sessions == 0 {
            return Err(self.invalid("sessions", "a course needs at least one session"));
        }
        if self.instructors.is_empty() {
            return Err(self.invalid("instructors", "no eligible instructor listed"));
        }
        if self.duration_minutes == Some(0) {
            return Err(self.invalid("durationMinutes", "must be positive"));
        }
        Ok(())
    }
}

impl Entity for TimeSlot {
    const KIND: EntityKind = EntityKind::TimeSlot;
    const REQUIRED: &'static [&'static str] = &["id", "days", "start", "end"];

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.end <= self.start {
            return Err(self.invalid(
                "end",
                format!("{} is not after start {}", self.end, self.start),
            ));
        }
        Ok(())
    }
}

impl Entity for Instructor {
    const KIND: EntityKind = EntityKind::Instructor;
    const REQUIRED: &'static [&'static str] = &["id"];

    fn id(&self) -> &str {
        &self.id
    }
}

fn parse_records<T: Entity>(records: Vec<Value>) -> Result<BTreeMap<String, T>, ValidationError> {
    let mut parsed = BTreeMap::new();
    for (row, record) in records.into_iter().enumerate() {
        if let Some(fields) = record.as_object() {
            let missing: Vec<&'static str> = T::REQUIRED
                .iter()
                .copied()
                .filter(|name| fields.get(*name).is_none_or(Value::is_null))
                .collect();
            if !missing.is_empty() {
                return Err(ValidationError::MissingFields {
                    entity: T::KIND,
                    row,
                    fields: missing,
                });
            }
        }
        let entity: T = serde_json::from_value(record).map_err(|source| {
            ValidationError::Malformed {
                entity: T::KIND,
                source,
            }
        })?;
        if entity.id().trim().is_empty() {
            return Err(ValidationError::MissingFields {
                entity: T::KIND,
                row,
                fields: vec!["id"],
            });
        }
        entity.validate()?;
        let id = entity.id().to_string();
        if parsed.insert(id.clone(), entity).is_some() {
            return Err(ValidationError::DuplicateId {
                entity: T::KIND,
                id,
            });
        }
    }
    Ok(parsed)
}

fn read_records<R: Read>(reader: R, entity: EntityKind) -> Result<Vec<Value>, ValidationError> {
    serde_json::from_reader(reader).map_err(|source| {
        if source.is_io() {
            ValidationError::Io {
                entity,
                source: source.into(),
            }
        } else {
            ValidationError::Malformed { entity, source }
        }
    })
}

/// Holds the entities of one scheduling run. Iteration is always in ascending id order.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    rooms: BTreeMap<RoomId, Room>,
    courses: BTreeMap<CourseId, Course>,
    time_slots: BTreeMap<SlotId, TimeSlot>,
    instructors: BTreeMap<InstructorId, Instructor>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the room collection with the JSON array read from `reader`.
    pub fn load_rooms<R: Read>(&mut self, reader: R) -> Result<usize, ValidationError> {
        self.load_room_records(read_records(reader, EntityKind::Room)?)
    }

    pub fn load_courses<R: Read>(&mut self, reader: R) -> Result<usize, ValidationError> {
        self.load_course_records(read_records(reader, EntityKind::Course)?)
    }

    pub fn load_time_slots<R: Read>(&mut self, reader: R) -> Result<usize, ValidationError> {
        self.load_time_slot_records(read_records(reader, EntityKind::TimeSlot)?)
    }

    pub fn load_instructors<R: Read>(&mut self, reader: R) -> Result<usize, ValidationError> {
        self.load_instructor_records(read_records(reader, EntityKind::Instructor)?)
    }

    pub fn load_room_records(&mut self, records: Vec<Value>) -> Result<usize, ValidationError> {
        self.rooms = parse_records(records)?;
        info!("Loaded {} rooms", self.rooms.len());
        Ok(self.rooms.len())
    }

    pub fn load_course_records(&mut self, records: Vec<Value>) -> Result<usize, ValidationError> {
        self.courses = parse_records(records)?;
        info!("Loaded {} courses", self.courses.len());
        Ok(self.courses.len())
    }

    pub fn load_time_slot_records(
        &mut self,
        records: Vec<Value>,
    ) -> Result<usize, ValidationError> {
        self.time_slots = parse_records(records)?;
        info!("Loaded {} time slots", self.time_slots.len());
        Ok(self.time_slots.len())
    }

    pub fn load_instructor_records(
        &mut self,
        records: Vec<Value>,
    ) -> Result<usize, ValidationError> {
        self.instructors = parse_records(records)?;
        info!("Loaded {} instructors", self.instructors.len());
        Ok(self.instructors.len())
    }

    /// Checks that every id an entity refers to exists. Run before building a model, once
    /// all collections are loaded.
    pub fn check_references(&self) -> Result<(), ValidationError> {
        for course in self.courses.values() {
            let unknown = |target, reference: &str| ValidationError::UnknownReference {
                entity: EntityKind::Course,
                id: course.id.clone(),
                target,
                reference: reference.to_string(),
            };
            if let Some(missing) = course
                .instructors
                .iter()
                .find(|i| !self.instructors.contains_key(*i))
            {
                return Err(unknown(EntityKind::Instructor, missing));
            }
            if let Some(room) = &course.forced_room {
                if !self.rooms.contains_key(room) {
                    return Err(unknown(EntityKind::Room, room));
                }
            }
            if let Some(slot) = &course.forced_time_slot {
                if !self.time_slots.contains_key(slot) {
                    return Err(unknown(EntityKind::TimeSlot, slot));
                }
            }
        }
        for instructor in self.instructors.values() {
            let Some(availability) = &instructor.availability else {
                continue;
            };
            if let Some(slot) = availability
                .iter()
                .find(|s| !self.time_slots.contains_key(*s))
            {
                return Err(ValidationError::UnknownReference {
                    entity: EntityKind::Instructor,
                    id: instructor.id.clone(),
                    target: EntityKind::TimeSlot,
                    reference: slot.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn course(&self, id: &str) -> Option<&Course> {
        self.courses.get(id)
    }

    pub fn time_slot(&self, id: &str) -> Option<&TimeSlot> {
        self.time_slots.get(id)
    }

    pub fn instructor(&self, id: &str) -> Option<&Instructor> {
        self.instructors.get(id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn courses(&self) -> impl Iterator<Item = &Course> {
        self.courses.values()
    }

    pub fn time_slots(&self) -> impl Iterator<Item = &TimeSlot> {
        self.time_slots.values()
    }

    pub fn instructors(&self) -> impl Iterator<Item = &Instructor> {
        self.instructors.values()
    }

    pub(crate) fn time_slot_map(&self) -> &BTreeMap<SlotId, TimeSlot> {
        &self.time_slots
    }
}
