use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// Type aliases for clarity
pub type RoomId = String;
pub type CourseId = String;
pub type InstructorId = String;
pub type SlotId = String;

/// Time of day, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MINUTES_PER_DAY: u16 = 24 * 60;

    pub fn from_hm(hours: u16, minutes: u16) -> Option<Self> {
        if hours >= 24 || minutes >= 60 {
            return None;
        }
        Some(ClockTime(hours * 60 + minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl FromStr for ClockTime {
    type Err = String;

    /// Parses `H:MM` or `HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got `{s}`"))?;
        // u16 parsing alone would accept a leading sign
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(h) || h.len() > 2 {
            return Err(format!("invalid hour in `{s}`"));
        }
        if !digits(m) || m.len() != 2 {
            return Err(format!("minutes must have two digits in `{s}`"));
        }
        let hours: u16 = h.parse().map_err(|_| format!("invalid hour in `{s}`"))?;
        let minutes: u16 = m.parse().map_err(|_| format!("invalid minutes in `{s}`"))?;
        ClockTime::from_hm(hours, minutes).ok_or_else(|| format!("time out of range: `{s}`"))
    }
}

impl TryFrom<String> for ClockTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Day of the week. Ordering follows the calendar week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub fn code(self) -> &'static str {
        match self {
            Day::Monday => "M",
            Day::Tuesday => "T",
            Day::Wednesday => "W",
            Day::Thursday => "TH",
            Day::Friday => "F",
            Day::Saturday => "SA",
            Day::Sunday => "SU",
        }
    }
}

/// A set of meeting days, written as concatenated codes: `MWF`, `TTH`, `MTWTHF`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DayPattern(BTreeSet<Day>);

impl DayPattern {
    pub fn contains(&self, day: Day) -> bool {
        self.0.contains(&day)
    }

    pub fn iter(&self) -> impl Iterator<Item = Day> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for DayPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        let mut days = BTreeSet::new();
        let mut rest = code.as_str();
        while !rest.is_empty() {
            // two-letter codes first so that "TH" is not read as "T" + "H"
            let (day, len) = if rest.starts_with("TH") {
                (Day::Thursday, 2)
            } else if rest.starts_with("SA") {
                (Day::Saturday, 2)
            } else if rest.starts_with("SU") {
                (Day::Sunday, 2)
            } else {
                match rest.chars().next() {
                    Some('M') => (Day::Monday, 1),
                    Some('T') => (Day::Tuesday, 1),
                    Some('W') => (Day::Wednesday, 1),
                    Some('F') => (Day::Friday, 1),
                    other => {
                        return Err(format!(
                            "unknown day code `{}` in `{s}`",
                            other.unwrap_or_default()
                        ));
                    }
                }
            };
            if !days.insert(day) {
                return Err(format!("day `{}` repeated in `{s}`", day.code()));
            }
            rest = &rest[len..];
        }
        if days.is_empty() {
            return Err("day pattern is empty".to_string());
        }
        Ok(DayPattern(days))
    }
}

impl TryFrom<String> for DayPattern {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DayPattern> for String {
    fn from(value: DayPattern) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DayPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for day in &self.0 {
            f.write_str(day.code())?;
        }
        Ok(())
    }
}

/// Represents a physical room with a given capacity.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub capacity: u32,
    #[serde(default)]
    pub features: BTreeSet<String>,
}

/// Represents a course to be scheduled.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: CourseId,
    pub enrollment: u32,
    /// Sessions per week; each session takes one time slot.
    #[serde(default = "default_sessions")]
    pub sessions: u32,
    /// Minimum slot length a session needs.
    #[serde(default)]
    pub duration_minutes: Option<u16>,
    /// Instructors eligible to teach this course.
    pub instructors: BTreeSet<InstructorId>,
    #[serde(default)]
    pub required_features: BTreeSet<String>,
    #[serde(default)]
    pub forced_room: Option<RoomId>,
    #[serde(default)]
    pub forced_time_slot: Option<SlotId>,
    /// Kind of course, e.g. `Lecture` or a lab family. Typed slots only host courses of
    /// their own type.
    #[serde(default)]
    pub course_type: Option<String>,
}

fn default_sessions() -> u32 {
    1
}

/// A recurring meeting time, e.g. MWF 09:00-09:50.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub id: SlotId,
    pub days: DayPattern,
    pub start: ClockTime,
    pub end: ClockTime,
    /// Course type this slot is reserved for; `None` hosts any course.
    #[serde(default)]
    pub course_type: Option<String>,
}

impl TimeSlot {
    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes().saturating_sub(self.start.minutes())
    }

    /// True if the slot is in session at `instant` on `day`.
    pub fn covers(&self, day: Day, instant: ClockTime) -> bool {
        self.occupies(day, instant, 0)
    }

    /// Like `covers`, but the slot also holds its room for `turnover` minutes after it ends.
    pub fn occupies(&self, day: Day, instant: ClockTime, turnover: u16) -> bool {
        self.days.contains(day)
            && self.start <= instant
            && instant.minutes() < self.end.minutes() + turnover
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.overlaps_with_turnover(other, 0)
    }

    pub fn overlaps_with_turnover(&self, other: &TimeSlot, turnover: u16) -> bool {
        self.days.iter().any(|d| other.days.contains(d))
            && self.start.minutes() < other.end.minutes() + turnover
            && other.start.minutes() < self.end.minutes() + turnover
    }

    /// True if a course of type `course_type` may meet in this slot.
    pub fn hosts(&self, course_type: Option<&str>) -> bool {
        self.course_type
            .as_deref()
            .is_none_or(|reserved| course_type == Some(reserved))
    }
}

/// Represents an instructor with their scheduling constraints.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instructor {
    pub id: InstructorId,
    /// Slots the instructor can teach in; `None` means every slot.
    #[serde(default)]
    pub availability: Option<BTreeSet<SlotId>>,
    /// Maximum sessions per week; `None` means unbounded.
    #[serde(default)]
    pub max_load: Option<u32>,
}

impl Instructor {
    pub fn is_available(&self, slot: &SlotId) -> bool {
        self.availability
            .as_ref()
            .is_none_or(|slots| slots.contains(slot))
    }
}

/// Represents a single, scheduled course session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSession {
    pub course_id: CourseId,
    /// 1-based session number within the course's week.
    pub session: u32,
    pub room_id: RoomId,
    pub time_slot_id: SlotId,
    pub instructor_id: InstructorId,
    pub days: DayPattern,
    pub start: ClockTime,
    pub end: ClockTime,
}

impl fmt::Display for ScheduledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} in {} at {} ({} {}-{}) with {}",
            self.course_id,
            self.session,
            self.room_id,
            self.time_slot_id,
            self.days,
            self.start,
            self.end,
            self.instructor_id
        )
    }
}

/// The final, read-only timetable: one entry per required course session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Schedule {
    sessions: Vec<ScheduledSession>,
}

impl Schedule {
    pub(crate) fn new(mut sessions: Vec<ScheduledSession>) -> Self {
        sessions.sort();
        Schedule { sessions }
    }

    pub fn sessions(&self) -> &[ScheduledSession] {
        &self.sessions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScheduledSession> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions_for_course<'a>(
        &'a self,
        course: &'a str,
    ) -> impl Iterator<Item = &'a ScheduledSession> + 'a {
        self.sessions.iter().filter(move |s| s.course_id == course)
    }
}

impl<'a> IntoIterator for &'a Schedule {
    type Item = &'a ScheduledSession;
    type IntoIter = std::slice::Iter<'a, ScheduledSession>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.iter()
    }
}
