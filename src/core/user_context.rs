//! Student academic records and their prompt rendering

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// A student with every semester and class they are registered for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAcademicRecord {
    pub name: String,
    #[serde(default)]
    pub whatsapp_number: Option<String>,
    #[serde(default)]
    pub semesters: Vec<Semester>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Semester {
    pub name: String,
    #[serde(default)]
    pub classes: Vec<ClassEntry>,
}

/// One registered class (a KRS line)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub course: String,
    pub day: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: String,
    pub instructor: String,
}

/// `07:30` -> `7:30 AM`, `00:05` -> `12:05 AM`, `13:00` -> `1:00 PM`
pub fn format_time_12h(time: NaiveTime) -> String {
    let (is_pm, hour) = time.hour12();
    format!(
        "{}:{:02} {}",
        hour,
        time.minute(),
        if is_pm { "PM" } else { "AM" }
    )
}

impl ClassEntry {
    /// `Course: X, Time: (Monday, 7:30 AM - 9:10 AM), Room: D-204, Lecturer: Y`
    pub fn describe(&self) -> String {
        format!(
            "Course: {}, Time: ({}, {} - {}), Room: {}, Lecturer: {}",
            self.course,
            self.day,
            format_time_12h(self.start_time),
            format_time_12h(self.end_time),
            self.room,
            self.instructor
        )
    }
}

/// Render a record as the flat text block injected into prompts.
pub fn format_record(record: &UserAcademicRecord) -> String {
    let mut out = format!("Name: {}\n", record.name);

    let contact = record
        .whatsapp_number
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("none");
    out.push_str(&format!("WhatsApp Number: {}\n", contact));

    for semester in &record.semesters {
        out.push_str(&format!("Semester: {}\n", semester.name));
        if semester.classes.is_empty() {
            out.push_str("- Classes: no classes registered.\n");
            continue;
        }
        out.push_str("- Classes:\n");
        for class in &semester.classes {
            out.push_str(&format!("-- {}\n", class.describe()));
        }
    }

    out
}
