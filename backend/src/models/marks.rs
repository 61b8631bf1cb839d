use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

pub const MIN_SEMESTER: i32 = 1;
pub const MAX_SEMESTER: i32 = 8;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExamType {
    Final,
    Assignment,
    Project,
}

impl ExamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamType::Final => "Final",
            ExamType::Assignment => "Assignment",
            ExamType::Project => "Project",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "final" => Some(ExamType::Final),
            "assignment" => Some(ExamType::Assignment),
            "project" => Some(ExamType::Project),
            _ => None,
        }
    }
}

/// Request bodies accept the same spellings as query strings.
impl<'de> Deserialize<'de> for ExamType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        ExamType::parse(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid exam type: {}", value)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkSheetKey {
    pub subject: String,
    pub semester: i32,
    pub exam_type: ExamType,
    pub year: i32,
}

impl MarkSheetKey {
    /// `CS_<semester>_<subject>_<exam>_<year>`, one sheet per combination.
    pub fn document_id(&self) -> String {
        format!(
            "CS_{}_{}_{}_{}",
            self.semester,
            self.subject,
            self.exam_type.as_str(),
            self.year
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.subject.trim().is_empty() {
            return Err("Subject is required".to_string());
        }
        if !(MIN_SEMESTER..=MAX_SEMESTER).contains(&self.semester) {
            return Err(format!(
                "Semester must be between {} and {}",
                MIN_SEMESTER, MAX_SEMESTER
            ));
        }
        if !(2000..=2100).contains(&self.year) {
            return Err("Year is out of range".to_string());
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MarkEntry {
    pub marks: f64,
    pub grade: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Student id (as a string key) to that student's entry on one sheet.
pub type SheetEntries = HashMap<String, MarkEntry>;

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct Subject {
    pub id: i32,
    pub name: String,
    pub code: String,
    pub full_marks: i32,
    pub pass_marks: i32,
}

pub fn grade_for_percentage(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "A+"
    } else if percentage >= 80.0 {
        "A"
    } else if percentage >= 70.0 {
        "B+"
    } else if percentage >= 60.0 {
        "B"
    } else if percentage >= 50.0 {
        "C+"
    } else if percentage >= 40.0 {
        "C"
    } else if percentage >= 33.0 {
        "D"
    } else {
        "F"
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

pub fn trend(current: Option<f64>, previous: Option<f64>) -> Option<Trend> {
    let (current, previous) = (current?, previous?);
    if current > previous {
        Some(Trend::Up)
    } else if current < previous {
        Some(Trend::Down)
    } else {
        Some(Trend::Flat)
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct SubjectMarks {
    pub subject: String,
    pub code: String,
    pub full_marks: i32,
    pub pass_marks: i32,
    pub marks: Option<f64>,
    pub grade: Option<String>,
    pub remarks: Option<String>,
    pub passing: Option<bool>,
    pub trend: Option<Trend>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MarksTotals {
    pub total_marks: f64,
    pub total_full_marks: f64,
    pub percentage: f64,
    pub subjects_count: u32,
    pub overall_grade: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct MarksReport {
    pub exam_type: ExamType,
    pub semester: i32,
    pub year: i32,
    pub subjects: Vec<SubjectMarks>,
    pub totals: MarksTotals,
}

/// Per-subject entries for one student, keyed by subject name.
pub type StudentMarks = HashMap<String, MarkEntry>;

pub fn build_marks_report(
    exam_type: ExamType,
    semester: i32,
    year: i32,
    subjects: &[Subject],
    current: &StudentMarks,
    previous: Option<&StudentMarks>,
) -> MarksReport {
    let mut total_marks = 0.0;
    let mut total_full_marks = 0.0;
    let mut subjects_count = 0;

    let rows = subjects
        .iter()
        .map(|subject| {
            let entry = current.get(&subject.name);
            let previous_marks = previous
                .and_then(|prev| prev.get(&subject.name))
                .map(|e| e.marks);

            if let Some(entry) = entry {
                total_marks += entry.marks;
                total_full_marks += subject.full_marks as f64;
                subjects_count += 1;
            }

            SubjectMarks {
                subject: subject.name.clone(),
                code: subject.code.clone(),
                full_marks: subject.full_marks,
                pass_marks: subject.pass_marks,
                marks: entry.map(|e| e.marks),
                grade: entry.map(|e| e.grade.clone()),
                remarks: entry.and_then(|e| e.remarks.clone()),
                passing: entry.map(|e| e.marks >= subject.pass_marks as f64),
                trend: trend(entry.map(|e| e.marks), previous_marks),
            }
        })
        .collect();

    let percentage = if total_full_marks > 0.0 {
        (total_marks / total_full_marks * 100.0 * 10.0).round() / 10.0
    } else {
        0.0
    };

    MarksReport {
        exam_type,
        semester,
        year,
        subjects: rows,
        totals: MarksTotals {
            total_marks,
            total_full_marks,
            percentage,
            subjects_count,
            overall_grade: grade_for_percentage(percentage).to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(name: &str, code: &str) -> Subject {
        Subject {
            id: 0,
            name: name.to_string(),
            code: code.to_string(),
            full_marks: 100,
            pass_marks: 40,
        }
    }

    fn entry(marks: f64) -> MarkEntry {
        MarkEntry {
            marks,
            grade: grade_for_percentage(marks).to_string(),
            remarks: None,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn grade_bands() {
        assert_eq!(grade_for_percentage(95.0), "A+");
        assert_eq!(grade_for_percentage(90.0), "A+");
        assert_eq!(grade_for_percentage(89.9), "A");
        assert_eq!(grade_for_percentage(70.0), "B+");
        assert_eq!(grade_for_percentage(55.0), "C+");
        assert_eq!(grade_for_percentage(40.0), "C");
        assert_eq!(grade_for_percentage(33.0), "D");
        assert_eq!(grade_for_percentage(32.9), "F");
    }

    #[test]
    fn sheet_document_id() {
        let key = MarkSheetKey {
            subject: "Operating Systems".to_string(),
            semester: 3,
            exam_type: ExamType::Assignment,
            year: 2024,
        };
        assert_eq!(key.document_id(), "CS_3_Operating Systems_Assignment_2024");
        assert!(key.validate().is_ok());
    }

    #[test]
    fn sheet_key_rejects_bad_semester() {
        let key = MarkSheetKey {
            subject: "DBMS".to_string(),
            semester: 9,
            exam_type: ExamType::Final,
            year: 2024,
        };
        assert!(key.validate().is_err());
    }

    #[test]
    fn exam_type_parse_is_case_insensitive() {
        assert_eq!(ExamType::parse("final"), Some(ExamType::Final));
        assert_eq!(ExamType::parse("PROJECT"), Some(ExamType::Project));
        assert_eq!(ExamType::parse("midterm"), None);
    }

    #[test]
    fn exam_type_deserializes_any_case() {
        let exam: ExamType = serde_json::from_str("\"assignment\"").unwrap();
        assert_eq!(exam, ExamType::Assignment);
        let exam: ExamType = serde_json::from_str("\" FINAL \"").unwrap();
        assert_eq!(exam, ExamType::Final);
        assert!(serde_json::from_str::<ExamType>("\"Midterm\"").is_err());
        assert_eq!(serde_json::to_string(&ExamType::Project).unwrap(), "\"Project\"");
    }

    #[test]
    fn trend_needs_both_marks() {
        assert_eq!(trend(Some(70.0), Some(60.0)), Some(Trend::Up));
        assert_eq!(trend(Some(50.0), Some(60.0)), Some(Trend::Down));
        assert_eq!(trend(Some(60.0), Some(60.0)), Some(Trend::Flat));
        assert_eq!(trend(None, Some(60.0)), None);
        assert_eq!(trend(Some(60.0), None), None);
    }

    #[test]
    fn report_totals_skip_missing_subjects() {
        let subjects = vec![
            subject("Data Structures", "CS01"),
            subject("Algorithms", "CS02"),
            subject("DBMS", "CS04"),
        ];
        let mut current = StudentMarks::new();
        current.insert("Data Structures".to_string(), entry(85.0));
        current.insert("Algorithms".to_string(), entry(30.0));

        let mut previous = StudentMarks::new();
        previous.insert("Data Structures".to_string(), entry(80.0));

        let report = build_marks_report(
            ExamType::Final,
            2,
            2024,
            &subjects,
            &current,
            Some(&previous),
        );

        assert_eq!(report.totals.subjects_count, 2);
        assert_eq!(report.totals.total_marks, 115.0);
        assert_eq!(report.totals.total_full_marks, 200.0);
        assert_eq!(report.totals.percentage, 57.5);
        assert_eq!(report.totals.overall_grade, "C+");

        let ds = &report.subjects[0];
        assert_eq!(ds.passing, Some(true));
        assert_eq!(ds.trend, Some(Trend::Up));

        let algo = &report.subjects[1];
        assert_eq!(algo.passing, Some(false));
        assert_eq!(algo.trend, None);

        let dbms = &report.subjects[2];
        assert!(dbms.marks.is_none());
        assert!(dbms.passing.is_none());
    }

    #[test]
    fn empty_report_is_zero_and_failing() {
        let subjects = vec![subject("DBMS", "CS04")];
        let report = build_marks_report(
            ExamType::Project,
            1,
            2024,
            &subjects,
            &StudentMarks::new(),
            None,
        );
        assert_eq!(report.totals.percentage, 0.0);
        assert_eq!(report.totals.overall_grade, "F");
        assert_eq!(report.totals.subjects_count, 0);
    }

    #[test]
    fn percentage_rounds_to_one_decimal() {
        let subjects = vec![
            subject("Data Structures", "CS01"),
            subject("Algorithms", "CS02"),
            subject("DBMS", "CS04"),
        ];
        let mut current = StudentMarks::new();
        current.insert("Data Structures".to_string(), entry(70.0));
        current.insert("Algorithms".to_string(), entry(70.0));
        current.insert("DBMS".to_string(), entry(71.0));
        let report = build_marks_report(ExamType::Final, 1, 2024, &subjects, &current, None);
        assert_eq!(report.totals.percentage, 70.3);
    }
}
