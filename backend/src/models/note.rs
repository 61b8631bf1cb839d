use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::attendance::subject_filter;

#[derive(Serialize, Debug, Clone, FromRow)]
pub struct Note {
    pub id: i32,
    pub title: String,
    pub subject: String,
    pub google_drive_url: Option<String>,
    pub teacher_id: i32,
    pub teacher_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn is_valid_drive_url(url: &str) -> bool {
    let url = url.trim();
    (url.starts_with("https://") || url.starts_with("http://")) && !url.contains(char::is_whitespace)
}

#[derive(Debug, Default)]
pub struct NoteFilter<'a> {
    pub subject: Option<&'a str>,
    pub query: Option<&'a str>,
}

impl<'a> NoteFilter<'a> {
    pub fn matches(&self, note: &Note) -> bool {
        if let Some(subject) = subject_filter(self.subject) {
            if note.subject != subject {
                return false;
            }
        }

        match self.query.map(str::trim).filter(|q| !q.is_empty()) {
            None => true,
            Some(query) => {
                let query = query.to_lowercase();
                note.title.to_lowercase().contains(&query)
                    || note.subject.to_lowercase().contains(&query)
                    || note.teacher_name.to_lowercase().contains(&query)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(title: &str, subject: &str, teacher: &str) -> Note {
        Note {
            id: 1,
            title: title.to_string(),
            subject: subject.to_string(),
            google_drive_url: None,
            teacher_id: 1,
            teacher_name: teacher.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn search_covers_title_subject_and_teacher() {
        let n = note("Normalization cheatsheet", "DBMS", "John Smith");
        let by = |q: &str| NoteFilter { subject: None, query: Some(q) }.matches(&n);
        assert!(by("normal"));
        assert!(by("dbms"));
        assert!(by("SMITH"));
        assert!(!by("graphs"));
        assert!(by("   "));
    }

    #[test]
    fn subject_filter_combines_with_search() {
        let n = note("Sorting", "Algorithms", "Sarah Johnson");
        assert!(NoteFilter { subject: Some("all"), query: Some("sort") }.matches(&n));
        assert!(!NoteFilter { subject: Some("DBMS"), query: Some("sort") }.matches(&n));
        assert!(NoteFilter { subject: Some("Algorithms"), query: None }.matches(&n));
    }

    #[test]
    fn drive_url_must_be_http() {
        assert!(is_valid_drive_url("https://drive.google.com/file/d/abc/view"));
        assert!(!is_valid_drive_url("ftp://example.com/x"));
        assert!(!is_valid_drive_url("https://drive.google.com/a b"));
    }
}
