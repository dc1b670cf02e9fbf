//! Register text parser
//!
//! Recognizers that only return plain text produce a register like:
//!
//! ```text
//! REGISTER SCAN RESULT:
//!
//! Student Name: John Doe
//! Mathematics: 85
//! English: 78
//!
//! Student Name: Jane Smith
//! Mathematics: 90
//! ```
//!
//! Each `Student Name:` line opens a row and the `<Subject>: <score>` lines
//! below it fill that row. Anything else is skipped.

use super::recognition::StudentScores;
use crate::types::Student;

const NAME_LABEL: &str = "student name";

/// Parse register text into rows, in the order they appear
pub fn parse_register_text(text: &str) -> Vec<StudentScores> {
    let mut rows: Vec<StudentScores> = Vec::new();

    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let (label, value) = (label.trim(), value.trim());

        if label.eq_ignore_ascii_case(NAME_LABEL) {
            if !value.is_empty() {
                rows.push(StudentScores {
                    name: value.to_string(),
                    ..Default::default()
                });
            }
            continue;
        }

        let Some(current) = rows.last_mut() else {
            continue;
        };
        if label.is_empty() {
            continue;
        }
        match value.parse::<f64>() {
            Ok(score) if score.is_finite() => {
                current.scores.insert(label.to_string(), score);
            }
            _ => tracing::trace!(line, "Skipping register line"),
        }
    }

    rows
}

/// A parsed row paired with the enrolled student it names
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRow<'a> {
    pub row: &'a StudentScores,
    pub student: Option<&'a Student>,
}

/// Pair each row with the student whose full name matches, ignoring case
/// and surrounding whitespace
pub fn match_rows_to_students<'a>(
    rows: &'a [StudentScores],
    students: &'a [Student],
) -> Vec<MatchedRow<'a>> {
    rows.iter()
        .map(|row| {
            let wanted = normalize(&row.name);
            MatchedRow {
                row,
                student: students.iter().find(|s| normalize(&s.full_name) == wanted),
            }
        })
        .collect()
}

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
