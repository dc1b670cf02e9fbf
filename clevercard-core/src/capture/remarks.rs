//! Splitting a dictated transcription into per-student remarks

use serde::Serialize;

use crate::types::Student;

/// One paragraph of a transcription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemarkSegment {
    /// Student the paragraph mentions first, if any
    pub student_id: Option<String>,
    pub text: String,
}

/// Split `transcription` into paragraphs and attribute each to a student.
///
/// Paragraphs are separated by blank lines. A paragraph belongs to the
/// student whose full name appears earliest in it as whole words; ties go
/// to the longer name so "Ann" does not steal "Ann Lee".
pub fn segment_remarks(transcription: &str, students: &[Student]) -> Vec<RemarkSegment> {
    let names: Vec<(String, &Student)> = students
        .iter()
        .filter(|s| !s.full_name.trim().is_empty())
        .map(|s| (s.full_name.trim().to_lowercase(), s))
        .collect();

    paragraphs(transcription)
        .into_iter()
        .map(|text| {
            let lowered = text.to_lowercase();
            let student_id = names
                .iter()
                .filter_map(|(name, student)| {
                    find_name(&lowered, name).map(|at| (at, name.len(), *student))
                })
                .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
                .map(|(_, _, student)| student.id.clone());
            RemarkSegment { student_id, text }
        })
        .collect()
}

/// Byte offset of the first whole-word occurrence of `name` in `text`
fn find_name(text: &str, name: &str) -> Option<usize> {
    text.match_indices(name).map(|(at, _)| at).find(|&at| {
        let before = text[..at].chars().next_back();
        let after = text[at + name.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                out.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn student(id: &str, name: &str) -> Student {
        Student {
            id: id.to_string(),
            class_id: "c1".to_string(),
            full_name: name.to_string(),
            registration_number: id.to_uppercase(),
            date_of_birth: None,
            gender: None,
            parent_contact: None,
            address: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_attributes_paragraphs_to_mentioned_students() {
        let students = vec![student("s1", "John Doe"), student("s2", "Jane Smith")];
        let text = "John Doe has improved in algebra.\nNeeds more reading.\n\n\
                    Overall the class did well.\n\n\
                    jane smith leads group work.";
        let segments = segment_remarks(text, &students);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].student_id.as_deref(), Some("s1"));
        assert_eq!(
            segments[0].text,
            "John Doe has improved in algebra. Needs more reading."
        );
        assert!(segments[1].student_id.is_none());
        assert_eq!(segments[2].student_id.as_deref(), Some("s2"));
    }

    #[test]
    fn test_earliest_mention_wins() {
        let students = vec![student("s1", "John Doe"), student("s2", "Jane Smith")];
        let segments = segment_remarks("Jane Smith helped John Doe.", &students);
        assert_eq!(segments[0].student_id.as_deref(), Some("s2"));
    }

    #[test]
    fn test_longer_name_wins_at_same_position() {
        let students = vec![student("s1", "Ann"), student("s2", "Ann Lee")];
        let segments = segment_remarks("Ann Lee is attentive.", &students);
        assert_eq!(segments[0].student_id.as_deref(), Some("s2"));
    }

    #[test]
    fn test_name_must_match_whole_words() {
        let students = vec![student("s1", "Ann Lee")];
        let segments = segment_remarks("Ann Leeds is attentive.", &students);
        assert!(segments[0].student_id.is_none());

        let students = vec![student("s1", "Ann")];
        let segments = segment_remarks("Joanne was late, Ann was early.", &students);
        assert_eq!(segments[0].student_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_blank_transcription_has_no_segments() {
        assert!(segment_remarks("  \n\n ", &[]).is_empty());
    }
}
