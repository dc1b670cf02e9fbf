//! Read-only views over an [`AppState`] snapshot.
//!
//! Everything here is derived on demand from the collections the store keeps;
//! nothing is cached or written back.

use serde::Serialize;

use crate::state::AppState;
use crate::types::{Class, ReportCard, Student};

/// Totals for the dashboard header.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub class_count: usize,
    pub student_count: usize,
    pub report_count: usize,
    /// Mean `total_score` over all loaded reports; `None` without reports
    pub average_score: Option<f64>,
    /// Reports carrying at least one AI insight
    pub insight_report_count: usize,
}

impl DashboardStats {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            class_count: state.classes.len(),
            student_count: state.students.len(),
            report_count: state.reports.len(),
            average_score: average_score(&state.reports),
            insight_report_count: insight_report_count(&state.reports),
        }
    }

    /// Average score for display, e.g. "81.8" or "-".
    pub fn format_average(&self) -> String {
        match self.average_score {
            Some(avg) => format!("{:.1}", avg),
            None => "-".to_string(),
        }
    }
}

/// Mean `total_score`, or `None` for an empty slice
pub fn average_score(reports: &[ReportCard]) -> Option<f64> {
    if reports.is_empty() {
        return None;
    }
    let sum: f64 = reports.iter().map(|r| r.total_score).sum();
    Some(sum / reports.len() as f64)
}

/// The `n` highest-scoring reports, best first. Ties keep load order.
pub fn top_performers(reports: &[ReportCard], n: usize) -> Vec<&ReportCard> {
    let mut ranked: Vec<&ReportCard> = reports.iter().collect();
    ranked.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
    ranked.truncate(n);
    ranked
}

pub fn reports_for_term<'a>(reports: &'a [ReportCard], term: &str) -> Vec<&'a ReportCard> {
    reports
        .iter()
        .filter(|r| r.term.eq_ignore_ascii_case(term))
        .collect()
}

/// Students matching a free-text query on name or registration number,
/// optionally restricted to one class. An empty query matches everyone.
pub fn search_students<'a>(
    students: &'a [Student],
    query: &str,
    class_id: Option<&str>,
) -> Vec<&'a Student> {
    let needle = query.trim().to_lowercase();
    students
        .iter()
        .filter(|s| class_id.map_or(true, |id| s.class_id == id))
        .filter(|s| {
            needle.is_empty()
                || s.full_name.to_lowercase().contains(&needle)
                || s.registration_number.to_lowercase().contains(&needle)
        })
        .collect()
}

pub fn class_by_id<'a>(classes: &'a [Class], id: &str) -> Option<&'a Class> {
    classes.iter().find(|c| c.id == id)
}

pub fn student_by_id<'a>(students: &'a [Student], id: &str) -> Option<&'a Student> {
    students.iter().find(|s| s.id == id)
}

pub fn insight_report_count(reports: &[ReportCard]) -> usize {
    reports.iter().filter(|r| r.has_insights()).count()
}
