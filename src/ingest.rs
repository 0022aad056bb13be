use crate::columns::{is_score_row, ColumnMapping};
use crate::frame::Frame;
use crate::roster::{match_student, normalize_name, MatchOutcome, StudentRecord};
use crate::session::{PendingStudent, ScoreEntry};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one ingestion pass. Per-row problems are counts, never errors;
/// a structural failure aborts before this type exists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub locked_skipped: usize,
    #[serde(skip)]
    pub entries: Vec<ScoreEntry>,
    pub pending: Vec<PendingStudent>,
}

impl ImportReport {
    /// The one user-visible line per import.
    pub fn summary(&self) -> String {
        format!(
            "Imported marks for {} students. {} rows skipped.",
            self.imported,
            self.skipped + self.locked_skipped
        )
    }
}

fn find_by_index<'a>(roster: &'a [StudentRecord], wanted: &str) -> Option<&'a StudentRecord> {
    let wanted = wanted.trim();
    if wanted.is_empty() {
        return None;
    }
    roster.iter().find(|s| {
        s.index_number
            .as_deref()
            .map(|n| n.trim().eq_ignore_ascii_case(wanted))
            .unwrap_or(false)
    })
}

/// Walk every row beneath the header: validate, resolve, parse, merge.
///
/// Resolution prefers an exact index-number match when the sheet has an index
/// column; everything else goes through the fuzzy name matcher. Rows
/// resolving to a locked student are counted separately. A row matching
/// nobody still carries marks (the validator guarantees it), so it queues as
/// a pending new student; creation is always manual.
pub fn run_import(
    frame: &Frame,
    mapping: &ColumnMapping,
    roster: &[StudentRecord],
    locked: &BTreeSet<String>,
) -> ImportReport {
    let mut skipped = 0usize;
    let mut locked_skipped = 0usize;
    let mut by_student: BTreeMap<String, ScoreEntry> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut pending: BTreeMap<String, PendingStudent> = BTreeMap::new();

    for row in frame.iter().skip(mapping.header_row + 1) {
        if !is_score_row(row, mapping) {
            skipped += 1;
            continue;
        }

        let mut marks: BTreeMap<String, Option<u32>> = BTreeMap::new();
        for (subject, col) in &mapping.subject_cols {
            marks.insert(subject.clone(), row.get(*col).and_then(|c| c.as_mark()));
        }

        let name = row[mapping.name_col].as_text().trim().to_string();
        let index_value = mapping
            .index_col
            .and_then(|col| row.get(col))
            .map(|c| c.as_text().trim().to_string())
            .filter(|v| !v.is_empty());

        let resolved = index_value
            .as_deref()
            .and_then(|v| find_by_index(roster, v))
            .map(MatchOutcome::Exact)
            .unwrap_or_else(|| match_student(&name, roster));

        match resolved.student() {
            Some(student) => {
                if locked.contains(&student.id) {
                    locked_skipped += 1;
                    continue;
                }
                // Last import wins: a later row for the same student
                // overwrites, never duplicates.
                if !by_student.contains_key(&student.id) {
                    order.push(student.id.clone());
                }
                let mut entry = ScoreEntry::blank(Some(student.id.clone()));
                entry.marks = marks;
                by_student.insert(student.id.clone(), entry);
            }
            None => {
                if marks.values().any(|m| m.is_some()) {
                    pending.insert(
                        normalize_name(&name),
                        PendingStudent {
                            name,
                            index_number: index_value,
                            marks,
                        },
                    );
                } else {
                    skipped += 1;
                }
            }
        }
    }

    let entries: Vec<ScoreEntry> = order
        .iter()
        .filter_map(|id| by_student.remove(id))
        .collect();
    let report = ImportReport {
        imported: entries.len(),
        skipped,
        locked_skipped,
        entries,
        pending: pending.into_values().collect(),
    };
    tracing::info!(
        imported = report.imported,
        skipped = report.skipped,
        locked = report.locked_skipped,
        pending = report.pending.len(),
        "ingestion pass finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{locate_columns, ColumnSynonyms};
    use crate::frame::Cell;

    fn frame(rows: &[&[&str]]) -> Frame {
        rows.iter()
            .map(|r| r.iter().map(|c| Cell::Text(c.to_string())).collect())
            .collect()
    }

    fn student(id: &str, name: &str, index: Option<&str>) -> StudentRecord {
        StudentRecord {
            id: id.to_string(),
            full_name: name.to_string(),
            index_number: index.map(|s| s.to_string()),
            class_level: "P6".to_string(),
            stream: "A".to_string(),
        }
    }

    fn locate(frame: &Frame) -> ColumnMapping {
        locate_columns(frame, &ColumnSynonyms::default()).expect("mapping")
    }

    #[test]
    fn reordered_duplicate_overwrites_and_summary_rows_skip() {
        let f = frame(&[
            &["NAME", "ENG", "MTC"],
            &["JOHN MARY OKOT", "78", "65"],
            &["TOP PERFORMERS"],
            &["MARY OKOT JOHN", "90", "88"],
        ]);
        let roster = vec![student("s1", "John Mary Okot", None)];
        let report = run_import(&f, &locate(&f), &roster, &BTreeSet::new());

        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.entries.len(), 1);
        // Row 4 normalizes identically to row 2 and overwrites it.
        assert_eq!(report.entries[0].marks.get("ENG"), Some(&Some(90)));
        assert_eq!(report.entries[0].marks.get("MTC"), Some(&Some(88)));
        assert_eq!(report.summary(), "Imported marks for 1 students. 1 rows skipped.");
    }

    #[test]
    fn out_of_range_mark_degrades_to_unset() {
        let f = frame(&[
            &["NAME", "ENG", "MTC"],
            &["JOHN MARY OKOT", "105", "65"],
        ]);
        let roster = vec![student("s1", "John Mary Okot", None)];
        let report = run_import(&f, &locate(&f), &roster, &BTreeSet::new());

        assert_eq!(report.imported, 1);
        assert_eq!(report.entries[0].marks.get("ENG"), Some(&None));
        assert_eq!(report.entries[0].marks.get("MTC"), Some(&Some(65)));
    }

    #[test]
    fn unmatched_rows_queue_as_pending_never_created() {
        let f = frame(&[
            &["NAME", "ENG", "MTC"],
            &["JOHN MARY OKOT", "78", "65"],
            &["PETER EKISA OJOK", "51", "47"],
        ]);
        let roster = vec![student("s1", "John Mary Okot", None)];
        let report = run_import(&f, &locate(&f), &roster, &BTreeSet::new());

        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.pending.len(), 1);
        assert_eq!(report.pending[0].name, "PETER EKISA OJOK");
        assert_eq!(report.pending[0].marks.get("ENG"), Some(&Some(51)));
    }

    #[test]
    fn locked_students_are_skipped_and_counted() {
        let f = frame(&[
            &["NAME", "ENG", "MTC"],
            &["JOHN MARY OKOT", "78", "65"],
            &["GRACE AKELLO APIO", "55", "61"],
        ]);
        let roster = vec![
            student("s1", "John Mary Okot", None),
            student("s2", "Grace Akello Apio", None),
        ];
        let locked: BTreeSet<String> = ["s2".to_string()].into_iter().collect();
        let report = run_import(&f, &locate(&f), &roster, &locked);

        assert_eq!(report.imported, 1);
        assert_eq!(report.locked_skipped, 1);
        assert_eq!(report.summary(), "Imported marks for 1 students. 1 rows skipped.");
    }

    #[test]
    fn index_column_resolves_exactly() {
        let f = frame(&[
            &["INDEX", "NAME", "ENG"],
            &["P-002", "ENTIRELY DIFFERENT PERSON", "70"],
        ]);
        let roster = vec![
            student("s1", "John Mary Okot", Some("P-001")),
            student("s2", "Grace Akello", Some("P-002")),
        ];
        let report = run_import(&f, &locate(&f), &roster, &BTreeSet::new());

        assert_eq!(report.imported, 1);
        assert_eq!(report.entries[0].student_id.as_deref(), Some("s2"));
    }

    #[test]
    fn rerun_on_same_input_is_idempotent() {
        let f = frame(&[
            &["NAME", "ENG", "MTC"],
            &["JOHN MARY OKOT", "78", "65"],
            &["GRACE AKELLO APIO", "55", "61"],
            &["CLASS AVERAGE", "66", "63"],
        ]);
        let roster = vec![
            student("s1", "John Mary Okot", None),
            student("s2", "Grace Akello Apio", None),
        ];
        let a = run_import(&f, &locate(&f), &roster, &BTreeSet::new());
        let b = run_import(&f, &locate(&f), &roster, &BTreeSet::new());

        assert_eq!(a.imported, b.imported);
        assert_eq!(a.skipped, b.skipped);
        assert_eq!(a.entries, b.entries);
    }
}
