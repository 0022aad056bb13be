use crate::frame::{Cell, Frame};
use serde::{Deserialize, Serialize};

/// How many leading rows are scanned for a header candidate.
const HEADER_SCAN_LIMIT: usize = 20;
/// A candidate this close after a summary-block marker is part of an embedded
/// report footer, not the real sheet header.
const SUMMARY_LOOKBEHIND: usize = 3;

const SUMMARY_MARKERS: [&str; 6] = ["top", "performer", "summary", "best", "ranking", "position"];

const NAME_STOPLIST: [&str; 11] = [
    "name", "pupil", "total", "average", "avg", "grade", "class", "position", "mean", "marks",
    "subject",
];
const NAME_STOP_SUBSTRINGS: [&str; 3] = ["grading", "summary", "performer"];

/// Column-label synonym tables. Configuration data, never hard-coded at the
/// match sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSynonyms {
    pub name: Vec<String>,
    pub index: Vec<String>,
    pub subjects: Vec<SubjectSynonyms>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSynonyms {
    pub code: String,
    pub synonyms: Vec<String>,
}

impl Default for ColumnSynonyms {
    fn default() -> Self {
        fn subj(code: &str, synonyms: &[&str]) -> SubjectSynonyms {
            SubjectSynonyms {
                code: code.to_string(),
                synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            }
        }
        ColumnSynonyms {
            name: vec![
                "name".into(),
                "pupil".into(),
                "student".into(),
                "learner".into(),
            ],
            index: vec!["index".into(), "idx".into(), "lin".into(), "pin".into()],
            subjects: vec![
                subj("ENG", &["eng", "english"]),
                subj("MTC", &["mtc", "math", "maths", "mathematics"]),
                subj("SCI", &["sci", "science"]),
                subj("SST", &["sst", "social"]),
                subj("LIT", &["lit", "literacy"]),
            ],
        }
    }
}

/// Field-to-column mapping produced by header location. Absent fields are
/// simply absent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub header_row: usize,
    pub name_col: usize,
    pub index_col: Option<usize>,
    pub subject_cols: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateError {
    NoNameColumn,
    NoSubjectColumns,
    NoDataRows,
}

impl std::fmt::Display for LocateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocateError::NoNameColumn => {
                write!(f, "no name column found in the first rows of the sheet")
            }
            LocateError::NoSubjectColumns => {
                write!(f, "a name column exists but no subject column was found")
            }
            LocateError::NoDataRows => {
                write!(f, "a header row was found but no score rows follow it")
            }
        }
    }
}

impl std::error::Error for LocateError {}

fn cell_matches(cell: &Cell, synonyms: &[String]) -> bool {
    let text = cell.as_text().trim().to_ascii_lowercase();
    if text.is_empty() {
        return false;
    }
    synonyms.iter().any(|s| text.contains(s.as_str()))
}

fn row_has_summary_marker(row: &[Cell]) -> bool {
    row.iter().any(|cell| {
        let text = cell.as_text().to_ascii_lowercase();
        SUMMARY_MARKERS.iter().any(|m| text.contains(m))
    })
}

fn map_header_row(row: &[Cell], synonyms: &ColumnSynonyms, header_row: usize) -> Option<ColumnMapping> {
    let mut name_col: Option<usize> = None;
    let mut index_col: Option<usize> = None;
    let mut subject_cols: Vec<(String, usize)> = Vec::new();

    for (col, cell) in row.iter().enumerate() {
        if index_col.is_none() && cell_matches(cell, &synonyms.index) {
            index_col = Some(col);
            continue;
        }
        if name_col.is_none() && cell_matches(cell, &synonyms.name) {
            name_col = Some(col);
            continue;
        }
        for subject in &synonyms.subjects {
            let taken = subject_cols.iter().any(|(code, _)| code == &subject.code);
            if !taken && cell_matches(cell, &subject.synonyms) {
                subject_cols.push((subject.code.clone(), col));
                break;
            }
        }
    }

    name_col.map(|name_col| ColumnMapping {
        header_row,
        name_col,
        index_col,
        subject_cols,
    })
}

/// Shared predicate deciding whether a row is real score data. Used both to
/// score header candidates and to accept rows during ingestion, so the two
/// stay consistent.
pub fn is_score_row(row: &[Cell], mapping: &ColumnMapping) -> bool {
    let Some(name_cell) = row.get(mapping.name_col) else {
        return false;
    };
    let name = name_cell.as_text();
    let name = name.trim();
    if name.len() < 3 {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    if NAME_STOP_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return false;
    }
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    if tokens.len() < 2 {
        return false;
    }
    if tokens.iter().any(|t| NAME_STOPLIST.contains(t)) {
        return false;
    }

    mapping
        .subject_cols
        .iter()
        .any(|(_, col)| row.get(*col).and_then(|c| c.as_mark()).is_some())
}

fn row_is_blank(row: &[Cell]) -> bool {
    row.iter().all(|c| c.is_blank())
}

/// Count consecutive validator-passing rows beneath the candidate. Blank rows
/// are skipped; any other non-matching row stops the count.
fn score_candidate(frame: &Frame, mapping: &ColumnMapping) -> usize {
    let mut score = 0;
    for row in frame.iter().skip(mapping.header_row + 1) {
        if is_score_row(row, mapping) {
            score += 1;
        } else if row_is_blank(row) {
            continue;
        } else {
            break;
        }
    }
    score
}

/// Locate the header row and produce the column mapping.
///
/// A candidate row holds a name-synonym cell plus at least one subject
/// synonym. Candidates inside a summary block (the row itself or up to 3 rows
/// before it carry a summary marker) are rejected so embedded report-footer
/// tables never anchor the import. The surviving candidate with the most
/// consecutive valid data rows beneath wins; earliest row breaks ties.
pub fn locate_columns(frame: &Frame, synonyms: &ColumnSynonyms) -> Result<ColumnMapping, LocateError> {
    let scan = frame.len().min(HEADER_SCAN_LIMIT);
    let mut saw_name_cell = false;
    let mut saw_candidate = false;
    let mut best: Option<(usize, ColumnMapping)> = None;

    for row_idx in 0..scan {
        let row = &frame[row_idx];
        let Some(mapping) = map_header_row(row, synonyms, row_idx) else {
            continue;
        };
        saw_name_cell = true;
        if mapping.subject_cols.is_empty() {
            continue;
        }
        saw_candidate = true;

        let lookbehind_start = row_idx.saturating_sub(SUMMARY_LOOKBEHIND);
        let in_summary_block = (lookbehind_start..=row_idx)
            .any(|i| row_has_summary_marker(&frame[i]));
        if in_summary_block {
            continue;
        }

        let score = score_candidate(frame, &mapping);
        if score >= 1 && best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
            best = Some((score, mapping));
        }
    }

    if let Some((_, mapping)) = best {
        return Ok(mapping);
    }
    if saw_candidate {
        Err(LocateError::NoDataRows)
    } else if saw_name_cell {
        Err(LocateError::NoSubjectColumns)
    } else {
        Err(LocateError::NoNameColumn)
    }
}
