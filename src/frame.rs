use serde::{Deserialize, Serialize};

/// One cell of an imported sheet. Workbook payloads carry numbers and nulls
/// directly; delimited text always produces `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Blank,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Blank => true,
            Cell::Number(_) => false,
            Cell::Text(t) => t.trim().is_empty(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Blank => String::new(),
            Cell::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Cell::Text(t) => t.clone(),
        }
    }

    /// A raw mark is an integer in [0,100]. Anything else, including
    /// out-of-range values like "105", is no mark at all.
    pub fn as_mark(&self) -> Option<u32> {
        match self {
            Cell::Blank => None,
            Cell::Number(n) => {
                if n.fract() == 0.0 && *n >= 0.0 && *n <= 100.0 {
                    Some(*n as u32)
                } else {
                    None
                }
            }
            Cell::Text(t) => {
                let v = t.trim().parse::<i64>().ok()?;
                if (0..=100).contains(&v) {
                    Some(v as u32)
                } else {
                    None
                }
            }
        }
    }
}

pub type Frame = Vec<Vec<Cell>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than 2 usable rows; nothing to locate a header in.
    EmptyInput,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::EmptyInput => write!(f, "import payload has fewer than 2 rows"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Shell-decoded workbook payload. Only the first sheet is read.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkbookPayload {
    pub sheets: Vec<WorkbookSheet>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkbookSheet {
    #[serde(default)]
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

/// Split delimited text into a cell matrix. Quote characters toggle an
/// in-quote flag; the delimiter only splits while outside a quote, and the
/// quote characters themselves are not part of the value.
pub fn parse_delimited(text: &str, delimiter: char) -> Result<Frame, FrameError> {
    let rows: Frame = text
        .lines()
        .map(|line| split_line(line.trim_end_matches('\r'), delimiter))
        .collect();
    finish_frame(rows)
}

pub fn parse_workbook(payload: &WorkbookPayload) -> Result<Frame, FrameError> {
    let first = payload.sheets.first().ok_or(FrameError::EmptyInput)?;
    finish_frame(first.rows.clone())
}

fn split_line(line: &str, delimiter: char) -> Vec<Cell> {
    let mut cells: Vec<Cell> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if ch == delimiter && !in_quotes {
            cells.push(Cell::Text(buf.trim().to_string()));
            buf.clear();
        } else {
            buf.push(ch);
        }
    }
    cells.push(Cell::Text(buf.trim().to_string()));
    cells
}

fn finish_frame(mut rows: Frame) -> Result<Frame, FrameError> {
    // Leading and trailing all-blank rows carry nothing; interior ones stay
    // because the header heuristics are positional.
    while rows.first().map(row_is_blank).unwrap_or(false) {
        rows.remove(0);
    }
    while rows.last().map(row_is_blank).unwrap_or(false) {
        rows.pop();
    }
    if rows.len() < 2 {
        return Err(FrameError::EmptyInput);
    }
    Ok(rows)
}

fn row_is_blank(row: &Vec<Cell>) -> bool {
    row.iter().all(|c| c.is_blank())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_delimiter_outside_quotes() {
        let frame = parse_delimited("NAME,ENG\n\"OKOT, JOHN\",78\n", ',').expect("frame");
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[1][0], Cell::Text("OKOT, JOHN".to_string()));
        assert_eq!(frame[1][1], Cell::Text("78".to_string()));
    }

    #[test]
    fn trims_outer_blank_rows_keeps_interior() {
        let frame = parse_delimited("\n\nNAME,ENG\n\nJOHN OKOT,70\n\n", ',').expect("frame");
        assert_eq!(frame.len(), 3);
        assert!(frame[1].iter().all(|c| c.is_blank()));
    }

    #[test]
    fn single_row_is_empty_input() {
        assert_eq!(
            parse_delimited("NAME,ENG\n", ',').unwrap_err(),
            FrameError::EmptyInput
        );
        assert_eq!(parse_delimited("", ',').unwrap_err(), FrameError::EmptyInput);
    }

    #[test]
    fn workbook_reads_first_sheet_only() {
        let payload: WorkbookPayload = serde_json::from_value(serde_json::json!({
            "sheets": [
                { "name": "Term 1", "rows": [["NAME", "ENG"], ["JOHN OKOT", 78]] },
                { "name": "Term 2", "rows": [["IGNORED"]] }
            ]
        }))
        .expect("payload");
        let frame = parse_workbook(&payload).expect("frame");
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[1][1], Cell::Number(78.0));
    }

    #[test]
    fn mark_parsing_bounds() {
        assert_eq!(Cell::Text("78".into()).as_mark(), Some(78));
        assert_eq!(Cell::Text(" 0 ".into()).as_mark(), Some(0));
        assert_eq!(Cell::Text("100".into()).as_mark(), Some(100));
        assert_eq!(Cell::Text("105".into()).as_mark(), None);
        assert_eq!(Cell::Text("-3".into()).as_mark(), None);
        assert_eq!(Cell::Text("abs".into()).as_mark(), None);
        assert_eq!(Cell::Number(65.0).as_mark(), Some(65));
        assert_eq!(Cell::Number(65.5).as_mark(), None);
        assert_eq!(Cell::Blank.as_mark(), None);
    }
}
