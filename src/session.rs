use crate::autosave::AutosaveScheduler;
use crate::grading::{ClassTier, GradingConfig};
use crate::history::History;
use crate::roster::StudentRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Present,
    Absent,
    Sick,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Present => "present",
            EntryStatus::Absent => "absent",
            EntryStatus::Sick => "sick",
        }
    }

    pub fn parse(s: &str) -> Option<EntryStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(EntryStatus::Present),
            "absent" => Some(EntryStatus::Absent),
            "sick" => Some(EntryStatus::Sick),
            _ => None,
        }
    }
}

/// One row of the editable score grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub student_id: Option<String>,
    pub marks: BTreeMap<String, Option<u32>>,
    pub status: EntryStatus,
    pub comment: String,
    pub locked: bool,
}

impl ScoreEntry {
    pub fn blank(student_id: Option<String>) -> ScoreEntry {
        ScoreEntry {
            student_id,
            marks: BTreeMap::new(),
            status: EntryStatus::Present,
            comment: String::new(),
            locked: false,
        }
    }

    pub fn has_marks(&self) -> bool {
        self.marks.values().any(|m| m.is_some())
    }

    /// Blank rows never touched by anyone carry nothing worth persisting.
    pub fn is_untouched(&self) -> bool {
        !self.has_marks()
            && self.comment.is_empty()
            && self.status == EntryStatus::Present
            && !self.locked
    }
}

/// Identity of one sheet: which class/stream is being scored for which
/// term/year/assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetKey {
    pub class_level: String,
    pub stream: String,
    pub term: i64,
    pub year: i64,
    pub assessment: String,
}

/// An import row that matched nobody on the roster but carries marks. Queued
/// for manual confirmation; never auto-created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStudent {
    pub name: String,
    pub index_number: Option<String>,
    pub marks: BTreeMap<String, Option<u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Empty,
    Partial,
    Complete,
    Absent,
    Sick,
}

/// The full mutable edit surface. Snapshots deep-copy this value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetState {
    pub entries: Vec<ScoreEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    RowOutOfRange(usize),
    RowLocked(usize),
    MarkOutOfRange(u32),
    UnknownSubject(String),
}

impl std::fmt::Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditError::RowOutOfRange(row) => write!(f, "row {} does not exist", row),
            EditError::RowLocked(row) => write!(f, "row {} is locked", row),
            EditError::MarkOutOfRange(mark) => write!(f, "mark {} is above 100", mark),
            EditError::UnknownSubject(s) => write!(f, "subject '{}' is not on this sheet", s),
        }
    }
}

impl std::error::Error for EditError {}

/// Result of one bulk persistence attempt, as reported by the store. Bulk
/// writes are not atomic; partial success is a real outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteOutcome {
    pub requested: usize,
    pub succeeded: usize,
}

pub struct EditSession {
    pub key: SheetKey,
    pub roster: Vec<StudentRecord>,
    pub subjects: Vec<String>,
    pub tier: ClassTier,
    pub pending: Vec<PendingStudent>,
    state: SheetState,
    history: History<SheetState>,
    scheduler: AutosaveScheduler,
    dirty: bool,
}

impl EditSession {
    /// Build the live surface for a sheet key: one roster-ordered row per
    /// student, taking the stored record where one exists and a blank row
    /// otherwise. A loaded snapshot replaces state wholesale.
    pub fn open(
        key: SheetKey,
        roster: Vec<StudentRecord>,
        existing: Vec<ScoreEntry>,
        config: &GradingConfig,
        scheduler: AutosaveScheduler,
    ) -> EditSession {
        let tier = ClassTier::from_class_level(&key.class_level);
        let subjects = config.required_subjects(tier).to_vec();

        let mut by_student: BTreeMap<String, ScoreEntry> = BTreeMap::new();
        for entry in existing {
            if let Some(id) = entry.student_id.clone() {
                by_student.insert(id, entry);
            }
        }
        let entries = roster
            .iter()
            .map(|s| {
                by_student
                    .remove(&s.id)
                    .unwrap_or_else(|| ScoreEntry::blank(Some(s.id.clone())))
            })
            .collect();

        EditSession {
            key,
            roster,
            subjects,
            tier,
            pending: Vec::new(),
            state: SheetState { entries },
            history: History::new(),
            scheduler,
            dirty: false,
        }
    }

    pub fn entries(&self) -> &[ScoreEntry] {
        &self.state.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn locked_student_ids(&self) -> std::collections::BTreeSet<String> {
        self.state
            .entries
            .iter()
            .filter(|e| e.locked)
            .filter_map(|e| e.student_id.clone())
            .collect()
    }

    /// Row classification for the grid: absence flags first, then mark
    /// coverage against this sheet's subject set.
    pub fn row_status(&self, row: usize) -> Option<RowStatus> {
        let entry = self.state.entries.get(row)?;
        Some(match entry.status {
            EntryStatus::Absent => RowStatus::Absent,
            EntryStatus::Sick => RowStatus::Sick,
            EntryStatus::Present => {
                let filled = self
                    .subjects
                    .iter()
                    .filter(|s| entry.marks.get(*s).copied().flatten().is_some())
                    .count();
                if filled == 0 {
                    RowStatus::Empty
                } else if filled < self.subjects.len() {
                    RowStatus::Partial
                } else {
                    RowStatus::Complete
                }
            }
        })
    }

    /// The one place mutations happen: validate first (the caller), then
    /// snapshot, apply, mark dirty, restart the debounce window.
    fn mutate<F: FnOnce(&mut SheetState)>(&mut self, now: Instant, apply: F) {
        self.history.save_snapshot(&self.state);
        apply(&mut self.state);
        self.dirty = true;
        self.scheduler.touch(now);
    }

    fn unlocked_row(&self, row: usize) -> Result<(), EditError> {
        let entry = self
            .state
            .entries
            .get(row)
            .ok_or(EditError::RowOutOfRange(row))?;
        if entry.locked {
            return Err(EditError::RowLocked(row));
        }
        Ok(())
    }

    pub fn set_mark(
        &mut self,
        now: Instant,
        row: usize,
        subject: &str,
        mark: Option<u32>,
    ) -> Result<(), EditError> {
        self.unlocked_row(row)?;
        if !self.subjects.iter().any(|s| s == subject) {
            return Err(EditError::UnknownSubject(subject.to_string()));
        }
        if let Some(m) = mark {
            if m > 100 {
                return Err(EditError::MarkOutOfRange(m));
            }
        }
        let subject = subject.to_string();
        self.mutate(now, |state| {
            state.entries[row].marks.insert(subject, mark);
        });
        Ok(())
    }

    pub fn set_comment(&mut self, now: Instant, row: usize, comment: &str) -> Result<(), EditError> {
        self.unlocked_row(row)?;
        let comment = comment.to_string();
        self.mutate(now, |state| {
            state.entries[row].comment = comment;
        });
        Ok(())
    }

    /// Absent and sick are mutually exclusive and both clear the row's marks.
    pub fn set_status(
        &mut self,
        now: Instant,
        row: usize,
        status: EntryStatus,
    ) -> Result<(), EditError> {
        self.unlocked_row(row)?;
        self.mutate(now, |state| {
            let entry = &mut state.entries[row];
            entry.status = status;
            if status != EntryStatus::Present {
                entry.marks.clear();
            }
        });
        Ok(())
    }

    /// Lock toggling is the one mutation allowed on a locked row.
    pub fn toggle_lock(&mut self, now: Instant, row: usize) -> Result<bool, EditError> {
        if row >= self.state.entries.len() {
            return Err(EditError::RowOutOfRange(row));
        }
        self.mutate(now, |state| {
            let entry = &mut state.entries[row];
            entry.locked = !entry.locked;
        });
        Ok(self.state.entries[row].locked)
    }

    /// Fill the blank cells of one subject for every unlocked, present row.
    /// One discrete mutation, one snapshot.
    pub fn quick_fill(&mut self, now: Instant, subject: &str, mark: u32) -> Result<usize, EditError> {
        if !self.subjects.iter().any(|s| s == subject) {
            return Err(EditError::UnknownSubject(subject.to_string()));
        }
        if mark > 100 {
            return Err(EditError::MarkOutOfRange(mark));
        }
        let subject = subject.to_string();
        let mut filled = 0;
        self.mutate(now, |state| {
            for entry in &mut state.entries {
                if entry.locked || entry.status != EntryStatus::Present {
                    continue;
                }
                if entry.marks.get(&subject).copied().flatten().is_none() {
                    entry.marks.insert(subject.clone(), Some(mark));
                    filled += 1;
                }
            }
        });
        Ok(filled)
    }

    pub fn clear_row(&mut self, now: Instant, row: usize) -> Result<(), EditError> {
        self.unlocked_row(row)?;
        self.mutate(now, |state| {
            let entry = &mut state.entries[row];
            entry.marks.clear();
            entry.comment.clear();
            entry.status = EntryStatus::Present;
        });
        Ok(())
    }

    /// Merge an ingestion pass into the surface. One snapshot covers the
    /// whole merge; each matched entry overwrites that student's mapped
    /// subjects. Locked rows are left alone.
    pub fn merge_import(&mut self, now: Instant, imported: Vec<ScoreEntry>) -> usize {
        let mut merged = 0;
        self.mutate(now, |state| {
            for incoming in imported {
                let Some(id) = incoming.student_id.as_deref() else {
                    continue;
                };
                let Some(entry) = state
                    .entries
                    .iter_mut()
                    .find(|e| e.student_id.as_deref() == Some(id))
                else {
                    continue;
                };
                if entry.locked {
                    continue;
                }
                for (subject, mark) in incoming.marks {
                    entry.marks.insert(subject, mark);
                }
                entry.status = EntryStatus::Present;
                merged += 1;
            }
        });
        merged
    }

    /// Manual confirmation of a pending import row: the new student joins
    /// the roster and gets a row carrying the queued marks. The queue entry
    /// is consumed.
    pub fn confirm_pending(
        &mut self,
        now: Instant,
        pending_index: usize,
        student: StudentRecord,
    ) -> Result<(), EditError> {
        if pending_index >= self.pending.len() {
            return Err(EditError::RowOutOfRange(pending_index));
        }
        let pending = self.pending.remove(pending_index);
        let mut entry = ScoreEntry::blank(Some(student.id.clone()));
        entry.marks = pending.marks;
        self.roster.push(student);
        self.mutate(now, |state| {
            state.entries.push(entry);
        });
        Ok(())
    }

    pub fn undo(&mut self, now: Instant) -> bool {
        let changed = self.history.undo(&mut self.state);
        if changed {
            self.dirty = true;
            self.scheduler.touch(now);
        }
        changed
    }

    pub fn redo(&mut self, now: Instant) -> bool {
        let changed = self.history.redo(&mut self.state);
        if changed {
            self.dirty = true;
            self.scheduler.touch(now);
        }
        changed
    }

    /// True when the debounce window has elapsed and a commit should run.
    /// Consumes the deadline, so a burst produces exactly one commit.
    pub fn autosave_due(&mut self, now: Instant) -> bool {
        self.dirty && self.scheduler.fire(now)
    }

    /// Manual save path: cancel the timer, flush now.
    pub fn begin_manual_flush(&mut self) {
        self.scheduler.disarm();
    }

    /// Rows worth persisting: resolved students with anything on them.
    pub fn flush_payload(&self) -> Vec<ScoreEntry> {
        self.state
            .entries
            .iter()
            .filter(|e| e.student_id.is_some() && !e.is_untouched())
            .cloned()
            .collect()
    }

    /// Full success returns the session to Clean. Partial success or a
    /// transport failure leaves it Dirty with the timer disarmed; the next
    /// mutation or a manual save is the only retry.
    pub fn apply_flush_outcome(&mut self, outcome: Option<BulkWriteOutcome>) {
        match outcome {
            Some(o) if o.succeeded == o.requested => {
                self.dirty = false;
            }
            _ => {
                self.scheduler.disarm();
            }
        }
    }
}
