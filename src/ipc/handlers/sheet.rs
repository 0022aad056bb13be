use crate::autosave::AutosaveScheduler;
use crate::columns::{locate_columns, ColumnSynonyms};
use crate::db;
use crate::frame::{self, Frame, WorkbookPayload};
use crate::grading::{aggregate_for, division_for};
use crate::ingest;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::{EditSession, EntryStatus, SheetKey};
use rusqlite::Connection;
use serde_json::json;
use std::time::Instant;

fn edit_error_response(id: &str, e: crate::session::EditError) -> serde_json::Value {
    use crate::session::EditError::*;
    let code = match e {
        RowOutOfRange(_) => "not_found",
        RowLocked(_) => "locked",
        MarkOutOfRange(_) | UnknownSubject(_) => "bad_params",
    };
    err(id, code, e.to_string(), None)
}

fn require_row(req: &Request) -> Result<usize, serde_json::Value> {
    match req.params.get("row").and_then(|v| v.as_u64()) {
        Some(v) => Ok(v as usize),
        None => Err(err(&req.id, "bad_params", "missing/invalid row", None)),
    }
}

fn handle_sheet_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_level = match req.params.get("classLevel").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classLevel", None),
    };
    let stream = match req.params.get("stream").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing stream", None),
    };
    let term = match req.params.get("term").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid term", None),
    };
    let year = match req.params.get("year").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing/invalid year", None),
    };
    let assessment = match req.params.get("assessment").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assessment", None),
    };

    let key = SheetKey {
        class_level,
        stream,
        term,
        year,
        assessment,
    };

    let roster = match db::list_roster(conn, &key.class_level, &key.stream) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let config = match db::load_grading_config(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let existing = match db::load_score_entries(conn, &key, &roster) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // A newer open supersedes any in-flight surface wholesale; there is no
    // partial apply and no implicit commit of the old session.
    let session = EditSession::open(key, roster, existing, &config, AutosaveScheduler::default());
    let rows = session.entries().len();
    let subjects = session.subjects.clone();
    state.session = Some(session);

    tracing::info!(rows, "sheet opened");
    ok(&req.id, json!({ "rows": rows, "subjects": subjects }))
}

fn handle_sheet_state(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let config = match db::load_grading_config(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let row_statuses: Vec<_> = (0..session.entries().len())
        .map(|row| session.row_status(row))
        .collect();
    let derived: Vec<serde_json::Value> = session
        .entries()
        .iter()
        .map(|entry| {
            let aggregate = aggregate_for(&entry.marks, session.tier, &config);
            let division = division_for(aggregate, &config).map(|d| d.label.clone());
            json!({ "aggregate": aggregate, "division": division })
        })
        .collect();
    let names: Vec<_> = session.roster.iter().map(|s| s.full_name.clone()).collect();

    ok(
        &req.id,
        json!({
            "key": session.key,
            "subjects": session.subjects,
            "students": names,
            "entries": session.entries(),
            "rowStatuses": row_statuses,
            "derived": derived,
            "dirty": session.is_dirty(),
            "canUndo": session.can_undo(),
            "canRedo": session.can_redo(),
            "pending": session.pending,
        }),
    )
}

fn handle_sheet_update_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let row = match require_row(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(subject) = req.params.get("subject").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing subject", None);
    };
    let mark = match req.params.get("mark") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_u64().and_then(|m| u32::try_from(m).ok()) {
            Some(m) => Some(m),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "mark must be a non-negative integer or null",
                    None,
                )
            }
        },
    };

    match session.set_mark(Instant::now(), row, subject, mark) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => edit_error_response(&req.id, e),
    }
}

fn handle_sheet_set_comment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let row = match require_row(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let comment = req
        .params
        .get("comment")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    match session.set_comment(Instant::now(), row, comment) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => edit_error_response(&req.id, e),
    }
}

fn handle_sheet_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let row = match require_row(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .and_then(EntryStatus::parse);
    let Some(status) = status else {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: present, absent, sick",
            None,
        );
    };

    match session.set_status(Instant::now(), row, status) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => edit_error_response(&req.id, e),
    }
}

fn handle_sheet_toggle_lock(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let row = match require_row(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match session.toggle_lock(Instant::now(), row) {
        Ok(locked) => ok(&req.id, json!({ "locked": locked })),
        Err(e) => edit_error_response(&req.id, e),
    }
}

fn handle_sheet_quick_fill(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let Some(subject) = req.params.get("subject").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing subject", None);
    };
    let mark = req
        .params
        .get("mark")
        .and_then(|v| v.as_u64())
        .and_then(|m| u32::try_from(m).ok());
    let Some(mark) = mark else {
        return err(&req.id, "bad_params", "missing/invalid mark", None);
    };

    match session.quick_fill(Instant::now(), subject, mark) {
        Ok(filled) => ok(&req.id, json!({ "filled": filled })),
        Err(e) => edit_error_response(&req.id, e),
    }
}

fn handle_sheet_clear_row(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let row = match require_row(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match session.clear_row(Instant::now(), row) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => edit_error_response(&req.id, e),
    }
}

fn handle_sheet_undo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let changed = session.undo(Instant::now());
    ok(
        &req.id,
        json!({
            "changed": changed,
            "canUndo": session.can_undo(),
            "canRedo": session.can_redo(),
        }),
    )
}

fn handle_sheet_redo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let changed = session.redo(Instant::now());
    ok(
        &req.id,
        json!({
            "changed": changed,
            "canUndo": session.can_undo(),
            "canRedo": session.can_redo(),
        }),
    )
}

fn run_ingestion(
    req: &Request,
    session: &mut EditSession,
    frame: Frame,
) -> serde_json::Value {
    let mapping = match locate_columns(&frame, &ColumnSynonyms::default()) {
        Ok(m) => m,
        Err(e) => return err(&req.id, "header_not_found", e.to_string(), None),
    };

    let locked = session.locked_student_ids();
    let report = ingest::run_import(&frame, &mapping, &session.roster, &locked);
    let summary = report.summary();
    let imported = report.imported;
    let skipped = report.skipped;
    let locked_skipped = report.locked_skipped;

    session.merge_import(Instant::now(), report.entries);
    session.pending = report.pending;

    ok(
        &req.id,
        json!({
            "imported": imported,
            "skipped": skipped,
            "lockedSkipped": locked_skipped,
            "pending": session.pending,
            "message": summary,
        }),
    )
}

fn handle_sheet_import_delimited(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let Some(text) = req.params.get("text").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing text", None);
    };
    let delimiter = req
        .params
        .get("delimiter")
        .and_then(|v| v.as_str())
        .and_then(|s| s.chars().next())
        .unwrap_or(',');

    let frame = match frame::parse_delimited(text, delimiter) {
        Ok(f) => f,
        Err(e) => return err(&req.id, "empty_input", e.to_string(), None),
    };
    run_ingestion(req, session, frame)
}

fn handle_sheet_import_workbook(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let Some(raw) = req.params.get("workbook") else {
        return err(&req.id, "bad_params", "missing workbook", None);
    };
    let payload: WorkbookPayload = match serde_json::from_value(raw.clone()) {
        Ok(p) => p,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid workbook payload: {}", e),
                None,
            )
        }
    };

    let frame = match frame::parse_workbook(&payload) {
        Ok(f) => f,
        Err(e) => return err(&req.id, "empty_input", e.to_string(), None),
    };
    run_ingestion(req, session, frame)
}

fn run_flush(conn: &Connection, session: &mut EditSession) -> serde_json::Value {
    let payload = session.flush_payload();
    match db::upsert_scores(conn, &session.key, &payload) {
        Ok(outcome) => {
            if outcome.succeeded < outcome.requested {
                tracing::warn!(
                    requested = outcome.requested,
                    succeeded = outcome.succeeded,
                    "partial score flush"
                );
            } else {
                tracing::info!(rows = outcome.succeeded, "scores flushed");
            }
            session.apply_flush_outcome(Some(outcome));
            json!({
                "requested": outcome.requested,
                "succeeded": outcome.succeeded,
                "dirty": session.is_dirty(),
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "score flush failed");
            session.apply_flush_outcome(None);
            json!({ "error": e.to_string(), "dirty": session.is_dirty() })
        }
    }
}

/// Cooperative autosave pump. The shell calls this from its idle loop; the
/// debounce decides whether anything actually commits.
fn handle_sheet_tick(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };

    if !session.autosave_due(Instant::now()) {
        return ok(
            &req.id,
            json!({ "flushed": false, "dirty": session.is_dirty() }),
        );
    }
    let mut result = run_flush(conn, session);
    result["flushed"] = json!(true);
    ok(&req.id, result)
}

fn handle_sheet_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };

    session.begin_manual_flush();
    let mut result = run_flush(conn, session);
    result["flushed"] = json!(true);
    ok(&req.id, result)
}

fn handle_sheet_purge(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };

    match db::delete_scores(conn, &session.key, &session.roster) {
        Ok(outcome) => ok(
            &req.id,
            json!({ "requested": outcome.requested, "deleted": outcome.deleted }),
        ),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

/// Teardown without commit. Anything unsaved is gone; a flush beforehand is
/// the shell's responsibility.
fn handle_sheet_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let had_session = state.session.take().is_some();
    ok(&req.id, json!({ "closed": had_session }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sheet.open" => Some(handle_sheet_open(state, req)),
        "sheet.state" => Some(handle_sheet_state(state, req)),
        "sheet.updateCell" => Some(handle_sheet_update_cell(state, req)),
        "sheet.setComment" => Some(handle_sheet_set_comment(state, req)),
        "sheet.setStatus" => Some(handle_sheet_set_status(state, req)),
        "sheet.toggleLock" => Some(handle_sheet_toggle_lock(state, req)),
        "sheet.quickFill" => Some(handle_sheet_quick_fill(state, req)),
        "sheet.clearRow" => Some(handle_sheet_clear_row(state, req)),
        "sheet.undo" => Some(handle_sheet_undo(state, req)),
        "sheet.redo" => Some(handle_sheet_redo(state, req)),
        "sheet.importDelimited" => Some(handle_sheet_import_delimited(state, req)),
        "sheet.importWorkbook" => Some(handle_sheet_import_workbook(state, req)),
        "sheet.tick" => Some(handle_sheet_tick(state, req)),
        "sheet.save" => Some(handle_sheet_save(state, req)),
        "sheet.purge" => Some(handle_sheet_purge(state, req)),
        "sheet.close" => Some(handle_sheet_close(state, req)),
        _ => None,
    }
}
