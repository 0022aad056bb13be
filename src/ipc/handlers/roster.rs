use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::roster::StudentRecord;
use serde_json::json;
use std::time::Instant;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn handle_roster_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_level = match get_required_str(&req.params, "classLevel") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let stream = match get_required_str(&req.params, "stream") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match db::list_roster(conn, &class_level, &stream) {
        Ok(roster) => {
            let count = roster.len();
            ok(&req.id, json!({ "students": roster, "count": count }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_roster_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(students) = req.params.get("students").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing students[]", None);
    };

    let mut upserted = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (i, raw) in students.iter().enumerate() {
        let full_name = raw.get("fullName").and_then(|v| v.as_str());
        let class_level = raw.get("classLevel").and_then(|v| v.as_str());
        let stream = raw.get("stream").and_then(|v| v.as_str());
        let (Some(full_name), Some(class_level), Some(stream)) = (full_name, class_level, stream)
        else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "student needs fullName, classLevel, stream",
            }));
            continue;
        };

        let student = StudentRecord {
            id: raw
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            full_name: full_name.to_string(),
            index_number: raw
                .get("indexNumber")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            class_level: class_level.to_string(),
            stream: stream.to_string(),
        };
        match db::upsert_student(conn, &student) {
            Ok(()) => upserted += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "code": "db_insert_failed",
                "message": e.to_string(),
            })),
        }
    }

    let mut result = json!({ "upserted": upserted });
    if !errors.is_empty() {
        result["errors"] = json!(errors);
    }
    ok(&req.id, result)
}

/// The manual path for unmatched import rows: create the student, hand their
/// queued marks to the live sheet. Imports never do this on their own.
fn handle_roster_confirm_pending(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a sheet first", None);
    };
    let Some(index) = req.params.get("pendingIndex").and_then(|v| v.as_u64()) else {
        return err(&req.id, "bad_params", "missing pendingIndex", None);
    };
    let index = index as usize;
    let Some(pending) = session.pending.get(index) else {
        return err(
            &req.id,
            "not_found",
            "no pending student at that index",
            Some(json!({ "pendingIndex": index })),
        );
    };

    let student = match db::insert_student(
        conn,
        &pending.name,
        pending.index_number.as_deref(),
        &session.key.class_level,
        &session.key.stream,
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    let student_id = student.id.clone();
    if let Err(e) = session.confirm_pending(Instant::now(), index, student) {
        return err(&req.id, "not_found", e.to_string(), None);
    }
    tracing::info!(student = %student_id, "pending student confirmed");
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "pendingRemaining": session.pending.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.list" => Some(handle_roster_list(state, req)),
        "roster.upsert" => Some(handle_roster_upsert(state, req)),
        "roster.confirmPending" => Some(handle_roster_confirm_pending(state, req)),
        _ => None,
    }
}
