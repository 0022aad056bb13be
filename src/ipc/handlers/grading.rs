use crate::db;
use crate::grading::{
    aggregate_for, division_for, grade_for, validate_config, ClassTier, GradingConfig,
};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::collections::BTreeMap;

fn handle_grading_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match db::load_grading_config(conn) {
        Ok(config) => ok(&req.id, json!({ "config": config })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grading_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = req.params.get("config") else {
        return err(&req.id, "bad_params", "missing config", None);
    };
    let config: GradingConfig = match serde_json::from_value(raw.clone()) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "bad_params", format!("invalid config: {}", e), None),
    };
    if let Err(e) = validate_config(&config) {
        return err(&req.id, &e.code, e.message, None);
    }
    match db::save_grading_config(conn, &config) {
        Ok(()) => {
            tracing::info!("grading configuration replaced");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

/// Pure derivation for a marks map: per-subject grade labels, the aggregate,
/// and the division band. Never fails on missing or odd marks; those come
/// back as the ungraded sentinels.
fn handle_grading_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let config = match db::load_grading_config(conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let class_level = req
        .params
        .get("classLevel")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let tier = ClassTier::from_class_level(class_level);

    let mut marks: BTreeMap<String, Option<u32>> = BTreeMap::new();
    if let Some(raw) = req.params.get("marks").and_then(|v| v.as_object()) {
        for (subject, value) in raw {
            let mark = value.as_u64().and_then(|m| {
                if m <= 100 {
                    Some(m as u32)
                } else {
                    None
                }
            });
            marks.insert(subject.clone(), mark);
        }
    }

    let grades: BTreeMap<String, Option<String>> = marks
        .iter()
        .map(|(subject, mark)| {
            (
                subject.clone(),
                grade_for(*mark, &config).map(|b| b.label.clone()),
            )
        })
        .collect();
    let aggregate = aggregate_for(&marks, tier, &config);
    let division = division_for(aggregate, &config).map(|d| d.label.clone());

    ok(
        &req.id,
        json!({
            "grades": grades,
            "aggregate": aggregate,
            "division": division,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.get" => Some(handle_grading_get(state, req)),
        "grading.set" => Some(handle_grading_set(state, req)),
        "grading.compute" => Some(handle_grading_compute(state, req)),
        _ => None,
    }
}
