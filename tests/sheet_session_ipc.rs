use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_marksheetd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn marksheetd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn open_sheet(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str) {
    let _ = request_ok(
        stdin,
        reader,
        id,
        "sheet.open",
        json!({
            "classLevel": "P6",
            "stream": "A",
            "term": 1,
            "year": 2025,
            "assessment": "MID"
        }),
    );
}

#[test]
fn grid_edits_undo_redo_and_persistence_roundtrip() {
    let workspace = temp_dir("marksheet-session");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.upsert",
        json!({ "students": [
            { "fullName": "Grace Akello", "classLevel": "P6", "stream": "A" },
            { "fullName": "John Mary Okot", "classLevel": "P6", "stream": "A" }
        ]}),
    );
    open_sheet(&mut stdin, &mut reader, "3");

    // Roster order is by name: row 0 Grace, row 1 John.
    let state = request_ok(&mut stdin, &mut reader, "4", "sheet.state", json!({}));
    let students = state.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(students[0], json!("Grace Akello"));
    assert_eq!(students[1], json!("John Mary Okot"));
    assert_eq!(state.get("dirty"), Some(&json!(false)));
    assert_eq!(state.get("canUndo"), Some(&json!(false)));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sheet.updateCell",
        json!({ "row": 1, "subject": "ENG", "mark": 78 }),
    );
    let state = request_ok(&mut stdin, &mut reader, "6", "sheet.state", json!({}));
    assert_eq!(
        state.pointer("/entries/1/marks/ENG"),
        Some(&json!(78)),
        "mark landed"
    );
    assert_eq!(state.pointer("/rowStatuses/1"), Some(&json!("partial")));
    assert_eq!(state.get("dirty"), Some(&json!(true)));
    assert_eq!(state.get("canUndo"), Some(&json!(true)));

    // Undo reverts to the pre-mutation state, redo restores it exactly.
    let undo = request_ok(&mut stdin, &mut reader, "7", "sheet.undo", json!({}));
    assert_eq!(undo.get("changed"), Some(&json!(true)));
    let state = request_ok(&mut stdin, &mut reader, "8", "sheet.state", json!({}));
    assert_eq!(state.pointer("/entries/1/marks/ENG"), None);
    assert_eq!(state.pointer("/rowStatuses/1"), Some(&json!("empty")));

    let redo = request_ok(&mut stdin, &mut reader, "9", "sheet.redo", json!({}));
    assert_eq!(redo.get("changed"), Some(&json!(true)));
    let state = request_ok(&mut stdin, &mut reader, "10", "sheet.state", json!({}));
    assert_eq!(state.pointer("/entries/1/marks/ENG"), Some(&json!(78)));

    // Absence clears marks and classifies the row.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "sheet.setStatus",
        json!({ "row": 0, "status": "absent" }),
    );
    let state = request_ok(&mut stdin, &mut reader, "12", "sheet.state", json!({}));
    assert_eq!(state.pointer("/rowStatuses/0"), Some(&json!("absent")));

    // Locked rows reject edits until unlocked.
    let lock = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "sheet.toggleLock",
        json!({ "row": 1 }),
    );
    assert_eq!(lock.get("locked"), Some(&json!(true)));
    let rejected = request(
        &mut stdin,
        &mut reader,
        "14",
        "sheet.updateCell",
        json!({ "row": 1, "subject": "MTC", "mark": 50 }),
    );
    assert_eq!(rejected.get("ok"), Some(&json!(false)));
    assert_eq!(
        rejected.pointer("/error/code"),
        Some(&json!("locked")),
        "{}",
        rejected
    );

    // Manual save flushes everything worth persisting and goes Clean.
    let saved = request_ok(&mut stdin, &mut reader, "15", "sheet.save", json!({}));
    assert_eq!(saved.get("flushed"), Some(&json!(true)));
    assert_eq!(saved.get("requested"), Some(&json!(2)));
    assert_eq!(saved.get("succeeded"), Some(&json!(2)));
    assert_eq!(saved.get("dirty"), Some(&json!(false)));

    // Reopening the same sheet loads the stored snapshot.
    open_sheet(&mut stdin, &mut reader, "16");
    let state = request_ok(&mut stdin, &mut reader, "17", "sheet.state", json!({}));
    assert_eq!(state.pointer("/entries/1/marks/ENG"), Some(&json!(78)));
    assert_eq!(state.pointer("/entries/1/locked"), Some(&json!(true)));
    assert_eq!(state.pointer("/rowStatuses/0"), Some(&json!("absent")));
    assert_eq!(state.get("dirty"), Some(&json!(false)));
    assert_eq!(state.get("canUndo"), Some(&json!(false)));

    // Quick fill skips locked and absent rows.
    let filled = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "sheet.quickFill",
        json!({ "subject": "MTC", "mark": 40 }),
    );
    assert_eq!(filled.get("filled"), Some(&json!(0)));

    // Purge reports honest counts.
    let purged = request_ok(&mut stdin, &mut reader, "19", "sheet.purge", json!({}));
    assert_eq!(purged.get("requested"), Some(&json!(2)));
    assert_eq!(purged.get("deleted"), Some(&json!(2)));
    let purged = request_ok(&mut stdin, &mut reader, "20", "sheet.purge", json!({}));
    assert_eq!(purged.get("requested"), Some(&json!(0)));

    let _ = std::fs::remove_dir_all(workspace);
}
