use std::path::PathBuf;

use crate::session::EditSession;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// At most one live edit surface; opening a sheet replaces it wholesale.
    pub session: Option<EditSession>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            db: None,
            session: None,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new()
    }
}
