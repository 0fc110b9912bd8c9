use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line: `{ "id", "method", "params" }`. Method names are
/// `family.operation`, e.g. `students.create` or `reports.classReport`.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The database handle is opened lazily by `workspace.select` and reused for
/// every following request.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
