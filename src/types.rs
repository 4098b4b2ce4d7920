//! Core types shared by the watcher and the receiver

use serde::{Deserialize, Serialize};

/// Kind of a filesystem change, after classification of raw watcher events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    /// A file appeared
    Add,
    /// A file's contents changed
    Change,
    /// A file was removed
    Unlink,
    /// A directory appeared
    AddDir,
    /// A directory was removed
    UnlinkDir,
}

impl ChangeKind {
    /// Removals are logged only; they never reach the remote side
    pub fn is_removal(&self) -> bool {
        matches!(self, ChangeKind::Unlink | ChangeKind::UnlinkDir)
    }

    /// Whether a fired debounce for this kind should transfer the file
    pub fn is_transferable(&self) -> bool {
        matches!(self, ChangeKind::Add | ChangeKind::Change)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Change => "change",
            ChangeKind::Unlink => "unlink",
            ChangeKind::AddDir => "addDir",
            ChangeKind::UnlinkDir => "unlinkDir",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse state of the watcher engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    #[default]
    Starting,
    Running,
    Stopped,
}

/// Body of every `POST /files` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    pub fn ok(relative_path: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some("File received successfully".to_string()),
            path: Some(relative_path.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            path: None,
            error: Some(error.into()),
        }
    }
}
