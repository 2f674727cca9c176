use serde::{Deserialize, Serialize};

/// A user-facing alert, created and owned by the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(default)]
    pub is_read: bool,
    /// Alert type ("stage_change", "note", ...)
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Related project, for navigation
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}
