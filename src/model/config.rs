use serde::{Deserialize, Serialize};

/// Configuration from board.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    pub board: BoardInfo,
    #[serde(default)]
    pub sources: SourceConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardInfo {
    pub name: String,
    /// Current user; alerts are fetched for this recipient
    pub user_id: String,
    /// Terminal/non-active stages left out of stage-mode totals
    #[serde(default)]
    pub excluded_stage_ids: Vec<String>,
}

/// Remote source (table) names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_projects")]
    pub projects: String,
    #[serde(default = "default_stages")]
    pub stages: String,
    #[serde(default = "default_tranches")]
    pub tranches: String,
    #[serde(default = "default_alerts")]
    pub alerts: String,
    #[serde(default = "default_activity")]
    pub activity: String,
    /// Failed-operation log
    #[serde(default = "default_errors")]
    pub errors: String,
    #[serde(default = "default_users")]
    pub users: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            projects: default_projects(),
            stages: default_stages(),
            tranches: default_tranches(),
            alerts: default_alerts(),
            activity: default_activity(),
            errors: default_errors(),
            users: default_users(),
        }
    }
}

fn default_projects() -> String {
    "projects".into()
}

fn default_stages() -> String {
    "stages".into()
}

fn default_tranches() -> String {
    "tranches".into()
}

fn default_alerts() -> String {
    "alerts".into()
}

fn default_activity() -> String {
    "activity".into()
}

fn default_errors() -> String {
    "error_log".into()
}

fn default_users() -> String {
    "users".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            poll_interval_secs: default_poll_interval(),
            page_size: default_page_size(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_page_size() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Local fixture store, relative to the board/ directory
    #[serde(default = "default_store_file")]
    pub file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            file: default_store_file(),
        }
    }
}

fn default_store_file() -> String {
    "store.json".into()
}
