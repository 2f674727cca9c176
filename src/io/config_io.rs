use std::fs;
use std::path::{Path, PathBuf};

use crate::model::config::BoardConfig;

/// Name of the directory that marks a board root
pub const BOARD_DIR: &str = "board";
const CONFIG_FILE: &str = "board.toml";
const CACHE_FILE: &str = ".cache.json";

/// Error type for locating and reading board configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("not a board directory: no board/board.toml found")]
    NotABoard,
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse board.toml: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// A located board: its root, its `board/` directory and parsed config.
#[derive(Debug, Clone)]
pub struct BoardHome {
    pub root: PathBuf,
    pub board_dir: PathBuf,
    pub config: BoardConfig,
}

impl BoardHome {
    pub fn store_path(&self) -> PathBuf {
        self.board_dir.join(&self.config.store.file)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.board_dir.join(CACHE_FILE)
    }
}

/// Walk up from `start` looking for a `board/board.toml`.
pub fn discover_board(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start.to_path_buf();
    loop {
        let board_dir = current.join(BOARD_DIR);
        if board_dir.is_dir() && board_dir.join(CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(ConfigError::NotABoard);
        }
    }
}

/// Read `board.toml` from a board directory.
pub fn read_config(board_dir: &Path) -> Result<BoardConfig, ConfigError> {
    let config_path = board_dir.join(CONFIG_FILE);
    let text = fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;
    Ok(toml::from_str(&text)?)
}

/// Discover and load the board containing `start`.
pub fn load_home(start: &Path) -> Result<BoardHome, ConfigError> {
    let root = discover_board(start)?;
    let board_dir = root.join(BOARD_DIR);
    let config = read_config(&board_dir)?;
    Ok(BoardHome {
        root,
        board_dir,
        config,
    })
}
