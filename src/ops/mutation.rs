//! Optimistic reassignment of an item's stage or tranche.
//!
//! A move is applied to the board immediately, confirmed against the remote
//! store, and either committed or rolled back to the exact reference it
//! replaced. Stage and tranche moves share one flow, parameterized by a
//! [`FieldBinding`].

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};

use crate::io::remote::{FieldPatch, RemoteError, RemoteStore, patch_of};
use crate::model::config::SourceConfig;
use crate::model::item::{Assignment, Item};
use crate::model::lookup::{Lookups, UNASSIGNED_LABEL};
use crate::model::notice::{Notifier, Toast, ToastLevel};
use crate::ops::background::BestEffort;
use crate::ops::board::{Board, SharedBoard, lock_board};
use crate::ops::view::UNASSIGNED_COLUMN;

/// Which reference a move reassigns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Stage,
    Tranche,
}

impl fmt::Display for MoveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveKind::Stage => write!(f, "stage"),
            MoveKind::Tranche => write!(f, "tranche"),
        }
    }
}

/// How one reassignable reference is read, written, resolved and persisted.
pub struct FieldBinding {
    pub kind: MoveKind,
    /// Foreign-key field sent to the remote store
    pub remote_field: &'static str,
    /// Whether `None` ("unassigned") is a valid target
    pub allows_unassigned: bool,
    get: fn(&Item) -> Option<&Assignment>,
    set: fn(&mut Item, Option<Assignment>),
    resolve: fn(&Lookups, &str) -> Option<Assignment>,
}

impl fmt::Debug for FieldBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldBinding")
            .field("kind", &self.kind)
            .field("remote_field", &self.remote_field)
            .finish()
    }
}

fn get_stage(item: &Item) -> Option<&Assignment> {
    item.stage.as_ref()
}

fn set_stage(item: &mut Item, value: Option<Assignment>) {
    item.stage = value;
}

fn resolve_stage(lookups: &Lookups, id: &str) -> Option<Assignment> {
    lookups.stage(id).map(|s| s.assignment())
}

fn get_tranche(item: &Item) -> Option<&Assignment> {
    item.tranche.as_ref()
}

fn set_tranche(item: &mut Item, value: Option<Assignment>) {
    item.tranche = value;
}

fn resolve_tranche(lookups: &Lookups, id: &str) -> Option<Assignment> {
    lookups.tranche(id).map(|t| t.assignment())
}

pub static STAGE_BINDING: FieldBinding = FieldBinding {
    kind: MoveKind::Stage,
    remote_field: "stage_id",
    allows_unassigned: false,
    get: get_stage,
    set: set_stage,
    resolve: resolve_stage,
};

pub static TRANCHE_BINDING: FieldBinding = FieldBinding {
    kind: MoveKind::Tranche,
    remote_field: "tranche_id",
    allows_unassigned: true,
    get: get_tranche,
    set: set_tranche,
    resolve: resolve_tranche,
};

/// Display label of a reference, with the kind's wording for "none".
pub fn assignment_label(kind: &MoveKind, value: &Option<Assignment>) -> String {
    match (value, kind) {
        (Some(a), _) => a.label.clone(),
        (None, MoveKind::Tranche) => UNASSIGNED_LABEL.to_string(),
        (None, MoveKind::Stage) => "no stage".to_string(),
    }
}

/// Map a user-supplied tranche target; the `unassigned` column key clears it.
pub fn tranche_target(raw: &str) -> Option<&str> {
    if raw.eq_ignore_ascii_case(UNASSIGNED_COLUMN) {
        None
    } else {
        Some(raw)
    }
}

/// Error type for move requests
#[derive(Debug, thiserror::Error)]
pub enum MoveError {
    #[error("item not found: {0}")]
    UnknownItem(String),
    #[error("unknown {kind}: {id}")]
    UnknownTarget { kind: MoveKind, id: String },
    #[error("a {kind} is required")]
    TargetRequired { kind: MoveKind },
    #[error("a move for {0} is already in progress")]
    InFlight(String),
    #[error("moving {item_id} failed ({source}); reverted to {}", assignment_label(.kind, .restored))]
    Remote {
        item_id: String,
        kind: MoveKind,
        restored: Option<Assignment>,
        source: RemoteError,
    },
}

impl MoveError {
    /// Validation failures are rejected before anything changes locally.
    pub fn is_validation(&self) -> bool {
        !matches!(self, MoveError::Remote { .. })
    }
}

/// Result of a move that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Target equals the current assignment; nothing was sent
    Unchanged,
    Committed {
        from: Option<Assignment>,
        to: Option<Assignment>,
    },
}

/// A reassignment applied locally and awaiting remote confirmation.
#[derive(Debug)]
pub struct PendingMove {
    binding: &'static FieldBinding,
    pub item_id: String,
    pub item_name: String,
    /// The reference replaced by the optimistic write; `None` is a real value
    pub previous: Option<Assignment>,
    pub target: Option<Assignment>,
}

/// What `begin_move` decided
#[derive(Debug)]
pub enum Begin {
    Unchanged,
    Pending(PendingMove),
}

/// Validate a move and apply it to the board.
///
/// On success the item already shows the target and is marked in flight;
/// the caller must finish with [`PendingMove::commit`] or
/// [`PendingMove::rollback`].
pub fn begin_move(
    board: &mut Board,
    binding: &'static FieldBinding,
    item_id: &str,
    target_id: Option<&str>,
) -> Result<Begin, MoveError> {
    let target = match target_id {
        Some(id) => Some((binding.resolve)(board.lookups(), id).ok_or_else(|| {
            MoveError::UnknownTarget {
                kind: binding.kind,
                id: id.to_string(),
            }
        })?),
        None if binding.allows_unassigned => None,
        None => return Err(MoveError::TargetRequired { kind: binding.kind }),
    };

    let item = board
        .item(item_id)
        .ok_or_else(|| MoveError::UnknownItem(item_id.to_string()))?;
    let previous = (binding.get)(item).cloned();
    if previous.as_ref().map(|a| &a.id) == target.as_ref().map(|a| &a.id) {
        return Ok(Begin::Unchanged);
    }
    let item_name = item.display_name().to_string();

    if !board.mark_in_flight(item_id) {
        return Err(MoveError::InFlight(item_id.to_string()));
    }
    if let Some(item) = board.item_mut(item_id) {
        (binding.set)(item, target.clone());
    }
    tracing::debug!(
        item = item_id,
        kind = %binding.kind,
        from = ?previous.as_ref().map(|a| &a.id),
        to = ?target.as_ref().map(|a| &a.id),
        "applied optimistic move"
    );

    Ok(Begin::Pending(PendingMove {
        binding,
        item_id: item_id.to_string(),
        item_name,
        previous,
        target,
    }))
}

impl PendingMove {
    pub fn kind(&self) -> MoveKind {
        self.binding.kind
    }

    /// The single-field patch confirming this move remotely.
    pub fn patch(&self) -> FieldPatch {
        let value = match &self.target {
            Some(a) => Value::String(a.id.clone()),
            None => Value::Null,
        };
        patch_of(self.binding.remote_field, value)
    }

    pub fn commit(self, board: &mut Board) -> MoveOutcome {
        board.clear_in_flight(&self.item_id);
        tracing::info!(item = %self.item_id, kind = %self.binding.kind, "move committed");
        MoveOutcome::Committed {
            from: self.previous,
            to: self.target,
        }
    }

    /// Put back the exact reference (id and label) captured before the move.
    pub fn rollback(self, board: &mut Board, source: RemoteError) -> MoveError {
        board.clear_in_flight(&self.item_id);
        match board.item_mut(&self.item_id) {
            Some(item) => (self.binding.set)(item, self.previous.clone()),
            None => tracing::warn!(item = %self.item_id, "item vanished before rollback"),
        }
        tracing::warn!(
            item = %self.item_id,
            kind = %self.binding.kind,
            error = %source,
            "move rejected by remote, rolled back"
        );
        MoveError::Remote {
            item_id: self.item_id,
            kind: self.binding.kind,
            restored: self.previous,
            source,
        }
    }
}

/// Drives moves end to end: optimistic apply, remote confirm, commit or
/// rollback, toasts, and the activity record.
pub struct MoveEngine {
    board: SharedBoard,
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
    background: BestEffort,
    projects_source: String,
    activity_source: String,
    errors_source: String,
    user_id: String,
}

impl MoveEngine {
    pub fn new(
        board: SharedBoard,
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
        sources: &SourceConfig,
        user_id: impl Into<String>,
    ) -> Self {
        MoveEngine {
            board,
            remote,
            notifier,
            background: BestEffort::new(),
            projects_source: sources.projects.clone(),
            activity_source: sources.activity.clone(),
            errors_source: sources.errors.clone(),
            user_id: user_id.into(),
        }
    }

    pub fn board(&self) -> &SharedBoard {
        &self.board
    }

    /// Background writes launched by this engine (activity and error logs).
    pub fn background(&self) -> &BestEffort {
        &self.background
    }

    pub async fn request_stage_move(
        &self,
        item_id: &str,
        stage_id: &str,
    ) -> Result<MoveOutcome, MoveError> {
        self.request_move(&STAGE_BINDING, item_id, Some(stage_id))
            .await
    }

    /// `None` moves the item to the unassigned column.
    pub async fn request_tranche_move(
        &self,
        item_id: &str,
        tranche_id: Option<&str>,
    ) -> Result<MoveOutcome, MoveError> {
        self.request_move(&TRANCHE_BINDING, item_id, tranche_id)
            .await
    }

    async fn request_move(
        &self,
        binding: &'static FieldBinding,
        item_id: &str,
        target_id: Option<&str>,
    ) -> Result<MoveOutcome, MoveError> {
        let begun = {
            let mut board = lock_board(&self.board);
            begin_move(&mut board, binding, item_id, target_id)
        };
        let pending = match begun {
            Ok(Begin::Pending(pending)) => pending,
            Ok(Begin::Unchanged) => return Ok(MoveOutcome::Unchanged),
            Err(e) => {
                self.notifier.notify(Toast::new(
                    ToastLevel::Error,
                    "Move not possible",
                    format!("Could not move {}: {}", item_id, e),
                ));
                return Err(e);
            }
        };

        let kind = binding.kind;
        let target_label = assignment_label(&kind, &pending.target);
        self.notifier.notify(Toast::new(
            ToastLevel::Info,
            "Moving",
            format!("{}: {} → {}", pending.item_name, kind, target_label),
        ));

        let patch = pending.patch();
        let result = self
            .remote
            .update_record(&self.projects_source, item_id, &patch)
            .await;

        match result {
            Ok(()) => {
                let item_name = pending.item_name.clone();
                let outcome = {
                    let mut board = lock_board(&self.board);
                    pending.commit(&mut board)
                };
                self.notifier.notify(Toast::new(
                    ToastLevel::Success,
                    "Moved",
                    format!("{} moved to {} {}", item_name, kind, target_label),
                ));
                if let MoveOutcome::Committed { from, to } = &outcome {
                    self.record_activity(item_id, binding, from, to);
                }
                Ok(outcome)
            }
            Err(source) => {
                let item_name = pending.item_name.clone();
                let err = {
                    let mut board = lock_board(&self.board);
                    pending.rollback(&mut board, source)
                };
                if let MoveError::Remote {
                    restored, source, ..
                } = &err
                {
                    self.notifier.notify(Toast::new(
                        ToastLevel::Error,
                        "Move failed",
                        format!(
                            "Could not move {} to {} {} ({}). Reverted to {}.",
                            item_name,
                            kind,
                            target_label,
                            source,
                            assignment_label(&kind, restored)
                        ),
                    ));
                    self.record_error(item_id, binding, source);
                }
                Err(err)
            }
        }
    }

    fn record_activity(
        &self,
        item_id: &str,
        binding: &FieldBinding,
        from: &Option<Assignment>,
        to: &Option<Assignment>,
    ) {
        let record = json!({
            "project_id": item_id,
            "field": binding.remote_field,
            "from_id": from.as_ref().map(|a| a.id.clone()),
            "from_label": assignment_label(&binding.kind, from),
            "to_id": to.as_ref().map(|a| a.id.clone()),
            "to_label": assignment_label(&binding.kind, to),
            "user_id": self.user_id,
            "at": Utc::now().to_rfc3339(),
        });
        self.spawn_create(format!("activity {}", item_id), &self.activity_source, record);
    }

    fn record_error(&self, item_id: &str, binding: &FieldBinding, error: &RemoteError) {
        let record = json!({
            "project_id": item_id,
            "operation": format!("move {}", binding.kind),
            "code": error.code,
            "message": error.message,
            "user_id": self.user_id,
            "at": Utc::now().to_rfc3339(),
        });
        self.spawn_create(format!("error log {}", item_id), &self.errors_source, record);
    }

    fn spawn_create(&self, label: String, source: &str, record: Value) {
        let Value::Object(patch) = record else {
            return;
        };
        let remote = self.remote.clone();
        let source = source.to_string();
        self.background.spawn(label, async move {
            remote.create_record(&source, &patch).await
        });
    }
}
