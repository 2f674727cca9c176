use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::io::remote::{Criteria, Record, RemoteError, RemoteStore};
use crate::io::state::UserProfile;
use crate::model::config::BoardConfig;
use crate::model::item::{Item, ItemRecord};
use crate::model::lookup::{Lookups, Stage, Tranche};
use crate::ops::board::Board;

const LOAD_PAGE_SIZE: usize = 500;

/// Error type for loading board data from the remote store
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("remote error while loading {source_name}: {error}")]
    Remote {
        source_name: String,
        error: RemoteError,
    },
    #[error("user {0} not found")]
    UnknownUser(String),
}

/// Fetch every record of `source` matching `criteria`, following cursors.
pub async fn fetch_all(
    remote: &dyn RemoteStore,
    source: &str,
    criteria: &Criteria,
) -> Result<Vec<Record>, LoadError> {
    let mut records = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = remote
            .query_records(source, criteria, LOAD_PAGE_SIZE, cursor.as_deref())
            .await
            .map_err(|error| LoadError::Remote {
                source_name: source.to_string(),
                error,
            })?;
        records.extend(page.records);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    tracing::debug!(source, count = records.len(), "fetched records");
    Ok(records)
}

/// Decode records, dropping (and logging) the ones that don't fit `T`.
fn decode<T: DeserializeOwned>(source: &str, records: Vec<Record>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|r| match serde_json::from_value(Value::Object(r)) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(source, error = %e, "skipping malformed record");
                None
            }
        })
        .collect()
}

/// Denormalize item records against the lookups. Foreign keys that don't
/// resolve become unassigned and are logged.
pub fn denormalize(records: Vec<ItemRecord>, lookups: &Lookups) -> Vec<Item> {
    records
        .into_iter()
        .map(|rec| {
            let stage = rec.stage_id.as_deref().and_then(|id| {
                let found = lookups.stage(id).map(|s| s.assignment());
                if found.is_none() {
                    tracing::warn!(item = %rec.id, stage_id = id, "unknown stage, item left without one");
                }
                found
            });
            let tranche = rec.tranche_id.as_deref().and_then(|id| {
                let found = lookups.tranche(id).map(|t| t.assignment());
                if found.is_none() {
                    tracing::warn!(item = %rec.id, tranche_id = id, "unknown tranche, item left unassigned");
                }
                found
            });
            rec.into_item(stage, tranche)
        })
        .collect()
}

/// Load lookups and items into a fresh board.
pub async fn load_board(remote: &dyn RemoteStore, config: &BoardConfig) -> Result<Board, LoadError> {
    let sources = &config.sources;
    let stages: Vec<Stage> = decode(
        &sources.stages,
        fetch_all(remote, &sources.stages, &Criteria::all()).await?,
    );
    let tranches: Vec<Tranche> = decode(
        &sources.tranches,
        fetch_all(remote, &sources.tranches, &Criteria::all()).await?,
    );
    let lookups = Lookups::new(stages, tranches);

    let records: Vec<ItemRecord> = decode(
        &sources.projects,
        fetch_all(remote, &sources.projects, &Criteria::all()).await?,
    );
    let items = denormalize(records, &lookups);
    tracing::info!(
        items = items.len(),
        stages = lookups.stages().len(),
        tranches = lookups.tranches().len(),
        "board loaded"
    );
    Ok(Board::new(
        items,
        lookups,
        config.board.excluded_stage_ids.clone(),
    ))
}

/// Fetch the configured user's profile.
pub async fn fetch_profile(
    remote: &dyn RemoteStore,
    config: &BoardConfig,
) -> Result<UserProfile, LoadError> {
    let user_id = &config.board.user_id;
    let criteria = Criteria::all().eq("id", user_id.as_str());
    let records = fetch_all(remote, &config.sources.users, &criteria).await?;
    decode::<UserProfile>(&config.sources.users, records)
        .into_iter()
        .next()
        .ok_or_else(|| LoadError::UnknownUser(user_id.clone()))
}
