//! Derived views of the item collection: filter, sort, group, aggregate.
//!
//! Everything here is a pure function of its inputs. Callers recompute
//! whenever the collection, filter, sort or mode changes.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::Serialize;

use crate::model::item::Item;
use crate::model::lookup::{Lookups, UNASSIGNED_LABEL};
use crate::model::view_state::{
    BoardViewMode, FilterState, SortDirection, SortField, SortKind, SortState,
};

/// Column key for items without a tranche
pub const UNASSIGNED_COLUMN: &str = "unassigned";

/// Everything a view is computed from
#[derive(Debug, Clone, Copy)]
pub struct ViewInput<'a> {
    pub items: &'a [Item],
    pub lookups: &'a Lookups,
    pub filter: &'a FilterState,
    pub sort: &'a SortState,
    pub mode: BoardViewMode,
    /// Sub-board selector; stage mode only shows stages with this `view`
    pub stage_view: Option<&'a str>,
    pub duplicates: &'a HashSet<String>,
    /// Stages left out of stage-mode totals
    pub excluded_stage_ids: &'a [String],
}

/// One board column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub key: String,
    pub label: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnStats {
    pub count: usize,
    pub capacity_kw: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoardStats {
    pub visible_count: usize,
    /// Items that contributed to `total_capacity_kw` under the mode's rule
    pub counted_items: usize,
    pub total_capacity_kw: f64,
    pub per_column: IndexMap<String, ColumnStats>,
}

/// Result of running the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedView {
    pub visible: Vec<Item>,
    pub columns: IndexMap<String, Column>,
    pub stats: BoardStats,
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Text fields searched by `search_term`.
fn search_fields(item: &Item) -> [Option<&str>; 7] {
    [
        item.owner_name.as_deref(),
        item.address.as_deref(),
        item.city.as_deref(),
        item.state.as_deref(),
        item.zip.as_deref(),
        item.sales_rep.as_deref(),
        item.external_id.as_deref(),
    ]
}

fn in_set(set: &std::collections::BTreeSet<String>, value: Option<&str>) -> bool {
    value.is_some_and(|v| set.contains(v))
}

/// Whether an item passes every active predicate. An empty or unset
/// predicate never excludes.
pub fn matches_filter(item: &Item, filter: &FilterState, duplicates: &HashSet<String>) -> bool {
    let term = filter.search_term.trim();
    if !term.is_empty() {
        let needle = term.to_lowercase();
        let hit = search_fields(item)
            .iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle));
        if !hit {
            return false;
        }
    }
    if !filter.tag_ids.is_empty() && item.tags.is_disjoint(&filter.tag_ids) {
        return false;
    }
    if !filter.work_required_flags.is_empty()
        && item.work_flags.is_disjoint(&filter.work_required_flags)
    {
        return false;
    }
    if !filter.sales_rep_names.is_empty()
        && !in_set(&filter.sales_rep_names, item.sales_rep.as_deref())
    {
        return false;
    }
    if !filter.sales_org_names.is_empty()
        && !in_set(&filter.sales_org_names, item.sales_org.as_deref())
    {
        return false;
    }
    if !filter.project_types.is_empty()
        && !in_set(&filter.project_types, item.project_type.as_deref())
    {
        return false;
    }
    if let Some(want) = filter.cash_deal
        && item.cash_deal.unwrap_or(false) != want
    {
        return false;
    }
    if let Some(want) = filter.need_help
        && item.need_help.unwrap_or(false) != want
    {
        return false;
    }
    if filter.only_duplicates && !duplicates.contains(&item.id) {
        return false;
    }
    true
}

pub fn filter_items(
    items: &[Item],
    filter: &FilterState,
    duplicates: &HashSet<String>,
) -> Vec<Item> {
    items
        .iter()
        .filter(|item| matches_filter(item, filter, duplicates))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

/// Epoch milliseconds for a date-like string. Anything unparsable is 0, so
/// it sorts as the earliest date.
pub fn date_millis(raw: Option<&str>) -> i64 {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return 0;
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.timestamp_millis();
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return dt.and_utc().timestamp_millis();
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt)
            && let Some(dt) = d.and_hms_opt(0, 0, 0)
        {
            return dt.and_utc().timestamp_millis();
        }
    }
    0
}

fn numeric_value(item: &Item, field: SortField, lookups: &Lookups) -> f64 {
    match field {
        SortField::CapacityKw => item.capacity_kw.unwrap_or(0.0),
        SortField::Yield => item.yield_kwh.unwrap_or(0.0),
        SortField::Tranche => lookups.tranche_number(item.tranche_id()) as f64,
        _ => 0.0,
    }
}

fn date_value(item: &Item, field: SortField) -> i64 {
    let raw = match field {
        SortField::AddedAt => item.added_at.as_deref(),
        SortField::ModifiedAt => item.modified_at.as_deref(),
        SortField::SoldAt => item.sold_at.as_deref(),
        _ => None,
    };
    date_millis(raw)
}

fn text_value(item: &Item, field: SortField) -> String {
    let raw = match field {
        SortField::OwnerName => item.owner_name.as_deref(),
        SortField::Address => item.address.as_deref(),
        SortField::City => item.city.as_deref(),
        SortField::SalesRep => item.sales_rep.as_deref(),
        SortField::ExternalId => item.external_id.as_deref(),
        SortField::Stage => item.stage.as_ref().map(|s| s.label.as_str()),
        _ => None,
    };
    raw.unwrap_or("").to_lowercase()
}

/// Single-key comparison for `sort`. No tiebreaker.
pub fn compare_items(a: &Item, b: &Item, sort: &SortState, lookups: &Lookups) -> Ordering {
    let ord = match sort.field.kind() {
        SortKind::Numeric => numeric_value(a, sort.field, lookups)
            .total_cmp(&numeric_value(b, sort.field, lookups)),
        SortKind::Date => date_value(a, sort.field).cmp(&date_value(b, sort.field)),
        SortKind::Text => text_value(a, sort.field).cmp(&text_value(b, sort.field)),
    };
    match sort.direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

pub fn sort_items(items: &mut [Item], sort: &SortState, lookups: &Lookups) {
    items.sort_by(|a, b| compare_items(a, b, sort, lookups));
}

// ---------------------------------------------------------------------------
// Grouping and aggregates
// ---------------------------------------------------------------------------

/// Empty columns for the current mode, in display order.
fn empty_columns(
    lookups: &Lookups,
    mode: BoardViewMode,
    stage_view: Option<&str>,
) -> IndexMap<String, Column> {
    let mut columns = IndexMap::new();
    match mode {
        BoardViewMode::ByStage => {
            for stage in lookups.stages() {
                if stage_view.is_some_and(|v| stage.view != v) {
                    continue;
                }
                columns.insert(
                    stage.id.clone(),
                    Column {
                        key: stage.id.clone(),
                        label: stage.title.clone(),
                        items: Vec::new(),
                    },
                );
            }
        }
        BoardViewMode::ByTranche => {
            columns.insert(
                UNASSIGNED_COLUMN.to_string(),
                Column {
                    key: UNASSIGNED_COLUMN.to_string(),
                    label: UNASSIGNED_LABEL.to_string(),
                    items: Vec::new(),
                },
            );
            for tranche in lookups.tranches() {
                columns.insert(
                    tranche.id.clone(),
                    Column {
                        key: tranche.id.clone(),
                        label: tranche.label(),
                        items: Vec::new(),
                    },
                );
            }
        }
    }
    columns
}

/// The column an item belongs to under `mode`, if any.
pub fn column_key(item: &Item, mode: BoardViewMode) -> Option<&str> {
    match mode {
        BoardViewMode::ByStage => item.stage_id(),
        BoardViewMode::ByTranche => Some(item.tranche_id().unwrap_or(UNASSIGNED_COLUMN)),
    }
}

/// Distribute already-sorted items into the mode's columns. Items whose key
/// has no column (no stage, other sub-board, unknown id) are left out.
pub fn group_columns(
    items: &[Item],
    lookups: &Lookups,
    mode: BoardViewMode,
    stage_view: Option<&str>,
) -> IndexMap<String, Column> {
    let mut columns = empty_columns(lookups, mode, stage_view);
    for item in items {
        if let Some(column) = column_key(item, mode).and_then(|k| columns.get_mut(k)) {
            column.items.push(item.clone());
        }
    }
    columns
}

/// Whether an item counts toward the board total under `mode`.
///
/// Stage mode leaves out configured terminal stages; tranche mode counts
/// only items with a tranche.
pub fn counts_toward_total(item: &Item, mode: BoardViewMode, excluded_stage_ids: &[String]) -> bool {
    match mode {
        BoardViewMode::ByStage => !item
            .stage_id()
            .is_some_and(|id| excluded_stage_ids.iter().any(|x| x == id)),
        BoardViewMode::ByTranche => item.tranche.is_some(),
    }
}

pub fn aggregate(
    visible: &[Item],
    columns: &IndexMap<String, Column>,
    mode: BoardViewMode,
    excluded_stage_ids: &[String],
) -> BoardStats {
    let counted: Vec<&Item> = visible
        .iter()
        .filter(|item| counts_toward_total(item, mode, excluded_stage_ids))
        .collect();
    let per_column = columns
        .iter()
        .map(|(key, column)| {
            (
                key.clone(),
                ColumnStats {
                    count: column.items.len(),
                    capacity_kw: column.items.iter().filter_map(|i| i.capacity_kw).sum(),
                },
            )
        })
        .collect();
    BoardStats {
        visible_count: visible.len(),
        counted_items: counted.len(),
        total_capacity_kw: counted.iter().filter_map(|i| i.capacity_kw).sum(),
        per_column,
    }
}

/// Run the whole pipeline: filter, sort, group, aggregate.
pub fn derive_view(input: &ViewInput<'_>) -> DerivedView {
    let mut visible = filter_items(input.items, input.filter, input.duplicates);
    sort_items(&mut visible, input.sort, input.lookups);
    let columns = group_columns(&visible, input.lookups, input.mode, input.stage_view);
    let stats = aggregate(&visible, &columns, input.mode, input.excluded_stage_ids);
    DerivedView {
        visible,
        columns,
        stats,
    }
}
