use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::model::alert::Alert;
use crate::model::item::Item;
use crate::model::view_state::BoardViewMode;
use crate::ops::duplicates::DuplicateCluster;
use crate::ops::view::{BoardStats, Column, ColumnStats};
use crate::util::unicode::pad_to_width;

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ItemJson {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tranche: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_kw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sales_rep: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub duplicate: bool,
}

#[derive(Serialize)]
pub struct ColumnJson {
    pub key: String,
    pub label: String,
    pub count: usize,
    pub capacity_kw: f64,
    pub collapsed: bool,
    pub items: Vec<ItemJson>,
}

#[derive(Serialize)]
pub struct BoardJson {
    pub mode: BoardViewMode,
    pub columns: Vec<ColumnJson>,
    pub visible_count: usize,
    pub counted_items: usize,
    pub total_capacity_kw: f64,
}

#[derive(Serialize)]
pub struct ClusterJson {
    pub coordinate: String,
    pub items: Vec<String>,
}

#[derive(Serialize)]
pub struct MoveJson {
    pub item: String,
    pub field: String,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub fn item_to_json(item: &Item, duplicates: &HashSet<String>) -> ItemJson {
    ItemJson {
        id: item.id.clone(),
        name: item.display_name().to_string(),
        stage: item.stage.as_ref().map(|a| a.label.clone()),
        tranche: item.tranche.as_ref().map(|a| a.label.clone()),
        capacity_kw: item.capacity_kw,
        sales_rep: item.sales_rep.clone(),
        tags: item.tags.iter().cloned().collect(),
        duplicate: duplicates.contains(&item.id),
    }
}

pub fn board_to_json(
    mode: BoardViewMode,
    columns: &[&Column],
    stats: &BoardStats,
    collapsed: &BTreeMap<String, bool>,
    duplicates: &HashSet<String>,
) -> BoardJson {
    BoardJson {
        mode,
        columns: columns
            .iter()
            .map(|col| {
                let col_stats = stats.per_column.get(&col.key).cloned().unwrap_or_default();
                ColumnJson {
                    key: col.key.clone(),
                    label: col.label.clone(),
                    count: col_stats.count,
                    capacity_kw: col_stats.capacity_kw,
                    collapsed: is_collapsed(collapsed, &col.key),
                    items: col.items.iter().map(|i| item_to_json(i, duplicates)).collect(),
                }
            })
            .collect(),
        visible_count: stats.visible_count,
        counted_items: stats.counted_items,
        total_capacity_kw: stats.total_capacity_kw,
    }
}

pub fn cluster_to_json(cluster: &DuplicateCluster) -> ClusterJson {
    ClusterJson {
        coordinate: cluster.coordinate_label(),
        items: cluster.item_ids.clone(),
    }
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

const ID_WIDTH: usize = 10;
const NAME_WIDTH: usize = 28;
const STAGE_WIDTH: usize = 16;
const TRANCHE_WIDTH: usize = 12;

pub fn is_collapsed(collapsed: &BTreeMap<String, bool>, key: &str) -> bool {
    collapsed.get(key).copied().unwrap_or(false)
}

/// Capacity in kW, one decimal
pub fn format_kw(kw: f64) -> String {
    format!("{:.1} kW", kw)
}

/// One item per line: id, name, stage, tranche, capacity; `*` marks duplicates
pub fn format_item_line(item: &Item, duplicate: bool) -> String {
    let stage = item.stage.as_ref().map_or("-", |a| a.label.as_str());
    let tranche = item.tranche.as_ref().map_or("-", |a| a.label.as_str());
    let kw = item.capacity_kw.map(format_kw).unwrap_or_default();
    let marker = if duplicate { "*" } else { " " };
    format!(
        "{}{} {} {} {} {}",
        marker,
        pad_to_width(&item.id, ID_WIDTH),
        pad_to_width(item.display_name(), NAME_WIDTH),
        pad_to_width(stage, STAGE_WIDTH),
        pad_to_width(tranche, TRANCHE_WIDTH),
        kw
    )
    .trim_end()
    .to_string()
}

/// Column header with its count and capacity subtotal
pub fn format_column_header(column: &Column, stats: &ColumnStats, collapsed: bool) -> String {
    let arrow = if collapsed { "▸" } else { "▾" };
    format!(
        "{} {} ({})  {} items, {}",
        arrow,
        column.label,
        column.key,
        stats.count,
        format_kw(stats.capacity_kw)
    )
}

/// Column listing: header plus item lines unless collapsed
pub fn format_column(
    column: &Column,
    stats: &ColumnStats,
    collapsed: bool,
    duplicates: &HashSet<String>,
) -> Vec<String> {
    let mut lines = vec![format_column_header(column, stats, collapsed)];
    if !collapsed {
        for item in &column.items {
            lines.push(format!("  {}", format_item_line(item, duplicates.contains(&item.id))));
        }
    }
    lines
}

pub fn format_totals(stats: &BoardStats) -> String {
    format!(
        "{} visible, {} counted, {} total",
        stats.visible_count,
        stats.counted_items,
        format_kw(stats.total_capacity_kw)
    )
}

pub fn format_cluster(cluster: &DuplicateCluster) -> String {
    format!("{}  {}", cluster.coordinate_label(), cluster.item_ids.join(", "))
}

pub fn format_alert_line(alert: &Alert) -> String {
    let kind = if alert.kind.is_empty() { "alert" } else { alert.kind.as_str() };
    let mut line = format!("{}  [{}] {}", alert.id, kind, alert.message);
    if let Some(project) = &alert.project_id {
        line.push_str(&format!(" ({})", project));
    }
    line
}

/// Parse a yes/no/any flag value
pub fn parse_tristate(s: &str) -> Result<Option<bool>, String> {
    match s {
        "yes" | "true" | "y" => Ok(Some(true)),
        "no" | "false" | "n" => Ok(Some(false)),
        "any" | "" => Ok(None),
        _ => Err(format!("unknown value '{}' (expected: yes, no, any)", s)),
    }
}
