use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::util::lenient;

/// A denormalized foreign-key reference: the target's id plus the display
/// label cached alongside it. Stage and tranche assignments share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub label: String,
}

impl Assignment {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Assignment {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// A tracked work record ("project") shown as a card on the board.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub stage: Option<Assignment>,
    #[serde(default)]
    pub tranche: Option<Assignment>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Work-required flags ("permit", "roof", ...)
    #[serde(default)]
    pub work_flags: BTreeSet<String>,
    #[serde(default)]
    pub capacity_kw: Option<f64>,
    #[serde(default)]
    pub yield_kwh: Option<f64>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub sales_rep: Option<String>,
    #[serde(default)]
    pub sales_org: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub cash_deal: Option<bool>,
    #[serde(default)]
    pub need_help: Option<bool>,
    #[serde(default)]
    pub added_at: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub sold_at: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Item {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Card title: owner name, falling back to the external id, then the id.
    pub fn display_name(&self) -> &str {
        self.owner_name
            .as_deref()
            .or(self.external_id.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn stage_id(&self) -> Option<&str> {
        self.stage.as_ref().map(|s| s.id.as_str())
    }

    pub fn tranche_id(&self) -> Option<&str> {
        self.tranche.as_ref().map(|t| t.id.as_str())
    }
}

/// An item as it comes off the remote store: foreign keys only, numeric and
/// coordinate fields in whatever shape the upstream data has them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    #[serde(default)]
    pub stage_id: Option<String>,
    #[serde(default)]
    pub tranche_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub work_flags: BTreeSet<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub capacity_kw: Option<f64>,
    #[serde(default, rename = "yield", deserialize_with = "lenient::opt_f64")]
    pub yield_kwh: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub latitude: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub longitude: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub zip: Option<String>,
    #[serde(default)]
    pub sales_rep: Option<String>,
    #[serde(default)]
    pub sales_org: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub cash_deal: Option<bool>,
    #[serde(default)]
    pub need_help: Option<bool>,
    #[serde(default)]
    pub added_at: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub sold_at: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
}

impl ItemRecord {
    /// Build the board item, with stage/tranche references resolved by the
    /// caller (unresolvable keys arrive here as `None`).
    pub fn into_item(self, stage: Option<Assignment>, tranche: Option<Assignment>) -> Item {
        Item {
            id: self.id,
            stage,
            tranche,
            tags: self.tags,
            work_flags: self.work_flags,
            capacity_kw: self.capacity_kw,
            yield_kwh: self.yield_kwh,
            latitude: self.latitude,
            longitude: self.longitude,
            owner_name: self.owner_name,
            address: self.address,
            city: self.city,
            state: self.state,
            zip: self.zip,
            sales_rep: self.sales_rep,
            sales_org: self.sales_org,
            external_id: self.external_id,
            project_type: self.project_type,
            cash_deal: self.cash_deal,
            need_help: self.need_help,
            added_at: self.added_at,
            modified_at: self.modified_at,
            sold_at: self.sold_at,
            is_demo: self.is_demo,
        }
    }
}
