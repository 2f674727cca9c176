use serde::{Deserialize, Serialize};

use super::item::Assignment;

/// Label used for the tranche column holding items without a tranche.
pub const UNASSIGNED_LABEL: &str = "Unassigned";

/// A workflow stage (board column in stage mode)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub title: String,
    /// Sub-board the stage belongs to ("sales", "install")
    #[serde(default)]
    pub view: String,
    #[serde(default)]
    pub order: i64,
}

impl Stage {
    pub fn assignment(&self) -> Assignment {
        Assignment::new(&self.id, &self.title)
    }
}

/// A financing tranche (board column in tranche mode)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tranche {
    pub id: String,
    pub number: i64,
}

impl Tranche {
    pub fn label(&self) -> String {
        format!("Tranche {}", self.number)
    }

    pub fn assignment(&self) -> Assignment {
        Assignment::new(&self.id, self.label())
    }
}

/// Reference data loaded once per session.
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    stages: Vec<Stage>,
    tranches: Vec<Tranche>,
}

impl Lookups {
    /// Build the lookup set; stages are kept in `order`, tranches by `number`.
    pub fn new(mut stages: Vec<Stage>, mut tranches: Vec<Tranche>) -> Self {
        stages.sort_by_key(|s| s.order);
        tranches.sort_by_key(|t| t.number);
        Lookups { stages, tranches }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn tranches(&self) -> &[Tranche] {
        &self.tranches
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn tranche(&self, id: &str) -> Option<&Tranche> {
        self.tranches.iter().find(|t| t.id == id)
    }

    /// Tranche number for sorting; unknown or missing ids count as 0.
    pub fn tranche_number(&self, id: Option<&str>) -> i64 {
        id.and_then(|id| self.tranche(id)).map_or(0, |t| t.number)
    }
}
