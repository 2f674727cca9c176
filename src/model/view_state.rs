use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error type for filter/sort/mode setters
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown filter field: {0}")]
    UnknownField(String),
    #[error("filter {field} expects a {expected} value")]
    TypeMismatch {
        field: FilterField,
        expected: &'static str,
    },
    #[error("unknown sort field: {0}")]
    UnknownSortField(String),
    #[error("unknown board mode: {0} (expected stage or tranche)")]
    UnknownMode(String),
}

/// The named predicates that narrow the board
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    pub search_term: String,
    #[serde(default)]
    pub tag_ids: BTreeSet<String>,
    #[serde(default)]
    pub work_required_flags: BTreeSet<String>,
    #[serde(default)]
    pub sales_rep_names: BTreeSet<String>,
    #[serde(default)]
    pub sales_org_names: BTreeSet<String>,
    #[serde(default)]
    pub project_types: BTreeSet<String>,
    /// `None` = either
    #[serde(default)]
    pub cash_deal: Option<bool>,
    #[serde(default)]
    pub need_help: Option<bool>,
    #[serde(default)]
    pub only_duplicates: bool,
}

impl FilterState {
    /// True when no predicate is active.
    pub fn is_empty(&self) -> bool {
        *self == FilterState::default()
    }

    /// Replace exactly one named field. A value of the wrong shape is
    /// rejected and the state is left untouched.
    pub fn set(&mut self, field: FilterField, value: FilterValue) -> Result<(), FilterError> {
        match (field, value) {
            (FilterField::SearchTerm, FilterValue::Text(s)) => self.search_term = s,
            (FilterField::TagIds, FilterValue::Set(s)) => self.tag_ids = s,
            (FilterField::WorkRequiredFlags, FilterValue::Set(s)) => self.work_required_flags = s,
            (FilterField::SalesRepNames, FilterValue::Set(s)) => self.sales_rep_names = s,
            (FilterField::SalesOrgNames, FilterValue::Set(s)) => self.sales_org_names = s,
            (FilterField::ProjectTypes, FilterValue::Set(s)) => self.project_types = s,
            (FilterField::CashDeal, FilterValue::Flag(f)) => self.cash_deal = f,
            (FilterField::NeedHelp, FilterValue::Flag(f)) => self.need_help = f,
            (FilterField::OnlyDuplicates, FilterValue::Toggle(b)) => self.only_duplicates = b,
            (field, _) => {
                return Err(FilterError::TypeMismatch {
                    field,
                    expected: field.expected_shape(),
                });
            }
        }
        Ok(())
    }
}

/// Filter field names accepted by `FilterState::set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    SearchTerm,
    TagIds,
    WorkRequiredFlags,
    SalesRepNames,
    SalesOrgNames,
    ProjectTypes,
    CashDeal,
    NeedHelp,
    OnlyDuplicates,
}

impl FilterField {
    pub fn name(self) -> &'static str {
        match self {
            FilterField::SearchTerm => "search_term",
            FilterField::TagIds => "tag_ids",
            FilterField::WorkRequiredFlags => "work_required_flags",
            FilterField::SalesRepNames => "sales_rep_names",
            FilterField::SalesOrgNames => "sales_org_names",
            FilterField::ProjectTypes => "project_types",
            FilterField::CashDeal => "cash_deal",
            FilterField::NeedHelp => "need_help",
            FilterField::OnlyDuplicates => "only_duplicates",
        }
    }

    fn expected_shape(self) -> &'static str {
        match self {
            FilterField::SearchTerm => "text",
            FilterField::TagIds
            | FilterField::WorkRequiredFlags
            | FilterField::SalesRepNames
            | FilterField::SalesOrgNames
            | FilterField::ProjectTypes => "set",
            FilterField::CashDeal | FilterField::NeedHelp => "yes/no/any",
            FilterField::OnlyDuplicates => "on/off",
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for FilterField {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search_term" | "search" => Ok(FilterField::SearchTerm),
            "tag_ids" | "tags" => Ok(FilterField::TagIds),
            "work_required_flags" | "flags" => Ok(FilterField::WorkRequiredFlags),
            "sales_rep_names" | "reps" => Ok(FilterField::SalesRepNames),
            "sales_org_names" | "orgs" => Ok(FilterField::SalesOrgNames),
            "project_types" | "project_type" => Ok(FilterField::ProjectTypes),
            "cash_deal" => Ok(FilterField::CashDeal),
            "need_help" => Ok(FilterField::NeedHelp),
            "only_duplicates" => Ok(FilterField::OnlyDuplicates),
            other => Err(FilterError::UnknownField(other.to_string())),
        }
    }
}

/// A value for one filter field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Set(BTreeSet<String>),
    /// Tri-state: `None` = any
    Flag(Option<bool>),
    Toggle(bool),
}

impl FilterValue {
    pub fn set_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::Set(values.into_iter().map(Into::into).collect())
    }
}

/// How a sort field's values compare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKind {
    Numeric,
    Date,
    Text,
}

/// Sortable item fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    OwnerName,
    Address,
    City,
    SalesRep,
    ExternalId,
    Stage,
    Tranche,
    CapacityKw,
    Yield,
    AddedAt,
    ModifiedAt,
    SoldAt,
}

impl SortField {
    pub fn kind(self) -> SortKind {
        match self {
            SortField::CapacityKw | SortField::Yield | SortField::Tranche => SortKind::Numeric,
            SortField::AddedAt | SortField::ModifiedAt | SortField::SoldAt => SortKind::Date,
            SortField::OwnerName
            | SortField::Address
            | SortField::City
            | SortField::SalesRep
            | SortField::ExternalId
            | SortField::Stage => SortKind::Text,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SortField::OwnerName => "owner_name",
            SortField::Address => "address",
            SortField::City => "city",
            SortField::SalesRep => "sales_rep",
            SortField::ExternalId => "external_id",
            SortField::Stage => "stage",
            SortField::Tranche => "tranche",
            SortField::CapacityKw => "capacity_kw",
            SortField::Yield => "yield",
            SortField::AddedAt => "added_at",
            SortField::ModifiedAt => "modified_at",
            SortField::SoldAt => "sold_at",
        }
    }

    pub const ALL: [SortField; 12] = [
        SortField::OwnerName,
        SortField::Address,
        SortField::City,
        SortField::SalesRep,
        SortField::ExternalId,
        SortField::Stage,
        SortField::Tranche,
        SortField::CapacityKw,
        SortField::Yield,
        SortField::AddedAt,
        SortField::ModifiedAt,
        SortField::SoldAt,
    ];
}

impl FromStr for SortField {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortField::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| FilterError::UnknownSortField(s.to_string()))
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Active sort (persisted as last-used sort)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortState {
    fn default() -> Self {
        SortState {
            field: SortField::ModifiedAt,
            direction: SortDirection::Desc,
        }
    }
}

/// Which grouping key the board uses for its columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardViewMode {
    #[default]
    ByStage,
    ByTranche,
}

impl FromStr for BoardViewMode {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage" | "by_stage" => Ok(BoardViewMode::ByStage),
            "tranche" | "by_tranche" => Ok(BoardViewMode::ByTranche),
            other => Err(FilterError::UnknownMode(other.to_string())),
        }
    }
}
