use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;

use crate::model::item::Item;
use crate::model::lookup::Lookups;
use crate::model::view_state::{
    BoardViewMode, FilterError, FilterField, FilterState, FilterValue, SortDirection, SortField,
    SortState,
};
use crate::ops::duplicates::find_duplicates;
use crate::ops::view::{BoardStats, Column, DerivedView, ViewInput, derive_view};

/// Board shared between the presentation layer and the mutation engine.
/// Never hold the lock across an `.await`.
pub type SharedBoard = Arc<Mutex<Board>>;

/// Lock a shared board. A poisoned lock is recovered: board state is plain
/// data and stays consistent between statements.
pub fn lock_board(board: &SharedBoard) -> MutexGuard<'_, Board> {
    board.lock().unwrap_or_else(|e| e.into_inner())
}

/// The authoritative in-memory collection plus the view state the board is
/// rendered with.
#[derive(Debug, Default)]
pub struct Board {
    items: Vec<Item>,
    lookups: Lookups,
    filter: FilterState,
    sort: SortState,
    mode: BoardViewMode,
    stage_view: Option<String>,
    excluded_stage_ids: Vec<String>,
    /// Items with a reassignment awaiting remote confirmation
    in_flight: HashSet<String>,
}

impl Board {
    pub fn new(items: Vec<Item>, lookups: Lookups, excluded_stage_ids: Vec<String>) -> Self {
        Board {
            items,
            lookups,
            excluded_stage_ids,
            ..Default::default()
        }
    }

    pub fn into_shared(self) -> SharedBoard {
        Arc::new(Mutex::new(self))
    }

    // --- reads ---

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn lookups(&self) -> &Lookups {
        &self.lookups
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn sort(&self) -> SortState {
        self.sort
    }

    pub fn mode(&self) -> BoardViewMode {
        self.mode
    }

    pub fn stage_view(&self) -> Option<&str> {
        self.stage_view.as_deref()
    }

    pub fn duplicates(&self) -> HashSet<String> {
        find_duplicates(&self.items)
    }

    /// Run the full pipeline over the current state.
    pub fn view(&self) -> DerivedView {
        let duplicates = self.duplicates();
        derive_view(&ViewInput {
            items: &self.items,
            lookups: &self.lookups,
            filter: &self.filter,
            sort: &self.sort,
            mode: self.mode,
            stage_view: self.stage_view.as_deref(),
            duplicates: &duplicates,
            excluded_stage_ids: &self.excluded_stage_ids,
        })
    }

    pub fn visible_items(&self) -> Vec<Item> {
        self.view().visible
    }

    pub fn columns(&self) -> IndexMap<String, Column> {
        self.view().columns
    }

    pub fn stats(&self) -> BoardStats {
        self.view().stats
    }

    pub fn is_move_in_flight(&self, item_id: &str) -> bool {
        self.in_flight.contains(item_id)
    }

    // --- view state setters ---

    pub fn set_filter(&mut self, field: FilterField, value: FilterValue) -> Result<(), FilterError> {
        self.filter.set(field, value)
    }

    /// Set a filter by its field name.
    pub fn set_filter_by_name(&mut self, name: &str, value: FilterValue) -> Result<(), FilterError> {
        let field: FilterField = name.parse()?;
        self.filter.set(field, value)
    }

    pub fn set_sort(&mut self, field: SortField, direction: SortDirection) {
        self.sort = SortState { field, direction };
    }

    pub fn set_board_view_mode(&mut self, mode: BoardViewMode) {
        self.mode = mode;
    }

    pub fn set_stage_view(&mut self, view: Option<String>) {
        self.stage_view = view;
    }

    pub fn reset_filters_and_sort(&mut self) {
        self.filter = FilterState::default();
        self.sort = SortState::default();
    }

    // --- collection writes (engine-owned) ---

    /// Replace the whole collection, e.g. after a reload.
    pub fn replace_items(&mut self, items: Vec<Item>) {
        self.items = items;
    }

    pub(crate) fn item_mut(&mut self, id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Returns false if the item already had a move in flight.
    pub(crate) fn mark_in_flight(&mut self, item_id: &str) -> bool {
        self.in_flight.insert(item_id.to_string())
    }

    pub(crate) fn clear_in_flight(&mut self, item_id: &str) {
        self.in_flight.remove(item_id);
    }
}
