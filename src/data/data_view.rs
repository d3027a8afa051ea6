use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace, warn};

use crate::config::config::ViewConfig;
use crate::data::datatable::{ColumnSet, ColumnSource, DataValue, RowData};
use crate::data::datavalue_compare::BlankPolicy;
use crate::data::filter_engine::{CaseFold, Exact, FilterEngine, SearchCriteria, TextNormalizer};
use crate::data::pagination::{PageAction, Pagination};
use crate::data::render_bridge::{
    CellPayload, NullRenderBridge, RenderBridge, SubRow, VisualHandle, WindowRow,
};
use crate::data::row_store::RowStore;
use crate::data::sort_engine::{SortEngine, SortKey, SortSpec};
use crate::error::{ViewError, ViewResult};

/// How a caller names a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTarget {
    /// Stable row identity in the store
    Index(usize),
    /// Handle issued by the render bridge
    Handle(VisualHandle),
}

impl From<usize> for RowTarget {
    fn from(index: usize) -> Self {
        RowTarget::Index(index)
    }
}

impl From<VisualHandle> for RowTarget {
    fn from(handle: VisualHandle) -> Self {
        RowTarget::Handle(handle)
    }
}

/// Update payload, shape decided by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateData {
    /// One cell
    Cell { column: usize, value: DataValue },
    /// One value per column, in column order
    Row(Vec<DataValue>),
    /// Values keyed like the columns' sources; absent keys are left alone
    Object(BTreeMap<String, DataValue>),
}

/// Whether a cell write is a call of its own or one step of a whole-row update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateMode {
    Single,
    WholeRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    pub redraw: bool,
    /// Run the bridge's sizing pass before drawing
    pub recalculate_sizing: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            redraw: true,
            recalculate_sizing: true,
        }
    }
}

impl UpdateOptions {
    pub fn quiet() -> Self {
        Self {
            redraw: false,
            recalculate_sizing: false,
        }
    }
}

/// Where a draw cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawPhase {
    Idle,
    Filtering,
    Sorting,
    Paginating,
    Rendering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawScope {
    /// Filter, sort, paginate
    Full,
    /// Re-sort the current display order, paginate
    Resort,
    /// Paginate only
    Window,
}

/// Outcome of the filter stage of a draw
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterReport {
    pub matched: usize,
    pub total: usize,
    /// Search patterns that failed to compile
    pub errors: Vec<ViewError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOutcome {
    Drawn(FilterReport),
    /// A draw was already in flight
    Rejected,
}

impl DrawOutcome {
    pub fn report(&self) -> Option<&FilterReport> {
        match self {
            DrawOutcome::Drawn(report) => Some(report),
            DrawOutcome::Rejected => None,
        }
    }
}

/// Plain snapshot for whoever persists view state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub sort_keys: Vec<SortKey>,
    pub search: SearchCriteria,
    pub column_search: Vec<SearchCriteria>,
    pub page_start: usize,
    /// `-1` shows all rows
    pub page_length: i64,
    pub column_visibility: Vec<bool>,
}

#[derive(Debug, Clone)]
struct OpenRow {
    parent: usize,
    sub_row: SubRow,
}

/// Filtered, sorted and paginated view over a set of rows, kept in sync with
/// a render bridge.
///
/// Rows are addressed by a stable index. `master_order` holds every live
/// index in insertion order, `display_order` the filtered and sorted subset,
/// and `search_cache` the search text of each `display_order` entry at the
/// same position.
pub struct DataView<B: RenderBridge = NullRenderBridge> {
    columns: ColumnSet,
    store: RowStore,

    master_order: Vec<usize>,
    display_order: Vec<usize>,
    search_cache: Vec<String>,
    pagination: Pagination,

    search: SearchCriteria,
    column_search: Vec<SearchCriteria>,
    sort: SortSpec,
    blanks: BlankPolicy,
    normalizer: Box<dyn TextNormalizer>,

    /// Criteria that produced the current display order
    last_filter: Option<(SearchCriteria, Vec<SearchCriteria>)>,
    /// Rows changed since the last filter pass
    display_stale: bool,

    bridge: B,
    handles: HashMap<VisualHandle, usize>,
    open_rows: Vec<OpenRow>,
    phase: DrawPhase,
}

impl DataView<NullRenderBridge> {
    /// A view with no presentation attached
    pub fn new(columns: ColumnSet) -> Self {
        DataView::with_bridge(columns, NullRenderBridge::default())
    }
}

impl<B: RenderBridge> DataView<B> {
    pub fn with_bridge(columns: ColumnSet, bridge: B) -> Self {
        let column_search = columns
            .iter()
            .map(|c| c.default_search.clone().map(SearchCriteria::new).unwrap_or_default())
            .collect();

        Self {
            columns,
            store: RowStore::new(),
            master_order: Vec::new(),
            display_order: Vec::new(),
            search_cache: Vec::new(),
            pagination: Pagination::default(),
            search: SearchCriteria::default(),
            column_search,
            sort: SortSpec::default(),
            blanks: BlankPolicy::default(),
            normalizer: Box::new(CaseFold),
            last_filter: None,
            display_stale: true,
            bridge,
            handles: HashMap::new(),
            open_rows: Vec::new(),
            phase: DrawPhase::Idle,
        }
    }

    /// Apply paging, sorting and normalization settings from a config
    pub fn configured(mut self, config: &ViewConfig) -> Self {
        self.pagination = Pagination::from_signed_length(config.paging.page_length);
        self.blanks = config.sort.blanks;
        self.sort.fixed_pre = config.sort.fixed_pre.clone();
        self.sort.fixed_post = config.sort.fixed_post.clone();
        self.normalizer = if config.search.case_insensitive {
            Box::new(CaseFold)
        } else {
            Box::new(Exact)
        };
        self
    }

    pub fn with_normalizer(mut self, normalizer: Box<dyn TextNormalizer>) -> Self {
        self.normalizer = normalizer;
        self.last_filter = None;
        self
    }

    pub fn with_page_length(mut self, length: Option<usize>) -> Self {
        self.pagination = Pagination::new(length);
        self
    }

    pub fn with_blank_policy(mut self, blanks: BlankPolicy) -> Self {
        self.blanks = blanks;
        self
    }

    pub fn with_fixed_sort(mut self, pre: Vec<SortKey>, post: Vec<SortKey>) -> Self {
        self.sort.fixed_pre = pre;
        self.sort.fixed_post = post;
        self
    }

    // ---- accessors ----

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn master_order(&self) -> &[usize] {
        &self.master_order
    }

    pub fn display_order(&self) -> &[usize] {
        &self.display_order
    }

    pub fn search_cache(&self) -> &[String] {
        &self.search_cache
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    pub fn sort_spec(&self) -> &SortSpec {
        &self.sort
    }

    pub fn search(&self) -> &SearchCriteria {
        &self.search
    }

    pub fn phase(&self) -> DrawPhase {
        self.phase
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }

    pub fn row_count(&self) -> usize {
        self.master_order.len()
    }

    /// Identities on the current page, in display order
    pub fn visible_window(&self) -> &[usize] {
        let total = self.display_order.len();
        let start = self.pagination.start.min(total);
        &self.display_order[start..self.pagination.visible_end(total).max(start)]
    }

    pub fn is_row_open(&self, index: usize) -> bool {
        self.open_rows.iter().any(|r| r.parent == index)
    }

    fn resolve(&self, target: RowTarget) -> ViewResult<usize> {
        match target {
            RowTarget::Index(index) if self.store.contains(index) => Ok(index),
            RowTarget::Index(index) => Err(ViewError::row(index)),
            RowTarget::Handle(handle) => self
                .handles
                .get(&handle)
                .copied()
                .ok_or(ViewError::handle(handle.0 as usize)),
        }
    }

    fn display_position(&self, index: usize) -> Option<usize> {
        self.display_order.iter().position(|&i| i == index)
    }

    // ---- queries ----

    /// Every payload in master order
    pub fn data(&self) -> Vec<&RowData> {
        self.master_order
            .iter()
            .filter_map(|&i| self.store.get(i).ok().map(|r| &r.data))
            .collect()
    }

    pub fn row_data(&self, target: impl Into<RowTarget>) -> ViewResult<&RowData> {
        let index = self.resolve(target.into())?;
        Ok(&self.store.get(index)?.data)
    }

    pub fn cell_data(&self, target: impl Into<RowTarget>, column: usize) -> ViewResult<DataValue> {
        let index = self.resolve(target.into())?;
        let definition = self.columns.get(column)?;
        Ok(definition.raw_value(&self.store.get(index)?.data))
    }

    /// Row identity behind a rendered row
    pub fn get_row_identity(&self, handle: VisualHandle) -> Option<usize> {
        self.handles.get(&handle).copied()
    }

    pub fn visual_handle(&self, index: usize) -> Option<VisualHandle> {
        self.store.get(index).ok()?.visual_handle
    }

    /// Position of a row within the display order
    pub fn get_position(&self, target: impl Into<RowTarget>) -> Option<usize> {
        let index = self.resolve(target.into()).ok()?;
        self.display_position(index)
    }

    /// Visible position of a column, `None` while it is hidden
    pub fn visible_column_index(&self, column: usize) -> Option<usize> {
        self.columns.visible_indices().iter().position(|&c| c == column)
    }

    // ---- CRUD ----

    pub fn add_row(&mut self, data: RowData, redraw: bool) -> ViewResult<usize> {
        let added = self.add_rows(vec![data], redraw)?;
        added.first().copied().ok_or(ViewError::row(self.store.len()))
    }

    /// Add rows at the end of master order. Nothing is added if any row does
    /// not fit the columns. Without a redraw the rows stay out of the display
    /// order until the next full draw.
    pub fn add_rows(&mut self, rows: Vec<RowData>, redraw: bool) -> ViewResult<Vec<usize>> {
        if rows.is_empty() {
            debug!(target: "DataView", "add_rows called with an empty batch");
            return Ok(Vec::new());
        }
        for row in &rows {
            self.columns.validate(row)?;
        }

        let added: Vec<usize> = rows
            .into_iter()
            .map(|row| {
                let index = self.store.insert(row);
                self.master_order.push(index);
                index
            })
            .collect();
        self.display_stale = true;
        debug!(target: "DataView", "Added {} rows, {} live", added.len(), self.store.len());

        if redraw {
            self.draw(true)?;
        }
        Ok(added)
    }

    /// Remove a row everywhere and hand back its payload
    pub fn delete(&mut self, target: impl Into<RowTarget>, redraw: bool) -> ViewResult<RowData> {
        let index = self.resolve(target.into())?;
        let record = self.store.remove(index)?;

        if let Some(pos) = self.master_order.iter().position(|&i| i == index) {
            self.master_order.remove(pos);
        }
        if let Some(pos) = self.display_position(index) {
            self.display_order.remove(pos);
            self.search_cache.remove(pos);
        }

        if let Some(handle) = record.visual_handle {
            if self.is_row_open(index) {
                self.bridge.close_sub_row(handle);
            }
            self.handles.remove(&handle);
            self.bridge.detach_row(handle);
        }
        self.open_rows.retain(|r| r.parent != index);

        self.pagination.clamp(self.display_order.len());
        trace!(target: "DataView", "Deleted row {}, page start {}", index, self.pagination.start);

        if redraw {
            self.draw(false)?;
        }
        Ok(record.data)
    }

    /// Drop every row
    pub fn clear(&mut self, redraw: bool) -> ViewResult<()> {
        for record in self.store.clear() {
            if let Some(handle) = record.visual_handle {
                self.bridge.detach_row(handle);
            }
        }
        self.handles.clear();
        self.open_rows.clear();
        self.master_order.clear();
        self.display_order.clear();
        self.search_cache.clear();
        self.pagination.start = 0;
        self.last_filter = None;
        self.display_stale = false;
        debug!(target: "DataView", "Cleared table");

        if redraw {
            self.draw(true)?;
        }
        Ok(())
    }

    /// Update one cell or a whole row, then refresh the row's search text.
    /// A whole-row update checks every column first and writes nothing when
    /// one of them cannot take its value.
    pub fn update(
        &mut self,
        data: UpdateData,
        target: impl Into<RowTarget>,
        options: UpdateOptions,
    ) -> ViewResult<()> {
        let index = self.resolve(target.into())?;

        let written = self.write_update(index, data);
        self.display_stale = true;
        self.refresh_search_text(index)?;
        written?;

        if options.recalculate_sizing {
            self.bridge.recalculate_sizing(self.columns.as_slice());
        }
        if options.redraw {
            self.draw(true)?;
        }
        Ok(())
    }

    fn write_update(&mut self, index: usize, data: UpdateData) -> ViewResult<()> {
        let cells: Vec<(usize, DataValue)> = match data {
            UpdateData::Cell { column, value } => {
                return self.update_cell(index, column, value, UpdateMode::Single);
            }
            UpdateData::Row(values) => {
                if values.len() != self.columns.len() {
                    return Err(ViewError::InvalidRowData {
                        expected: self.columns.len(),
                        found: values.len(),
                    });
                }
                values.into_iter().enumerate().collect()
            }
            UpdateData::Object(mut values) => self
                .columns
                .iter()
                .enumerate()
                .filter_map(|(column, def)| match &def.source {
                    ColumnSource::Key(key) => values.remove(key).map(|value| (column, value)),
                    ColumnSource::Index(_) => None,
                })
                .collect(),
        };

        let data = &self.store.get(index)?.data;
        for (column, _) in &cells {
            if !data.accepts(&self.columns.get(*column)?.source) {
                return Err(ViewError::column(*column));
            }
        }

        let mut changed = Vec::with_capacity(cells.len());
        for (column, value) in cells {
            self.update_cell(index, column, value, UpdateMode::WholeRow)?;
            changed.push(column);
        }
        self.push_cells(index, &changed)
    }

    /// Write one cell. A single update pushes the cell to the bridge straight
    /// away; a whole-row update leaves that to one `push_cells` for the row.
    fn update_cell(
        &mut self,
        index: usize,
        column: usize,
        value: DataValue,
        mode: UpdateMode,
    ) -> ViewResult<()> {
        self.store.set_cell(index, column, &self.columns, value)?;
        trace!(target: "DataView", "Updated row {} column {} ({:?})", index, column, mode);
        match mode {
            UpdateMode::Single => self.push_cells(index, &[column]),
            UpdateMode::WholeRow => Ok(()),
        }
    }

    /// Send freshly rendered cells to the bridge, or park them with the row
    /// while their column is hidden
    fn push_cells(&mut self, index: usize, columns: &[usize]) -> ViewResult<()> {
        let mut shown = Vec::new();
        let mut hidden = Vec::new();
        for &column in columns {
            let display = self.store.rendered_cell(index, column, &self.columns)?;
            if self.columns.get(column)?.visible {
                shown.push((column, display));
            } else {
                hidden.push((column, display));
            }
        }

        let record = self.store.get_mut(index)?;
        let Some(handle) = record.visual_handle else {
            return Ok(());
        };
        for (column, display) in hidden {
            record.hidden_cells.insert(column, CellPayload::new(display));
        }
        match shown.as_slice() {
            [] => {}
            [(column, display)] => self.bridge.update_cell(handle, *column, display),
            _ => self.bridge.update_row(handle, &shown),
        }
        Ok(())
    }

    fn refresh_search_text(&mut self, index: usize) -> ViewResult<()> {
        if let Some(pos) = self.display_position(index) {
            self.search_cache[pos] =
                self.store
                    .search_text(index, &self.columns, self.normalizer.as_ref())?;
        }
        Ok(())
    }

    // ---- criteria ----

    /// Set the global (no column) or a column search and redo the full pipeline
    pub fn filter(
        &mut self,
        criteria: SearchCriteria,
        column: Option<usize>,
        redraw: bool,
    ) -> ViewResult<DrawOutcome> {
        match column {
            None => self.search = criteria,
            Some(column) => {
                self.columns.get(column)?;
                self.column_search[column] = criteria;
            }
        }
        self.pagination.start = 0;
        self.run_draw(DrawScope::Full, redraw)
    }

    /// Replace the user sort keys and re-sort the current display order
    pub fn sort(&mut self, keys: Vec<SortKey>, redraw: bool) -> ViewResult<DrawOutcome> {
        for key in &keys {
            self.columns.get(key.column)?;
        }
        self.sort.keys = keys;
        self.pagination.start = 0;
        let scope = if self.display_stale {
            DrawScope::Full
        } else {
            DrawScope::Resort
        };
        self.run_draw(scope, redraw)
    }

    /// Move the page window. Returns true when the page changed.
    pub fn paginate(&mut self, action: PageAction, redraw: bool) -> ViewResult<bool> {
        let changed = self.pagination.navigate(action, self.display_order.len());
        if redraw {
            self.run_draw(DrawScope::Window, true)?;
        }
        Ok(changed)
    }

    pub fn set_page_length(&mut self, length: Option<usize>, redraw: bool) -> ViewResult<()> {
        let start = self.pagination.start;
        self.pagination = Pagination::new(length);
        if let Some(length) = self.pagination.length {
            self.pagination.start = (start / length) * length;
        }
        self.pagination.clamp(self.display_order.len());
        if redraw {
            self.run_draw(DrawScope::Window, true)?;
        }
        Ok(())
    }

    // ---- columns and sub-rows ----

    /// Show or hide a column. Rendered cells are detached and kept on the row
    /// so showing the column again restores exactly what was there.
    pub fn set_column_visible(&mut self, column: usize, visible: bool, redraw: bool) -> ViewResult<()> {
        if self.columns.get(column)?.visible == visible {
            return Ok(());
        }

        let rendered: Vec<(usize, VisualHandle)> = self
            .store
            .records()
            .filter_map(|r| r.visual_handle.map(|h| (r.index, h)))
            .collect();

        if visible {
            let before = self.columns.next_visible_after(column);
            for (index, handle) in rendered {
                let stored = self.store.get_mut(index)?.hidden_cells.remove(&column);
                let payload = match stored {
                    Some(payload) => payload,
                    None => CellPayload::new(self.store.rendered_cell(index, column, &self.columns)?),
                };
                self.bridge.reinsert_cell(handle, column, before, payload);
            }
        } else {
            for (index, handle) in rendered {
                if let Some(payload) = self.bridge.detach_cell(handle, column) {
                    self.store.get_mut(index)?.hidden_cells.insert(column, payload);
                }
            }
        }
        self.columns.get_mut(column)?.visible = visible;
        debug!(target: "DataView", "Column {} visible: {}", column, visible);

        let span = self.columns.visible_count();
        for open in &mut self.open_rows {
            open.sub_row.span = span;
            if let Some(handle) = self.store.get(open.parent).ok().and_then(|r| r.visual_handle) {
                self.bridge.set_sub_row_span(handle, span);
            }
        }

        if redraw {
            self.bridge.recalculate_sizing(self.columns.as_slice());
            self.run_draw(DrawScope::Window, true)?;
        }
        Ok(())
    }

    /// Open a detail row after `target`, replacing one already open there
    pub fn open_row(
        &mut self,
        target: impl Into<RowTarget>,
        content: impl Into<String>,
        class: impl Into<String>,
    ) -> ViewResult<()> {
        let index = self.resolve(target.into())?;
        self.close_row(index)?;

        let sub_row = SubRow {
            content: content.into(),
            class: class.into(),
            span: self.columns.visible_count(),
        };
        if let Some(handle) = self.store.get(index)?.visual_handle {
            if self.visible_window().contains(&index) {
                self.bridge.open_sub_row(handle, &sub_row);
            }
        }
        self.open_rows.push(OpenRow {
            parent: index,
            sub_row,
        });
        Ok(())
    }

    /// Close the detail row of `target`. Returns false when none was open.
    pub fn close_row(&mut self, target: impl Into<RowTarget>) -> ViewResult<bool> {
        let index = self.resolve(target.into())?;
        let Some(pos) = self.open_rows.iter().position(|r| r.parent == index) else {
            return Ok(false);
        };
        self.open_rows.remove(pos);
        if let Some(handle) = self.store.get(index)?.visual_handle {
            self.bridge.close_sub_row(handle);
        }
        Ok(true)
    }

    pub fn adjust_column_sizing(&mut self, redraw: bool) -> ViewResult<()> {
        self.bridge.recalculate_sizing(self.columns.as_slice());
        if redraw {
            self.run_draw(DrawScope::Window, true)?;
        }
        Ok(())
    }

    // ---- state ----

    pub fn snapshot(&self) -> ViewState {
        ViewState {
            sort_keys: self.sort.keys.clone(),
            search: self.search.clone(),
            column_search: self.column_search.clone(),
            page_start: self.pagination.start,
            page_length: self.pagination.signed_length(),
            column_visibility: self.columns.iter().map(|c| c.visible).collect(),
        }
    }

    /// Re-apply a snapshot and redo the full pipeline, keeping its page start
    pub fn restore(&mut self, state: ViewState, redraw: bool) -> ViewResult<DrawOutcome> {
        for key in &state.sort_keys {
            self.columns.get(key.column)?;
        }
        for (column, visible) in state.column_visibility.iter().enumerate().take(self.columns.len()) {
            self.set_column_visible(column, *visible, false)?;
        }

        self.search = state.search;
        let mut column_search = state.column_search;
        column_search.resize(self.columns.len(), SearchCriteria::default());
        self.column_search = column_search;
        self.sort.keys = state.sort_keys;
        self.pagination = Pagination::from_signed_length(state.page_length);
        self.pagination.start = state.page_start;

        self.run_draw(DrawScope::Full, redraw)
    }

    // ---- draw cycle ----

    /// Redraw: `complete` re-filters and re-sorts first, otherwise only the
    /// window is re-clamped and re-rendered
    pub fn draw(&mut self, complete: bool) -> ViewResult<DrawOutcome> {
        let scope = if complete {
            DrawScope::Full
        } else {
            DrawScope::Window
        };
        self.run_draw(scope, true)
    }

    fn run_draw(&mut self, scope: DrawScope, render: bool) -> ViewResult<DrawOutcome> {
        if self.phase != DrawPhase::Idle {
            warn!(target: "DataView", "Draw requested during {:?}, ignoring", self.phase);
            return Ok(DrawOutcome::Rejected);
        }
        let result = self.draw_cycle(scope, render);
        self.phase = DrawPhase::Idle;
        result.map(DrawOutcome::Drawn)
    }

    fn draw_cycle(&mut self, scope: DrawScope, render: bool) -> ViewResult<FilterReport> {
        let mut errors = Vec::new();

        if scope == DrawScope::Full {
            self.phase = DrawPhase::Filtering;
            errors = self.filter_pass()?;
        }
        if matches!(scope, DrawScope::Full | DrawScope::Resort) {
            self.phase = DrawPhase::Sorting;
            self.sort_pass()?;
        }

        self.phase = DrawPhase::Paginating;
        self.pagination.clamp(self.display_order.len());

        if render {
            self.phase = DrawPhase::Rendering;
            self.render_pass()?;
        }

        Ok(FilterReport {
            matched: self.display_order.len(),
            total: self.master_order.len(),
            errors,
        })
    }

    fn filter_pass(&mut self) -> ViewResult<Vec<ViewError>> {
        let incremental = !self.display_stale
            && self.last_filter.as_ref().is_some_and(|(search, columns)| {
                *columns == self.column_search && self.search.narrows(search)
            });

        let engine = FilterEngine::new(&self.columns, self.normalizer.as_ref());
        let pass = if incremental {
            engine.narrow(
                &mut self.store,
                &self.display_order,
                &self.search_cache,
                &self.search,
                &self.column_search,
            )?
        } else {
            engine.run(
                &mut self.store,
                &self.master_order,
                &self.search,
                &self.column_search,
            )?
        };

        self.display_order = pass.display;
        self.search_cache = pass.search_cache;
        self.last_filter = Some((self.search.clone(), self.column_search.clone()));
        self.display_stale = false;
        Ok(pass.errors)
    }

    /// Sort from master-relative order so the result depends only on the
    /// current keys, not on the previous sort
    fn sort_pass(&mut self) -> ViewResult<()> {
        let keys = self.sort.effective_keys(&self.columns);
        let engine = SortEngine::new(&self.columns, self.blanks);

        let rank: HashMap<usize, usize> = self
            .master_order
            .iter()
            .enumerate()
            .map(|(pos, &index)| (index, pos))
            .collect();
        let mut entries: Vec<(usize, String)> = std::mem::take(&mut self.display_order)
            .into_iter()
            .zip(std::mem::take(&mut self.search_cache))
            .collect();
        entries.sort_by_key(|(index, _)| rank.get(index).copied().unwrap_or(usize::MAX));
        let (display, cache): (Vec<usize>, Vec<String>) = entries.into_iter().unzip();

        let (display, cache) = engine.sort(&mut self.store, display, cache, &keys)?;
        self.display_order = display;
        self.search_cache = cache;
        Ok(())
    }

    fn render_pass(&mut self) -> ViewResult<()> {
        let total = self.display_order.len();
        let start = self.pagination.start.min(total);
        let end = self.pagination.visible_end(total).max(start);

        let mut cells = Vec::with_capacity(end - start);
        for position in start..end {
            let index = self.display_order[position];
            cells.push((index, position, self.store.rendered_cells(index, &self.columns)?));
        }

        let mut rows = Vec::with_capacity(cells.len());
        for (index, position, cells) in cells {
            let record = self.store.get(index)?;
            rows.push(WindowRow {
                index,
                position,
                data: &record.data,
                cells,
                handle: record.visual_handle,
                sub_row: self
                    .open_rows
                    .iter()
                    .find(|r| r.parent == index)
                    .map(|r| &r.sub_row),
            });
        }

        let handles = self.bridge.render_window(&rows, self.columns.as_slice());
        let rendered: Vec<usize> = rows.iter().map(|r| r.index).collect();
        drop(rows);

        for (index, handle) in rendered.into_iter().zip(handles) {
            let record = self.store.get_mut(index)?;
            if let Some(old) = record.visual_handle.replace(handle) {
                if old != handle {
                    self.handles.remove(&old);
                }
            }
            self.handles.insert(handle, index);
        }

        debug!(
            target: "DataView",
            "Rendered rows {}..{} of {} (master {})",
            start,
            end,
            total,
            self.master_order.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::datatable::{ColumnDefinition, DataType};

    fn fruit_view() -> DataView {
        let columns = ColumnSet::new(vec![ColumnDefinition::keyed("v", "v")]);
        let mut view = DataView::new(columns);
        view.add_rows(
            vec![
                RowData::object([("v", "apple")]),
                RowData::object([("v", "banana")]),
                RowData::object([("v", "cherry")]),
            ],
            true,
        )
        .unwrap();
        view
    }

    fn assert_aligned(view: &mut DataView) {
        assert_eq!(view.display_order.len(), view.search_cache.len());
        for (pos, &index) in view.display_order.clone().iter().enumerate() {
            let expected = view
                .store
                .search_text(index, &view.columns, view.normalizer.as_ref())
                .unwrap();
            assert_eq!(view.search_cache[pos], expected);
        }
    }

    #[test]
    fn test_add_assigns_identities() {
        let view = fruit_view();
        assert_eq!(view.master_order(), &[0, 1, 2]);
        assert_eq!(view.display_order(), &[0, 1, 2]);
        assert_eq!(view.phase(), DrawPhase::Idle);
    }

    #[test]
    fn test_add_without_redraw_stays_hidden() {
        let mut view = fruit_view();
        let index = view.add_row(RowData::object([("v", "date")]), false).unwrap();
        assert_eq!(view.master_order().len(), 4);
        assert!(!view.display_order().contains(&index));

        view.draw(true).unwrap();
        assert!(view.display_order().contains(&index));
    }

    #[test]
    fn test_empty_batch_is_a_no_op() {
        let mut view = fruit_view();
        assert!(view.add_rows(Vec::new(), true).unwrap().is_empty());
        assert_eq!(view.row_count(), 3);
    }

    #[test]
    fn test_invalid_row_adds_nothing() {
        let columns = ColumnSet::new(vec![
            ColumnDefinition::new("a", 0),
            ColumnDefinition::new("b", 1),
        ]);
        let mut view = DataView::new(columns);
        let result = view.add_rows(
            vec![RowData::array(["1", "2"]), RowData::array(["3"])],
            true,
        );
        assert!(matches!(result, Err(ViewError::InvalidRowData { .. })));
        assert_eq!(view.row_count(), 0);
    }

    #[test]
    fn test_delete_then_filter() {
        let mut view = fruit_view();
        let removed = view.delete(1, true).unwrap();
        assert_eq!(removed, RowData::object([("v", "banana")]));
        assert_aligned(&mut view);

        view.filter(SearchCriteria::new("an"), None, true).unwrap();
        assert!(view.display_order().is_empty());

        view.filter(SearchCriteria::new("e"), None, true).unwrap();
        assert_eq!(view.display_order(), &[0, 2]);
        assert_aligned(&mut view);
    }

    #[test]
    fn test_delete_keeps_cache_aligned_under_sort() {
        let mut view = fruit_view();
        view.sort(vec![SortKey::desc(0)], true).unwrap();
        assert_eq!(view.display_order(), &[2, 1, 0]);

        view.delete(1, false).unwrap();
        assert_eq!(view.display_order(), &[2, 0]);
        assert_eq!(view.master_order(), &[0, 2]);
        assert_aligned(&mut view);
    }

    #[test]
    fn test_delete_removed_row_is_out_of_range() {
        let mut view = fruit_view();
        view.delete(0, true).unwrap();
        assert_eq!(view.delete(0, true).unwrap_err(), ViewError::row(0));
        assert!(view
            .update(
                UpdateData::Cell { column: 0, value: "x".into() },
                0,
                UpdateOptions::default()
            )
            .is_err());
    }

    #[test]
    fn test_filter_is_idempotent() {
        let mut view = fruit_view();
        view.filter(SearchCriteria::new("a"), None, true).unwrap();
        let first = view.display_order().to_vec();
        view.filter(SearchCriteria::new("a"), None, true).unwrap();
        assert_eq!(view.display_order(), first.as_slice());
    }

    #[test]
    fn test_incremental_filter_matches_full() {
        let mut view = fruit_view();
        view.filter(SearchCriteria::new("a"), None, true).unwrap();
        view.filter(SearchCriteria::new("an"), None, true).unwrap();
        assert_eq!(view.display_order(), &[1]);
        assert_aligned(&mut view);
    }

    #[test]
    fn test_update_refreshes_search_cache() {
        let mut view = fruit_view();
        view.update(
            UpdateData::Cell {
                column: 0,
                value: "blueberry".into(),
            },
            1,
            UpdateOptions::quiet(),
        )
        .unwrap();
        assert_eq!(view.search_cache()[1], "blueberry");

        view.filter(SearchCriteria::new("berry"), None, true).unwrap();
        assert_eq!(view.display_order(), &[1]);
    }

    #[test]
    fn test_empty_sort_keys_restore_unsorted_order() {
        let mut view = fruit_view();
        view.sort(vec![SortKey::desc(0)], true).unwrap();
        assert_eq!(view.display_order(), &[2, 1, 0]);

        view.sort(Vec::new(), true).unwrap();
        assert_eq!(view.display_order(), &[0, 1, 2]);
        assert_aligned(&mut view);

        // A full redraw with the same criteria gives the same order
        view.draw(true).unwrap();
        assert_eq!(view.display_order(), &[0, 1, 2]);

        view.filter(SearchCriteria::new("e"), None, true).unwrap();
        view.sort(vec![SortKey::desc(0)], true).unwrap();
        assert_eq!(view.display_order(), &[2, 0]);
        view.sort(Vec::new(), true).unwrap();
        assert_eq!(view.display_order(), &[0, 2]);
        assert_aligned(&mut view);
    }

    #[test]
    fn test_failed_row_update_writes_nothing() {
        let columns = ColumnSet::new(vec![
            ColumnDefinition::new("a", 0),
            ColumnDefinition::keyed("b", "b"),
        ]);
        let mut view = DataView::new(columns);
        view.add_row(RowData::array(["x"]), true).unwrap();

        let result = view.update(
            UpdateData::Row(vec!["y".into(), "z".into()]),
            0,
            UpdateOptions::default(),
        );
        assert_eq!(result.unwrap_err(), ViewError::column(1));
        assert_eq!(view.row_data(0).unwrap(), &RowData::array(["x"]));
        assert_aligned(&mut view);

        view.filter(SearchCriteria::new("x"), None, true).unwrap();
        assert_eq!(view.display_order(), &[0]);
        view.filter(SearchCriteria::new("xy"), None, true).unwrap();
        assert!(view.display_order().is_empty());
        view.draw(true).unwrap();
        assert!(view.display_order().is_empty());
    }

    #[test]
    fn test_failed_cell_update_keeps_cache_aligned() {
        let columns = ColumnSet::new(vec![
            ColumnDefinition::new("a", 0),
            ColumnDefinition::keyed("b", "b"),
        ]);
        let mut view = DataView::new(columns);
        view.add_row(RowData::array(["x"]), true).unwrap();
        view.filter(SearchCriteria::new("x"), None, true).unwrap();

        let result = view.update(
            UpdateData::Cell {
                column: 1,
                value: "z".into(),
            },
            0,
            UpdateOptions::quiet(),
        );
        assert!(result.is_err());
        assert_aligned(&mut view);
    }

    #[test]
    fn test_sort_numeric_column() {
        let columns = ColumnSet::new(vec![
            ColumnDefinition::new("n", 0).with_type(DataType::Integer),
        ]);
        let mut view = DataView::new(columns);
        view.add_rows(
            vec![
                RowData::array([DataValue::Integer(10)]),
                RowData::array([DataValue::Integer(9)]),
                RowData::array([DataValue::Null]),
            ],
            true,
        )
        .unwrap();
        view.sort(vec![SortKey::asc(0)], true).unwrap();
        assert_eq!(view.display_order(), &[2, 1, 0]);
        assert!(view.sort(vec![SortKey::asc(3)], true).is_err());
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let mut view = fruit_view();
        let outcome = view
            .filter(SearchCriteria::new("[").with_regex(true), None, true)
            .unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.matched, 0);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut view = fruit_view();
        view.sort(vec![SortKey::desc(0)], false).unwrap();
        view.filter(SearchCriteria::new("r"), None, true).unwrap();
        let state = view.snapshot();

        let columns = ColumnSet::new(vec![ColumnDefinition::keyed("v", "v")]);
        let mut other = DataView::new(columns);
        other
            .add_rows(view.data().into_iter().cloned().collect(), false)
            .unwrap();
        other.restore(state.clone(), true).unwrap();

        assert_eq!(other.display_order(), view.display_order());
        assert_eq!(other.snapshot(), state);
    }
}
