//! Render bridge contract
//!
//! The view core never owns visual state. Everything it needs from the
//! presentation layer goes through [`RenderBridge`]; the bridge reads the
//! window it is handed but never reorders the view's indices.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::data::datatable::{ColumnDefinition, RowData};

/// Opaque reference to a rendered row, issued by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VisualHandle(pub u64);

/// Detached content of one rendered cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellPayload {
    pub content: String,
}

impl CellPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Detail row shown directly after its parent row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRow {
    pub content: String,
    pub class: String,
    /// Number of visible columns the detail cell spans
    pub span: usize,
}

/// One row of the window handed to the bridge
#[derive(Debug, Clone)]
pub struct WindowRow<'a> {
    /// Row identity in the store
    pub index: usize,
    /// Position within the display order
    pub position: usize,
    pub data: &'a RowData,
    /// Display string per column, hidden columns included
    pub cells: Vec<String>,
    /// Handle from an earlier render, if any
    pub handle: Option<VisualHandle>,
    pub sub_row: Option<&'a SubRow>,
}

pub trait RenderBridge {
    /// Produce or refresh the visual rows of the window. Returns one handle per
    /// row, in window order.
    fn render_window(
        &mut self,
        rows: &[WindowRow<'_>],
        columns: &[ColumnDefinition],
    ) -> Vec<VisualHandle>;

    /// Drop a rendered row for good
    fn detach_row(&mut self, handle: VisualHandle);

    /// Take a cell out of a rendered row, returning exactly what it held
    fn detach_cell(&mut self, handle: VisualHandle, column: usize) -> Option<CellPayload>;

    /// Put a previously detached cell back, before `before` or at the end
    fn reinsert_cell(
        &mut self,
        handle: VisualHandle,
        column: usize,
        before: Option<usize>,
        cell: CellPayload,
    );

    /// Refresh the content of one rendered cell
    fn update_cell(&mut self, _handle: VisualHandle, _column: usize, _display: &str) {}

    /// Refresh several cells of one rendered row in a single call
    fn update_row(&mut self, handle: VisualHandle, cells: &[(usize, String)]) {
        for (column, display) in cells {
            self.update_cell(handle, *column, display);
        }
    }

    /// Dependent sizing pass (column widths and the like)
    fn recalculate_sizing(&mut self, _columns: &[ColumnDefinition]) {}

    fn open_sub_row(&mut self, _parent: VisualHandle, _sub_row: &SubRow) {}

    fn close_sub_row(&mut self, _parent: VisualHandle) {}

    fn set_sub_row_span(&mut self, _parent: VisualHandle, _span: usize) {}
}

/// Bridge that renders nothing and hands out sequential handles
#[derive(Debug, Default)]
pub struct NullRenderBridge {
    next_handle: u64,
}

impl RenderBridge for NullRenderBridge {
    fn render_window(
        &mut self,
        rows: &[WindowRow<'_>],
        _columns: &[ColumnDefinition],
    ) -> Vec<VisualHandle> {
        rows.iter()
            .map(|row| {
                row.handle.unwrap_or_else(|| {
                    self.next_handle += 1;
                    VisualHandle(self.next_handle)
                })
            })
            .collect()
    }

    fn detach_row(&mut self, _handle: VisualHandle) {}

    fn detach_cell(&mut self, _handle: VisualHandle, _column: usize) -> Option<CellPayload> {
        None
    }

    fn reinsert_cell(
        &mut self,
        _handle: VisualHandle,
        _column: usize,
        _before: Option<usize>,
        _cell: CellPayload,
    ) {
    }
}

/// A rendered row held by [`MemoryRenderBridge`]
#[derive(Debug, Clone, Default)]
pub struct MemoryRow {
    pub index: usize,
    /// Live cells keyed by column
    pub cells: BTreeMap<usize, CellPayload>,
}

/// Headless bridge keeping an in-memory model of what would be on screen
#[derive(Debug, Default)]
pub struct MemoryRenderBridge {
    next_handle: u64,
    pub rows: HashMap<VisualHandle, MemoryRow>,
    pub sub_rows: HashMap<VisualHandle, SubRow>,
    /// Row identities of the last rendered window, in order
    pub window: Vec<usize>,
    pub render_passes: usize,
    pub sizing_passes: usize,
    pub cell_updates: usize,
    pub row_updates: usize,
}

impl MemoryRenderBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self, handle: VisualHandle, column: usize) -> Option<&CellPayload> {
        self.rows.get(&handle)?.cells.get(&column)
    }

    fn set_content(&mut self, handle: VisualHandle, column: usize, display: &str) {
        if let Some(cell) = self
            .rows
            .get_mut(&handle)
            .and_then(|row| row.cells.get_mut(&column))
        {
            cell.content = display.to_string();
        }
    }
}

impl RenderBridge for MemoryRenderBridge {
    fn render_window(
        &mut self,
        rows: &[WindowRow<'_>],
        columns: &[ColumnDefinition],
    ) -> Vec<VisualHandle> {
        self.render_passes += 1;
        self.window = rows.iter().map(|r| r.index).collect();

        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            let handle = match row.handle {
                Some(handle) if self.rows.contains_key(&handle) => handle,
                _ => {
                    self.next_handle += 1;
                    let handle = VisualHandle(self.next_handle);
                    let cells = columns
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| c.visible)
                        .map(|(i, _)| {
                            let content = row.cells.get(i).cloned().unwrap_or_default();
                            (i, CellPayload::new(content))
                        })
                        .collect();
                    self.rows.insert(
                        handle,
                        MemoryRow {
                            index: row.index,
                            cells,
                        },
                    );
                    handle
                }
            };
            match row.sub_row {
                Some(sub_row) => {
                    self.sub_rows.insert(handle, sub_row.clone());
                }
                None => {
                    self.sub_rows.remove(&handle);
                }
            }
            handles.push(handle);
        }
        handles
    }

    fn detach_row(&mut self, handle: VisualHandle) {
        self.rows.remove(&handle);
        self.sub_rows.remove(&handle);
    }

    fn detach_cell(&mut self, handle: VisualHandle, column: usize) -> Option<CellPayload> {
        self.rows.get_mut(&handle)?.cells.remove(&column)
    }

    fn reinsert_cell(
        &mut self,
        handle: VisualHandle,
        column: usize,
        _before: Option<usize>,
        cell: CellPayload,
    ) {
        if let Some(row) = self.rows.get_mut(&handle) {
            row.cells.insert(column, cell);
        }
    }

    fn update_cell(&mut self, handle: VisualHandle, column: usize, display: &str) {
        self.cell_updates += 1;
        self.set_content(handle, column, display);
    }

    fn update_row(&mut self, handle: VisualHandle, cells: &[(usize, String)]) {
        self.row_updates += 1;
        for (column, display) in cells {
            self.set_content(handle, *column, display);
        }
    }

    fn recalculate_sizing(&mut self, _columns: &[ColumnDefinition]) {
        self.sizing_passes += 1;
    }

    fn open_sub_row(&mut self, parent: VisualHandle, sub_row: &SubRow) {
        self.sub_rows.insert(parent, sub_row.clone());
    }

    fn close_sub_row(&mut self, parent: VisualHandle) {
        self.sub_rows.remove(&parent);
    }

    fn set_sub_row_span(&mut self, parent: VisualHandle, span: usize) {
        if let Some(sub_row) = self.sub_rows.get_mut(&parent) {
            sub_row.span = span;
        }
    }
}
