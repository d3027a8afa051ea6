use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use std::collections::HashMap;

use crate::data::datatable::ColumnDefinition;
use crate::data::render_bridge::{CellPayload, RenderBridge, SubRow, VisualHandle, WindowRow};

#[derive(Debug, Clone, Default)]
struct TableRow {
    cells: HashMap<usize, String>,
    sub_row: Option<SubRow>,
}

/// Render bridge that keeps the current page as text and prints it with
/// comfy-table
#[derive(Debug, Default)]
pub struct TableBridge {
    rows: HashMap<VisualHandle, TableRow>,
    window: Vec<VisualHandle>,
    next_handle: u64,
    max_cell_width: usize,
    /// Display width per column from the last sizing pass
    widths: HashMap<usize, usize>,
}

impl TableBridge {
    pub fn new(max_cell_width: usize) -> Self {
        Self {
            max_cell_width,
            ..Self::default()
        }
    }

    pub fn column_width(&self, column: usize) -> Option<usize> {
        self.widths.get(&column).copied()
    }

    fn truncate(&self, text: &str) -> String {
        if self.max_cell_width == 0 || text.chars().count() <= self.max_cell_width {
            return text.to_string();
        }
        let keep = self.max_cell_width.saturating_sub(1);
        let mut truncated: String = text.chars().take(keep).collect();
        truncated.push('…');
        truncated
    }

    /// Build the table for the current window
    pub fn to_table(&self, columns: &[ColumnDefinition]) -> Table {
        let visible: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.visible)
            .map(|(i, _)| i)
            .collect();

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(
            visible
                .iter()
                .map(|&i| Cell::new(&columns[i].name).add_attribute(Attribute::Bold)),
        );

        for handle in &self.window {
            let Some(row) = self.rows.get(handle) else {
                continue;
            };
            table.add_row(visible.iter().map(|c| {
                Cell::new(self.truncate(row.cells.get(c).map(String::as_str).unwrap_or("")))
            }));
            if let Some(sub_row) = &row.sub_row {
                let mut cells = vec![Cell::new(&sub_row.content).add_attribute(Attribute::Italic)];
                cells.extend((1..sub_row.span).map(|_| Cell::new("")));
                table.add_row(cells);
            }
        }
        table
    }

    pub fn render(&self, columns: &[ColumnDefinition]) -> String {
        self.to_table(columns).to_string()
    }
}

impl RenderBridge for TableBridge {
    fn render_window(
        &mut self,
        rows: &[WindowRow<'_>],
        columns: &[ColumnDefinition],
    ) -> Vec<VisualHandle> {
        self.window.clear();
        for row in rows {
            let handle = row.handle.unwrap_or_else(|| {
                self.next_handle += 1;
                VisualHandle(self.next_handle)
            });
            let cells = columns
                .iter()
                .enumerate()
                .filter(|(_, c)| c.visible)
                .filter_map(|(i, _)| row.cells.get(i).map(|text| (i, text.clone())))
                .collect();
            self.rows.insert(
                handle,
                TableRow {
                    cells,
                    sub_row: row.sub_row.cloned(),
                },
            );
            self.window.push(handle);
        }
        self.window.clone()
    }

    fn detach_row(&mut self, handle: VisualHandle) {
        self.rows.remove(&handle);
        self.window.retain(|h| *h != handle);
    }

    fn detach_cell(&mut self, handle: VisualHandle, column: usize) -> Option<CellPayload> {
        self.rows
            .get_mut(&handle)?
            .cells
            .remove(&column)
            .map(CellPayload::new)
    }

    fn reinsert_cell(
        &mut self,
        handle: VisualHandle,
        column: usize,
        _before: Option<usize>,
        cell: CellPayload,
    ) {
        // Cells are keyed by column, printing walks columns in order
        if let Some(row) = self.rows.get_mut(&handle) {
            row.cells.insert(column, cell.content);
        }
    }

    fn update_cell(&mut self, handle: VisualHandle, column: usize, display: &str) {
        if let Some(cell) = self.rows.get_mut(&handle).and_then(|r| r.cells.get_mut(&column)) {
            *cell = display.to_string();
        }
    }

    fn recalculate_sizing(&mut self, columns: &[ColumnDefinition]) {
        self.widths.clear();
        for (i, column) in columns.iter().enumerate().filter(|(_, c)| c.visible) {
            let widest = self
                .window
                .iter()
                .filter_map(|h| self.rows.get(h)?.cells.get(&i))
                .map(|text| text.chars().count())
                .max()
                .unwrap_or(0)
                .max(column.name.chars().count());
            let width = if self.max_cell_width == 0 {
                widest
            } else {
                widest.min(self.max_cell_width)
            };
            self.widths.insert(i, width);
        }
    }

    fn open_sub_row(&mut self, parent: VisualHandle, sub_row: &SubRow) {
        if let Some(row) = self.rows.get_mut(&parent) {
            row.sub_row = Some(sub_row.clone());
        }
    }

    fn close_sub_row(&mut self, parent: VisualHandle) {
        if let Some(row) = self.rows.get_mut(&parent) {
            row.sub_row = None;
        }
    }

    fn set_sub_row_span(&mut self, parent: VisualHandle, span: usize) {
        if let Some(sub_row) = self.rows.get_mut(&parent).and_then(|r| r.sub_row.as_mut()) {
            sub_row.span = span;
        }
    }
}
