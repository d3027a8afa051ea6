use std::collections::HashMap;
use tracing::trace;

use crate::data::datatable::{ColumnSet, DataValue, RowData};
use crate::data::filter_engine::TextNormalizer;
use crate::data::render_bridge::{CellPayload, VisualHandle};
use crate::error::{ViewError, ViewResult};

/// Separator between column texts in a row's search text
const SEARCH_SEPARATOR: &str = "  ";

/// One live row and its derived caches
#[derive(Debug, Clone)]
pub struct RowRecord {
    /// Stable identity, never reused while the store lives
    pub index: usize,
    pub data: RowData,
    /// Display string per column, filled lazily
    render_cache: HashMap<usize, String>,
    /// Normalized text of all searchable columns, filled lazily
    search_text: Option<String>,
    pub visual_handle: Option<VisualHandle>,
    /// Cells detached from the rendered row while their column is hidden
    pub hidden_cells: HashMap<usize, CellPayload>,
}

impl RowRecord {
    fn new(index: usize, data: RowData) -> Self {
        Self {
            index,
            data,
            render_cache: HashMap::new(),
            search_text: None,
            visual_handle: None,
            hidden_cells: HashMap::new(),
        }
    }

    fn invalidate(&mut self) {
        self.render_cache.clear();
        self.search_text = None;
    }

    pub fn has_cached_search_text(&self) -> bool {
        self.search_text.is_some()
    }
}

/// Owns the canonical row records, addressed by stable index
#[derive(Debug, Default)]
pub struct RowStore {
    rows: HashMap<usize, RowRecord>,
    next_index: usize,
}

impl RowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a payload and return its new identity
    pub fn insert(&mut self, data: RowData) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.rows.insert(index, RowRecord::new(index, data));
        trace!(target: "RowStore", "Inserted row {}", index);
        index
    }

    pub fn get(&self, index: usize) -> ViewResult<&RowRecord> {
        self.rows.get(&index).ok_or(ViewError::row(index))
    }

    pub fn get_mut(&mut self, index: usize) -> ViewResult<&mut RowRecord> {
        self.rows.get_mut(&index).ok_or(ViewError::row(index))
    }

    pub fn remove(&mut self, index: usize) -> ViewResult<RowRecord> {
        let record = self.rows.remove(&index).ok_or(ViewError::row(index))?;
        trace!(target: "RowStore", "Removed row {}", index);
        Ok(record)
    }

    /// Swap in a new payload, returning the old one. Caches are dropped.
    pub fn replace(&mut self, index: usize, data: RowData) -> ViewResult<RowData> {
        let record = self.get_mut(index)?;
        record.invalidate();
        Ok(std::mem::replace(&mut record.data, data))
    }

    /// Write one cell through the column's source. Caches are dropped.
    pub fn set_cell(
        &mut self,
        index: usize,
        column: usize,
        columns: &ColumnSet,
        value: DataValue,
    ) -> ViewResult<()> {
        let source = &columns.get(column)?.source;
        let record = self.get_mut(index)?;
        if !record.data.set(source, value) {
            return Err(ViewError::column(column));
        }
        record.invalidate();
        Ok(())
    }

    pub fn contains(&self, index: usize) -> bool {
        self.rows.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop every row, handing the records back. Identities are not reused.
    pub fn clear(&mut self) -> Vec<RowRecord> {
        self.rows.drain().map(|(_, record)| record).collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &RowRecord> {
        self.rows.values()
    }

    /// Display string of one cell, computed once per payload version
    pub fn rendered_cell(
        &mut self,
        index: usize,
        column: usize,
        columns: &ColumnSet,
    ) -> ViewResult<String> {
        let definition = columns.get(column)?;
        let record = self.get_mut(index)?;
        if let Some(cached) = record.render_cache.get(&column) {
            return Ok(cached.clone());
        }
        let display = definition.display(index, column, &record.data);
        record.render_cache.insert(column, display.clone());
        Ok(display)
    }

    /// Display strings for every column of a row
    pub fn rendered_cells(&mut self, index: usize, columns: &ColumnSet) -> ViewResult<Vec<String>> {
        (0..columns.len())
            .map(|column| self.rendered_cell(index, column, columns))
            .collect()
    }

    /// Value filtering and sorting see: the rendered string when the column
    /// asks for it, the raw payload otherwise
    pub fn filter_value(
        &mut self,
        index: usize,
        column: usize,
        columns: &ColumnSet,
    ) -> ViewResult<DataValue> {
        let definition = columns.get(column)?;
        if definition.use_rendered && definition.renderer.is_some() {
            return self
                .rendered_cell(index, column, columns)
                .map(DataValue::String);
        }
        Ok(definition.raw_value(&self.get(index)?.data))
    }

    /// Normalized text of a single column, used by per-column filters
    pub fn column_text(
        &mut self,
        index: usize,
        column: usize,
        columns: &ColumnSet,
        normalizer: &dyn TextNormalizer,
    ) -> ViewResult<String> {
        let value = self.filter_value(index, column, columns)?;
        Ok(normalizer.normalize(&value.to_string()))
    }

    /// Normalized text of all searchable columns, cached until the row changes
    pub fn search_text(
        &mut self,
        index: usize,
        columns: &ColumnSet,
        normalizer: &dyn TextNormalizer,
    ) -> ViewResult<String> {
        if let Some(text) = &self.get(index)?.search_text {
            return Ok(text.clone());
        }

        let mut parts = Vec::new();
        for (column, definition) in columns.iter().enumerate() {
            if definition.searchable {
                parts.push(self.filter_value(index, column, columns)?.to_string());
            }
        }
        let text = normalizer.normalize(&parts.join(SEARCH_SEPARATOR));
        self.get_mut(index)?.search_text = Some(text.clone());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::datatable::{CellRenderer, ColumnDefinition, ColumnSource};
    use crate::data::filter_engine::CaseFold;

    fn columns() -> ColumnSet {
        ColumnSet::new(vec![
            ColumnDefinition::new("name", 0),
            ColumnDefinition::new("code", 1).with_searchable(false),
        ])
    }

    #[test]
    fn test_indices_are_never_reused() {
        let mut store = RowStore::new();
        let a = store.insert(RowData::array(["a", "1"]));
        let b = store.insert(RowData::array(["b", "2"]));
        store.remove(a).unwrap();
        let c = store.insert(RowData::array(["c", "3"]));

        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(store.len(), 2);
        assert!(!store.contains(a));
    }

    #[test]
    fn test_missing_row_is_out_of_range() {
        let mut store = RowStore::new();
        let a = store.insert(RowData::array(["a", "1"]));
        store.remove(a).unwrap();

        assert_eq!(store.get(a).unwrap_err(), ViewError::row(a));
        assert_eq!(store.remove(a).unwrap_err(), ViewError::row(a));
        assert!(store.replace(a, RowData::array(["x", "y"])).is_err());
    }

    #[test]
    fn test_search_text_skips_unsearchable_and_invalidates() {
        let columns = columns();
        let mut store = RowStore::new();
        let a = store.insert(RowData::array(["Apple", "XYZ"]));

        assert_eq!(store.search_text(a, &columns, &CaseFold).unwrap(), "apple");
        assert!(store.get(a).unwrap().has_cached_search_text());

        store.replace(a, RowData::array(["Pear", "XYZ"])).unwrap();
        assert!(!store.get(a).unwrap().has_cached_search_text());
        assert_eq!(store.search_text(a, &columns, &CaseFold).unwrap(), "pear");
    }

    #[test]
    fn test_use_rendered_feeds_filter_value() {
        let columns = ColumnSet::new(vec![ColumnDefinition::new("grade", 0).with_renderer(
            CellRenderer::new(|ctx| match ctx.data.get(&ColumnSource::Index(0)) {
                Some(DataValue::Integer(n)) if *n >= 50 => "pass".to_string(),
                _ => "fail".to_string(),
            }),
            true,
        )]);
        let mut store = RowStore::new();
        let a = store.insert(RowData::array([DataValue::Integer(70)]));

        assert_eq!(
            store.filter_value(a, 0, &columns).unwrap(),
            DataValue::String("pass".to_string())
        );

        store.set_cell(a, 0, &columns, DataValue::Integer(10)).unwrap();
        assert_eq!(
            store.filter_value(a, 0, &columns).unwrap(),
            DataValue::String("fail".to_string())
        );
        assert_eq!(store.get(a).unwrap().data, RowData::array([DataValue::Integer(10)]));
    }
}
