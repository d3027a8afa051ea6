use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ViewError, ViewResult};

/// Represents the data type of a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Null,
    Mixed, // For columns with mixed types
}

impl DataType {
    /// Infer type from a string value
    pub fn infer_from_string(value: &str) -> Self {
        if value.is_empty() || value.eq_ignore_ascii_case("null") {
            return DataType::Null;
        }

        if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
            return DataType::Boolean;
        }

        if value.parse::<i64>().is_ok() {
            return DataType::Integer;
        }

        if value.parse::<f64>().is_ok() {
            return DataType::Float;
        }

        if crate::data::datavalue_compare::parse_timestamp(value).is_some() {
            return DataType::DateTime;
        }

        DataType::String
    }

    /// Merge two types (for columns with mixed types)
    pub fn merge(&self, other: &DataType) -> DataType {
        if self == other {
            return self.clone();
        }

        match (self, other) {
            (DataType::Null, t) | (t, DataType::Null) => t.clone(),
            (DataType::Integer, DataType::Float) | (DataType::Float, DataType::Integer) => {
                DataType::Float
            }
            _ => DataType::Mixed,
        }
    }

    /// Comparator family a column of this type sorts with
    pub fn sort_type(&self) -> SortType {
        match self {
            DataType::Integer | DataType::Float => SortType::Numeric,
            DataType::DateTime => SortType::Date,
            _ => SortType::String,
        }
    }
}

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(String), // Kept as written; parsed on demand by the date comparator
    Null,
}

impl DataValue {
    pub fn from_string(s: &str, data_type: &DataType) -> Self {
        if s.is_empty() || s.eq_ignore_ascii_case("null") {
            return DataValue::Null;
        }

        match data_type {
            DataType::String => DataValue::String(s.to_string()),
            DataType::Integer => s
                .parse::<i64>()
                .map(DataValue::Integer)
                .unwrap_or_else(|_| DataValue::String(s.to_string())),
            DataType::Float => s
                .parse::<f64>()
                .map(DataValue::Float)
                .unwrap_or_else(|_| DataValue::String(s.to_string())),
            DataType::Boolean => {
                let lower = s.to_lowercase();
                DataValue::Boolean(lower == "true" || lower == "1" || lower == "yes")
            }
            DataType::DateTime => DataValue::DateTime(s.to_string()),
            DataType::Null => DataValue::Null,
            DataType::Mixed => {
                let inferred = DataType::infer_from_string(s);
                Self::from_string(s, &inferred)
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            DataValue::String(_) => DataType::String,
            DataValue::Integer(_) => DataType::Integer,
            DataValue::Float(_) => DataType::Float,
            DataValue::Boolean(_) => DataType::Boolean,
            DataValue::DateTime(_) => DataType::DateTime,
            DataValue::Null => DataType::Null,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::String(s) => write!(f, "{}", s),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Boolean(b) => write!(f, "{}", b),
            DataValue::DateTime(dt) => write!(f, "{}", dt),
            DataValue::Null => write!(f, ""),
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::String(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::String(s)
    }
}

impl From<i64> for DataValue {
    fn from(i: i64) -> Self {
        DataValue::Integer(i)
    }
}

impl From<f64> for DataValue {
    fn from(f: f64) -> Self {
        DataValue::Float(f)
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::Boolean(b)
    }
}

/// Where a column reads its cell from inside a row payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSource {
    /// Position in an array payload (index 0 also addresses a scalar payload)
    Index(usize),
    /// Key in an object payload
    Key(String),
}

/// The payload of one row. Shape is decided once by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RowData {
    Array(Vec<DataValue>),
    Object(BTreeMap<String, DataValue>),
    Scalar(DataValue),
}

impl RowData {
    pub fn array<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DataValue>,
    {
        RowData::Array(values.into_iter().map(Into::into).collect())
    }

    pub fn object<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        RowData::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, source: &ColumnSource) -> Option<&DataValue> {
        match (self, source) {
            (RowData::Array(values), ColumnSource::Index(i)) => values.get(*i),
            (RowData::Object(map), ColumnSource::Key(k)) => map.get(k),
            (RowData::Scalar(value), ColumnSource::Index(0)) => Some(value),
            _ => None,
        }
    }

    /// Write one cell. Returns false when the source cannot address this payload shape.
    /// Whether `set` can write through this source
    pub fn accepts(&self, source: &ColumnSource) -> bool {
        matches!(
            (self, source),
            (RowData::Array(_), ColumnSource::Index(_))
                | (RowData::Object(_), ColumnSource::Key(_))
                | (RowData::Scalar(_), ColumnSource::Index(0))
        )
    }

    pub fn set(&mut self, source: &ColumnSource, value: DataValue) -> bool {
        match (self, source) {
            (RowData::Array(values), ColumnSource::Index(i)) => {
                if *i >= values.len() {
                    values.resize(*i + 1, DataValue::Null);
                }
                values[*i] = value;
                true
            }
            (RowData::Object(map), ColumnSource::Key(k)) => {
                map.insert(k.clone(), value);
                true
            }
            (RowData::Scalar(current), ColumnSource::Index(0)) => {
                *current = value;
                true
            }
            _ => false,
        }
    }

    /// Number of values carried by an array payload
    pub fn width(&self) -> Option<usize> {
        match self {
            RowData::Array(values) => Some(values.len()),
            _ => None,
        }
    }
}

/// Context handed to a cell renderer
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub row: usize,
    pub column: usize,
    pub data: &'a RowData,
}

/// Turns a row payload into the display string of one cell
#[derive(Clone)]
pub struct CellRenderer(Arc<dyn Fn(&RenderContext<'_>) -> String + Send + Sync>);

impl CellRenderer {
    pub fn new<F>(render: F) -> Self
    where
        F: Fn(&RenderContext<'_>) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(render))
    }

    pub fn render(&self, ctx: &RenderContext<'_>) -> String {
        (self.0)(ctx)
    }
}

impl fmt::Debug for CellRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CellRenderer(..)")
    }
}

/// User supplied total order over cell values
#[derive(Clone)]
pub struct CustomComparator(Arc<dyn Fn(&DataValue, &DataValue) -> Ordering + Send + Sync>);

impl CustomComparator {
    pub fn new<F>(cmp: F) -> Self
    where
        F: Fn(&DataValue, &DataValue) -> Ordering + Send + Sync + 'static,
    {
        Self(Arc::new(cmp))
    }

    pub fn compare(&self, a: &DataValue, b: &DataValue) -> Ordering {
        (self.0)(a, b)
    }
}

impl fmt::Debug for CustomComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomComparator(..)")
    }
}

/// Comparator selector for a column
#[derive(Debug, Clone)]
pub enum SortType {
    Numeric,
    String,
    Date,
    Custom(CustomComparator),
}

/// Column metadata and definition
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: String,
    pub source: ColumnSource,
    pub data_type: DataType,
    pub visible: bool,
    pub searchable: bool,
    pub sortable: bool,
    pub renderer: Option<CellRenderer>,
    /// Filter and sort on the rendered string instead of the raw payload
    pub use_rendered: bool,
    /// Per-column search term applied from construction onwards
    pub default_search: Option<String>,
    pub sort_type: SortType,
}

impl ColumnDefinition {
    /// Column reading position `index` of an array payload
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self::with_source(name, ColumnSource::Index(index))
    }

    /// Column reading `key` of an object payload
    pub fn keyed(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::with_source(name, ColumnSource::Key(key.into()))
    }

    fn with_source(name: impl Into<String>, source: ColumnSource) -> Self {
        Self {
            name: name.into(),
            source,
            data_type: DataType::String,
            visible: true,
            searchable: true,
            sortable: true,
            renderer: None,
            use_rendered: false,
            default_search: None,
            sort_type: SortType::String,
        }
    }

    /// Set the value type; the comparator follows unless a custom one is set later
    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.sort_type = data_type.sort_type();
        self.data_type = data_type;
        self
    }

    pub fn with_sort_type(mut self, sort_type: SortType) -> Self {
        self.sort_type = sort_type;
        self
    }

    pub fn with_renderer(mut self, renderer: CellRenderer, use_rendered: bool) -> Self {
        self.renderer = Some(renderer);
        self.use_rendered = use_rendered;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_searchable(mut self, searchable: bool) -> Self {
        self.searchable = searchable;
        self
    }

    pub fn with_sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    pub fn with_default_search(mut self, term: impl Into<String>) -> Self {
        self.default_search = Some(term.into());
        self
    }

    /// Raw cell value of this column for a payload, `Null` when absent
    pub fn raw_value(&self, data: &RowData) -> DataValue {
        data.get(&self.source).cloned().unwrap_or(DataValue::Null)
    }

    /// Display string for this column: renderer output or the raw value
    pub fn display(&self, row: usize, column: usize, data: &RowData) -> String {
        match &self.renderer {
            Some(renderer) => renderer.render(&RenderContext { row, column, data }),
            None => self.raw_value(data).to_string(),
        }
    }
}

/// The ordered set of column definitions of a view
#[derive(Debug, Clone, Default)]
pub struct ColumnSet {
    columns: Vec<ColumnDefinition>,
}

impl ColumnSet {
    pub fn new(columns: Vec<ColumnDefinition>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, index: usize) -> ViewResult<&ColumnDefinition> {
        self.columns.get(index).ok_or(ViewError::column(index))
    }

    pub fn get_mut(&mut self, index: usize) -> ViewResult<&mut ColumnDefinition> {
        self.columns.get_mut(index).ok_or(ViewError::column(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter()
    }

    pub fn as_slice(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Number of visible columns, the span an open sub-row covers
    pub fn visible_count(&self) -> usize {
        self.columns.iter().filter(|c| c.visible).count()
    }

    pub fn visible_indices(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.visible)
            .map(|(i, _)| i)
            .collect()
    }

    /// First visible column after `index`, used to place a re-shown cell
    pub fn next_visible_after(&self, index: usize) -> Option<usize> {
        self.columns
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, c)| c.visible)
            .map(|(i, _)| i)
    }

    /// Array payload width this column set expects
    pub fn array_width(&self) -> usize {
        self.columns
            .iter()
            .filter_map(|c| match c.source {
                ColumnSource::Index(i) => Some(i + 1),
                ColumnSource::Key(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Check an incoming payload fits the columns
    pub fn validate(&self, data: &RowData) -> ViewResult<()> {
        if let Some(found) = data.width() {
            let expected = self.array_width();
            if found != expected {
                return Err(ViewError::InvalidRowData { expected, found });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_inference() {
        assert_eq!(DataType::infer_from_string("123"), DataType::Integer);
        assert_eq!(DataType::infer_from_string("123.45"), DataType::Float);
        assert_eq!(DataType::infer_from_string("true"), DataType::Boolean);
        assert_eq!(DataType::infer_from_string("hello"), DataType::String);
        assert_eq!(DataType::infer_from_string(""), DataType::Null);
        assert_eq!(
            DataType::infer_from_string("2024-01-01"),
            DataType::DateTime
        );
    }

    #[test]
    fn test_merge_types() {
        assert_eq!(DataType::Integer.merge(&DataType::Float), DataType::Float);
        assert_eq!(DataType::Null.merge(&DataType::String), DataType::String);
        assert_eq!(DataType::Integer.merge(&DataType::String), DataType::Mixed);
    }

    #[test]
    fn test_row_data_access_by_source() {
        let mut array = RowData::array(["a", "b"]);
        assert_eq!(
            array.get(&ColumnSource::Index(1)),
            Some(&DataValue::from("b"))
        );
        assert!(array.get(&ColumnSource::Key("x".into())).is_none());
        assert!(array.set(&ColumnSource::Index(0), DataValue::Integer(4)));
        assert_eq!(array.get(&ColumnSource::Index(0)), Some(&DataValue::Integer(4)));

        let mut object = RowData::object([("name", "Alice")]);
        assert!(object.set(&ColumnSource::Key("age".into()), DataValue::Integer(30)));
        assert_eq!(
            object.get(&ColumnSource::Key("age".into())),
            Some(&DataValue::Integer(30))
        );
        assert!(!object.set(&ColumnSource::Index(0), DataValue::Null));

        let scalar = RowData::Scalar(DataValue::Integer(1));
        assert_eq!(scalar.get(&ColumnSource::Index(0)), Some(&DataValue::Integer(1)));
    }

    #[test]
    fn test_renderer_display() {
        let column = ColumnDefinition::new("price", 0).with_renderer(
            CellRenderer::new(|ctx| format!("${}", ctx.data.get(&ColumnSource::Index(0)).unwrap())),
            false,
        );
        let data = RowData::array([DataValue::Integer(5)]);
        assert_eq!(column.display(0, 0, &data), "$5");
        assert_eq!(column.raw_value(&data), DataValue::Integer(5));
    }

    #[test]
    fn test_column_set_visibility_helpers() {
        let columns = ColumnSet::new(vec![
            ColumnDefinition::new("a", 0),
            ColumnDefinition::new("b", 1).with_visible(false),
            ColumnDefinition::new("c", 2),
        ]);
        assert_eq!(columns.visible_count(), 2);
        assert_eq!(columns.visible_indices(), vec![0, 2]);
        assert_eq!(columns.next_visible_after(0), Some(2));
        assert_eq!(columns.next_visible_after(2), None);
        assert_eq!(columns.column_index("b"), Some(1));
        assert!(columns.get(3).is_err());
    }

    #[test]
    fn test_validate_array_width() {
        let columns = ColumnSet::new(vec![
            ColumnDefinition::new("a", 0),
            ColumnDefinition::new("b", 1),
        ]);
        assert!(columns.validate(&RowData::array(["x", "y"])).is_ok());
        assert_eq!(
            columns.validate(&RowData::array(["x"])),
            Err(ViewError::InvalidRowData {
                expected: 2,
                found: 1
            })
        );
        assert!(columns.validate(&RowData::object([("a", "x")])).is_ok());
    }
}
