use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use tracing::debug;

use crate::data::datatable::{ColumnSet, SortType};
use crate::data::datavalue_compare::{compare_sort_values, sort_value, BlankPolicy, SortValue};
use crate::data::row_store::RowStore;
use crate::error::ViewResult;

/// Sort order for columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

impl SortOrder {
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            other => Err(anyhow::anyhow!("Unknown sort direction '{}'", other)),
        }
    }
}

/// One sort key: a column and a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: usize,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(column: usize) -> Self {
        Self {
            column,
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(column: usize) -> Self {
        Self {
            column,
            order: SortOrder::Descending,
        }
    }
}

/// User sort keys wrapped by the fixed keys that always apply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub fixed_pre: Vec<SortKey>,
    pub keys: Vec<SortKey>,
    pub fixed_post: Vec<SortKey>,
}

impl SortSpec {
    /// Keys in application order. User keys on unsortable columns are dropped.
    pub fn effective_keys(&self, columns: &ColumnSet) -> Vec<SortKey> {
        let user = self.keys.iter().filter(|key| match columns.get(key.column) {
            Ok(column) if column.sortable => true,
            _ => {
                debug!(target: "SortEngine", "Ignoring sort on column {}", key.column);
                false
            }
        });

        self.fixed_pre
            .iter()
            .chain(user)
            .chain(self.fixed_post.iter())
            .copied()
            .collect()
    }
}

pub struct SortEngine<'a> {
    columns: &'a ColumnSet,
    blanks: BlankPolicy,
}

impl<'a> SortEngine<'a> {
    pub fn new(columns: &'a ColumnSet, blanks: BlankPolicy) -> Self {
        Self { columns, blanks }
    }

    /// Stable multi-key sort of `display`, moving `search_cache` in lockstep.
    /// An empty key list returns the input untouched.
    pub fn sort(
        &self,
        store: &mut RowStore,
        display: Vec<usize>,
        search_cache: Vec<String>,
        keys: &[SortKey],
    ) -> ViewResult<(Vec<usize>, Vec<String>)> {
        if keys.is_empty() {
            return Ok((display, search_cache));
        }

        let sort_types: Vec<&SortType> = keys
            .iter()
            .map(|key| self.columns.get(key.column).map(|c| &c.sort_type))
            .collect::<ViewResult<_>>()?;

        let mut entries: Vec<(usize, String, Vec<SortValue>)> = Vec::with_capacity(display.len());
        for (index, text) in display.into_iter().zip(search_cache) {
            let mut values = Vec::with_capacity(keys.len());
            for (key, sort_type) in keys.iter().zip(&sort_types) {
                let value = store.filter_value(index, key.column, self.columns)?;
                values.push(sort_value(&value, sort_type));
            }
            entries.push((index, text, values));
        }

        entries.sort_by(|a, b| {
            for (k, key) in keys.iter().enumerate() {
                let cmp = compare_sort_values(&a.2[k], &b.2[k], sort_types[k], key.order, self.blanks);
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            Ordering::Equal
        });

        debug!(target: "SortEngine", "Sorted {} rows on {:?}", entries.len(), keys);
        Ok(entries.into_iter().map(|(index, text, _)| (index, text)).unzip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::datatable::{ColumnDefinition, DataType, DataValue, RowData};

    fn fixture() -> (ColumnSet, RowStore, Vec<usize>, Vec<String>) {
        let columns = ColumnSet::new(vec![
            ColumnDefinition::new("k", 0).with_type(DataType::Integer),
            ColumnDefinition::new("id", 1),
        ]);
        let mut store = RowStore::new();
        let display = vec![
            store.insert(RowData::array([DataValue::Integer(1), DataValue::from("A")])),
            store.insert(RowData::array([DataValue::Integer(1), DataValue::from("B")])),
            store.insert(RowData::array([DataValue::Integer(2), DataValue::from("C")])),
        ];
        let cache = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        (columns, store, display, cache)
    }

    #[test]
    fn test_sort_is_stable() {
        let (columns, mut store, display, cache) = fixture();
        let engine = SortEngine::new(&columns, BlankPolicy::Low);
        let (sorted, cache) = engine
            .sort(&mut store, display, cache, &[SortKey::asc(0)])
            .unwrap();
        assert_eq!(sorted, vec![0, 1, 2]);
        assert_eq!(cache, vec!["a", "b", "c"]);

        let (sorted, cache) = engine
            .sort(&mut store, sorted, cache, &[SortKey::desc(0)])
            .unwrap();
        // Equal keys keep A before B
        assert_eq!(sorted, vec![2, 0, 1]);
        assert_eq!(cache, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_multi_key_tie_break() {
        let (columns, mut store, display, cache) = fixture();
        let engine = SortEngine::new(&columns, BlankPolicy::Low);
        let (sorted, _) = engine
            .sort(&mut store, display, cache, &[SortKey::asc(0), SortKey::desc(1)])
            .unwrap();
        assert_eq!(sorted, vec![1, 0, 2]);
    }

    #[test]
    fn test_empty_keys_leave_order() {
        let (columns, mut store, _, _) = fixture();
        let engine = SortEngine::new(&columns, BlankPolicy::Low);
        let (sorted, _) = engine
            .sort(&mut store, vec![2, 0, 1], vec![String::new(); 3], &[])
            .unwrap();
        assert_eq!(sorted, vec![2, 0, 1]);
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let (columns, mut store, display, cache) = fixture();
        let engine = SortEngine::new(&columns, BlankPolicy::Low);
        assert!(engine
            .sort(&mut store, display, cache, &[SortKey::asc(9)])
            .is_err());
    }

    #[test]
    fn test_effective_keys_wrap_user_keys() {
        let columns = ColumnSet::new(vec![
            ColumnDefinition::new("a", 0),
            ColumnDefinition::new("b", 1).with_sortable(false),
            ColumnDefinition::new("c", 2),
        ]);
        let spec = SortSpec {
            fixed_pre: vec![SortKey::asc(2)],
            keys: vec![SortKey::desc(1), SortKey::asc(0)],
            fixed_post: vec![SortKey::desc(1)],
        };
        assert_eq!(
            spec.effective_keys(&columns),
            vec![SortKey::asc(2), SortKey::asc(0), SortKey::desc(1)]
        );
    }

    #[test]
    fn test_parse_sort_order() {
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
