use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

use crate::data::datatable::{ColumnDefinition, ColumnSet, DataType, DataValue, RowData};

/// Rows to sample when inferring column types
const TYPE_SAMPLE_SIZE: usize = 100;

/// Columns and row payloads read from a file, ready for a view
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub columns: ColumnSet,
    pub rows: Vec<RowData>,
}

fn infer_column_types(rows: &[Vec<String>], width: usize) -> Vec<DataType> {
    let mut column_types = vec![DataType::Null; width];
    for row in rows.iter().take(TYPE_SAMPLE_SIZE) {
        for (col_idx, value) in row.iter().enumerate().take(width) {
            if !value.is_empty() {
                let inferred = DataType::infer_from_string(value);
                column_types[col_idx] = column_types[col_idx].merge(&inferred);
            }
        }
    }
    column_types
}

/// Load a CSV file with a header row. Rows become array payloads.
pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<LoadedTable> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path.as_ref()))?;

    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    let headers = reader.headers()?.clone();

    let mut string_rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut row: Vec<String> = record.iter().map(|s| s.to_string()).collect();
        row.resize(headers.len(), String::new());
        string_rows.push(row);
    }

    let column_types = infer_column_types(&string_rows, headers.len());
    let columns = headers
        .iter()
        .zip(&column_types)
        .enumerate()
        .map(|(i, (name, data_type))| ColumnDefinition::new(name, i).with_type(data_type.clone()))
        .collect();

    let rows = string_rows
        .into_iter()
        .map(|row| {
            RowData::Array(
                row.iter()
                    .zip(&column_types)
                    .map(|(value, data_type)| DataValue::from_string(value, data_type))
                    .collect(),
            )
        })
        .collect::<Vec<_>>();

    info!(target: "loaders", "Loaded {} rows from {:?}", rows.len(), path.as_ref());
    Ok(LoadedTable {
        columns: ColumnSet::new(columns),
        rows,
    })
}

fn json_to_string(value: Option<&JsonValue>) -> String {
    match value {
        Some(JsonValue::Null) | None => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Build keyed columns and object rows from an array of JSON objects.
/// Columns are the union of keys, in the order they are first met in the file.
pub fn load_json_data(data: Vec<JsonValue>) -> Result<LoadedTable> {
    let mut column_names: Vec<String> = Vec::new();
    for item in &data {
        let Some(obj) = item.as_object() else {
            bail!("JSON data must be an array of objects");
        };
        for key in obj.keys() {
            if !column_names.contains(key) {
                column_names.push(key.clone());
            }
        }
    }

    let string_rows: Vec<Vec<String>> = data
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|obj| column_names.iter().map(|name| json_to_string(obj.get(name))).collect())
        .collect();

    let column_types = infer_column_types(&string_rows, column_names.len());
    let columns = column_names
        .iter()
        .zip(&column_types)
        .map(|(name, data_type)| ColumnDefinition::keyed(name, name).with_type(data_type.clone()))
        .collect();

    // Keys missing from an object stay missing rather than becoming nulls
    let rows = data
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|obj| {
            let values: BTreeMap<String, DataValue> = column_names
                .iter()
                .zip(&column_types)
                .filter(|(name, _)| obj.contains_key(name.as_str()))
                .map(|(name, data_type)| {
                    let text = json_to_string(obj.get(name));
                    (name.clone(), DataValue::from_string(&text, data_type))
                })
                .collect();
            RowData::Object(values)
        })
        .collect();

    Ok(LoadedTable {
        columns: ColumnSet::new(columns),
        rows,
    })
}

/// Load a JSON file holding an array of objects
pub fn load_json<P: AsRef<Path>>(path: P) -> Result<LoadedTable> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open JSON file: {:?}", path.as_ref()))?;
    let reader = BufReader::new(file);

    let json_data: Vec<JsonValue> =
        serde_json::from_reader(reader).with_context(|| "Failed to parse JSON file")?;

    let table = load_json_data(json_data)?;
    info!(target: "loaders", "Loaded {} rows from {:?}", table.rows.len(), path.as_ref());
    Ok(table)
}

/// Pick a loader from the file extension
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<LoadedTable> {
    let extension = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("csv") => load_csv(path),
        Some("json") => load_json(path),
        _ => bail!("Unsupported file type: {:?} (expected .csv or .json)", path.as_ref()),
    }
}
