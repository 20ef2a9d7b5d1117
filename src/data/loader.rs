use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{DataType, Date32Type, Float32Type, Float64Type, Int32Type, Int64Type};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{insert_path, RawRecord, RawValue};

/// Extensions tried, in order, when looking for a source's file.
pub const SOURCE_EXTENSIONS: &[&str] = &["json", "csv", "parquet", "pq"];

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load the raw records of one source from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.json`    – `[{ "weather_date": "2024-01-01", "temperature": { "min": -3 }, ... }, ...]`
/// * `.csv`     – header row, dotted column names (`temperature.min`) for nesting
/// * `.parquet` – flat columns, dotted names as in CSV
///
/// `label_key` (dotted) names the field every record is aligned on.
pub fn load_file(path: &Path, label_key: &str) -> Result<Vec<RawRecord>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path, label_key),
        "json" => load_json(path, label_key),
        "csv" => load_csv(path, label_key),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

/// Pull the label out of a record's fields; it must be present and non-null.
fn take_label(fields: BTreeMap<String, RawValue>, label_key: &str, row: usize) -> Result<RawRecord> {
    let path: Vec<&str> = label_key.split('.').collect();
    let probe = RawRecord {
        label: RawValue::Null,
        fields,
    };
    let label = match probe.get(path.as_slice()) {
        Some(v) if !v.is_null() => v.clone(),
        _ => bail!("Row {row}: missing label field '{label_key}'"),
    };
    Ok(RawRecord {
        label,
        fields: probe.fields,
    })
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, as exported from a document store):
///
/// ```json
/// [
///   {
///     "city": "Ivano-Frankivsk",
///     "forecast_distance": 0,
///     "weather_date": "2024-01-01",
///     "temperature": { "min": -3, "max": 4 },
///     "description": "light snow"
///   },
///   ...
/// ]
/// ```
fn load_json(path: &Path, label_key: &str) -> Result<Vec<RawRecord>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    parse_json_records(&text, label_key)
}

pub fn parse_json_records(text: &str, label_key: &str) -> Result<Vec<RawRecord>> {
    let root: JsonValue = serde_json::from_str(text).context("parsing JSON")?;

    let rows = root.as_array().context("Expected top-level JSON array")?;

    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let obj = row
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let fields = obj
            .iter()
            .map(|(k, v)| (k.clone(), json_to_raw(v)))
            .collect();
        records.push(take_label(fields, label_key, i)?);
    }
    Ok(records)
}

fn json_to_raw(val: &JsonValue) -> RawValue {
    match val {
        JsonValue::String(s) => RawValue::text(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                RawValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                RawValue::Float(f)
            } else {
                RawValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => RawValue::Bool(*b),
        JsonValue::Null => RawValue::Null,
        JsonValue::Object(obj) => RawValue::Map(
            obj.iter()
                .map(|(k, v)| (k.clone(), json_to_raw(v)))
                .collect(),
        ),
        other => RawValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names; `a.b` headers nest (`{a: {b}}`).
/// Cell types are inferred (empty → null, numbers, booleans, ISO dates, text).
fn load_csv(path: &Path, label_key: &str) -> Result<Vec<RawRecord>> {
    let reader = csv::Reader::from_path(path).context("opening CSV")?;
    read_csv(reader, label_key)
}

pub fn parse_csv_records(text: &str, label_key: &str) -> Result<Vec<RawRecord>> {
    read_csv(csv::Reader::from_reader(text.as_bytes()), label_key)
}

fn read_csv<R: std::io::Read>(mut reader: csv::Reader<R>, label_key: &str) -> Result<Vec<RawRecord>> {
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let row = result.with_context(|| format!("CSV row {row_no}"))?;

        let mut fields = BTreeMap::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            insert_path(&mut fields, header, RawValue::infer(cell));
        }
        records.push(take_label(fields, label_key, row_no)?);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file of forecast records.
///
/// Every column becomes a field; dotted column names nest like CSV headers.
/// Supported column types: Utf8/LargeUtf8, Int32/Int64, Float32/Float64,
/// Boolean and Date32.
fn load_parquet(path: &Path, label_key: &str) -> Result<Vec<RawRecord>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut records = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let names: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

        for row in 0..batch.num_rows() {
            let mut fields = BTreeMap::new();
            for (col_idx, name) in names.iter().enumerate() {
                let value = extract_value(batch.column(col_idx), row)
                    .with_context(|| format!("Row {row}: failed to read '{name}'"))?;
                insert_path(&mut fields, name, value);
            }
            let row_no = records.len();
            records.push(take_label(fields, label_key, row_no)?);
        }
    }

    Ok(records)
}

// -- Arrow helpers --

/// Extract a single value from an Arrow column at a given row.
fn extract_value(col: &ArrayRef, row: usize) -> Result<RawValue> {
    if col.is_null(row) {
        return Ok(RawValue::Null);
    }
    let value = match col.data_type() {
        DataType::Utf8 => RawValue::text(col.as_string::<i32>().value(row)),
        DataType::LargeUtf8 => RawValue::text(col.as_string::<i64>().value(row)),
        DataType::Int32 => RawValue::Integer(col.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => RawValue::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => RawValue::Float(col.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => RawValue::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => RawValue::Bool(col.as_boolean().value(row)),
        DataType::Date32 => col
            .as_primitive::<Date32Type>()
            .value_as_date(row)
            .map(RawValue::Date)
            .context("date out of range")?,
        other => bail!("Unsupported column type {other:?}"),
    };
    Ok(value)
}
