use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RawValue – a single node of a raw forecast record
// ---------------------------------------------------------------------------

/// A dynamically-typed value as found in the raw per-source records.
/// Labels are `RawValue`s too, so the type must be `Ord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Calendar date, ordered chronologically.
    Date(NaiveDate),
    String(String),
    /// Nested sub-record (`temperature: { min, max }`).
    Map(BTreeMap<String, RawValue>),
}

// -- Manual Eq/Ord so labels can live in BTreeSet / be sorted --

/// Equal exactly when `cmp` says so: `Integer(2) == Float(2.0)`.
impl PartialEq for RawValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RawValue {}

impl PartialOrd for RawValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RawValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use RawValue::*;
        fn rank(v: &RawValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) | Float(_) => 2,
                Date(_) => 3,
                String(_) => 4,
                Map(_) => 5,
            }
        }
        let (ra, rb) = (rank(self), rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Integer(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Integer(b)) => a.total_cmp(&(*b as f64)),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => write!(f, "<null>"),
            RawValue::Bool(b) => write!(f, "{b}"),
            RawValue::Integer(i) => write!(f, "{i}"),
            RawValue::Float(v) => write!(f, "{v}"),
            RawValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            RawValue::String(s) => write!(f, "{s}"),
            RawValue::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Integer(v)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::String(s.to_string())
    }
}

impl From<NaiveDate> for RawValue {
    fn from(d: NaiveDate) -> Self {
        RawValue::Date(d)
    }
}

impl RawValue {
    /// Interpret the value as a matrix entry. Only numbers qualify.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Float(v) => Some(*v),
            RawValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Walk a nested path of map keys. `None` when any step is missing.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&RawValue> {
        let mut node = self;
        for step in path {
            match node {
                RawValue::Map(m) => node = m.get(step.as_ref())?,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Typed text (JSON strings, parquet strings): ISO dates become `Date`,
    /// anything else stays text.
    pub fn text(s: &str) -> RawValue {
        match parse_date(s) {
            Some(d) => RawValue::Date(d),
            None => RawValue::String(s.to_string()),
        }
    }

    /// Parse a bare text cell: empty → Null, then integer, float (non-finite
    /// → Null), bool, ISO date, and finally plain string.
    pub fn infer(s: &str) -> RawValue {
        let s = s.trim();
        if s.is_empty() {
            return RawValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return RawValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            // "NaN" and "inf" parse, but they are no usable reading.
            return if f.is_finite() { RawValue::Float(f) } else { RawValue::Null };
        }
        if s == "true" || s == "false" {
            return RawValue::Bool(s == "true");
        }
        if let Some(d) = parse_date(s) {
            return RawValue::Date(d);
        }
        RawValue::String(s.to_string())
    }
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time part.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let head = s.get(..10)?;
    let date = NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()?;
    match s.as_bytes().get(10) {
        None | Some(b'T') | Some(b' ') => Some(date),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// RawRecord – one row reported by one source
// ---------------------------------------------------------------------------

/// A single record from a source, tagged with the label used to align it
/// against the other sources.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub label: RawValue,
    pub fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new(label: impl Into<RawValue>) -> Self {
        RawRecord {
            label: label.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder helper: set `path` (dotted) to `value`, creating nested maps.
    pub fn with(mut self, path: &str, value: impl Into<RawValue>) -> Self {
        insert_path(&mut self.fields, path, value.into());
        self
    }

    /// Resolve a nested path; `None` when absent.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&RawValue> {
        let (first, rest) = path.split_first()?;
        self.fields.get(first.as_ref())?.get_path(rest)
    }
}

/// Insert `value` at a dotted `path`, creating intermediate maps.
/// An existing scalar in the way is replaced by a map.
pub fn insert_path(fields: &mut BTreeMap<String, RawValue>, path: &str, value: RawValue) {
    let mut parts = path.split('.').peekable();
    let mut node = fields;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            node.insert(part.to_string(), value);
            return;
        }
        let entry = node
            .entry(part.to_string())
            .or_insert_with(|| RawValue::Map(BTreeMap::new()));
        if !matches!(entry, RawValue::Map(_)) {
            *entry = RawValue::Map(BTreeMap::new());
        }
        node = match entry {
            RawValue::Map(m) => m,
            _ => unreachable!("entry was just made a map"),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> RawValue {
        RawValue::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap())
    }

    #[test]
    fn dates_order_chronologically() {
        let mut labels = vec![date("2024-03-02"), date("2023-12-31"), date("2024-01-15")];
        labels.sort();
        assert_eq!(
            labels,
            vec![date("2023-12-31"), date("2024-01-15"), date("2024-03-02")]
        );
    }

    #[test]
    fn integers_and_floats_compare_numerically() {
        assert!(RawValue::Integer(2) > RawValue::Float(1.5));
        assert!(RawValue::Float(2.5) > RawValue::Integer(2));
    }

    #[test]
    fn equality_agrees_with_ordering() {
        let (i, f) = (RawValue::Integer(2), RawValue::Float(2.0));
        assert_eq!(i.cmp(&f), Ordering::Equal);
        assert_eq!(i, f);

        let labels: std::collections::BTreeSet<RawValue> = [i, f].into();
        assert_eq!(labels.len(), 1);
        assert_ne!(RawValue::from("2"), RawValue::Integer(2));
    }

    #[test]
    fn nested_paths_resolve() {
        let rec = RawRecord::new(date("2024-01-01"))
            .with("temperature.min", -3.0)
            .with("temperature.max", 4.0)
            .with("description", "light rain");

        assert_eq!(rec.get(&["temperature", "min"]), Some(&RawValue::Float(-3.0)));
        assert_eq!(rec.get(&["description"]).and_then(|v| v.as_str()), Some("light rain"));
        assert_eq!(rec.get(&["temperature", "avg"]), None);
        assert_eq!(rec.get(&["description", "text"]), None);
    }

    #[test]
    fn infer_cell_types() {
        assert_eq!(RawValue::infer(""), RawValue::Null);
        assert_eq!(RawValue::infer("12"), RawValue::Integer(12));
        assert_eq!(RawValue::infer("-1.5"), RawValue::Float(-1.5));
        assert_eq!(RawValue::infer("NaN"), RawValue::Null);
        assert_eq!(RawValue::infer("-inf"), RawValue::Null);
        assert_eq!(RawValue::infer("true"), RawValue::Bool(true));
        assert_eq!(RawValue::infer("2024-05-06"), date("2024-05-06"));
        assert_eq!(RawValue::infer("2024-05-06T00:00:00"), date("2024-05-06"));
        assert_eq!(RawValue::infer("Kalush"), RawValue::from("Kalush"));
    }

    #[test]
    fn json_round_trips_untagged() {
        let v: RawValue = serde_json::from_str(r#"{"min": 1, "max": 2.5, "note": null}"#).unwrap();
        assert_eq!(v.get_path(&["min"]), Some(&RawValue::Integer(1)));
        assert_eq!(v.get_path(&["max"]), Some(&RawValue::Float(2.5)));
        assert!(v.get_path(&["note"]).unwrap().is_null());
    }
}
