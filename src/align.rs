//! Alignment of irregular per-source records into matrix bundles.
//!
//! ```text
//!  source A records ─┐
//!  source B records ─┼─► extract (key map) ─► choose labels (policy) ─► MatrixBundle (one row per source)
//!  truth records   ──┘                                               └► MatrixBundle (one row, truth)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::data::matrix::{Matrix, MatrixBundle};
use crate::data::model::{RawRecord, RawValue};
use crate::error::{ModelError, ModelResult};
use crate::preprocess::Preprocessor;

// ---------------------------------------------------------------------------
// Key map – which field feeds which output key, and how it is preprocessed
// ---------------------------------------------------------------------------

/// Extraction rule for one output key: a primary path, fallback paths, and
/// a preprocessing chain applied in order to the extracted value.
#[derive(Debug, Clone, Default)]
pub struct FieldSpec {
    paths: Vec<Vec<String>>,
    preprocessors: Vec<Arc<dyn Preprocessor>>,
}

impl FieldSpec {
    /// Start from a dotted path such as `"temperature.min"`.
    pub fn path(path: &str) -> Self {
        FieldSpec::default().or(path)
    }

    /// Add a fallback path, tried when the earlier ones do not resolve.
    pub fn or(mut self, path: &str) -> Self {
        self.paths.push(path.split('.').map(str::to_string).collect());
        self
    }

    /// Append a preprocessing step.
    pub fn then(mut self, p: impl Preprocessor + 'static) -> Self {
        self.preprocessors.push(Arc::new(p));
        self
    }

    pub fn then_boxed(mut self, p: Box<dyn Preprocessor>) -> Self {
        self.preprocessors.push(Arc::from(p));
        self
    }

    pub fn paths(&self) -> &[Vec<String>] {
        &self.paths
    }

    /// `Ok(None)` when no path resolves to a non-null value, the chain
    /// turns the value into null, or the result is NaN or infinite.
    fn extract(&self, key: &str, record: &RawRecord) -> ModelResult<Option<f64>> {
        let Some(raw) = self
            .paths
            .iter()
            .filter_map(|p| record.get(p.as_slice()))
            .find(|v| !v.is_null())
        else {
            return Ok(None);
        };

        let value = self
            .preprocessors
            .iter()
            .try_fold(raw.clone(), |v, p| p.apply(v))?;

        match value {
            RawValue::Null => Ok(None),
            other => other.as_f64().map(|x| x.is_finite().then_some(x)).ok_or_else(|| {
                ModelError::Alignment(format!(
                    "'{key}' at label {}: '{other}' is not numeric",
                    record.label
                ))
            }),
        }
    }
}

/// Output key → extraction rule. Keys are kept in sorted order.
pub type KeyMap = BTreeMap<String, FieldSpec>;

// ---------------------------------------------------------------------------
// Policy and inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignPolicy {
    /// Keep labels where every source (and the truth source) has a value
    /// for every key.
    #[default]
    Intersection,
    /// Keep labels present in any source; fill gaps from the other sources.
    Union,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlignOptions {
    pub policy: AlignPolicy,
    /// Keep only the newest `limit` labels.
    pub limit: Option<usize>,
}

impl AlignOptions {
    pub fn new(policy: AlignPolicy) -> Self {
        AlignOptions { policy, limit: None }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Records reported by one named source.
#[derive(Debug, Clone)]
pub struct SourceRecords {
    pub name: String,
    pub records: Vec<RawRecord>,
}

impl SourceRecords {
    pub fn new(name: impl Into<String>, records: Vec<RawRecord>) -> Self {
        SourceRecords {
            name: name.into(),
            records,
        }
    }
}

/// Result of one alignment: candidates (one row per source) and, when a
/// truth source was supplied, the matching single-row truth bundle.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub candidates: MatrixBundle,
    pub truth: Option<MatrixBundle>,
}

// ---------------------------------------------------------------------------
// align
// ---------------------------------------------------------------------------

/// Values of one record, indexed like the key map.
type Row = Vec<Option<f64>>;

/// First record per label wins; labels listed in encounter order.
fn tabulate(
    records: &[RawRecord],
    keys: &[(&String, &FieldSpec)],
    table: &mut BTreeMap<RawValue, Row>,
    order: &mut Vec<RawValue>,
    seen: &mut BTreeSet<RawValue>,
) -> ModelResult<()> {
    for rec in records {
        if table.contains_key(&rec.label) {
            continue;
        }
        let row = keys
            .iter()
            .map(|(k, spec)| spec.extract(k, rec))
            .collect::<ModelResult<Row>>()?;
        table.insert(rec.label.clone(), row);
        if seen.insert(rec.label.clone()) {
            order.push(rec.label.clone());
        }
    }
    Ok(())
}

pub fn align(
    sources: &[SourceRecords],
    truth: Option<&SourceRecords>,
    key_map: &KeyMap,
    options: &AlignOptions,
) -> ModelResult<Alignment> {
    let keys: Vec<(&String, &FieldSpec)> = key_map.iter().collect();

    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    let mut tables = Vec::with_capacity(sources.len());
    for src in sources {
        let mut table = BTreeMap::new();
        tabulate(&src.records, &keys, &mut table, &mut order, &mut seen)?;
        tables.push(table);
    }

    let truth_table = match truth {
        Some(t) => {
            let mut table = BTreeMap::new();
            // Truth labels do not widen the candidate label universe.
            let (mut o, mut s) = (Vec::new(), BTreeSet::new());
            tabulate(&t.records, &keys, &mut table, &mut o, &mut s)?;
            Some(table)
        }
        None => None,
    };

    // (label, one filled row of values per source)
    let mut columns: Vec<(RawValue, Vec<Row>)> = Vec::new();
    for label in order {
        if let Some(tt) = &truth_table {
            let scorable = match options.policy {
                AlignPolicy::Intersection => tt
                    .get(&label)
                    .is_some_and(|r| r.iter().all(Option::is_some)),
                AlignPolicy::Union => tt.contains_key(&label),
            };
            if !scorable {
                continue;
            }
        }
        let per_source: Vec<Option<&Row>> = tables.iter().map(|t| t.get(&label)).collect();

        let filled = match options.policy {
            AlignPolicy::Intersection => {
                let complete = per_source
                    .iter()
                    .all(|r| r.is_some_and(|r| r.iter().all(Option::is_some)));
                if !complete {
                    continue;
                }
                per_source
                    .into_iter()
                    .map(|r| r.cloned().unwrap_or_default())
                    .collect::<Vec<Row>>()
            }
            AlignPolicy::Union => {
                // First non-null value per key, scanning sources in order.
                let fallback: Row = (0..keys.len())
                    .map(|ki| per_source.iter().flatten().find_map(|r| r[ki]))
                    .collect();
                if fallback.iter().any(Option::is_none) {
                    continue;
                }
                per_source
                    .iter()
                    .map(|r| {
                        (0..keys.len())
                            .map(|ki| r.and_then(|r| r[ki]).or(fallback[ki]))
                            .collect()
                    })
                    .collect()
            }
        };
        columns.push((label, filled));
    }

    // Newest first; the sort is stable so equal labels keep encounter order.
    columns.sort_by(|a, b| b.0.cmp(&a.0));
    if let Some(limit) = options.limit {
        columns.truncate(limit);
    }

    let labels: Vec<RawValue> = columns.iter().map(|(l, _)| l.clone()).collect();
    let slots: Vec<String> = sources.iter().map(|s| s.name.clone()).collect();

    let mut data = BTreeMap::new();
    for (ki, (key, _)) in keys.iter().enumerate() {
        let rows = (0..sources.len())
            .map(|si| {
                columns
                    .iter()
                    .map(|(_, vals)| vals[si][ki].unwrap_or(f64::NAN))
                    .collect()
            })
            .collect();
        data.insert((*key).clone(), Matrix::from_rows(rows)?);
    }
    let candidates = MatrixBundle::new(data, labels.clone(), slots)?;

    let truth = match (truth, truth_table) {
        (Some(t), Some(tt)) => {
            let mut data = BTreeMap::new();
            for (ki, (key, _)) in keys.iter().enumerate() {
                let row = labels
                    .iter()
                    .map(|label| {
                        tt.get(label).and_then(|r| r[ki]).ok_or_else(|| {
                            ModelError::Alignment(format!(
                                "truth source '{}' has no value for '{key}' at label {label}",
                                t.name
                            ))
                        })
                    })
                    .collect::<ModelResult<Vec<f64>>>()?;
                data.insert((*key).clone(), Matrix::from_rows(vec![row])?);
            }
            Some(MatrixBundle::new(data, labels, vec![t.name.clone()])?)
        }
        _ => None,
    };

    Ok(Alignment { candidates, truth })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{Number, WordClass};
    use chrono::NaiveDate;

    fn day(d: u32) -> RawValue {
        RawValue::Date(NaiveDate::from_ymd_opt(2024, 1, d).unwrap())
    }

    fn rec(d: u32, t_min: f64) -> RawRecord {
        RawRecord::new(day(d)).with("temperature.min", t_min)
    }

    fn t_min_map() -> KeyMap {
        [("t_min".to_string(), FieldSpec::path("temperature.min"))].into()
    }

    fn row(b: &MatrixBundle, key: &str, i: usize) -> Vec<f64> {
        b.get(key).unwrap().row(i).to_vec()
    }

    #[test]
    fn intersection_keeps_common_labels_newest_first() {
        let a = SourceRecords::new("a", vec![rec(1, 1.0), rec(2, 2.0), rec(3, 3.0)]);
        let b = SourceRecords::new("b", vec![rec(3, 30.0), rec(2, 20.0), rec(4, 40.0)]);
        let truth = SourceRecords::new("truth", vec![rec(2, 2.5), rec(3, 3.5), rec(1, 1.5)]);

        let out = align(&[a, b], Some(&truth), &t_min_map(), &AlignOptions::default()).unwrap();

        assert_eq!(out.candidates.labels(), &[day(3), day(2)]);
        assert_eq!(out.candidates.slots(), &["a".to_string(), "b".to_string()]);
        assert_eq!(row(&out.candidates, "t_min", 0), vec![3.0, 2.0]);
        assert_eq!(row(&out.candidates, "t_min", 1), vec![30.0, 20.0]);

        let truth = out.truth.unwrap();
        assert_eq!(truth.labels(), out.candidates.labels());
        assert_eq!(row(&truth, "t_min", 0), vec![3.5, 2.5]);
    }

    #[test]
    fn intersection_of_disjoint_sources_is_empty() {
        let a = SourceRecords::new("a", vec![rec(1, 1.0), rec(2, 2.0)]);
        let b = SourceRecords::new("b", vec![rec(3, 3.0), rec(4, 4.0)]);

        let out = align(&[a, b], None, &t_min_map(), &AlignOptions::default()).unwrap();
        assert!(out.candidates.is_empty());
        assert_eq!(out.candidates.get("t_min").unwrap().n_rows(), 2);
        assert!(out.truth.is_none());
    }

    #[test]
    fn union_of_disjoint_sources_fills_every_cell() {
        let a = SourceRecords::new("a", vec![rec(1, 1.0), rec(2, 2.0)]);
        let b = SourceRecords::new("b", vec![rec(3, 3.0), rec(4, 4.0)]);

        let out = align(&[a, b], None, &t_min_map(), &AlignOptions::new(AlignPolicy::Union)).unwrap();

        assert_eq!(out.candidates.labels(), &[day(4), day(3), day(2), day(1)]);
        assert_eq!(row(&out.candidates, "t_min", 0), vec![4.0, 3.0, 2.0, 1.0]);
        assert_eq!(row(&out.candidates, "t_min", 1), vec![4.0, 3.0, 2.0, 1.0]);
        assert!(out.candidates.get("t_min").unwrap().rows().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn union_fills_from_first_source_in_declared_order() {
        let a = SourceRecords::new("a", vec![rec(1, 1.0)]);
        let b = SourceRecords::new("b", vec![rec(1, 10.0), rec(2, 20.0)]);
        let c = SourceRecords::new("c", vec![rec(2, 200.0)]);

        let out = align(&[a, b, c], None, &t_min_map(), &AlignOptions::new(AlignPolicy::Union)).unwrap();

        assert_eq!(out.candidates.labels(), &[day(2), day(1)]);
        // a misses day 2 → b's value; c misses day 1 → a's value.
        assert_eq!(row(&out.candidates, "t_min", 0), vec![20.0, 1.0]);
        assert_eq!(row(&out.candidates, "t_min", 1), vec![20.0, 10.0]);
        assert_eq!(row(&out.candidates, "t_min", 2), vec![200.0, 1.0]);
    }

    #[test]
    fn union_drops_labels_nobody_reports() {
        let a = SourceRecords::new("a", vec![rec(1, 1.0), RawRecord::new(day(2))]);
        let b = SourceRecords::new("b", vec![RawRecord::new(day(2)).with("temperature.min", RawValue::Null)]);

        let out = align(&[a, b], None, &t_min_map(), &AlignOptions::new(AlignPolicy::Union)).unwrap();
        assert_eq!(out.candidates.labels(), &[day(1)]);
    }

    #[test]
    fn union_with_truth_is_restricted_to_truth_labels() {
        let a = SourceRecords::new("a", vec![rec(1, 1.0), rec(2, 2.0), rec(3, 3.0)]);
        let truth = SourceRecords::new("truth", vec![rec(1, 1.5), rec(3, 3.5)]);

        let out = align(&[a], Some(&truth), &t_min_map(), &AlignOptions::new(AlignPolicy::Union)).unwrap();
        assert_eq!(out.candidates.labels(), &[day(3), day(1)]);
        assert_eq!(row(&out.truth.unwrap(), "t_min", 0), vec![3.5, 1.5]);
    }

    #[test]
    fn missing_truth_path_is_an_alignment_error() {
        let a = SourceRecords::new("a", vec![rec(1, 1.0)]);
        let truth = SourceRecords::new("truth", vec![RawRecord::new(day(1)).with("temperature.max", 5.0)]);

        let err = align(&[a], Some(&truth), &t_min_map(), &AlignOptions::new(AlignPolicy::Union)).unwrap_err();
        assert!(matches!(err, ModelError::Alignment(_)));
    }

    fn two_key_map() -> KeyMap {
        [
            ("t_min".to_string(), FieldSpec::path("temperature.min")),
            ("hum".to_string(), FieldSpec::path("humidity")),
        ]
        .into()
    }

    #[test]
    fn intersection_drops_labels_truth_cannot_score() {
        let a = SourceRecords::new(
            "a",
            vec![rec(1, 1.0).with("humidity", 60.0), rec(2, 2.0).with("humidity", 70.0)],
        );
        // Truth has no humidity for day 2.
        let truth = SourceRecords::new("truth", vec![rec(1, 1.5).with("humidity", 65.0), rec(2, 2.5)]);

        let out = align(&[a.clone()], Some(&truth), &two_key_map(), &AlignOptions::default()).unwrap();
        assert_eq!(out.candidates.labels(), &[day(1)]);
        assert_eq!(row(&out.truth.unwrap(), "hum", 0), vec![65.0]);

        let err = align(&[a], Some(&truth), &two_key_map(), &AlignOptions::new(AlignPolicy::Union)).unwrap_err();
        assert!(matches!(err, ModelError::Alignment(_)));
    }

    #[test]
    fn non_finite_values_count_as_missing() {
        let a = SourceRecords::new("a", vec![rec(1, f64::NAN), rec(2, 2.0), rec(3, f64::INFINITY)]);
        let b = SourceRecords::new("b", vec![rec(1, 10.0), rec(2, 20.0)]);

        let union = align(&[a.clone(), b.clone()], None, &t_min_map(), &AlignOptions::new(AlignPolicy::Union)).unwrap();
        // Day 3 has no finite value anywhere; a's NaN on day 1 is filled from b.
        assert_eq!(union.candidates.labels(), &[day(2), day(1)]);
        assert_eq!(row(&union.candidates, "t_min", 0), vec![2.0, 10.0]);
        assert_eq!(row(&union.candidates, "t_min", 1), vec![20.0, 10.0]);

        let both = align(&[a, b], None, &t_min_map(), &AlignOptions::default()).unwrap();
        assert_eq!(both.candidates.labels(), &[day(2)]);
    }

    #[test]
    fn fallback_paths_resolve_truth() {
        let map: KeyMap = [(
            "t_min".to_string(),
            FieldSpec::path("temperature.min").or("t_min"),
        )]
        .into();
        let a = SourceRecords::new("a", vec![rec(1, 1.0)]);
        let truth = SourceRecords::new("truth", vec![RawRecord::new(day(1)).with("t_min", 0.5)]);

        let out = align(&[a], Some(&truth), &map, &AlignOptions::default()).unwrap();
        assert_eq!(row(&out.truth.unwrap(), "t_min", 0), vec![0.5]);
    }

    #[test]
    fn preprocessing_chain_turns_text_into_classes() {
        let words = [("sun", 1.0), ("rain", 3.0)]
            .into_iter()
            .map(|(w, c)| (w.to_string(), c))
            .collect();
        let map: KeyMap = [
            ("class".to_string(), FieldSpec::path("description").then(WordClass::new(words).unwrap())),
            ("pressure".to_string(), FieldSpec::path("pressure").then(Number)),
        ]
        .into();
        let a = SourceRecords::new(
            "a",
            vec![RawRecord::new(day(1)).with("description", "Rainy").with("pressure", "745")],
        );

        let out = align(&[a], None, &map, &AlignOptions::default()).unwrap();
        assert_eq!(row(&out.candidates, "class", 0), vec![3.0]);
        assert_eq!(row(&out.candidates, "pressure", 0), vec![745.0]);
    }

    #[test]
    fn non_numeric_value_is_an_alignment_error() {
        let a = SourceRecords::new("a", vec![RawRecord::new(day(1)).with("temperature.min", "cold")]);
        let err = align(&[a], None, &t_min_map(), &AlignOptions::default()).unwrap_err();
        assert!(matches!(err, ModelError::Alignment(_)));
    }

    #[test]
    fn limit_keeps_newest_labels() {
        let a = SourceRecords::new("a", (1..=5).map(|d| rec(d, d as f64)).collect());
        let opts = AlignOptions::new(AlignPolicy::Intersection).with_limit(2);

        let out = align(&[a], None, &t_min_map(), &opts).unwrap();
        assert_eq!(out.candidates.labels(), &[day(5), day(4)]);
    }

    #[test]
    fn duplicate_labels_keep_first_record() {
        let a = SourceRecords::new("a", vec![rec(1, 1.0), rec(1, 99.0)]);
        let out = align(&[a], None, &t_min_map(), &AlignOptions::default()).unwrap();
        assert_eq!(row(&out.candidates, "t_min", 0), vec![1.0]);
    }
}
