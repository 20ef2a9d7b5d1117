use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::loader::{load_file, SOURCE_EXTENSIONS};
use super::matrix::MatrixBundle;
use super::model::{RawRecord, RawValue};
use crate::records::{ErrorRecord, Supplement};
use crate::reducer::Metric;
use crate::weights::{WeightCurve, WeightTable};

// ---------------------------------------------------------------------------
// Collections and persisted documents
// ---------------------------------------------------------------------------

/// Names of the output collections (one JSON file each).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Collections {
    pub weights: String,
    pub errors: String,
    pub produced: String,
}

impl Default for Collections {
    fn default() -> Self {
        Collections {
            weights: "weights".into(),
            errors: "errors".into(),
            produced: "produced".into(),
        }
    }
}

/// One learned weight vector for one key at one forecast distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightDoc {
    #[serde(flatten)]
    pub supplement: Supplement,
    pub key: String,
    pub slots: Vec<String>,
    pub metric: Metric,
    pub curve: WeightCurve,
    pub weights: Vec<f64>,
}

/// Cross-validated error of the consensus for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDoc {
    #[serde(flatten)]
    pub supplement: Supplement,
    pub key: String,
    pub metric: Metric,
    pub folds: usize,
    pub error: f64,
}

/// Consensus values of every key for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducedDoc {
    #[serde(flatten)]
    pub supplement: Supplement,
    pub label: RawValue,
    pub data: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Directory-backed record store.
///
/// Sources are read from `<data_dir>/<name>.<ext>`; results are upserted
/// into `<output_dir>/<collection>.json` as arrays of documents.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
    output_dir: PathBuf,
    label_key: String,
    collections: Collections,
}

impl FileStore {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        label_key: &str,
        collections: Collections,
    ) -> Self {
        FileStore {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            label_key: label_key.to_string(),
            collections,
        }
    }

    /// First existing `<data_dir>/<name>.<ext>` in extension order.
    pub fn source_path(&self, name: &str) -> Result<PathBuf> {
        for ext in SOURCE_EXTENSIONS {
            let path = self.data_dir.join(format!("{name}.{ext}"));
            if path.is_file() {
                return Ok(path);
            }
        }
        bail!(
            "No data file for source '{name}' in {} (tried {})",
            self.data_dir.display(),
            SOURCE_EXTENSIONS.join(", ")
        )
    }

    /// Load every record of one source.
    pub fn load_source(&self, name: &str) -> Result<Vec<RawRecord>> {
        let path = self.source_path(name)?;
        let records = load_file(&path, &self.label_key)
            .with_context(|| format!("loading source '{name}' from {}", path.display()))?;
        info!("Loaded {} record(s) for source '{name}'", records.len());
        Ok(records)
    }

    // -- writers --

    /// Persist every (key, distance) entry of `table`. The supplement's
    /// forecast distance is replaced by each entry's own.
    pub fn write_weights(&self, supplement: &Supplement, table: &WeightTable) -> Result<usize> {
        let docs = table
            .entries()
            .map(|(key, d, w)| WeightDoc {
                supplement: Supplement {
                    forecast_distance: d,
                    ..supplement.clone()
                },
                key: key.to_string(),
                slots: table.slots().to_vec(),
                metric: table.metric(),
                curve: table.curve(),
                weights: w.to_vec(),
            })
            .collect();
        self.upsert(&self.collections.weights, docs, |a: &WeightDoc, b| {
            a.supplement == b.supplement && a.key == b.key
        })
    }

    pub fn write_errors(&self, supplement: &Supplement, record: &ErrorRecord) -> Result<usize> {
        let docs = record
            .errors
            .iter()
            .map(|(key, e)| ErrorDoc {
                supplement: supplement.clone(),
                key: key.clone(),
                metric: record.metric,
                folds: record.folds,
                error: *e,
            })
            .collect();
        self.upsert(&self.collections.errors, docs, |a: &ErrorDoc, b| {
            a.supplement == b.supplement && a.key == b.key
        })
    }

    /// Persist a single-row bundle (the output of `produce`), one document
    /// per label.
    pub fn write_produced(&self, supplement: &Supplement, produced: &MatrixBundle) -> Result<usize> {
        let docs = produced
            .labels()
            .iter()
            .enumerate()
            .map(|(j, label)| ProducedDoc {
                supplement: supplement.clone(),
                label: label.clone(),
                data: produced
                    .iter()
                    .filter(|(_, m)| m.n_rows() > 0)
                    .map(|(k, m)| (k.to_string(), m.get(0, j)))
                    .collect(),
            })
            .collect();
        self.upsert(&self.collections.produced, docs, |a: &ProducedDoc, b| {
            a.supplement == b.supplement && a.label == b.label
        })
    }

    // -- readers --

    /// Rebuild the most recently updated weight table for a place.
    pub fn read_weights(&self, city: &str, country: Option<&str>) -> Result<Option<WeightTable>> {
        let docs: Vec<WeightDoc> = self.read_collection(&self.collections.weights)?;
        let mine: Vec<&WeightDoc> = docs
            .iter()
            .filter(|d| d.supplement.city == city && d.supplement.country.as_deref() == country)
            .collect();

        let Some(latest) = mine.iter().map(|d| d.supplement.updated).max() else {
            return Ok(None);
        };
        let current: Vec<&WeightDoc> = mine
            .into_iter()
            .filter(|d| d.supplement.updated == latest)
            .collect();

        let first = current[0];
        let mut table = WeightTable::new(first.slots.clone(), first.metric, first.curve);
        for doc in &current {
            if doc.slots != first.slots {
                bail!(
                    "Weights for {city} updated {latest} disagree on slots: {:?} vs {:?}",
                    first.slots,
                    doc.slots
                );
            }
            table.insert(&doc.key, doc.supplement.forecast_distance, doc.weights.clone())?;
        }
        debug!("Read {} weight vector(s) for {city} updated {latest}", current.len());
        Ok(Some(table))
    }

    pub fn read_errors(&self) -> Result<Vec<ErrorDoc>> {
        self.read_collection(&self.collections.errors)
    }

    pub fn read_produced(&self) -> Result<Vec<ProducedDoc>> {
        self.read_collection(&self.collections.produced)
    }

    // -- plumbing --

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.output_dir.join(format!("{collection}.json"))
    }

    fn read_collection<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    /// Replace documents with the same identity, append the rest.
    /// Returns the number of documents written.
    fn upsert<T, F>(&self, collection: &str, docs: Vec<T>, same: F) -> Result<usize>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T, &T) -> bool,
    {
        let mut existing: Vec<T> = self.read_collection(collection)?;
        let written = docs.len();
        for doc in docs {
            match existing.iter().position(|old| same(old, &doc)) {
                Some(i) => existing[i] = doc,
                None => existing.push(doc),
            }
        }

        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating {}", self.output_dir.display()))?;
        let path = self.collection_path(collection);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(&existing).context("serialising documents")?;
        std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;

        debug!("Upserted {written} document(s) into '{collection}'");
        Ok(written)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Date used as the `updated` stamp of documents written today.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::Metric;

    fn store(dir: &Path) -> FileStore {
        FileStore::new(dir, dir.join("out"), "weather_date", Collections::default())
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn table(w: [f64; 2]) -> WeightTable {
        let mut t = WeightTable::new(vec!["a".into(), "b".into()], Metric::Euclidean, WeightCurve::Inverse);
        t.insert("t_max", 0, w.to_vec()).unwrap();
        t.insert("t_max", 1, vec![0.5, 0.5]).unwrap();
        t
    }

    #[test]
    fn finds_sources_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("alpha.csv"),
            "city,weather_date,forecast_distance,t\nLviv,2024-01-01,0,3\n",
        )
        .unwrap();
        let s = store(dir.path());

        let recs = s.load_source("alpha").unwrap();
        assert_eq!(recs.len(), 1);
        assert!(s.load_source("beta").is_err());
    }

    #[test]
    fn weights_upsert_and_read_latest() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let sup = Supplement::new("Lviv", Some("UA"), 0, date("2024-01-01"));

        assert_eq!(s.write_weights(&sup, &table([0.9, 0.1])).unwrap(), 2);
        // Same day again: replaced, not duplicated.
        s.write_weights(&sup, &table([0.8, 0.2])).unwrap();
        let docs: Vec<WeightDoc> = s.read_collection("weights").unwrap();
        assert_eq!(docs.len(), 2);

        let later = Supplement::new("Lviv", Some("UA"), 0, date("2024-01-05"));
        s.write_weights(&later, &table([0.3, 0.7])).unwrap();

        let read = s.read_weights("Lviv", Some("UA")).unwrap().unwrap();
        assert_eq!(read.get("t_max", 0), Some(&[0.3, 0.7][..]));
        assert_eq!(read.get("t_max", 1), Some(&[0.5, 0.5][..]));
        assert!(s.read_weights("Lviv", None).unwrap().is_none());
    }

    #[test]
    fn produced_and_errors_are_keyed_by_label_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let sup = Supplement::new("Lviv", None, 2, date("2024-01-01"));

        let bundle = MatrixBundle::from_rows(
            [("t_max", vec![vec![1.0, 2.0]])],
            vec![RawValue::from(date("2024-01-02")), RawValue::from(date("2024-01-01"))],
            vec!["predicted".into()],
        )
        .unwrap();
        assert_eq!(s.write_produced(&sup, &bundle).unwrap(), 2);
        s.write_produced(&sup, &bundle).unwrap();
        let produced = s.read_produced().unwrap();
        assert_eq!(produced.len(), 2);
        assert_eq!(produced[1].data["t_max"], 2.0);
        assert_eq!(produced[0].supplement.forecast_distance, 2);

        let errors = ErrorRecord {
            metric: Metric::Euclidean,
            folds: 3,
            errors: BTreeMap::from([("t_max".to_string(), 0.25)]),
        };
        s.write_errors(&sup, &errors).unwrap();
        s.write_errors(&sup, &errors).unwrap();
        let read = s.read_errors().unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].error, 0.25);
    }

    #[test]
    fn non_finite_cells_never_reach_the_output() {
        use crate::align::{align, AlignOptions, AlignPolicy, FieldSpec, KeyMap, SourceRecords};
        use crate::estimator::produce;

        let dir = tempfile::tempdir().unwrap();
        let header = "city,weather_date,forecast_distance,t_max\n";
        std::fs::write(
            dir.path().join("a.csv"),
            format!("{header}Lviv,2024-01-01,0,NaN\nLviv,2024-01-02,0,3\n"),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.csv"),
            format!("{header}Lviv,2024-01-01,0,5\nLviv,2024-01-02,0,inf\n"),
        )
        .unwrap();
        let s = store(dir.path());

        let sources = ["a", "b"].map(|n| SourceRecords::new(n, s.load_source(n).unwrap()));
        let map: KeyMap = [("t_max".to_string(), FieldSpec::path("t_max"))].into();
        let aligned = align(&sources, None, &map, &AlignOptions::new(AlignPolicy::Union)).unwrap();
        let blended = produce(&aligned.candidates, &table([0.9, 0.1]), None).unwrap();

        let sup = Supplement::new("Lviv", None, 0, date("2024-01-03"));
        s.write_produced(&sup, &blended).unwrap();
        // A second upsert re-reads the collection written by the first.
        s.write_produced(&sup, &blended).unwrap();

        let produced = s.read_produced().unwrap();
        assert_eq!(produced.len(), 2);
        assert!((produced[0].data["t_max"] - 3.0).abs() < 1e-12);
        assert!((produced[1].data["t_max"] - 5.0).abs() < 1e-12);
    }
}
