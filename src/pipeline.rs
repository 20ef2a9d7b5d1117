//! Per-city reduce / produce runs over the file store.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use log::{debug, info, warn};

use crate::align::{align, AlignOptions, AlignPolicy, Alignment, KeyMap, SourceRecords};
use crate::config::ModelConfig;
use crate::data::filter::{max_forecast_distance, search, SearchKey};
use crate::data::model::RawRecord;
use crate::data::store::FileStore;
use crate::estimator::{cross_validate, produce};
use crate::records::{ErrorRecord, Supplement};
use crate::reducer::Reducer;
use crate::weights::WeightTable;

/// Which place to work on and how far ahead.
#[derive(Debug, Clone)]
pub struct Target {
    pub city: String,
    pub country: Option<String>,
    /// Largest forecast distance requested; clamped to what the data holds.
    pub max_distance: usize,
    pub limit: Option<usize>,
}

impl Target {
    /// Records are not cut here; `limit` applies to aligned labels.
    fn key(&self, distance: usize) -> SearchKey {
        SearchKey::new(&self.city, self.country.as_deref(), distance)
    }

    fn supplement(&self, distance: usize, updated: NaiveDate) -> Supplement {
        Supplement::new(&self.city, self.country.as_deref(), distance, updated)
    }
}

/// Summary of one produce run at one forecast distance.
#[derive(Debug, Clone)]
pub struct Produced {
    pub forecast_distance: usize,
    pub labels: usize,
    pub errors: Option<ErrorRecord>,
}

/// All source files loaded once, ready for per-city runs.
pub struct Pipeline {
    config: ModelConfig,
    store: FileStore,
    key_map: KeyMap,
    reducer: Box<dyn Reducer>,
    sources: BTreeMap<String, Vec<RawRecord>>,
    truth: Vec<RawRecord>,
}

impl Pipeline {
    pub fn open(config: ModelConfig) -> Result<Self> {
        let store = config.store();
        let key_map = config.key_map()?;
        let reducer = config.reducer()?;

        let mut sources = BTreeMap::new();
        for name in &config.sources {
            sources.insert(name.clone(), store.load_source(name)?);
        }
        let truth = store.load_source(&config.truth)?;

        Ok(Pipeline {
            config,
            store,
            key_map,
            reducer,
            sources,
            truth,
        })
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Learn weights for every distance up to the target's maximum and
    /// persist them.
    pub fn reduce(&self, target: &Target, updated: NaiveDate) -> Result<WeightTable> {
        let max = self.clamp_distance(target)?;

        let mut estimator = self.config.estimator();
        for d in 0..=max {
            let aligned = self.align_at(target, d, AlignPolicy::Union, true)?;
            let truth = aligned
                .truth
                .context("alignment with a truth source returned no truth bundle")?;
            info!(
                "{}: distance {d}, {} aligned label(s)",
                target.city,
                aligned.candidates.len()
            );
            estimator = estimator.with_horizon(d, aligned.candidates, truth);
        }

        let table = estimator
            .reduce(self.reducer.as_ref(), max)
            .with_context(|| format!("reducing weights for {}", target.city))?;
        let written = self
            .store
            .write_weights(&target.supplement(0, updated), &table)?;
        info!("{}: stored {written} weight vector(s)", target.city);
        Ok(table)
    }

    /// Apply the latest stored weights to the newest data and score them
    /// against the truth source.
    pub fn produce(&self, target: &Target, updated: NaiveDate) -> Result<Vec<Produced>> {
        let Some(weights) = self.store.read_weights(&target.city, target.country.as_deref())? else {
            bail!("No weights stored for {}; run reduce first", target.city);
        };
        let max = self.clamp_distance(target)?;

        let mut runs = Vec::with_capacity(max + 1);
        for d in 0..=max {
            let wd = if weights.has_distance(d) {
                d
            } else {
                warn!("{}: no weights for distance {d}, using distance 0", target.city);
                0
            };
            let supplement = target.supplement(d, updated);

            let fresh = self.align_at(target, d, AlignPolicy::Union, false)?;
            let predicted = produce(&fresh.candidates, &weights, Some(wd))?;
            self.store.write_produced(&supplement, &predicted)?;

            let errors = self.score(target, d, wd, &weights)?;
            if let Some(record) = &errors {
                self.store.write_errors(&supplement, record)?;
                for (key, e) in &record.errors {
                    debug!("{}: distance {d}, {key} error {e:.4}", target.city);
                }
            }
            info!(
                "{}: distance {d}, produced {} label(s)",
                target.city,
                predicted.len()
            );
            runs.push(Produced {
                forecast_distance: d,
                labels: predicted.len(),
                errors,
            });
        }
        Ok(runs)
    }

    /// In-sample cross-validation over labels every source and the truth share.
    fn score(
        &self,
        target: &Target,
        d: usize,
        wd: usize,
        weights: &WeightTable,
    ) -> Result<Option<ErrorRecord>> {
        let shared = self.align_at(target, d, AlignPolicy::Intersection, true)?;
        let Some(truth) = shared.truth else {
            return Ok(None);
        };
        let n = shared.candidates.len();
        if n == 0 {
            warn!("{}: distance {d}, no labels shared with truth; skipping errors", target.city);
            return Ok(None);
        }
        let folds = if self.config.folds > n {
            warn!(
                "{}: distance {d}, {} fold(s) over {n} label(s); using {n}",
                target.city, self.config.folds
            );
            n
        } else {
            self.config.folds
        };

        let predicted = produce(&shared.candidates, weights, Some(wd))?;
        Ok(Some(cross_validate(
            &predicted,
            &truth,
            self.reducer.as_ref(),
            folds,
        )?))
    }

    fn align_at(&self, target: &Target, d: usize, policy: AlignPolicy, with_truth: bool) -> Result<Alignment> {
        let key = target.key(d);
        let sources: Vec<SourceRecords> = self
            .config
            .sources
            .iter()
            .map(|name| {
                let records = self.sources.get(name).map(Vec::as_slice).unwrap_or_default();
                SourceRecords::new(name.as_str(), search(records, &key))
            })
            .collect();
        let truth = with_truth.then(|| SourceRecords::new(self.config.truth.as_str(), search(&self.truth, &key)));

        let options = match target.limit {
            Some(limit) => AlignOptions::new(policy).with_limit(limit),
            None => AlignOptions::new(policy),
        };
        let aligned = align(&sources, truth.as_ref(), &self.key_map, &options)
            .with_context(|| format!("aligning {} at distance {d}", target.city))?;
        debug!(
            "{}: distance {d}, {policy:?} alignment kept {} label(s)",
            target.city,
            aligned.candidates.len()
        );
        Ok(aligned)
    }

    /// Requested maximum distance, capped at the largest one the truth
    /// source holds for the place.
    fn clamp_distance(&self, target: &Target) -> Result<usize> {
        let Some(available) = max_forecast_distance(&self.truth, &target.city, target.country.as_deref())
        else {
            bail!("No {} records for {}", self.config.truth, target.city);
        };
        if target.max_distance > available {
            warn!(
                "{}: forecast distance {} not available, capping at {available}",
                target.city, target.max_distance
            );
            return Ok(available);
        }
        Ok(target.max_distance)
    }
}
