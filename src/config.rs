use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::align::{FieldSpec, KeyMap};
use crate::data::store::{Collections, FileStore};
use crate::estimator::Estimator;
use crate::preprocess::PreprocessSpec;
use crate::reducer::{Metric, Reducer};
use crate::weights::{WeightCurve, WeightPostprocess};

/// Environment variable consulted for the config path.
pub const CONFIG_ENV: &str = "FORECAST_CONSENSUS_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("config validation error: {0}")]
    Validation(String),
    #[error("cannot read config {path}: {message}")]
    Io { path: PathBuf, message: String },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Directory holding one file per source (`<name>.json|csv|parquet`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Dotted path of the field records are aligned on.
    #[serde(default = "default_label_key")]
    pub label_key: String,
    /// Candidate sources, in slot order.
    pub sources: Vec<String>,
    /// Source holding the observed values.
    pub truth: String,
    #[serde(default)]
    pub collections: Collections,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub weight_curve: WeightCurve,
    #[serde(default = "default_folds")]
    pub folds: usize,
    /// Default for `--limit`: newest labels considered per alignment.
    #[serde(default)]
    pub limit: Option<usize>,
    pub keys: BTreeMap<String, KeyConfig>,
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// One output variable: where to find it and how to turn it into a number.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    /// Dotted field path.
    pub path: String,
    /// Paths tried in order when `path` does not resolve.
    #[serde(default)]
    pub fallback: Vec<String>,
    #[serde(default)]
    pub preprocess: Vec<PreprocessSpec>,
    /// Snap learned weights to the single best source.
    #[serde(default)]
    pub max_weight: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_label_key() -> String {
    "weather_date".into()
}

fn default_folds() -> usize {
    3
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ModelConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: ModelConfig =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file. Relative directories are resolved
    /// against the file's own directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut config = Self::from_toml(&text)?;
        if let Some(base) = path.parent() {
            config.data_dir = base.join(&config.data_dir);
            config.output_dir = base.join(&config.output_dir);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.sources.is_empty() {
            return invalid("at least one source is required".into());
        }
        let mut seen = BTreeSet::new();
        for s in &self.sources {
            if !seen.insert(s) {
                return invalid(format!("source '{s}' listed twice"));
            }
        }
        if seen.contains(&self.truth) {
            return invalid(format!("truth source '{}' is also a candidate", self.truth));
        }
        if self.keys.is_empty() {
            return invalid("at least one key is required".into());
        }
        if self.folds == 0 {
            return invalid("folds must be at least 1".into());
        }
        if self.limit == Some(0) {
            return invalid("limit must be at least 1".into());
        }
        if self.label_key.is_empty() {
            return invalid("label_key must not be empty".into());
        }

        self.reducer()?;
        self.weight_curve
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.key_map()?;
        Ok(())
    }

    // -- derived objects --

    pub fn reducer(&self) -> Result<Box<dyn Reducer>, ConfigError> {
        self.metric
            .reducer()
            .map_err(|e| ConfigError::Validation(format!("metric: {e}")))
    }

    pub fn key_map(&self) -> Result<KeyMap, ConfigError> {
        let mut map = KeyMap::new();
        for (name, key) in &self.keys {
            if key.path.is_empty() || key.fallback.iter().any(String::is_empty) {
                return Err(ConfigError::Validation(format!("key '{name}': empty path")));
            }
            let mut spec = FieldSpec::path(&key.path);
            for path in &key.fallback {
                spec = spec.or(path);
            }
            for step in &key.preprocess {
                let p = step
                    .build()
                    .map_err(|e| ConfigError::Validation(format!("key '{name}': {e}")))?;
                spec = spec.then_boxed(p);
            }
            map.insert(name.clone(), spec);
        }
        Ok(map)
    }

    /// An estimator carrying the configured curve and postprocessing,
    /// without horizons yet.
    pub fn estimator(&self) -> Estimator {
        self.keys
            .iter()
            .filter(|(_, k)| k.max_weight)
            .fold(
                Estimator::default().with_curve(self.weight_curve),
                |est, (name, _)| est.with_postprocess(name, WeightPostprocess::MaxWeight),
            )
    }

    pub fn store(&self) -> FileStore {
        FileStore::new(
            &self.data_dir,
            &self.output_dir,
            &self.label_key,
            self.collections.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
sources = ["sinoptik", "meteo", "gismeteo"]
truth = "actual_weather"
metric = { minkowski = 1.0 }
weight_curve = "complement"
folds = 4

[keys.t_min]
path = "temperature.min"

[keys.pressure]
path = "pressure"
preprocess = [{ scale = { factor = 0.75 } }]

[keys.class]
path = "description"
fallback = ["summary"]
preprocess = [{ word_class = { sun = 1, cloud = 2, rain = 3 } }]
max_weight = true
"#;

    #[test]
    fn parse_valid() {
        let config = ModelConfig::from_toml(VALID).unwrap();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.truth, "actual_weather");
        assert_eq!(config.metric, Metric::Minkowski(1.0));
        assert_eq!(config.weight_curve, WeightCurve::Complement);
        assert_eq!(config.folds, 4);
        assert_eq!(config.label_key, "weather_date");
        assert_eq!(config.collections, Collections::default());
        assert!(config.keys["class"].max_weight);

        let map = config.key_map().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["class"].paths().len(), 2);
    }

    #[test]
    fn defaults_apply() {
        let config = ModelConfig::from_toml(
            r#"
sources = ["a"]
truth = "t"
[keys.x]
path = "x"
"#,
        )
        .unwrap();
        assert_eq!(config.metric, Metric::Euclidean);
        assert_eq!(config.weight_curve, WeightCurve::Inverse);
        assert_eq!(config.folds, 3);
        assert_eq!(config.limit, None);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn reject_truth_among_sources() {
        let err = ModelConfig::from_toml(
            r#"
sources = ["a", "t"]
truth = "t"
[keys.x]
path = "x"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn reject_bad_parameters() {
        let base = "sources = [\"a\"]\ntruth = \"t\"\n";
        for extra in [
            "metric = { minkowski = 0.0 }\n[keys.x]\npath = \"x\"\n",
            "weight_curve = { softmax = { temperature = -1.0 } }\n[keys.x]\npath = \"x\"\n",
            "folds = 0\n[keys.x]\npath = \"x\"\n",
            "[keys.x]\npath = \"x\"\npreprocess = [{ word_class = {} }]\n",
        ] {
            let err = ModelConfig::from_toml(&format!("{base}{extra}")).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "{extra}: {err}");
        }
    }

    #[test]
    fn reject_unknown_fields() {
        let err = ModelConfig::from_toml(
            r#"
sources = ["a"]
truth = "t"
colour = "blue"
[keys.x]
path = "x"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_resolves_relative_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.toml");
        std::fs::write(&path, "sources = [\"a\"]\ntruth = \"t\"\n[keys.x]\npath = \"x\"\n").unwrap();

        let config = ModelConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, dir.path().join("data"));
        assert!(matches!(
            ModelConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
