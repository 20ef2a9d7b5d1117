//! Pure functions applied to a raw field before it becomes a matrix entry.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::data::model::RawValue;
use crate::error::{ModelError, ModelResult};

/// One step of a key's preprocessing chain.
pub trait Preprocessor: fmt::Debug + Send + Sync {
    fn apply(&self, value: RawValue) -> ModelResult<RawValue>;
}

/// Wraps a closure so ad-hoc steps can sit next to the built-in ones.
pub struct FnPreprocessor<F> {
    name: &'static str,
    f: F,
}

impl<F> FnPreprocessor<F>
where
    F: Fn(RawValue) -> ModelResult<RawValue> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        FnPreprocessor { name, f }
    }
}

impl<F> fmt::Debug for FnPreprocessor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnPreprocessor({})", self.name)
    }
}

impl<F> Preprocessor for FnPreprocessor<F>
where
    F: Fn(RawValue) -> ModelResult<RawValue> + Send + Sync,
{
    fn apply(&self, value: RawValue) -> ModelResult<RawValue> {
        (self.f)(value)
    }
}

// ---------------------------------------------------------------------------
// Number – coerce text and booleans to numbers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct Number;

impl Preprocessor for Number {
    fn apply(&self, value: RawValue) -> ModelResult<RawValue> {
        match value {
            RawValue::Integer(_) | RawValue::Float(_) | RawValue::Null => Ok(value),
            RawValue::Bool(b) => Ok(RawValue::Integer(b as i64)),
            RawValue::String(ref s) => match s.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(RawValue::Float(v)),
                Ok(_) => Err(ModelError::Alignment(format!("'{s}' is not a finite number"))),
                Err(_) => Err(ModelError::Alignment(format!("'{s}' is not a number"))),
            },
            other => Err(ModelError::Alignment(format!("'{other}' is not a number"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Scale – linear unit conversion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Scale {
    pub factor: f64,
    pub offset: f64,
}

impl Preprocessor for Scale {
    fn apply(&self, value: RawValue) -> ModelResult<RawValue> {
        match value.as_f64() {
            Some(v) => Ok(RawValue::Float(v * self.factor + self.offset)),
            None if value.is_null() => Ok(value),
            None => Err(ModelError::Alignment(format!("cannot scale '{value}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// WordClass – free-text description → numeric class
// ---------------------------------------------------------------------------

/// Maps a description such as "light rain, clouds" to the class of the
/// closest check word by edit distance.
#[derive(Debug, Clone)]
pub struct WordClass {
    check_words: BTreeMap<String, f64>,
}

impl WordClass {
    pub fn new(check_words: BTreeMap<String, f64>) -> ModelResult<Self> {
        if check_words.is_empty() {
            return Err(ModelError::InvalidParameter(
                "word classes need at least one check word".into(),
            ));
        }
        if let Some((w, v)) = check_words.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ModelError::InvalidParameter(format!(
                "class of '{w}' is not a finite number: {v}"
            )));
        }
        let check_words = check_words
            .into_iter()
            .map(|(w, v)| (w.to_lowercase(), v))
            .collect();
        Ok(WordClass { check_words })
    }

    pub fn classify(&self, text: &str) -> f64 {
        let text = text.to_lowercase();
        let best = text
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| !w.is_empty())
            .flat_map(|word| {
                self.check_words
                    .iter()
                    .map(move |(check, class)| (levenshtein(check, word), check, *class))
            })
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        match best {
            Some((_, _, class)) => class,
            None => self
                .check_words
                .values()
                .copied()
                .fold(f64::INFINITY, f64::min),
        }
    }
}

impl Preprocessor for WordClass {
    fn apply(&self, value: RawValue) -> ModelResult<RawValue> {
        match value {
            RawValue::String(s) => Ok(RawValue::Float(self.classify(&s))),
            RawValue::Null => Ok(RawValue::Null),
            other => Err(ModelError::Alignment(format!(
                "word classes expect text, got '{other}'"
            ))),
        }
    }
}

/// Edit distance between two strings, counted in chars.
pub fn levenshtein(s: &str, t: &str) -> usize {
    if s == t {
        return 0;
    }
    let t: Vec<char> = t.chars().collect();
    let mut prev: Vec<usize> = (0..=t.len()).collect();
    let mut cur = vec![0; t.len() + 1];
    for (i, sc) in s.chars().enumerate() {
        cur[0] = i + 1;
        for (j, tc) in t.iter().enumerate() {
            let cost = usize::from(sc != *tc);
            cur[j + 1] = (cur[j] + 1).min(prev[j + 1] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[t.len()]
}

// ---------------------------------------------------------------------------
// PreprocessSpec – configuration form of the built-in preprocessors
// ---------------------------------------------------------------------------

/// In TOML: `preprocess = ["number", { scale = { factor = 0.75, offset = 0 } },
/// { word_class = { sun = 1, rain = 3 } }]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessSpec {
    Number,
    Scale {
        factor: f64,
        #[serde(default)]
        offset: f64,
    },
    WordClass(BTreeMap<String, f64>),
}

impl PreprocessSpec {
    pub fn build(&self) -> ModelResult<Box<dyn Preprocessor>> {
        Ok(match self {
            PreprocessSpec::Number => Box::new(Number),
            PreprocessSpec::Scale { factor, offset } => Box::new(Scale {
                factor: *factor,
                offset: *offset,
            }),
            PreprocessSpec::WordClass(words) => Box::new(WordClass::new(words.clone())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_words() -> BTreeMap<String, f64> {
        [
            ("sun", 1.0),
            ("cloud", 2.0),
            ("rain", 3.0),
            ("shower", 4.0),
            ("thunderstorm", 5.0),
            ("fog", 6.0),
            ("snow", 7.0),
        ]
        .into_iter()
        .map(|(w, c)| (w.to_string(), c))
        .collect()
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("fog", "fog"), 0);
    }

    #[test]
    fn word_class_picks_closest_check_word() {
        let wc = WordClass::new(weather_words()).unwrap();
        assert_eq!(wc.classify("great thunderstorm and clouing wind"), 5.0);
        assert_eq!(wc.classify("Snowy"), 7.0);
        assert_eq!(wc.classify("Rain"), 3.0);
    }

    #[test]
    fn word_class_without_words_falls_back_to_lowest_class() {
        let wc = WordClass::new(weather_words()).unwrap();
        assert_eq!(wc.classify("  ,, 42 "), 1.0);
    }

    #[test]
    fn word_class_rejects_empty_and_non_text() {
        assert!(WordClass::new(BTreeMap::new()).is_err());
        let wc = WordClass::new(weather_words()).unwrap();
        assert!(matches!(
            wc.apply(RawValue::Integer(3)),
            Err(ModelError::Alignment(_))
        ));
    }

    #[test]
    fn number_parses_text() {
        assert_eq!(Number.apply(RawValue::from(" 12.5 ")).unwrap(), RawValue::Float(12.5));
        assert_eq!(Number.apply(RawValue::Bool(true)).unwrap(), RawValue::Integer(1));
        assert!(Number.apply(RawValue::from("n/a")).is_err());
        assert!(matches!(
            Number.apply(RawValue::from("nan")),
            Err(ModelError::Alignment(_))
        ));
        assert!(Number.apply(RawValue::from("inf")).is_err());
    }

    #[test]
    fn scale_and_closure_compose() {
        let chain: Vec<Box<dyn Preprocessor>> = vec![
            Box::new(Number),
            Box::new(Scale { factor: 2.0, offset: 1.0 }),
            Box::new(FnPreprocessor::new("neg", |v: RawValue| {
                Ok(RawValue::Float(-v.as_f64().unwrap_or_default()))
            })),
        ];
        let out = chain
            .iter()
            .try_fold(RawValue::from("3"), |v, p| p.apply(v))
            .unwrap();
        assert_eq!(out, RawValue::Float(-7.0));
    }

    #[test]
    fn specs_parse_from_toml() {
        #[derive(Deserialize)]
        struct Wrap {
            preprocess: Vec<PreprocessSpec>,
        }
        let w: Wrap = toml::from_str(
            r#"preprocess = ["number", { scale = { factor = 0.5 } }, { word_class = { sun = 1, rain = 3 } }]"#,
        )
        .unwrap();
        assert_eq!(w.preprocess[0], PreprocessSpec::Number);
        assert_eq!(
            w.preprocess[1],
            PreprocessSpec::Scale { factor: 0.5, offset: 0.0 }
        );
        assert!(matches!(&w.preprocess[2], PreprocessSpec::WordClass(m) if m.len() == 2));
        assert!(w.preprocess.iter().all(|s| s.build().is_ok()));
    }
}
