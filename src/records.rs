use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::reducer::Metric;

/// Cross-validated error per variable key, with the metric that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub metric: Metric,
    pub folds: usize,
    pub errors: BTreeMap<String, f64>,
}

impl ErrorRecord {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.errors.get(key).copied()
    }
}

/// Descriptive annotations attached to persisted records. They have no
/// effect on computation but form the identity records are upserted by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplement {
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub forecast_distance: usize,
    pub updated: NaiveDate,
}

impl Supplement {
    pub fn new(city: &str, country: Option<&str>, forecast_distance: usize, updated: NaiveDate) -> Self {
        Supplement {
            city: city.to_string(),
            country: country.map(str::to_string),
            forecast_distance,
            updated,
        }
    }

    /// Same place and horizon, any update date.
    pub fn same_target(&self, other: &Supplement) -> bool {
        self.city == other.city
            && self.country == other.country
            && self.forecast_distance == other.forecast_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supplement_serialises_without_missing_country() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let s = Supplement::new("Lviv", None, 2, day);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"city": "Lviv", "forecast_distance": 2, "updated": "2024-01-05"})
        );

        let later = Supplement::new("Lviv", None, 2, day.succ_opt().unwrap());
        assert!(s.same_target(&later));
        assert!(!s.same_target(&Supplement::new("Lviv", Some("UA"), 2, day)));
    }
}
