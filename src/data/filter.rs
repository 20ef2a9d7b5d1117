use super::model::{RawRecord, RawValue};

/// Record field holding the place name.
pub const CITY_FIELD: &str = "city";
/// Record field holding the (optional) country.
pub const COUNTRY_FIELD: &str = "country";
/// Record field holding the forecast distance in days.
pub const DISTANCE_FIELD: &str = "forecast_distance";

// ---------------------------------------------------------------------------
// SearchKey – which records of a source take part in one alignment
// ---------------------------------------------------------------------------

/// Selection predicate for one (place, forecast distance) slice of a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchKey {
    pub city: String,
    /// `None` → any country.
    pub country: Option<String>,
    pub forecast_distance: usize,
    /// Keep only the newest `limit` records.
    pub limit: Option<usize>,
}

impl SearchKey {
    pub fn new(city: &str, country: Option<&str>, forecast_distance: usize) -> Self {
        SearchKey {
            city: city.to_string(),
            country: country.map(str::to_string),
            forecast_distance,
            limit: None,
        }
    }

    /// A record matches when it names the city (and country, if set) and
    /// carries exactly this forecast distance.
    pub fn matches(&self, record: &RawRecord) -> bool {
        place_matches(record, &self.city, self.country.as_deref())
            && distance_of(record) == Some(self.forecast_distance)
    }
}

fn place_matches(record: &RawRecord, city: &str, country: Option<&str>) -> bool {
    let text = |field: &str| record.get(&[field]).and_then(RawValue::as_str);
    if text(CITY_FIELD) != Some(city) {
        return false;
    }
    match country {
        Some(c) => text(COUNTRY_FIELD) == Some(c),
        None => true,
    }
}

fn distance_of(record: &RawRecord) -> Option<usize> {
    let d = record.get(&[DISTANCE_FIELD])?.as_f64()?;
    (d >= 0.0 && d.fract() == 0.0).then_some(d as usize)
}

/// Return indices of records that match `key`, newest label first.
/// Equal labels keep their file order; `limit` then cuts the tail.
pub fn filtered_indices(records: &[RawRecord], key: &SearchKey) -> Vec<usize> {
    let mut hits: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| key.matches(r))
        .map(|(i, _)| i)
        .collect();
    hits.sort_by(|a, b| records[*b].label.cmp(&records[*a].label));
    if let Some(limit) = key.limit {
        hits.truncate(limit);
    }
    hits
}

/// Owned copy of the records selected by `key`.
pub fn search(records: &[RawRecord], key: &SearchKey) -> Vec<RawRecord> {
    filtered_indices(records, key)
        .into_iter()
        .map(|i| records[i].clone())
        .collect()
}

/// Largest forecast distance any record for this place carries.
pub fn max_forecast_distance(records: &[RawRecord], city: &str, country: Option<&str>) -> Option<usize> {
    records
        .iter()
        .filter(|r| place_matches(r, city, country))
        .filter_map(distance_of)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rec(day: u32, city: &str, country: &str, d: i64) -> RawRecord {
        RawRecord::new(NaiveDate::from_ymd_opt(2024, 3, day).unwrap())
            .with(CITY_FIELD, city)
            .with(COUNTRY_FIELD, country)
            .with(DISTANCE_FIELD, d)
    }

    fn days(records: &[RawRecord]) -> Vec<String> {
        records.iter().map(|r| r.label.to_string()).collect()
    }

    #[test]
    fn search_filters_and_sorts_newest_first() {
        let records = vec![
            rec(1, "Lviv", "UA", 0),
            rec(3, "Lviv", "UA", 0),
            rec(2, "Lviv", "UA", 1),
            rec(2, "Kyiv", "UA", 0),
            rec(2, "Lviv", "UA", 0),
        ];
        let key = SearchKey::new("Lviv", Some("UA"), 0);
        assert_eq!(days(&search(&records, &key)), ["2024-03-03", "2024-03-02", "2024-03-01"]);

        let limited = SearchKey {
            limit: Some(2),
            ..key.clone()
        };
        assert_eq!(days(&search(&records, &limited)), ["2024-03-03", "2024-03-02"]);

        assert_eq!(days(&search(&records, &SearchKey::new("Lviv", Some("UA"), 1))), ["2024-03-02"]);
    }

    #[test]
    fn country_is_optional() {
        let records = vec![rec(1, "Paris", "FR", 0), rec(2, "Paris", "US", 0)];
        assert_eq!(search(&records, &SearchKey::new("Paris", None, 0)).len(), 2);
        assert_eq!(search(&records, &SearchKey::new("Paris", Some("US"), 0)).len(), 1);
    }

    #[test]
    fn max_distance_is_per_place() {
        let records = vec![
            rec(1, "Lviv", "UA", 0),
            rec(1, "Lviv", "UA", 6),
            rec(1, "Kyiv", "UA", 9),
        ];
        assert_eq!(max_forecast_distance(&records, "Lviv", None), Some(6));
        assert_eq!(max_forecast_distance(&records, "Odesa", None), None);
    }
}
