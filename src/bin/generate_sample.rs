//! Writes a synthetic data directory: three forecast sources of different
//! quality (parquet, JSON, CSV) and the observed weather they forecast.
//!
//! Usage: `generate_sample [OUTPUT_DIR]` (default `sample_data`).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Date32Type, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{Days, NaiveDate};
use parquet::arrow::ArrowWriter;
use serde_json::json;

const CITIES: &[(&str, &str, f64)] = &[("Lviv", "UA", 2.0), ("Kalush", "UA", 3.5), ("Krakow", "PL", 4.0)];
const DESCRIPTIONS: &[&str] = &["sunny", "cloudy", "light rain", "showers", "thunderstorm", "fog", "snow"];
const DAYS: u64 = 60;
const MAX_DISTANCE: i64 = 3;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    fn pick(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// One flat record; nested fields use dotted names.
struct Row {
    city: &'static str,
    country: &'static str,
    forecast_distance: i64,
    date: NaiveDate,
    t_min: f64,
    t_max: f64,
    pressure: f64,
    humidity: Option<f64>,
    description: String,
}

/// Forecast quality of one source: temperature bias and noise, growing
/// with the forecast distance.
struct SourceProfile {
    name: &'static str,
    bias: f64,
    noise: f64,
    /// Chance of reporting a different description than observed.
    misread: f64,
    /// Chance of leaving humidity out.
    gaps: f64,
}

fn observed(rng: &mut SimpleRng, start: NaiveDate) -> Vec<Row> {
    let mut rows = Vec::new();
    for &(city, country, swing) in CITIES {
        for day in 0..DAYS {
            let date = start + Days::new(day);
            let season = (day as f64 / DAYS as f64 * std::f64::consts::PI).sin();
            let t_min = -4.0 + 8.0 * season + rng.gauss(0.0, swing);
            let t_max = t_min + 5.0 + rng.gauss(0.0, 1.5).abs();
            let pressure = 1013.0 + rng.gauss(0.0, 6.0);
            let humidity = (70.0 + rng.gauss(0.0, 10.0)).clamp(20.0, 100.0);
            let description = DESCRIPTIONS[rng.pick(DESCRIPTIONS.len())].to_string();
            // Observations are repeated for every horizon they can be
            // compared against.
            for d in 0..=MAX_DISTANCE {
                rows.push(Row {
                    city,
                    country,
                    forecast_distance: d,
                    date,
                    t_min,
                    t_max,
                    pressure,
                    humidity: Some(humidity),
                    description: description.clone(),
                });
            }
        }
    }
    rows
}

fn forecast(rng: &mut SimpleRng, truth: &[Row], profile: &SourceProfile) -> Vec<Row> {
    truth
        .iter()
        .map(|obs| {
            let spread = profile.noise * (1.0 + 0.5 * obs.forecast_distance as f64);
            let description = if rng.next_f64() < profile.misread {
                DESCRIPTIONS[rng.pick(DESCRIPTIONS.len())].to_string()
            } else {
                obs.description.clone()
            };
            let humidity = if rng.next_f64() < profile.gaps {
                None
            } else {
                obs.humidity.map(|h| h + rng.gauss(0.0, 3.0 * spread))
            };
            Row {
                city: obs.city,
                country: obs.country,
                forecast_distance: obs.forecast_distance,
                date: obs.date,
                t_min: obs.t_min + profile.bias + rng.gauss(0.0, spread),
                t_max: obs.t_max + profile.bias + rng.gauss(0.0, spread),
                pressure: obs.pressure + rng.gauss(0.0, spread),
                humidity,
                description,
            }
        })
        .collect()
}

fn write_parquet(path: &Path, rows: &[Row]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("city", DataType::Utf8, false),
        Field::new("country", DataType::Utf8, false),
        Field::new("forecast_distance", DataType::Int64, false),
        Field::new("weather_date", DataType::Date32, false),
        Field::new("temperature.min", DataType::Float64, false),
        Field::new("temperature.max", DataType::Float64, false),
        Field::new("pressure", DataType::Float64, false),
        Field::new("humidity", DataType::Float64, true),
        Field::new("description", DataType::Utf8, false),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.city))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.country))),
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.forecast_distance))),
        Arc::new(Date32Array::from_iter_values(
            rows.iter().map(|r| Date32Type::from_naive_date(r.date)),
        )),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.t_min))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.t_max))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.pressure))),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.humidity).collect::<Vec<_>>())),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.description.as_str()))),
    ];

    let batch = RecordBatch::try_new(schema.clone(), columns).context("building record batch")?;
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn write_json(path: &Path, rows: &[Row]) -> Result<()> {
    let docs: Vec<_> = rows
        .iter()
        .map(|r| {
            json!({
                "city": r.city,
                "country": r.country,
                "forecast_distance": r.forecast_distance,
                "weather_date": r.date.format("%Y-%m-%d").to_string(),
                "temperature": { "min": r.t_min, "max": r.t_max },
                "pressure": r.pressure,
                "humidity": r.humidity,
                "description": r.description,
            })
        })
        .collect();
    let text = serde_json::to_string_pretty(&docs)?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

fn write_csv(path: &Path, rows: &[Row]) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    w.write_record([
        "city",
        "country",
        "forecast_distance",
        "weather_date",
        "temperature.min",
        "temperature.max",
        "pressure",
        "humidity",
        "description",
    ])?;
    for r in rows {
        w.write_record([
            r.city.to_string(),
            r.country.to_string(),
            r.forecast_distance.to_string(),
            r.date.format("%Y-%m-%d").to_string(),
            format!("{:.2}", r.t_min),
            format!("{:.2}", r.t_max),
            format!("{:.1}", r.pressure),
            r.humidity.map(|h| format!("{h:.1}")).unwrap_or_default(),
            r.description.clone(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let out = std::env::args().nth(1).unwrap_or_else(|| "sample_data".into());
    let out = Path::new(&out);
    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

    let mut rng = SimpleRng::new(42);
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).context("start date")?;

    let truth = observed(&mut rng, start);
    write_parquet(&out.join("actual_weather.parquet"), &truth)?;

    let profiles = [
        SourceProfile { name: "sinoptik", bias: 0.3, noise: 0.8, misread: 0.1, gaps: 0.0 },
        SourceProfile { name: "meteo", bias: -1.0, noise: 1.5, misread: 0.3, gaps: 0.1 },
        SourceProfile { name: "gismeteo", bias: 1.5, noise: 2.5, misread: 0.5, gaps: 0.2 },
    ];
    for profile in &profiles {
        let rows = forecast(&mut rng, &truth, profile);
        match profile.name {
            "meteo" => write_json(&out.join("meteo.json"), &rows)?,
            "gismeteo" => write_csv(&out.join("gismeteo.csv"), &rows)?,
            _ => write_parquet(&out.join(format!("{}.parquet", profile.name)), &rows)?,
        }
    }

    println!(
        "Wrote {} observations and {} sources for {} cities to {}",
        truth.len(),
        profiles.len(),
        CITIES.len(),
        out.display()
    );
    Ok(())
}
