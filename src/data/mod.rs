/// Data layer: raw records, loading, selection, matrices and persistence.
///
/// Architecture:
/// ```text
///  <data_dir>/<source>.json / .csv / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Vec<RawRecord>
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  SearchKey (city, distance, limit) → newest-first slice
///   └──────────┘
///        │
///        ▼
///   align / estimator  → MatrixBundle, WeightTable, ErrorRecord
///        │
///        ▼
///   ┌──────────┐
///   │  store    │  upsert documents → <output_dir>/<collection>.json
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod matrix;
pub mod model;
pub mod store;
