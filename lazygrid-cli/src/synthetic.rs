//! A deterministic stand-in for a remote table.

use std::ops::Range;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use lazygrid_lib::error::Error;
use lazygrid_lib::frame::CellResult;
use lazygrid_lib::frame::RowLoader;
use lazygrid_lib::model::ColumnDescriptor;
use lazygrid_lib::model::Value;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

const CITIES: [&str; 8] = [
    "Antwerp", "Bergen", "Cork", "Dresden", "Espoo", "Faro", "Graz", "Haarlem",
];
const SYLLABLES: [&str; 10] = ["ka", "lo", "mi", "ne", "ru", "sa", "ti", "vo", "ze", "an"];

/// Generates the same row for the same seed and index, however the rows are
/// batched, and can pretend to be slow.
#[derive(Debug)]
pub struct SyntheticLoader {
    seed: u64,
    latency: Duration,
    calls: AtomicUsize,
    rows_loaded: AtomicUsize,
}

impl SyntheticLoader {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            rows_loaded: AtomicUsize::new(0),
        }
    }

    /// Sleeps this long in every call.
    pub fn with_latency_ms(mut self, millis: u64) -> Self {
        self.latency = Duration::from_millis(millis);
        self
    }

    /// The table header. `notes` cannot be sorted.
    pub fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id"),
            ColumnDescriptor::new("name"),
            ColumnDescriptor::new("city"),
            ColumnDescriptor::new("score"),
            ColumnDescriptor::new("active"),
            ColumnDescriptor::new("notes").with_sortable(false),
        ]
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn rows_loaded(&self) -> usize {
        self.rows_loaded.load(Ordering::Relaxed)
    }

    fn cell(&self, row: usize, column: &str) -> CellResult {
        let mut rng = StdRng::seed_from_u64(self.seed ^ (row as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let name: String = (0..rng.random_range(2..4))
            .map(|_| SYLLABLES[rng.random_range(0..SYLLABLES.len())])
            .collect();
        let city = CITIES[rng.random_range(0..CITIES.len())];
        let score = (rng.random_range(0.0..100.0f64) * 10.0).round() / 10.0;
        let active = rng.random_bool(0.7);

        let value = match column {
            "id" => Value::from(row as i64),
            "name" => Value::from(name),
            "city" => Value::from(city),
            "score" => Value::from(score),
            "active" => Value::from(active),
            "notes" if row % 7 == 0 => Value::from(format!("checked by {city}")),
            "notes" => Value::Null,
            other => return Err(Error::fetch(format!("no such column '{other}'"))),
        };
        Ok(value)
    }
}

#[async_trait]
impl RowLoader for SyntheticLoader {
    async fn load(&self, rows: Range<usize>, columns: &[String]) -> Result<Vec<Vec<CellResult>>, Error> {
        log::debug!("Synthetic load of rows {}..{} ({:?})", rows.start, rows.end, columns);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.rows_loaded.fetch_add(rows.len(), Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(rows
            .map(|row| columns.iter().map(|column| self.cell(row, column)).collect())
            .collect())
    }
}
