//! Processing counters and timing.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters shared by every request of a run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Payloads transformed, densified or checked successfully
    pub payloads_processed: AtomicU64,

    /// Payloads rejected with an error
    pub payloads_failed: AtomicU64,

    /// Positions (or CityJSON vertices) passed through a transform function
    pub positions_transformed: AtomicU64,

    /// Positions whose height was dropped as non-finite
    pub heights_dropped: AtomicU64,

    /// Density checks that found segments over the limit
    pub density_checks_failed: AtomicU64,

    start_time: Option<Instant>,

    /// Time spent transforming (microseconds, summed across threads)
    pub transform_us: AtomicU64,

    /// Time spent densifying and checking density (microseconds)
    pub densify_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Self::default()
        })
    }

    pub fn add_payload_processed(&self) {
        self.payloads_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_payload_failed(&self) {
        self.payloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_positions_transformed(&self, count: u64) {
        self.positions_transformed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_heights_dropped(&self, count: u64) {
        self.heights_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_density_check_failed(&self) {
        self.density_checks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_transform_time(&self, duration: Duration) {
        self.transform_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_densify_time(&self, duration: Duration) {
        self.densify_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    pub fn positions_per_second(&self) -> f64 {
        let positions = self.positions_transformed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            positions as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            payloads_processed: self.payloads_processed.load(Ordering::Relaxed),
            payloads_failed: self.payloads_failed.load(Ordering::Relaxed),
            positions_transformed: self.positions_transformed.load(Ordering::Relaxed),
            heights_dropped: self.heights_dropped.load(Ordering::Relaxed),
            density_checks_failed: self.density_checks_failed.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            positions_per_second: self.positions_per_second(),
            transform_secs: self.transform_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            densify_secs: self.densify_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub payloads_processed: u64,
    pub payloads_failed: u64,
    pub positions_transformed: u64,
    pub heights_dropped: u64,
    pub density_checks_failed: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub positions_per_second: f64,
    pub transform_secs: f64,
    pub densify_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Payloads: {} processed, {} failed | Positions: {} @ {:.0}/s | \
             Heights dropped: {} | Density checks failed: {} | \
             Time: transform {:.3}s densify {:.3}s | Elapsed: {:.1}s",
            self.payloads_processed,
            self.payloads_failed,
            self.positions_transformed,
            self.positions_per_second,
            self.heights_dropped,
            self.density_checks_failed,
            self.transform_secs,
            self.densify_secs,
            self.elapsed.as_secs_f64(),
        )
    }
}
