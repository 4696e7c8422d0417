//! Cache latency benchmark
//!
//! Runs set/get/delete cycles on a scratch `bench:{run}:{n}` namespace.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatcache_core::cache::{CacheBackend, CacheValue};
use tracing::info;

use crate::error::{Error, Result};

const BENCH_TTL_SECONDS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkReport {
    pub iterations: usize,
    /// Individual cache operations performed (three per iteration)
    pub operations: usize,
    pub elapsed: Duration,
    pub ops_per_sec: f64,
    pub mean: Duration,
    pub p99: Duration,
}

pub struct Benchmark {
    backend: Arc<CacheBackend>,
}

impl Benchmark {
    #[must_use]
    pub const fn new(backend: Arc<CacheBackend>) -> Self {
        Self { backend }
    }

    pub async fn run(&self, iterations: usize) -> Result<BenchmarkReport> {
        if iterations == 0 {
            return Err(Error::Configuration(
                "Benchmark needs at least one iteration".to_string(),
            ));
        }

        let run_id = nanoid::nanoid!(8);
        let payload = CacheValue::Text("x".repeat(256));
        let mut latencies = Vec::with_capacity(iterations * 3);
        let started = Instant::now();

        for n in 0..iterations {
            let key = format!("bench:{run_id}:{n}");

            let op = Instant::now();
            self.backend.set(&key, &payload, BENCH_TTL_SECONDS).await?;
            latencies.push(op.elapsed());

            let op = Instant::now();
            let read = self.backend.get(&key).await?;
            latencies.push(op.elapsed());
            if read.as_ref() != Some(&payload) {
                return Err(Error::Core(chatcache_core::Error::Cache(format!(
                    "Benchmark read back a different value for {key}"
                ))));
            }

            let op = Instant::now();
            self.backend.delete(&[key]).await?;
            latencies.push(op.elapsed());
        }

        let report = summarize(iterations, started.elapsed(), latencies);
        info!(
            iterations,
            ops_per_sec = report.ops_per_sec,
            mean_us = report.mean.as_micros() as u64,
            p99_us = report.p99.as_micros() as u64,
            "Cache benchmark finished"
        );
        Ok(report)
    }
}

fn summarize(iterations: usize, elapsed: Duration, mut latencies: Vec<Duration>) -> BenchmarkReport {
    latencies.sort_unstable();
    let operations = latencies.len();
    let total: Duration = latencies.iter().sum();
    let mean = total / u32::try_from(operations.max(1)).unwrap_or(u32::MAX);
    let p99_index = (operations * 99).div_ceil(100).saturating_sub(1);
    let p99 = latencies.get(p99_index).copied().unwrap_or_default();
    let seconds = elapsed.as_secs_f64();

    BenchmarkReport {
        iterations,
        operations,
        elapsed,
        ops_per_sec: if seconds > 0.0 {
            operations as f64 / seconds
        } else {
            0.0
        },
        mean,
        p99,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_percentiles() {
        let latencies: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        let report = summarize(34, Duration::from_secs(2), latencies);
        assert_eq!(report.operations, 100);
        assert_eq!(report.p99, Duration::from_millis(99));
        assert_eq!(report.mean, Duration::from_micros(50_500));
        assert!((report.ops_per_sec - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_benchmark_leaves_no_keys() {
        let backend = Arc::new(CacheBackend::in_memory());
        let report = Benchmark::new(backend.clone()).run(20).await.unwrap();
        assert_eq!(report.operations, 60);
        assert!(backend.keys_by_pattern("bench:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_iterations_rejected() {
        let backend = Arc::new(CacheBackend::in_memory());
        assert!(matches!(
            Benchmark::new(backend).run(0).await,
            Err(Error::Configuration(_))
        ));
    }
}
