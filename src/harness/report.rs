//! Result of one test run.

use std::time::Duration;

use serde::Serialize;

use super::consumer::Tally;
use crate::worker::WorkerKind;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub worker: String,
    pub pool_size: usize,
    pub successful: u64,
    pub errors: u64,
    pub duplicates: u64,
    pub total_published: u64,
    /// Time spent publishing the batch.
    pub publish_time: Duration,
    /// Time spent waiting for the batch to come back.
    pub wait_time: Duration,
    pub total_time: Duration,
    /// Messages per second over publish plus wait.
    pub throughput: f64,
    /// Messages per second over the wait alone, excluding any already
    /// consumed when the wait began.
    pub raw_throughput: f64,
}

impl RunReport {
    pub(crate) fn new(
        worker: WorkerKind,
        pool_size: usize,
        published: u64,
        tally: Tally,
        consumed_before_wait: u64,
        publish_time: Duration,
        wait_time: Duration,
    ) -> Self {
        let total_time = publish_time + wait_time;
        Self {
            worker: worker.to_string(),
            pool_size,
            successful: tally.consumed,
            errors: tally.errors,
            duplicates: tally.duplicates,
            total_published: published,
            publish_time,
            wait_time,
            total_time,
            throughput: per_second(published, total_time),
            raw_throughput: per_second(published.saturating_sub(consumed_before_wait), wait_time),
        }
    }

    pub fn total_consumed(&self) -> u64 {
        self.successful + self.errors
    }

    /// Every published message came back signed correctly.
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.duplicates == 0 && self.successful == self.total_published
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Tests done.")?;
        writeln!(f, "  Successful: {}", self.successful)?;
        writeln!(f, "  Errors: {}", self.errors)?;
        if self.duplicates > 0 {
            writeln!(f, "  Duplicates: {}", self.duplicates)?;
        }
        writeln!(f, "  Total Consumed: {}", self.total_consumed())?;
        writeln!(f, "  Total Published: {}", self.total_published)?;
        writeln!(f, "  Time: {:.3}ms", self.wait_time.as_secs_f64() * 1000.0)?;
        writeln!(f, "  Total Throughput: {:.2} req/s", self.throughput)?;
        write!(f, "  Raw Consumer Throughput: {:.2} req/s", self.raw_throughput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        RunReport::new(
            WorkerKind::Direct,
            2,
            100,
            Tally {
                consumed: 98,
                errors: 2,
                duplicates: 0,
            },
            0,
            Duration::from_millis(500),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn throughput_uses_total_and_wait_time() {
        let r = report();
        assert_eq!(r.total_time, Duration::from_secs(1));
        assert!((r.throughput - 100.0).abs() < 1e-9);
        assert!((r.raw_throughput - 200.0).abs() < 1e-9);
        assert_eq!(r.total_consumed(), 100);
        assert!(!r.is_clean());
    }

    #[test]
    fn zero_elapsed_does_not_divide_by_zero() {
        let r = RunReport::new(
            WorkerKind::Pooled,
            2,
            0,
            Tally::default(),
            0,
            Duration::ZERO,
            Duration::ZERO,
        );
        assert_eq!(r.throughput, 0.0);
        assert!(r.is_clean());
    }

    #[test]
    fn display_lists_every_field() {
        let text = report().to_string();
        for needle in [
            "Successful: 98",
            "Errors: 2",
            "Total Consumed: 100",
            "Total Published: 100",
            "Time: 500.000ms",
            "Total Throughput: 100.00 req/s",
            "Raw Consumer Throughput: 200.00 req/s",
        ] {
            assert!(text.contains(needle), "missing {needle:?} in:\n{text}");
        }
        assert!(!text.contains("Duplicates"));
    }
}
