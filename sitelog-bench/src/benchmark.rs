//! Micro-benchmark harness with outlier filtering
//!
//! Each target is calibrated (iterations per sample doubled until a
//! sample costs at least the measurement budget), sampled, then reduced:
//! samples outside mean ± 2σ are flagged as outliers and the statistics
//! recomputed until at least 95% of samples survive or the set is
//! stable.

use crate::report::{Report, SampleReport, TargetReport};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

const MIN_SAMPLES: usize = 100;
const MAX_SAMPLES: usize = 10_000;

#[derive(Clone, Copy)]
struct Sample {
    elapsed: Duration,
    outlier: bool,
}

pub struct Target {
    budget: Duration,
    iterations: usize,
    count: usize,
    valid: usize,
    mean: Duration,
    stdev: Duration,
    samples: Vec<Sample>,
}

impl Target {
    fn new(budget: Duration) -> Self {
        Self {
            budget,
            iterations: 1,
            count: MIN_SAMPLES,
            valid: 0,
            mean: Duration::ZERO,
            stdev: Duration::ZERO,
            samples: Vec::new(),
        }
    }

    fn time(&self, callable: &mut dyn FnMut(), condition: &mut dyn FnMut()) -> Duration {
        let begin = Instant::now();
        for _ in 0..self.iterations {
            callable();
        }
        condition();
        begin.elapsed()
    }

    /// Double the per-sample iteration count until one sample costs at
    /// least the budget. Also warms the caches.
    fn calibrate(&mut self, callable: &mut dyn FnMut(), condition: &mut dyn FnMut()) {
        self.iterations = 1;
        loop {
            let estimate = self.time(callable, condition);
            if estimate >= self.budget || self.iterations >= 1 << 24 {
                // keep total run time bounded for expensive targets
                let per_iteration = estimate.as_nanos().max(1) as u64 / self.iterations as u64;
                let total_budget = Duration::from_millis(250).as_nanos() as u64;
                let affordable = (total_budget / per_iteration.max(1) / self.iterations as u64)
                    as usize;
                self.count = affordable.clamp(MIN_SAMPLES, MAX_SAMPLES);
                return;
            }
            self.iterations *= 2;
        }
    }

    fn collect(&mut self, callable: &mut dyn FnMut(), condition: &mut dyn FnMut()) {
        self.samples = (0..self.count)
            .map(|_| Sample {
                elapsed: self.time(callable, condition),
                outlier: false,
            })
            .collect();
    }

    /// Z-score style outlier reduction: flag samples outside mean ± 2σ,
    /// recompute, repeat until ≥95% retained or the count stabilizes.
    fn analyze(&mut self) {
        let mut previous = self.samples.len();
        loop {
            let retained: Vec<Duration> = self
                .samples
                .iter()
                .filter(|sample| !sample.outlier)
                .map(|sample| sample.elapsed)
                .collect();
            let total = retained.len().max(1) as u64;
            let mean_nanos = retained.iter().map(|d| d.as_nanos() as u64).sum::<u64>() / total;
            let variance = retained
                .iter()
                .map(|d| {
                    let delta = d.as_nanos() as i64 - mean_nanos as i64;
                    (delta * delta) as u128
                })
                .sum::<u128>()
                / total as u128;
            let stdev_nanos = (variance as f64).sqrt() as u64;

            self.mean = Duration::from_nanos(mean_nanos);
            self.stdev = Duration::from_nanos(stdev_nanos);
            let upper = mean_nanos.saturating_add(2 * stdev_nanos);
            let lower = mean_nanos.saturating_sub(2 * stdev_nanos);

            self.valid = 0;
            for sample in &mut self.samples {
                let nanos = sample.elapsed.as_nanos() as u64;
                sample.outlier = nanos > upper || nanos < lower;
                self.valid += usize::from(!sample.outlier);
            }

            if self.valid * 100 >= self.samples.len() * 95 || self.valid == previous {
                break;
            }
            previous = self.valid;
        }
    }

    fn mean_usec_per_call(&self) -> f64 {
        self.mean.as_secs_f64() * 1e6 / self.iterations as f64
    }

    fn stdev_usec_per_call(&self) -> f64 {
        self.stdev.as_secs_f64() * 1e6 / self.iterations as f64
    }
}

pub struct Benchmark {
    budget: Duration,
    targets: BTreeMap<String, Target>,
}

impl Benchmark {
    pub fn new() -> Self {
        // baseline: the cost of reading the clock bounds what a single
        // sample can resolve
        let mut baseline = Target::new(Duration::from_micros(50));
        baseline.iterations = 10_000;
        baseline.count = 1_000;
        baseline.collect(
            &mut || {
                std::hint::black_box(Instant::now());
            },
            &mut || {},
        );
        baseline.analyze();
        let budget = baseline.mean.max(Duration::from_micros(20));

        let mut targets = BTreeMap::new();
        targets.insert(String::from("<baseline>"), baseline);
        Self { budget, targets }
    }

    /// Measure `callable`, running `condition` once per sample (for
    /// drains, flushes and other settling work).
    pub fn measure_with<C, P>(&mut self, name: &str, mut callable: C, mut condition: P)
    where
        C: FnMut(),
        P: FnMut(),
    {
        let mut target = Target::new(self.budget);
        target.calibrate(&mut callable, &mut condition);
        target.collect(&mut callable, &mut condition);
        target.analyze();
        self.targets.insert(name.to_owned(), target);
    }

    pub fn measure<C: FnMut()>(&mut self, name: &str, callable: C) {
        self.measure_with(name, callable, || {});
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (name, target) in &self.targets {
            let _ = writeln!(
                out,
                "{:>12.5} usec/call (stdev {:.5}), samples {:>5}/{:<5}, {:>8} iterations/sample\t{}",
                target.mean_usec_per_call(),
                target.stdev_usec_per_call(),
                target.valid,
                target.samples.len(),
                target.iterations,
                name,
            );
        }
        out
    }

    pub fn report(&self) -> Report {
        Report {
            generated_at: chrono::Utc::now().to_rfc3339(),
            targets: self
                .targets
                .iter()
                .map(|(name, target)| TargetReport {
                    name: name.clone(),
                    mean_usec: target.mean_usec_per_call(),
                    stdev_usec: target.stdev_usec_per_call(),
                    count: target.samples.len(),
                    valid: target.valid,
                    iterations: target.iterations,
                    samples: target
                        .samples
                        .iter()
                        .map(|sample| SampleReport {
                            elapsed_usec: sample.elapsed.as_secs_f64() * 1e6,
                            outlier: sample.outlier,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl Default for Benchmark {
    fn default() -> Self {
        Self::new()
    }
}
