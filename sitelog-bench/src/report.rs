//! Structured benchmark report

use serde::Serialize;

#[derive(Serialize)]
pub struct Report {
    pub generated_at: String,
    pub targets: Vec<TargetReport>,
}

#[derive(Serialize)]
pub struct TargetReport {
    pub name: String,
    pub mean_usec: f64,
    pub stdev_usec: f64,
    pub count: usize,
    pub valid: usize,
    pub iterations: usize,
    pub samples: Vec<SampleReport>,
}

#[derive(Serialize)]
pub struct SampleReport {
    pub elapsed_usec: f64,
    pub outlier: bool,
}
