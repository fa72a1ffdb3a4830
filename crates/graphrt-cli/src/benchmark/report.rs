use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Latency statistics in microseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub samples: usize,
    pub min_us: f64,
    pub median_us: f64,
    pub mean_us: f64,
    pub p95_us: f64,
    pub max_us: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatencyRow {
    pub name: String,
    pub summary: Summary,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThroughputRow {
    pub allocation: String,
    pub bytes: usize,
    pub mean_us: f64,
    pub gib_per_s: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub latency: Vec<LatencyRow>,
    #[serde(default)]
    pub memset: Vec<ThroughputRow>,
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

pub fn summarize(samples_us: &[f64]) -> Option<Summary> {
    if samples_us.is_empty() {
        return None;
    }
    let mut sorted = samples_us.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median_us = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    Some(Summary {
        samples: sorted.len(),
        min_us: sorted[0],
        median_us,
        mean_us: sorted.iter().sum::<f64>() / sorted.len() as f64,
        p95_us: percentile(&sorted, 95.0),
        max_us: sorted[sorted.len() - 1],
    })
}

pub fn gib_per_s(bytes: usize, micros: f64) -> f64 {
    if micros <= 0.0 {
        return 0.0;
    }
    (bytes as f64 / (1u64 << 30) as f64) / (micros * 1e-6)
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [(&str, usize); 3] = [("GiB", 1 << 30), ("MiB", 1 << 20), ("KiB", 1 << 10)];
    for (unit, scale) in UNITS {
        if bytes >= scale && bytes % scale == 0 {
            return format!("{} {unit}", bytes / scale);
        }
    }
    format!("{bytes} B")
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.latency.is_empty() && self.memset.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        if !self.latency.is_empty() {
            let _ = writeln!(
                out,
                "{:<32} {:>8} {:>10} {:>10} {:>10} {:>10}",
                "dispatch", "samples", "min us", "median us", "p95 us", "max us"
            );
            for row in &self.latency {
                let s = &row.summary;
                let _ = writeln!(
                    out,
                    "{:<32} {:>8} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
                    row.name, s.samples, s.min_us, s.median_us, s.p95_us, s.max_us
                );
            }
        }
        if !self.memset.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = writeln!(out, "{:<10} {:>10} {:>12} {:>10}", "memset d8", "size", "mean us", "GiB/s");
            for row in &self.memset {
                let _ = writeln!(
                    out,
                    "{:<10} {:>10} {:>12.2} {:>10.2}",
                    row.allocation,
                    format_bytes(row.bytes),
                    row.mean_us,
                    row.gib_per_s
                );
            }
        }
        out
    }
}
