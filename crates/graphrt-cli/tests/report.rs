#[path = "../src/benchmark/report.rs"]
mod report;

use report::{format_bytes, gib_per_s, summarize, LatencyRow, Report, ThroughputRow};

#[test]
fn summarize_orders_samples() {
    let summary = summarize(&[5.0, 1.0, 3.0, 2.0, 4.0]).expect("samples");
    assert_eq!(summary.samples, 5);
    assert_eq!(summary.min_us, 1.0);
    assert_eq!(summary.max_us, 5.0);
    assert_eq!(summary.median_us, 3.0);
    assert!((summary.mean_us - 3.0).abs() < 1e-9);
    assert_eq!(summary.p95_us, 5.0);

    let even = summarize(&[4.0, 1.0, 2.0, 3.0]).expect("samples");
    assert!((even.median_us - 2.5).abs() < 1e-9);
    assert!(summarize(&[]).is_none());
}

#[test]
fn p95_uses_nearest_rank() {
    let samples: Vec<f64> = (1..=100).map(f64::from).collect();
    let summary = summarize(&samples).expect("samples");
    assert_eq!(summary.p95_us, 95.0);
    assert_eq!(summarize(&[7.5]).expect("one sample").p95_us, 7.5);
}

#[test]
fn throughput_and_sizes() {
    assert!((gib_per_s(1 << 30, 1e6) - 1.0).abs() < 1e-9);
    assert_eq!(gib_per_s(4096, 0.0), 0.0);
    assert_eq!(format_bytes(4 << 10), "4 KiB");
    assert_eq!(format_bytes(16 << 20), "16 MiB");
    assert_eq!(format_bytes(1000), "1000 B");
}

#[test]
fn report_json_round_trip_tolerates_missing_sections() {
    let report = Report {
        latency: vec![LatencyRow {
            name: "graph_launch_user_stream".to_string(),
            summary: summarize(&[10.0, 12.0]).expect("samples"),
        }],
        memset: vec![ThroughputRow {
            allocation: "device".to_string(),
            bytes: 4 << 20,
            mean_us: 100.0,
            gib_per_s: gib_per_s(4 << 20, 100.0),
        }],
    };
    let json = report.to_json().expect("serialise");
    assert_eq!(Report::from_json(&json).expect("parse"), report);

    let partial = Report::from_json(r#"{"memset": []}"#).expect("parse");
    assert!(partial.is_empty());

    let table = report.render_table();
    assert!(table.contains("graph_launch_user_stream"));
    assert!(table.contains("4 MiB"));
}
