use drillscan_core::{
    DrillPolicy, JsonFileSink, NodeFailure, NodeStatus, ReportSink, ScanError, ScanJob, ScanNode,
    ScanReport, ScanWarning, WarningKind, should_drill,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn finished(path: &str, depth: u32, size: u64) -> ScanNode {
    let mut node = ScanNode::pending(path, depth);
    node.size_bytes = size;
    node.immediate_file_bytes = size;
    node.status = NodeStatus::Drilled;
    node.measured = true;
    node.complete = true;
    node
}

fn sample_report() -> ScanReport {
    let mut root = finished("/data", 0, 0);
    let mut skipped = ScanNode::pending("/data/private", 1);
    skipped.status = NodeStatus::SkippedNoAccess;
    let mut cancelled = ScanNode::pending("/data/late", 1);
    cancelled.status = NodeStatus::Error;
    cancelled.failure = Some(NodeFailure::Cancelled);
    cancelled.size_bytes = 7;

    root.children = vec![finished("/data/big", 1, 4096), skipped, cancelled];
    root.immediate_file_bytes = 10;
    root.size_bytes = root.immediate_file_bytes + root.children_bytes();
    root.expanded = true;
    root.complete = false;

    let job = ScanJob::builder()
        .root("/data")
        .threshold_bytes(1024u64)
        .max_depth(2u32)
        .build()
        .unwrap();
    let warnings = vec![ScanWarning::new(
        "/data/private",
        "Permission denied",
        WarningKind::PermissionDenied,
    )];
    ScanReport::new(root, job, Duration::from_millis(12), warnings, true)
}

#[test]
fn test_report_distinguishes_unmeasured_nodes() {
    let report = sample_report();

    assert_eq!(report.total_size(), 10 + 4096 + 7);
    assert!(!report.is_complete());
    assert!(report.has_warnings());
    assert_eq!(report.stats.skipped_nodes, 1);
    assert_eq!(report.stats.error_nodes, 1);
    assert_eq!(report.stats.expanded_nodes, 1);

    let private = report.root.find(Path::new("/data/private")).unwrap();
    assert!(!private.measured);
    assert_eq!(private.size_bytes, 0);

    let late = report.root.find(Path::new("/data/late")).unwrap();
    assert!(late.is_cancelled());
}

#[test]
fn test_report_serializes_to_json() {
    let report = sample_report();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["root"]["status"], "Drilled");
    assert_eq!(json["root"]["children"][1]["status"], "SkippedNoAccess");
    assert_eq!(json["job"]["threshold_bytes"], 1024);
    assert!(json["scanned_at"].is_string());
}

#[test]
fn test_json_file_sink_writes_report() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("report.json");
    let sink = JsonFileSink::new(&out);

    sink.accept(&sample_report()).unwrap();

    let text = std::fs::read_to_string(&out).unwrap();
    let parsed: ScanReport = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.root, sample_report().root);
    assert_eq!(parsed.root_path, PathBuf::from("/data"));
}

#[test]
fn test_json_file_sink_reports_io_failure() {
    let temp = TempDir::new().unwrap();
    let sink = JsonFileSink::new(temp.path().join("missing-dir").join("report.json"));
    let err = sink.accept(&sample_report()).unwrap_err();
    assert!(err.to_string().contains("missing-dir"));
}

#[test]
fn test_policy_matches_free_function() {
    let policy = DrillPolicy::new(1 << 30, 2);
    for depth in 0..4 {
        for size in [0, (1 << 29), 1 << 30, 3 << 30] {
            assert_eq!(
                policy.should_drill(size, depth),
                should_drill(size, depth, 1 << 30, 2)
            );
        }
    }
}

#[test]
fn test_error_messages() {
    let err = ScanError::invalid("max_depth must be between 1 and 10, got 0");
    assert!(err.to_string().contains("max_depth"));
    assert!(err.is_invalid_request());

    let err = ScanError::NotADirectory {
        path: PathBuf::from("/etc/hosts"),
    };
    assert!(err.to_string().contains("/etc/hosts"));
}
